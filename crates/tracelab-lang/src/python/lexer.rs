//! A tokenizer for Python source, grouped into logical lines.
//!
//! Only what the rewriter needs is modelled: names, numbers, strings
//! (including prefixed, triple-quoted and f-strings with nested
//! replacement fields), operators, comments, bracket depth and line
//! continuations. Indentation is kept as the raw leading whitespace of each
//! logical line.

use crate::error::{LangError, LangResult};

/// Token classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Identifier or keyword.
    Name,
    /// Numeric literal.
    Number,
    /// String literal, prefix included.
    Str,
    /// Operator or delimiter.
    Op,
    /// `#` comment.
    Comment,
}

/// One token, located by byte range and starting line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    /// Token class.
    pub kind: TokenKind,
    /// Byte offset of the first character.
    pub start: usize,
    /// Byte offset one past the last character.
    pub end: usize,
    /// 1-based line of the first character.
    pub line: u32,
    /// Bracket depth, counting the token's own brackets as outside.
    pub depth: u32,
}

impl Token {
    /// The token's text.
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }

    /// Check for an operator with exactly this text.
    pub fn is_op(&self, source: &str, op: &str) -> bool {
        self.kind == TokenKind::Op && self.text(source) == op
    }
}

/// A logical line: one statement, possibly spanning several physical lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalLine {
    /// Tokens, comments included.
    pub tokens: Vec<Token>,
    /// Line of the first token.
    pub start_line: u32,
    /// Byte offset where the first physical line begins.
    pub line_start: usize,
    /// Leading whitespace of the first physical line.
    pub indent: String,
}

impl LogicalLine {
    /// Tokens without comments.
    pub fn code(&self) -> impl Iterator<Item = &Token> {
        self.tokens.iter().filter(|t| t.kind != TokenKind::Comment)
    }

    /// Last non-comment token.
    pub fn last_code(&self) -> Option<&Token> {
        self.tokens.iter().rev().find(|t| t.kind != TokenKind::Comment)
    }
}

pub const KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class",
    "continue", "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if",
    "import", "in", "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try",
    "while", "with", "yield",
];

/// Check if a name is a hard keyword.
pub fn is_keyword(name: &str) -> bool {
    KEYWORDS.contains(&name)
}

const OPERATORS: &[&str] = &[
    "**=", "//=", ">>=", "<<=", "...", "->", ":=", "==", "!=", "<=", ">=", "**", "//", "<<", ">>",
    "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "@=",
];

const STRING_PREFIXES: &[&str] = &[
    "rb", "br", "fr", "rf", "r", "b", "f", "u",
];

/// Tokenize `source` into logical lines.
pub fn tokenize(source: &str) -> LangResult<Vec<LogicalLine>> {
    Lexer::new(source).run()
}

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    brackets: Vec<(char, u32)>,
    lines: Vec<LogicalLine>,
    current: Option<LogicalLine>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            line: 1,
            brackets: Vec::new(),
            lines: Vec::new(),
            current: None,
        }
    }

    fn peek(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn run(mut self) -> LangResult<Vec<LogicalLine>> {
        let mut line_start = 0;
        while self.pos < self.bytes.len() {
            let c = self.bytes[self.pos];
            match c {
                b'\n' => {
                    self.pos += 1;
                    if self.brackets.is_empty() {
                        self.end_logical();
                    }
                    self.line += 1;
                    line_start = self.pos;
                }
                b' ' | b'\t' | b'\x0c' | b'\r' => self.pos += 1,
                b'\\' => {
                    let next = self.peek(1);
                    if next == Some(b'\n') {
                        self.pos += 2;
                        self.line += 1;
                    } else if next == Some(b'\r') && self.peek(2) == Some(b'\n') {
                        self.pos += 3;
                        self.line += 1;
                    } else {
                        return Err(LangError::lex(self.line, "unexpected character after line continuation"));
                    }
                }
                b'#' => {
                    let start = self.pos;
                    while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
                        self.pos += 1;
                    }
                    if self.current.is_some() {
                        self.push(TokenKind::Comment, start, self.line, line_start);
                    }
                }
                _ => self.token(line_start)?,
            }
        }

        if let Some(&(open, line)) = self.brackets.last() {
            return Err(LangError::Unbalanced {
                line,
                delimiter: open,
            });
        }
        self.end_logical();
        Ok(self.lines)
    }

    fn token(&mut self, line_start: usize) -> LangResult<()> {
        let start = self.pos;
        let line = self.line;

        if let Some(prefix_len) = self.string_prefix() {
            self.pos += prefix_len;
            let prefix = self.src[start..self.pos].to_ascii_lowercase();
            self.string_body(prefix.contains('f'))?;
            self.push(TokenKind::Str, start, line, line_start);
            return Ok(());
        }

        let Some(c) = self.src[self.pos..].chars().next() else {
            return Ok(());
        };

        if c.is_alphabetic() || c == '_' {
            self.pos += c.len_utf8();
            while let Some(c) = self.src[self.pos..].chars().next() {
                if c.is_alphanumeric() || c == '_' {
                    self.pos += c.len_utf8();
                } else {
                    break;
                }
            }
            self.push(TokenKind::Name, start, line, line_start);
            return Ok(());
        }

        if c.is_ascii_digit() || (c == '.' && self.peek(1).is_some_and(|b| b.is_ascii_digit())) {
            self.number();
            self.push(TokenKind::Number, start, line, line_start);
            return Ok(());
        }

        let rest = &self.src[self.pos..];
        let len = OPERATORS
            .iter()
            .find(|op| rest.starts_with(*op))
            .map_or(c.len_utf8(), |op| op.len());

        match c {
            '(' | '[' | '{' => {
                self.pos += 1;
                self.push(TokenKind::Op, start, line, line_start);
                self.brackets.push((c, line));
            }
            ')' | ']' | '}' => {
                let expected = match c {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match self.brackets.pop() {
                    Some((open, _)) if open == expected => {}
                    _ => return Err(LangError::Unbalanced { line, delimiter: c }),
                }
                self.pos += len;
                self.push(TokenKind::Op, start, line, line_start);
                return Ok(());
            }
            _ if c.is_ascii_punctuation() => {
                self.pos += len;
                self.push(TokenKind::Op, start, line, line_start);
                return Ok(());
            }
            _ => return Err(LangError::lex(line, format!("unexpected character {c:?}"))),
        }
        Ok(())
    }

    /// Length of a string prefix (possibly empty) if a string starts here.
    fn string_prefix(&self) -> Option<usize> {
        let rest = &self.bytes[self.pos..];
        if matches!(rest.first(), Some(b'"' | b'\'')) {
            return Some(0);
        }
        STRING_PREFIXES.iter().find_map(|prefix| {
            let n = prefix.len();
            let candidate = rest.get(..n)?;
            (candidate.eq_ignore_ascii_case(prefix.as_bytes())
                && matches!(rest.get(n), Some(b'"' | b'\'')))
            .then_some(n)
        })
    }

    /// Consume a quoted body starting at the opening quote.
    fn string_body(&mut self, formatted: bool) -> LangResult<()> {
        let quote = self.bytes[self.pos];
        let triple = self.peek(1) == Some(quote) && self.peek(2) == Some(quote);
        let open_line = self.line;
        self.pos += if triple { 3 } else { 1 };

        loop {
            let Some(c) = self.peek(0) else {
                return Err(LangError::lex(open_line, "unterminated string literal"));
            };
            match c {
                b'\\' => {
                    if self.peek(1) == Some(b'\n') {
                        self.line += 1;
                    }
                    self.pos += 2;
                }
                b'\n' => {
                    if !triple {
                        return Err(LangError::lex(open_line, "unterminated string literal"));
                    }
                    self.line += 1;
                    self.pos += 1;
                }
                _ if c == quote => {
                    if !triple {
                        self.pos += 1;
                        return Ok(());
                    }
                    if self.peek(1) == Some(quote) && self.peek(2) == Some(quote) {
                        self.pos += 3;
                        return Ok(());
                    }
                    self.pos += 1;
                }
                b'{' if formatted => {
                    if self.peek(1) == Some(b'{') {
                        self.pos += 2;
                    } else {
                        self.pos += 1;
                        self.replacement_field(open_line)?;
                    }
                }
                _ => self.pos += 1,
            }
        }
    }

    /// Consume an f-string replacement field up to its closing brace.
    fn replacement_field(&mut self, open_line: u32) -> LangResult<()> {
        let mut depth = 1u32;
        while depth > 0 {
            let Some(c) = self.peek(0) else {
                return Err(LangError::lex(open_line, "unterminated f-string expression"));
            };
            match c {
                b'{' | b'(' | b'[' => {
                    depth += 1;
                    self.pos += 1;
                }
                b'}' | b')' | b']' => {
                    depth -= 1;
                    self.pos += 1;
                }
                b'\n' => {
                    self.line += 1;
                    self.pos += 1;
                }
                _ => {
                    if let Some(prefix_len) = self.string_prefix() {
                        let start = self.pos;
                        self.pos += prefix_len;
                        let prefix = self.src[start..self.pos].to_ascii_lowercase();
                        self.string_body(prefix.contains('f'))?;
                    } else {
                        self.pos += 1;
                    }
                }
            }
        }
        Ok(())
    }

    fn number(&mut self) {
        let hex = self.src[self.pos..].len() > 1
            && self.bytes[self.pos] == b'0'
            && matches!(self.peek(1), Some(b'x' | b'X'));
        while let Some(c) = self.peek(0) {
            let exponent_sign = matches!(c, b'+' | b'-')
                && !hex
                && self.pos > 0
                && matches!(self.bytes[self.pos - 1], b'e' | b'E');
            if c.is_ascii_alphanumeric() || c == b'_' || c == b'.' || exponent_sign {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn push(&mut self, kind: TokenKind, start: usize, line: u32, line_start: usize) {
        let token = Token {
            kind,
            start,
            end: self.pos,
            line,
            depth: self.brackets.len() as u32,
        };
        let logical = self.current.get_or_insert_with(|| LogicalLine {
            tokens: Vec::new(),
            start_line: line,
            line_start,
            indent: self.src[line_start..start]
                .chars()
                .take_while(|c| c.is_whitespace())
                .collect(),
        });
        logical.tokens.push(token);
    }

    fn end_logical(&mut self) {
        if let Some(line) = self.current.take() {
            self.lines.push(line);
        }
    }
}
