//! A tokenizer for JavaScript source.
//!
//! Produces a flat token list plus a bracket-matching table. Comments are
//! dropped but remembered through [`Token::newline_before`], which is what
//! automatic semicolon insertion cares about. Template literals are single
//! tokens; their substitutions are scanned only to find where they end.

use crate::error::{LangError, LangResult};

/// Token classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Identifier or keyword, private names included.
    Ident,
    /// Numeric literal.
    Num,
    /// Quoted string literal.
    Str,
    /// Template literal, substitutions included.
    Template,
    /// Regular expression literal.
    Regex,
    /// Punctuator.
    Punct,
}

/// One token.
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
    /// A line terminator separates this token from the previous one.
    pub newline_before: bool,
}

impl Token {
    /// The token's text.
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }

    /// Check for a punctuator with exactly this text.
    pub fn is_punct(&self, source: &str, punct: &str) -> bool {
        self.kind == TokenKind::Punct && self.text(source) == punct
    }

    /// Check for an identifier or keyword with exactly this text.
    pub fn is_word(&self, source: &str, word: &str) -> bool {
        self.kind == TokenKind::Ident && self.text(source) == word
    }
}

/// Tokens of one source text and the position of each bracket's partner.
#[derive(Debug, Clone)]
pub struct TokenStream {
    /// All tokens in order.
    pub tokens: Vec<Token>,
    /// For every bracket token, the index of its partner.
    pub partner: Vec<Option<usize>>,
}

/// Reserved words that never name a binding.
pub const KEYWORDS: &[&str] = &[
    "break", "case", "catch", "class", "const", "continue", "debugger", "default", "delete", "do",
    "else", "export", "extends", "false", "finally", "for", "function", "if", "import", "in",
    "instanceof", "new", "null", "return", "super", "switch", "this", "throw", "true", "try",
    "typeof", "var", "void", "while", "with", "yield", "let", "static", "await", "enum",
];

/// Check if a word is reserved.
pub fn is_keyword(word: &str) -> bool {
    KEYWORDS.contains(&word)
}

/// Keywords after which a `/` starts a regular expression.
const REGEX_AFTER: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await",
];

const PUNCTUATORS: &[&str] = &[
    ">>>=", "...", "===", "!==", "**=", "<<=", ">>=", ">>>", "&&=", "||=", "??=", "=>", "==",
    "!=", "<=", ">=", "&&", "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=",
    "|=", "^=", "**", "<<", ">>",
];

/// Tokenize `source` and match its brackets.
pub fn tokenize(source: &str) -> LangResult<TokenStream> {
    let mut lexer = Lexer {
        src: source,
        bytes: source.as_bytes(),
        pos: 0,
        line: 1,
    };

    let mut tokens: Vec<Token> = Vec::new();
    if source.starts_with("#!") {
        lexer.skip_line_comment();
    }
    while let Some(token) = lexer.next_token(tokens.last().copied())? {
        tokens.push(token);
    }

    let partner = match_brackets(source, &tokens)?;
    Ok(TokenStream { tokens, partner })
}

fn match_brackets(source: &str, tokens: &[Token]) -> LangResult<Vec<Option<usize>>> {
    let mut partner = vec![None; tokens.len()];
    let mut stack: Vec<usize> = Vec::new();

    for (i, token) in tokens.iter().enumerate() {
        if token.kind != TokenKind::Punct {
            continue;
        }
        let text = token.text(source);
        match text {
            "(" | "[" | "{" => stack.push(i),
            ")" | "]" | "}" => {
                let expected = match text {
                    ")" => "(",
                    "]" => "[",
                    _ => "{",
                };
                match stack.pop() {
                    Some(open) if tokens[open].text(source) == expected => {
                        partner[open] = Some(i);
                        partner[i] = Some(open);
                    }
                    _ => {
                        return Err(LangError::Unbalanced {
                            line: token.line,
                            delimiter: text.chars().next().unwrap_or('?'),
                        });
                    }
                }
            }
            _ => {}
        }
    }

    if let Some(&open) = stack.last() {
        return Err(LangError::Unbalanced {
            line: tokens[open].line,
            delimiter: tokens[open].text(source).chars().next().unwrap_or('?'),
        });
    }
    Ok(partner)
}

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: u32,
}

impl Lexer<'_> {
    fn peek(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn skip_line_comment(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
            self.pos += 1;
        }
    }

    /// Skip whitespace and comments. Returns whether a line terminator was
    /// crossed.
    fn skip_trivia(&mut self) -> LangResult<bool> {
        let mut newline = false;
        loop {
            match self.peek(0) {
                Some(b'\n') => {
                    newline = true;
                    self.line += 1;
                    self.pos += 1;
                }
                Some(b' ' | b'\t' | b'\r' | b'\x0b' | b'\x0c') => self.pos += 1,
                Some(b'/') if self.peek(1) == Some(b'/') => self.skip_line_comment(),
                Some(b'/') if self.peek(1) == Some(b'*') => {
                    let open = self.line;
                    self.pos += 2;
                    loop {
                        match self.peek(0) {
                            None => return Err(LangError::lex(open, "unterminated comment")),
                            Some(b'*') if self.peek(1) == Some(b'/') => {
                                self.pos += 2;
                                break;
                            }
                            Some(b'\n') => {
                                newline = true;
                                self.line += 1;
                                self.pos += 1;
                            }
                            Some(_) => self.pos += 1,
                        }
                    }
                }
                Some(_) => {
                    // Non-ASCII whitespace such as NBSP or U+2028.
                    let c = self.src[self.pos..].chars().next().unwrap_or('\0');
                    if c.is_whitespace() && !c.is_ascii() {
                        if c == '\u{2028}' || c == '\u{2029}' {
                            newline = true;
                        }
                        self.pos += c.len_utf8();
                    } else {
                        return Ok(newline);
                    }
                }
                None => return Ok(newline),
            }
        }
    }

    fn next_token(&mut self, prev: Option<Token>) -> LangResult<Option<Token>> {
        let newline_before = self.skip_trivia()?;
        let Some(c) = self.src[self.pos..].chars().next() else {
            return Ok(None);
        };
        let start = self.pos;
        let line = self.line;

        let kind = match c {
            '"' | '\'' => {
                self.string(c as u8)?;
                TokenKind::Str
            }
            '`' => {
                self.template()?;
                TokenKind::Template
            }
            '/' if self.regex_allowed(prev) => {
                self.regex()?;
                TokenKind::Regex
            }
            c if c.is_ascii_digit()
                || (c == '.' && self.peek(1).is_some_and(|b| b.is_ascii_digit())) =>
            {
                self.number();
                TokenKind::Num
            }
            c if c.is_alphabetic() || c == '_' || c == '$' || c == '#' => {
                self.pos += c.len_utf8();
                while let Some(c) = self.src[self.pos..].chars().next() {
                    if c.is_alphanumeric() || c == '_' || c == '$' {
                        self.pos += c.len_utf8();
                    } else {
                        break;
                    }
                }
                TokenKind::Ident
            }
            c if c.is_ascii_punctuation() => {
                let rest = &self.src[self.pos..];
                let optional_chain_digit =
                    rest.starts_with("?.") && self.peek(2).is_some_and(|b| b.is_ascii_digit());
                let len = PUNCTUATORS
                    .iter()
                    .find(|p| rest.starts_with(**p) && !(**p == "?." && optional_chain_digit))
                    .map_or(1, |p| p.len());
                self.pos += len;
                TokenKind::Punct
            }
            other => return Err(LangError::lex(line, format!("unexpected character {other:?}"))),
        };

        Ok(Some(Token {
            kind,
            start,
            end: self.pos,
            line,
            newline_before,
        }))
    }

    fn regex_allowed(&self, prev: Option<Token>) -> bool {
        let Some(prev) = prev else {
            return true;
        };
        let text = prev.text(self.src);
        match prev.kind {
            TokenKind::Ident => REGEX_AFTER.contains(&text),
            TokenKind::Punct => !matches!(text, ")" | "]" | "++" | "--"),
            _ => false,
        }
    }

    fn string(&mut self, quote: u8) -> LangResult<()> {
        let open = self.line;
        self.pos += 1;
        loop {
            match self.peek(0) {
                None | Some(b'\n') => return Err(LangError::lex(open, "unterminated string literal")),
                Some(b'\\') => {
                    if self.peek(1) == Some(b'\n') {
                        self.line += 1;
                    }
                    self.pos += 2;
                }
                Some(c) if c == quote => {
                    self.pos += 1;
                    return Ok(());
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    fn template(&mut self) -> LangResult<()> {
        let open = self.line;
        self.pos += 1;
        loop {
            match self.peek(0) {
                None => return Err(LangError::lex(open, "unterminated template literal")),
                Some(b'\\') => {
                    if self.peek(1) == Some(b'\n') {
                        self.line += 1;
                    }
                    self.pos += 2;
                }
                Some(b'`') => {
                    self.pos += 1;
                    return Ok(());
                }
                Some(b'$') if self.peek(1) == Some(b'{') => {
                    self.pos += 2;
                    self.substitution(open)?;
                }
                Some(b'\n') => {
                    self.line += 1;
                    self.pos += 1;
                }
                Some(_) => self.pos += 1,
            }
        }
    }

    /// Scan a `${ ... }` substitution up to and including its closing brace.
    fn substitution(&mut self, open: u32) -> LangResult<()> {
        let mut depth = 0u32;
        let mut prev = None;
        loop {
            let Some(token) = self.next_token(prev)? else {
                return Err(LangError::lex(open, "unterminated template substitution"));
            };
            if token.kind == TokenKind::Punct {
                match token.text(self.src) {
                    "{" => depth += 1,
                    "}" if depth == 0 => return Ok(()),
                    "}" => depth -= 1,
                    _ => {}
                }
            }
            prev = Some(token);
        }
    }

    fn regex(&mut self) -> LangResult<()> {
        let open = self.line;
        self.pos += 1;
        let mut in_class = false;
        loop {
            match self.peek(0) {
                None | Some(b'\n') => return Err(LangError::lex(open, "unterminated regular expression")),
                Some(b'\\') => self.pos += 2,
                Some(b'[') => {
                    in_class = true;
                    self.pos += 1;
                }
                Some(b']') => {
                    in_class = false;
                    self.pos += 1;
                }
                Some(b'/') if !in_class => {
                    self.pos += 1;
                    break;
                }
                Some(_) => self.pos += 1,
            }
        }
        while self.peek(0).is_some_and(|b| b.is_ascii_alphabetic()) {
            self.pos += 1;
        }
        Ok(())
    }

    fn number(&mut self) {
        let radix = self.bytes[self.pos] == b'0'
            && matches!(self.peek(1), Some(b'x' | b'X' | b'o' | b'O' | b'b' | b'B'));
        while let Some(c) = self.peek(0) {
            let exponent_sign = matches!(c, b'+' | b'-')
                && !radix
                && matches!(self.bytes[self.pos - 1], b'e' | b'E');
            if c.is_ascii_alphanumeric() || c == b'_' || c == b'.' || exponent_sign {
                self.pos += 1;
            } else {
                break;
            }
        }
    }
}
