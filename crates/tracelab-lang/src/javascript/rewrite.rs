//! Source rewriting for JavaScript snippets.
//!
//! The walker visits every bracketed region once, classifying each `{` as a
//! statement block, a function body, a class body, a `switch` body or an
//! object literal. Inside statement contexts it finds where statements
//! begin, honouring automatic semicolon insertion conservatively: a newline
//! only ends a statement when the previous token can end an expression and
//! the next one cannot continue it.
//!
//! Insertions:
//!
//! - function bodies: `const __tlFrame = __tl.enter(name, args); try {`
//!   after the opening brace and `} finally { __tl.exit(__tlFrame); }`
//!   before the closing one
//! - the first statement on each line: `__tl.line(n);`
//! - `let`/`const`/`var` declarations ending in `;`: one extra declarator
//!   `__tl_k = (__tl.variable("x", x, n))`, which leaves the script's
//!   completion value alone
//! - `x = ...;` and compound assignments: `__tl.variable("x", x, n);` after
//!   the semicolon; the hook returns the value, so the completion value is
//!   unchanged
//!
//! Nothing adds a line break, so line numbers stay those of the original.

use std::collections::{BTreeSet, HashMap};

use tracing::warn;

use tracelab_core::InstrumentationStats;

use super::lexer::{Token, TokenKind, TokenStream, is_keyword, tokenize};
use crate::edit::Edits;
use crate::error::{LangError, LangResult};

/// Name of the tracer object inside the snippet's context.
pub const HOOK: &str = "__tl";

/// Name of the per-call frame binding.
pub const FRAME: &str = "__tlFrame";

/// The result of rewriting one snippet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsRewrite {
    /// Instrumented source.
    pub source: String,
    /// Names bound by top-level declarations and assignments, in order.
    pub top_level_names: Vec<String>,
    /// What was inserted.
    pub stats: InstrumentationStats,
    /// The snippet could not be tokenized and is passed through unchanged.
    pub degraded: bool,
}

impl JsRewrite {
    fn passthrough(source: &str) -> Self {
        Self {
            source: source.to_string(),
            top_level_names: Vec::new(),
            stats: InstrumentationStats::default(),
            degraded: true,
        }
    }
}

/// Rewrite a snippet.
///
/// # Errors
///
/// Only when the snippet uses an identifier starting with `__tl`. Anything
/// the lexer cannot handle yields a degraded pass-through rewrite.
pub fn rewrite(source: &str) -> LangResult<JsRewrite> {
    let stream = match tokenize(source) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "JavaScript snippet not instrumented");
            return Ok(JsRewrite::passthrough(source));
        }
    };

    let reserved = stream
        .tokens
        .iter()
        .any(|t| t.kind == TokenKind::Ident && t.text(source).starts_with(HOOK));
    if reserved {
        return Err(LangError::Reserved(HOOK));
    }

    let mut walker = Walker::new(source, &stream);
    walker.walk(0, stream.tokens.len(), Scope::TopLevel, None);

    let Walker {
        edits,
        stats,
        top_level_names,
        ..
    } = walker;
    let instrumented = edits.apply(source);
    if let Err(e) = tokenize(&instrumented) {
        warn!(error = %e, "Instrumented JavaScript failed verification, passing through");
        return Ok(JsRewrite::passthrough(source));
    }

    Ok(JsRewrite {
        source: instrumented,
        top_level_names,
        stats,
        degraded: false,
    })
}

/// Quote a string as a JavaScript string literal.
pub fn js_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    TopLevel,
    Block,
    Function,
    Switch,
    Class,
    Object,
    Group,
}

impl Scope {
    fn holds_statements(self) -> bool {
        matches!(
            self,
            Scope::TopLevel | Scope::Block | Scope::Function | Scope::Switch
        )
    }
}

#[derive(Debug, Clone)]
struct FunctionInfo {
    name: String,
    args: String,
    generator: bool,
    declaration: bool,
}

#[derive(Debug, Clone)]
enum Brace {
    Block { after_do: bool },
    Switch,
    Function(FunctionInfo),
    Class { name: Option<String>, declaration: bool },
    Object,
}

const CONTROL: &[&str] = &["if", "for", "while", "with", "switch", "catch"];

const ASSIGNMENT: &[&str] = &[
    "=", "+=", "-=", "*=", "/=", "%=", "**=", "<<=", ">>=", ">>>=", "&=", "|=", "^=", "&&=",
    "||=", "??=",
];

struct Walker<'a> {
    src: &'a str,
    tokens: &'a [Token],
    partner: &'a [Option<usize>],
    edits: Edits,
    stats: InstrumentationStats,
    marked_lines: BTreeSet<u32>,
    declarator_count: usize,
    top_level_names: Vec<String>,
    /// Closing `)` of a parameter list, keyed to the function it belongs to.
    params: HashMap<usize, FunctionInfo>,
    /// Closing `)` of a control statement header, keyed to its keyword.
    headers: HashMap<usize, &'a str>,
}

impl<'a> Walker<'a> {
    fn new(src: &'a str, stream: &'a TokenStream) -> Self {
        Self {
            src,
            tokens: &stream.tokens,
            partner: &stream.partner,
            edits: Edits::new(),
            stats: InstrumentationStats::default(),
            marked_lines: BTreeSet::new(),
            declarator_count: 0,
            top_level_names: Vec::new(),
            params: HashMap::new(),
            headers: HashMap::new(),
        }
    }

    fn text(&self, i: usize) -> &'a str {
        self.tokens[i].text(self.src)
    }

    fn is_punct(&self, i: usize, punct: &str) -> bool {
        self.tokens.get(i).is_some_and(|t| t.is_punct(self.src, punct))
    }

    fn is_word(&self, i: usize, word: &str) -> bool {
        self.tokens.get(i).is_some_and(|t| t.is_word(self.src, word))
    }

    fn is_name(&self, i: usize) -> bool {
        self.tokens
            .get(i)
            .is_some_and(|t| t.kind == TokenKind::Ident && !is_keyword(t.text(self.src)))
    }

    fn is_opener(&self, i: usize) -> bool {
        let t = &self.tokens[i];
        t.kind == TokenKind::Punct && matches!(t.text(self.src), "(" | "[" | "{")
    }

    fn is_closer(&self, i: usize) -> bool {
        let t = &self.tokens[i];
        t.kind == TokenKind::Punct && matches!(t.text(self.src), ")" | "]" | "}")
    }

    fn before(&self, i: usize) -> Option<usize> {
        i.checked_sub(1)
    }

    /// First token of the unit ending at `i`.
    fn unit_start(&self, i: usize) -> usize {
        if self.is_closer(i) {
            self.partner[i].unwrap_or(i)
        } else {
            i
        }
    }

    /// Whether a statement may end after token `i`.
    fn ends_expression(&self, i: usize) -> bool {
        let t = &self.tokens[i];
        let text = t.text(self.src);
        match t.kind {
            TokenKind::Ident => {
                !is_keyword(text)
                    || matches!(
                        text,
                        "this" | "null" | "true" | "false" | "super" | "break" | "continue"
                            | "return" | "debugger" | "yield"
                    )
            }
            TokenKind::Punct => matches!(text, ")" | "]" | "}" | "++" | "--"),
            _ => true,
        }
    }

    /// Whether token `i` can begin a statement after an automatic semicolon.
    fn can_start(&self, i: usize) -> bool {
        let t = &self.tokens[i];
        let text = t.text(self.src);
        match t.kind {
            TokenKind::Ident => !matches!(
                text,
                "in" | "instanceof" | "of" | "else" | "catch" | "finally" | "case" | "default"
                    | "extends"
            ),
            TokenKind::Num | TokenKind::Str => true,
            TokenKind::Punct => matches!(text, "++" | "--" | "!" | "~"),
            _ => false,
        }
    }

    /// Walk the tokens in `[from, to)` that belong to one bracketed region.
    fn walk(&mut self, from: usize, to: usize, scope: Scope, class_name: Option<&str>) {
        let statements = scope.holds_statements();
        let mut expect_start = statements && scope != Scope::Switch;
        let mut prev_ends = false;
        let mut after_block: Option<bool> = None;
        let mut stmt_start: Option<usize> = None;
        let mut case_pending = false;
        let mut ternary = 0u32;

        let mut i = from;
        while i < to {
            let tok = self.tokens[i];
            let text = tok.text(self.src);

            let mut is_start = false;
            if statements {
                if let Some(after_do) = after_block.take() {
                    expect_start = true;
                    if after_do && text == "while" {
                        expect_start = false;
                    }
                }

                if scope == Scope::Switch && matches!(text, "case" | "default") && tok.kind == TokenKind::Ident {
                    case_pending = true;
                    ternary = 0;
                    expect_start = false;
                } else if expect_start {
                    expect_start = false;
                    is_start = !matches!(text, "else" | "catch" | "finally")
                        || tok.kind != TokenKind::Ident;
                } else if tok.newline_before && prev_ends && !case_pending && self.can_start(i) {
                    is_start = true;
                }
            }

            if is_start {
                stmt_start = Some(i);
                self.statement(i, to, scope == Scope::TopLevel);
            }

            if self.is_opener(i) {
                let close = self.partner[i].unwrap_or(to);
                let close = close.min(to);
                match text {
                    "(" => {
                        self.classify_paren(i, close, scope, class_name, stmt_start);
                        self.walk(i + 1, close, Scope::Group, None);
                        prev_ends = !self.params.contains_key(&close)
                            && !self.headers.contains_key(&close);
                    }
                    "[" => {
                        self.walk(i + 1, close, Scope::Group, None);
                        prev_ends = true;
                    }
                    _ => {
                        let brace = self.classify_brace(i, from, scope, is_start, stmt_start);
                        prev_ends = true;
                        match brace {
                            Brace::Block { after_do } => {
                                self.walk(i + 1, close, Scope::Block, None);
                                if statements {
                                    after_block = Some(after_do);
                                    prev_ends = false;
                                }
                            }
                            Brace::Switch => {
                                self.walk(i + 1, close, Scope::Switch, None);
                                if statements {
                                    after_block = Some(false);
                                    prev_ends = false;
                                }
                            }
                            Brace::Function(info) => {
                                let declaration = info.declaration;
                                self.function_body(i, close, &info);
                                if statements && declaration {
                                    after_block = Some(false);
                                    prev_ends = false;
                                }
                            }
                            Brace::Class { name, declaration } => {
                                self.walk(i + 1, close, Scope::Class, name.as_deref());
                                if statements && declaration {
                                    after_block = Some(false);
                                    prev_ends = false;
                                }
                            }
                            Brace::Object => self.walk(i + 1, close, Scope::Object, None),
                        }
                    }
                }
                i = close + 1;
                continue;
            }

            if statements && tok.kind == TokenKind::Punct {
                match text {
                    ";" => expect_start = true,
                    "?" if case_pending => ternary += 1,
                    ":" if case_pending => {
                        if ternary > 0 {
                            ternary -= 1;
                        } else {
                            case_pending = false;
                            expect_start = true;
                        }
                    }
                    _ => {}
                }
            }
            prev_ends = self.ends_expression(i);
            i += 1;
        }
    }

    /// Hooks for a statement beginning at `i`.
    fn statement(&mut self, i: usize, to: usize, top_level: bool) {
        let tok = self.tokens[i];
        let text = tok.text(self.src);

        if tok.kind != TokenKind::Str
            && !matches!(text, "import" | "export")
            && self.marked_lines.insert(tok.line)
        {
            self.edits
                .insert(tok.start, format!("{HOOK}.line({}); ", tok.line));
            self.stats.lines += 1;
        }

        if tok.kind != TokenKind::Ident {
            return;
        }

        if matches!(text, "let" | "const" | "var") && self.is_name(i + 1) {
            let Some(end) = self.terminator(i, to) else {
                return;
            };
            let names = self.declared_names(i + 1, end);
            if names.is_empty() {
                return;
            }
            self.declarator_count += 1;
            let calls = names
                .iter()
                .map(|name| format!("{HOOK}.variable({}, {name}, {})", js_string(name), tok.line))
                .collect::<Vec<_>>()
                .join(", ");
            self.edits.insert(
                self.tokens[end].start,
                format!(", {HOOK}_{} = ({calls})", self.declarator_count),
            );
            self.stats.variables += names.len();
            if top_level {
                for name in names {
                    if !self.top_level_names.contains(&name) {
                        self.top_level_names.push(name);
                    }
                }
            }
            return;
        }

        let assigns = self.is_name(i)
            && self
                .tokens
                .get(i + 1)
                .is_some_and(|t| t.kind == TokenKind::Punct && ASSIGNMENT.contains(&t.text(self.src)));
        if assigns {
            let Some(end) = self.terminator(i, to) else {
                return;
            };
            self.edits.insert(
                self.tokens[end].end,
                format!(" {HOOK}.variable({}, {text}, {});", js_string(text), tok.line),
            );
            self.stats.variables += 1;
            if top_level && !self.top_level_names.iter().any(|n| n == text) {
                self.top_level_names.push(text.to_string());
            }
        }
    }

    /// The `;` ending the statement that starts at `i`, if it has one.
    fn terminator(&self, i: usize, to: usize) -> Option<usize> {
        let mut j = i;
        let mut prev_ends = false;
        while j < to {
            let tok = &self.tokens[j];
            if j > i && tok.newline_before && prev_ends && self.can_start(j) {
                return None;
            }
            if tok.is_punct(self.src, ";") {
                return Some(j);
            }
            if self.is_opener(j) {
                j = self.partner[j].unwrap_or(to) + 1;
                prev_ends = true;
                continue;
            }
            prev_ends = self.ends_expression(j);
            j += 1;
        }
        None
    }

    /// Simple binding names of a declaration list in `[from, end)`.
    fn declared_names(&self, from: usize, end: usize) -> Vec<String> {
        let mut names = Vec::new();
        let mut expect_name = true;
        let mut j = from;
        while j < end {
            if expect_name && self.is_name(j) {
                names.push(self.text(j).to_string());
            }
            expect_name = self.is_punct(j, ",");
            j = if self.is_opener(j) {
                self.partner[j].unwrap_or(end) + 1
            } else {
                j + 1
            };
        }
        names
    }

    /// Record what a `(` at `open` introduces.
    fn classify_paren(
        &mut self,
        open: usize,
        close: usize,
        scope: Scope,
        class_name: Option<&str>,
        stmt_start: Option<usize>,
    ) {
        let prev = self.before(open);
        let after = close + 1;

        if let Some(p) = prev {
            let word = self.text(p);
            if self.tokens[p].kind == TokenKind::Ident && CONTROL.contains(&word) {
                self.headers.insert(close, word);
                return;
            }
            // for await (...)
            if word == "await" && p > 0 && self.is_word(p - 1, "for") {
                self.headers.insert(close, "for");
                return;
            }
        }

        if self.is_punct(after, "=>") {
            let first = match prev {
                Some(p) if self.is_word(p, "async") => p,
                _ => open,
            };
            let info = FunctionInfo {
                name: self.infer_name(first),
                args: self.arrow_args(open, close),
                generator: false,
                declaration: false,
            };
            self.params.insert(close, info);
            return;
        }

        let Some(mut k) = prev else {
            return;
        };

        // function [*] [name] (
        let mut name = None;
        if self.is_name(k) {
            name = Some(self.text(k).to_string());
            match self.before(k) {
                Some(b) => k = b,
                None => name = None,
            }
        }
        let mut generator = false;
        if self.is_punct(k, "*") {
            generator = true;
            if let Some(b) = self.before(k) {
                k = b;
            }
        }
        if self.is_word(k, "function") {
            let first = match self.before(k) {
                Some(b) if self.is_word(b, "async") => b,
                _ => k,
            };
            let declaration = scope.holds_statements() && stmt_start == Some(first) && name.is_some();
            let info = FunctionInfo {
                name: name.unwrap_or_else(|| self.infer_name(first)),
                args: "arguments".to_string(),
                generator,
                declaration,
            };
            self.params.insert(close, info);
            return;
        }

        // Methods: `name(...) {` in class bodies and object literals.
        let Some(p) = prev else {
            return;
        };
        let keyed = matches!(
            self.tokens[p].kind,
            TokenKind::Ident | TokenKind::Str | TokenKind::Num
        ) || self.is_punct(p, "]");
        if matches!(scope, Scope::Class | Scope::Object) && keyed && self.is_punct(after, "{") {
            let key = if self.is_punct(p, "]") {
                "[computed]".to_string()
            } else {
                self.text(p).trim_matches(|c| c == '"' || c == '\'').to_string()
            };
            let generator = self
                .before(self.unit_start(p))
                .is_some_and(|b| self.is_punct(b, "*"));
            let name = match (scope, class_name) {
                (Scope::Class, Some(class)) => format!("{class}.{key}"),
                _ => key,
            };
            self.params.insert(
                close,
                FunctionInfo {
                    name,
                    args: "arguments".to_string(),
                    generator,
                    declaration: false,
                },
            );
        }
    }

    fn classify_brace(
        &self,
        open: usize,
        from: usize,
        scope: Scope,
        at_start: bool,
        stmt_start: Option<usize>,
    ) -> Brace {
        let Some(p) = self.before(open) else {
            return Brace::Block { after_do: false };
        };
        let word = self.text(p);

        if self.is_punct(p, ")") {
            if let Some(keyword) = self.headers.get(&p) {
                return if *keyword == "switch" {
                    Brace::Switch
                } else {
                    Brace::Block { after_do: false }
                };
            }
            if let Some(info) = self.params.get(&p) {
                return Brace::Function(info.clone());
            }
            return Brace::Block { after_do: false };
        }

        if self.is_punct(p, "=>") {
            if let Some(q) = self.before(p) {
                if let Some(info) = self.params.get(&q) {
                    return Brace::Function(info.clone());
                }
                if self.is_name(q) {
                    let first = match self.before(q) {
                        Some(b) if self.is_word(b, "async") => b,
                        _ => q,
                    };
                    return Brace::Function(FunctionInfo {
                        name: self.infer_name(first),
                        args: format!("[{}]", self.text(q)),
                        generator: false,
                        declaration: false,
                    });
                }
            }
            return Brace::Block { after_do: false };
        }

        if self.tokens[p].kind == TokenKind::Ident {
            match word {
                "do" => return Brace::Block { after_do: true },
                "else" | "try" | "finally" | "catch" => return Brace::Block { after_do: false },
                "static" if scope == Scope::Class => return Brace::Block { after_do: false },
                _ => {}
            }
        }

        if let Some(class) = self.class_keyword(open, from) {
            let name = Some(class + 1)
                .filter(|&n| n < open && self.is_name(n))
                .map(|n| self.text(n).to_string());
            return Brace::Class {
                name,
                declaration: scope.holds_statements() && stmt_start == Some(class),
            };
        }

        if at_start {
            return Brace::Block { after_do: false };
        }
        Brace::Object
    }

    /// Index of the `class` keyword heading the brace at `open`, if any.
    fn class_keyword(&self, open: usize, from: usize) -> Option<usize> {
        let mut k = self.before(open)?;
        loop {
            if k < from {
                return None;
            }
            let tok = &self.tokens[k];
            if tok.is_word(self.src, "class") {
                return Some(k);
            }
            let continues = (tok.kind == TokenKind::Ident
                && (!is_keyword(tok.text(self.src)) || tok.is_word(self.src, "extends")))
                || tok.is_punct(self.src, ".")
                || (self.is_closer(k) && !tok.is_punct(self.src, "}"));
            if !continues {
                return None;
            }
            k = self.before(self.unit_start(k))?;
        }
    }

    /// Name for an anonymous function starting at `first`, from the
    /// binding or property it is assigned to.
    fn infer_name(&self, first: usize) -> String {
        let Some(p) = self.before(first) else {
            return "anonymous".to_string();
        };
        if self.is_punct(p, "=") || self.is_punct(p, ":") {
            if let Some(q) = self.before(p) {
                let tok = &self.tokens[q];
                if matches!(tok.kind, TokenKind::Ident | TokenKind::Str) {
                    return tok
                        .text(self.src)
                        .trim_matches(|c| c == '"' || c == '\'')
                        .to_string();
                }
            }
        }
        "anonymous".to_string()
    }

    /// Simple parameter names of an arrow function, as an array literal.
    fn arrow_args(&self, open: usize, close: usize) -> String {
        let mut names = Vec::new();
        let mut j = open + 1;
        while j < close {
            let leads = self.is_punct(j - 1, "(") || self.is_punct(j - 1, ",") || self.is_punct(j - 1, "...");
            let trails = j + 1 == close || self.is_punct(j + 1, ",") || self.is_punct(j + 1, "=");
            if leads && trails && self.is_name(j) {
                names.push(self.text(j));
            }
            j = if self.is_opener(j) {
                self.partner[j].unwrap_or(close) + 1
            } else {
                j + 1
            };
        }
        format!("[{}]", names.join(", "))
    }

    fn has_directive(&self, open: usize, close: usize) -> bool {
        let first = open + 1;
        if first >= close || self.tokens[first].kind != TokenKind::Str {
            return false;
        }
        let next = first + 1;
        next == close || self.is_punct(next, ";") || self.tokens[next].newline_before
    }

    fn function_body(&mut self, open: usize, close: usize, info: &FunctionInfo) {
        let wrap = !info.generator && !self.has_directive(open, close);
        if wrap {
            self.edits.insert(
                self.tokens[open].end,
                format!(
                    " const {FRAME} = {HOOK}.enter({}, {}); try {{",
                    js_string(&info.name),
                    info.args
                ),
            );
            self.stats.functions += 1;
        }

        self.walk(open + 1, close, Scope::Function, None);

        if wrap {
            self.edits.insert(
                self.tokens[close].start,
                format!("}} finally {{ {HOOK}.exit({FRAME}); }} "),
            );
        }
    }
}
