//! Source rewriting for Python snippets.
//!
//! Two kinds of hooks are inserted:
//!
//! - `@__tl__.traced` on its own line directly above every `def` and
//!   `async def`, below any user decorators
//! - `; __tl__.var('x', x, n)` at the end of simple assignment statements
//!
//! Decorator lines shift the numbering, so the rewrite also produces a map
//! from instrumented line to original line. Line flow is recorded by the
//! prelude's trace function and needs no insertion.

use std::collections::BTreeSet;

use tracing::warn;

use tracelab_core::InstrumentationStats;

use super::lexer::{LogicalLine, Token, TokenKind, is_keyword, tokenize};
use crate::edit::Edits;
use crate::error::{LangError, LangResult};

/// Name of the tracer object inside the snippet's namespace.
pub const HOOK: &str = "__tl__";

const AUGMENTED: &[&str] = &[
    "+=", "-=", "*=", "/=", "//=", "%=", "**=", ">>=", "<<=", "&=", "|=", "^=", "@=",
];

/// The result of rewriting one snippet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PythonRewrite {
    /// Instrumented source.
    pub source: String,
    /// `line_map[i]` is the original line of instrumented line `i + 1`.
    pub line_map: Vec<u32>,
    /// What was inserted.
    pub stats: InstrumentationStats,
    /// The snippet could not be tokenized and is passed through unchanged.
    pub degraded: bool,
}

impl PythonRewrite {
    fn passthrough(source: &str) -> Self {
        Self {
            source: source.to_string(),
            line_map: (1..=line_count(source)).collect(),
            stats: InstrumentationStats::default(),
            degraded: true,
        }
    }
}

/// Rewrite a snippet.
///
/// # Errors
///
/// Only when the snippet uses the reserved hook name. Anything the lexer
/// cannot handle yields a degraded pass-through rewrite.
pub fn rewrite(source: &str) -> LangResult<PythonRewrite> {
    let lines = match tokenize(source) {
        Ok(lines) => lines,
        Err(e) => {
            warn!(error = %e, "Python snippet not instrumented");
            return Ok(PythonRewrite::passthrough(source));
        }
    };

    let reserved = lines
        .iter()
        .flat_map(|l| l.tokens.iter())
        .any(|t| t.kind == TokenKind::Name && t.text(source) == HOOK);
    if reserved {
        return Err(LangError::Reserved(HOOK));
    }

    let mut edits = Edits::new();
    let mut stats = InstrumentationStats::default();
    let mut decorated = BTreeSet::new();

    for logical in &lines {
        let code: Vec<&Token> = logical.code().collect();
        if code.is_empty() {
            continue;
        }

        if starts_def(source, &code) {
            edits.insert(
                logical.line_start,
                format!("{}@{HOOK}.traced\n", logical.indent),
            );
            decorated.insert(logical.start_line);
            stats.functions += 1;
            continue;
        }

        let names = assigned_names(source, logical, &code);
        if names.is_empty() {
            continue;
        }
        let Some(last) = logical.last_code() else {
            continue;
        };

        let hooks = names
            .iter()
            .map(|name| format!("{HOOK}.var('{name}', {name}, {})", logical.start_line))
            .collect::<Vec<_>>()
            .join("; ");
        let separator = if last.is_op(source, ";") { " " } else { "; " };
        edits.insert(last.end, format!("{separator}{hooks}"));
        stats.variables += names.len();
    }

    let instrumented = edits.apply(source);
    if let Err(e) = tokenize(&instrumented) {
        warn!(error = %e, "Instrumented Python failed verification, passing through");
        return Ok(PythonRewrite::passthrough(source));
    }

    let mut line_map = Vec::with_capacity(line_count(source) as usize + decorated.len());
    for line in 1..=line_count(source) {
        if decorated.contains(&line) {
            line_map.push(line);
        }
        line_map.push(line);
    }

    Ok(PythonRewrite {
        source: instrumented,
        line_map,
        stats,
        degraded: false,
    })
}

fn line_count(source: &str) -> u32 {
    source.bytes().filter(|&b| b == b'\n').count() as u32 + 1
}

fn starts_def(source: &str, code: &[&Token]) -> bool {
    let name = |i: usize| {
        code.get(i)
            .filter(|t| t.kind == TokenKind::Name)
            .map(|t| t.text(source))
    };
    name(0) == Some("def") || (name(0) == Some("async") && name(1) == Some("def"))
}

/// Names bound by the simple statements of one logical line.
fn assigned_names<'a>(source: &'a str, logical: &LogicalLine, code: &[&Token]) -> Vec<&'a str> {
    let first = code[0];
    if first.kind == TokenKind::Name && is_keyword(first.text(source)) {
        return Vec::new();
    }
    if first.is_op(source, "@") {
        return Vec::new();
    }
    // Compound statement headers such as `match x:`.
    if logical
        .last_code()
        .is_some_and(|t| t.depth == 0 && t.is_op(source, ":"))
    {
        return Vec::new();
    }

    let mut names = Vec::new();
    for statement in code.split(|t| t.depth == 0 && t.is_op(source, ";")) {
        for name in statement_targets(source, statement) {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }
    names
}

fn statement_targets<'a>(source: &'a str, statement: &[&Token]) -> Vec<&'a str> {
    let Some(first) = statement.first() else {
        return Vec::new();
    };
    if first.kind == TokenKind::Name && is_keyword(first.text(source)) {
        return Vec::new();
    }

    // x += 1
    if let [target, op, _, ..] = statement {
        if target.kind == TokenKind::Name
            && op.kind == TokenKind::Op
            && AUGMENTED.contains(&op.text(source))
        {
            return vec![target.text(source)];
        }
    }

    let segments: Vec<&[&Token]> = statement
        .split(|t| t.depth == 0 && t.is_op(source, "="))
        .collect();
    if segments.len() < 2 || segments.iter().any(|s| s.is_empty()) {
        return Vec::new();
    }

    // x: int = 1
    if let [target, colon, ..] = segments[0] {
        if target.kind == TokenKind::Name && colon.is_op(source, ":") {
            return vec![target.text(source)];
        }
    }

    let mut names = Vec::new();
    for segment in &segments[..segments.len() - 1] {
        match target_names(source, segment) {
            Some(found) => names.extend(found),
            None => break,
        }
    }
    names
}

/// Names in a pure name-list target such as `a`, `a, *b` or `(a, [b, c])`.
fn target_names<'a>(source: &'a str, segment: &[&Token]) -> Option<Vec<&'a str>> {
    let mut names = Vec::new();
    let mut previous_was_name = false;
    for token in segment {
        let text = token.text(source);
        match token.kind {
            TokenKind::Name if !is_keyword(text) && !previous_was_name => {
                names.push(text);
                previous_was_name = true;
            }
            TokenKind::Op if matches!(text, "," | "*" | "(" | ")" | "[" | "]") => {
                previous_was_name = false;
            }
            _ => return None,
        }
    }
    (!names.is_empty()).then_some(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hooked(src: &str) -> String {
        rewrite(src).unwrap().source
    }

    #[test]
    fn test_simple_assignment() {
        assert_eq!(hooked("x = 1\n"), "x = 1; __tl__.var('x', x, 1)\n");
    }

    #[test]
    fn test_tuple_and_chained_targets() {
        assert_eq!(
            hooked("a, *rest = b = [1, 2]\n"),
            "a, *rest = b = [1, 2]; __tl__.var('a', a, 1); __tl__.var('rest', rest, 1); __tl__.var('b', b, 1)\n"
        );
    }

    #[test]
    fn test_augmented_assignment() {
        assert_eq!(hooked("n += 2\n"), "n += 2; __tl__.var('n', n, 1)\n");
    }

    #[test]
    fn test_annotated_assignment() {
        assert_eq!(hooked("n: int = 2\n"), "n: int = 2; __tl__.var('n', n, 1)\n");
        assert_eq!(hooked("n: int\n"), "n: int\n");
    }

    #[test]
    fn test_hook_goes_before_comment() {
        assert_eq!(
            hooked("x = 1  # one\n"),
            "x = 1; __tl__.var('x', x, 1)  # one\n"
        );
    }

    #[test]
    fn test_trailing_semicolon() {
        assert_eq!(hooked("x = 1;\n"), "x = 1; __tl__.var('x', x, 1)\n");
    }

    #[test]
    fn test_semicolon_separated_statements() {
        assert_eq!(
            hooked("a = 1; b = 2\n"),
            "a = 1; b = 2; __tl__.var('a', a, 1); __tl__.var('b', b, 1)\n"
        );
    }

    #[test]
    fn test_multiline_value() {
        let out = hooked("items = [\n    1,\n    2,\n]\n");
        assert_eq!(out, "items = [\n    1,\n    2,\n]; __tl__.var('items', items, 1)\n");
    }

    #[test]
    fn test_non_name_targets_skipped() {
        assert_eq!(hooked("a[0] = 1\n"), "a[0] = 1\n");
        assert_eq!(hooked("obj.attr = 1\n"), "obj.attr = 1\n");
        assert_eq!(hooked("f(x=1)\n"), "f(x=1)\n");
        assert_eq!(hooked("x == 1\n"), "x == 1\n");
    }

    #[test]
    fn test_lambda_default_not_a_target() {
        assert_eq!(
            hooked("f = lambda x=1: x\n"),
            "f = lambda x=1: x; __tl__.var('f', f, 1)\n"
        );
    }

    #[test]
    fn test_compound_statements_skipped() {
        let src = "if x: y = 1\nfor i in r: total = i\nmatch = 3\nmatch cmd:\n    case _: pass\n";
        let out = hooked(src);
        assert!(out.starts_with("if x: y = 1\nfor i in r: total = i\n"));
        assert!(out.contains("match = 3; __tl__.var('match', match, 3)\n"));
        assert!(out.contains("match cmd:\n"));
    }

    #[test]
    fn test_soft_keyword_statement_not_a_name_list() {
        assert_eq!(hooked("type Alias = int\n"), "type Alias = int\n");
    }

    #[test]
    fn test_def_gets_decorator() {
        let src = "@cache\ndef fib(n):\n    return n\n";
        let rw = rewrite(src).unwrap();
        assert_eq!(
            rw.source,
            "@cache\n@__tl__.traced\ndef fib(n):\n    return n\n"
        );
        assert_eq!(rw.line_map, vec![1, 2, 2, 3, 4]);
        assert_eq!(rw.stats.functions, 1);
    }

    #[test]
    fn test_nested_and_async_defs_keep_indent() {
        let src = "class A:\n    async def run(self):\n        def inner():\n            pass\n";
        let out = hooked(src);
        assert_eq!(
            out,
            "class A:\n    @__tl__.traced\n    async def run(self):\n        @__tl__.traced\n        def inner():\n            pass\n"
        );
    }

    #[test]
    fn test_line_numbers_refer_to_original() {
        let src = "def f():\n    y = 2\n    return y\nx = f()\n";
        let rw = rewrite(src).unwrap();
        assert!(rw.source.contains("y = 2; __tl__.var('y', y, 2)"));
        assert!(rw.source.contains("x = f(); __tl__.var('x', x, 4)"));
        assert_eq!(rw.line_map, vec![1, 1, 2, 3, 4, 5]);
        assert_eq!(rw.stats.variables, 2);
    }

    #[test]
    fn test_strings_untouched() {
        let src = "s = '''\ndef not_code():\n    x = 1\n'''\n";
        let out = hooked(src);
        assert_eq!(out, "s = '''\ndef not_code():\n    x = 1\n'''; __tl__.var('s', s, 1)\n");
    }

    #[test]
    fn test_lex_failure_degrades() {
        let src = "x = 'unterminated\n";
        let rw = rewrite(src).unwrap();
        assert!(rw.degraded);
        assert_eq!(rw.source, src);
        assert_eq!(rw.line_map, vec![1, 2]);
        assert_eq!(rw.stats.total(), 0);
    }

    #[test]
    fn test_reserved_name_rejected() {
        let err = rewrite("__tl__ = None\n").unwrap_err();
        assert_eq!(err, LangError::Reserved("__tl__"));
        // Inside a string it is just text.
        assert!(rewrite("s = '__tl__'\n").is_ok());
    }
}
