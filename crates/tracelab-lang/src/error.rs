//! Error types for the language handlers.

use thiserror::Error;

use tracelab_core::ExecutionError;

/// Errors raised while rewriting source.
///
/// Lexical and bracket errors are recoverable: the handler falls back to the
/// unmodified snippet. The remaining kinds mean no program can be produced.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LangError {
    /// The lexer could not tokenize the source.
    #[error("Lexical error at line {line}: {reason}")]
    Lex {
        /// Line where lexing stopped.
        line: u32,
        /// What went wrong.
        reason: String,
    },

    /// A bracket was never closed, or closed by the wrong delimiter.
    #[error("Unbalanced '{delimiter}' at line {line}")]
    Unbalanced {
        /// Line of the offending delimiter.
        line: u32,
        /// The delimiter.
        delimiter: char,
    },

    /// The source uses an identifier reserved for the trace hooks.
    #[error("Source uses the reserved identifier '{0}'")]
    Reserved(&'static str),

    /// The source contains a NUL byte.
    #[error("Source contains a NUL byte")]
    NulByte,

    /// The prelude configuration could not be serialized.
    #[error("Failed to serialize prelude configuration: {0}")]
    Serialize(String),
}

impl LangError {
    pub(crate) fn lex(line: u32, reason: impl Into<String>) -> Self {
        LangError::Lex {
            line,
            reason: reason.into(),
        }
    }

    /// Whether the handler can fall back to the unmodified snippet.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, LangError::Lex { .. } | LangError::Unbalanced { .. })
    }
}

impl From<LangError> for ExecutionError {
    fn from(err: LangError) -> Self {
        ExecutionError::InstrumentationFailure {
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for LangError {
    fn from(err: serde_json::Error) -> Self {
        LangError::Serialize(err.to_string())
    }
}

/// Result type for rewrite operations.
pub type LangResult<T> = std::result::Result<T, LangError>;

/// Reject source that no rewrite can carry.
pub(crate) fn check_source(source: &str) -> LangResult<()> {
    if source.contains('\0') {
        return Err(LangError::NulByte);
    }
    Ok(())
}
