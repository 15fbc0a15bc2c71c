//! Language handler registry.
//!
//! This module provides the `LanguageRegistry` type, which holds exactly
//! one handler per supported language and resolves requests to it by
//! exact identifier match.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::error::{ExecutionError, ExecutionResult};
use crate::handler::{LanguageHandler, LanguageInfo};

/// A handler shared across concurrent executions.
pub type SharedHandler = Arc<dyn LanguageHandler>;

/// The table of registered language handlers.
///
/// # Example
///
/// ```ignore
/// use tracelab_core::LanguageRegistry;
///
/// let registry = LanguageRegistry::new();
/// registry.register(PythonHandler::new(&config))?;
///
/// let handler = registry.resolve("python")?;
/// ```
#[derive(Default)]
pub struct LanguageRegistry {
    handlers: DashMap<String, SharedHandler>,
}

impl LanguageRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Register a handler.
    ///
    /// # Errors
    ///
    /// Returns an error if a handler with the same identifier exists.
    pub fn register<H: LanguageHandler + 'static>(&self, handler: H) -> ExecutionResult<()> {
        self.register_shared(Arc::new(handler))
    }

    /// Register a shared handler.
    pub fn register_shared(&self, handler: SharedHandler) -> ExecutionResult<()> {
        let id = handler.id().to_string();

        if self.handlers.contains_key(&id) {
            return Err(ExecutionError::DuplicateHandler(id));
        }

        info!(language = %id, "Language handler registered");
        self.handlers.insert(id, handler);
        Ok(())
    }

    /// Resolve a language identifier to its handler.
    ///
    /// Matching is exact: no case folding and no aliases.
    pub fn resolve(&self, language: &str) -> ExecutionResult<SharedHandler> {
        self.handlers
            .get(language)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| ExecutionError::UnsupportedLanguage(language.to_string()))
    }

    /// Check if a language is registered.
    pub fn contains(&self, language: &str) -> bool {
        self.handlers.contains_key(language)
    }

    /// Get the number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Registered identifiers, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handlers.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Supported-languages listing, sorted by identifier.
    pub fn languages(&self) -> Vec<LanguageInfo> {
        let handlers: Vec<SharedHandler> =
            self.handlers.iter().map(|r| Arc::clone(r.value())).collect();
        let mut infos: Vec<LanguageInfo> = handlers.iter().map(|h| h.info()).collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }
}

impl std::fmt::Debug for LanguageRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanguageRegistry")
            .field("languages", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackingOptions;
    use crate::handler::{EventSender, ExecutionContext, InstrumentedProgram, InstrumentationStats};
    use crate::request::{ExecutionOutcome, ExecutionSuccess};
    use async_trait::async_trait;
    use std::time::Duration;

    struct EchoHandler(&'static str);

    #[async_trait]
    impl LanguageHandler for EchoHandler {
        fn id(&self) -> &'static str {
            self.0
        }

        fn display_name(&self) -> &'static str {
            "Echo"
        }

        fn version(&self) -> String {
            "1.0".to_string()
        }

        fn default_timeout(&self) -> Duration {
            Duration::from_secs(1)
        }

        fn instrument(
            &self,
            source: &str,
            _options: &TrackingOptions,
        ) -> ExecutionResult<InstrumentedProgram> {
            Ok(InstrumentedProgram {
                language: self.0,
                source: source.to_string(),
                file_name: "main.txt".to_string(),
                original_lines: source.lines().count(),
                degraded: false,
                stats: InstrumentationStats::default(),
            })
        }

        async fn execute(
            &self,
            program: &InstrumentedProgram,
            _ctx: ExecutionContext,
            _events: EventSender,
        ) -> ExecutionResult<ExecutionOutcome> {
            Ok(ExecutionOutcome::Success(ExecutionSuccess {
                output: program.source.clone(),
                ..Default::default()
            }))
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = LanguageRegistry::new();
        registry.register(EchoHandler("echo")).unwrap();

        assert!(registry.contains("echo"));
        assert_eq!(registry.resolve("echo").unwrap().id(), "echo");
    }

    #[test]
    fn test_resolve_unknown_language() {
        let registry = LanguageRegistry::new();
        registry.register(EchoHandler("echo")).unwrap();

        let err = registry.resolve("cobol").err().unwrap();
        assert!(matches!(err, ExecutionError::UnsupportedLanguage(ref l) if l == "cobol"));
    }

    #[test]
    fn test_resolution_is_exact() {
        let registry = LanguageRegistry::new();
        registry.register(EchoHandler("echo")).unwrap();
        assert!(registry.resolve("Echo").is_err());
        assert!(registry.resolve(" echo").is_err());
    }

    #[test]
    fn test_duplicate_registration() {
        let registry = LanguageRegistry::new();
        registry.register(EchoHandler("echo")).unwrap();

        let result = registry.register(EchoHandler("echo"));
        assert!(matches!(result, Err(ExecutionError::DuplicateHandler(_))));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_languages_listing_sorted() {
        let registry = LanguageRegistry::new();
        registry.register(EchoHandler("zeta")).unwrap();
        registry.register(EchoHandler("alpha")).unwrap();

        let listing = registry.languages();
        let ids: Vec<&str> = listing.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["alpha", "zeta"]);
        assert_eq!(listing[0].display_name, "Echo");
        assert_eq!(listing[0].version, "1.0");
    }
}
