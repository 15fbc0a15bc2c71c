//! Scaling runs for complexity estimation.

use tracelab_core::{ExecutionId, ExecutionRequest};

/// One run of a profile: an input size and the stdin that produces it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileInput {
    /// Input size the run is measured at.
    pub input_size: u64,
    /// Lines fed to standard input.
    pub stdin: Vec<String>,
}

impl ProfileInput {
    /// A run whose only stdin line is the size itself.
    pub fn sized(input_size: u64) -> Self {
        Self {
            input_size,
            stdin: vec![input_size.to_string()],
        }
    }

    /// Replace the stdin lines.
    pub fn with_stdin_lines<I, S>(mut self, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stdin = lines.into_iter().map(Into::into).collect();
        self
    }

    /// The request for this run, derived from `template` under a fresh id.
    pub(crate) fn request(&self, template: &ExecutionRequest) -> ExecutionRequest {
        template
            .clone()
            .with_id(ExecutionId::new())
            .with_stdin_lines(self.stdin.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sized_input() {
        let input = ProfileInput::sized(128);
        assert_eq!(input.stdin, vec!["128".to_string()]);
    }

    #[test]
    fn test_request_keeps_template() {
        let template = ExecutionRequest::new("python", "n = int(input())")
            .with_id("template")
            .with_stdin_lines(["ignored"]);
        let input = ProfileInput::sized(10).with_stdin_lines(["10", "x"]);

        let request = input.request(&template);
        assert_eq!(request.language, "python");
        assert_eq!(request.source, template.source);
        assert_eq!(request.stdin, vec!["10".to_string(), "x".to_string()]);
        assert_ne!(request.id, template.id);
    }
}
