//! Per-execution scratch workspace.
//!
//! Each execution gets its own temporary directory holding the generated
//! program. The directory is removed when the workspace is dropped, which
//! covers every exit path including forced termination.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::error::{ResourceError, ResourceResult};

/// A temporary directory owned by one execution.
pub struct ScratchWorkspace {
    dir: TempDir,
}

impl ScratchWorkspace {
    /// Create a fresh workspace under the system temp directory.
    pub fn create() -> ResourceResult<Self> {
        let dir = tempfile::Builder::new()
            .prefix("tracelab-")
            .tempdir()
            .map_err(ResourceError::WorkspaceCreate)?;

        debug!(path = %dir.path().display(), "Scratch workspace created");
        Ok(Self { dir })
    }

    /// The workspace directory.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write a file into the workspace and return its path.
    ///
    /// `name` must be a plain file name.
    pub async fn write_file(&self, name: &str, contents: &str) -> ResourceResult<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(ResourceError::InvalidConfig(format!(
                "invalid workspace file name '{name}'"
            )));
        }

        let path = self.dir.path().join(name);
        tokio::fs::write(&path, contents)
            .await
            .map_err(|source| ResourceError::WorkspaceWrite {
                path: path.clone(),
                source,
            })?;

        debug!(path = %path.display(), bytes = contents.len(), "Program written");
        Ok(path)
    }

    /// Remove the workspace, reporting failures.
    ///
    /// Dropping the workspace also removes it, but silently.
    pub fn close(self) -> ResourceResult<()> {
        let path = self.dir.path().to_path_buf();
        self.dir.close().map_err(|e| {
            warn!(path = %path.display(), error = %e, "Failed to remove scratch workspace");
            ResourceError::WorkspaceCleanup(e)
        })?;
        debug!(path = %path.display(), "Scratch workspace removed");
        Ok(())
    }
}

impl std::fmt::Debug for ScratchWorkspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchWorkspace")
            .field("path", &self.dir.path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_and_close() {
        let workspace = ScratchWorkspace::create().unwrap();
        let root = workspace.path().to_path_buf();

        let file = workspace.write_file("main.py", "print(1)\n").await.unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "print(1)\n");

        workspace.close().unwrap();
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_removed_on_drop() {
        let root = {
            let workspace = ScratchWorkspace::create().unwrap();
            workspace.write_file("main.js", "1").await.unwrap();
            workspace.path().to_path_buf()
        };
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn test_rejects_path_names() {
        let workspace = ScratchWorkspace::create().unwrap();
        let result = workspace.write_file("../escape.py", "").await;
        assert!(matches!(result, Err(ResourceError::InvalidConfig(_))));
    }

    #[test]
    fn test_workspaces_are_isolated() {
        let a = ScratchWorkspace::create().unwrap();
        let b = ScratchWorkspace::create().unwrap();
        assert_ne!(a.path(), b.path());
    }
}
