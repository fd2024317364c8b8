//! Scoped temporary directories.
//!
//! Every directory a run creates is owned by exactly one [`Sandbox`]. Dropping
//! the sandbox removes the directory; a failed removal is logged and swallowed.

use std::path::Path;

use tempfile::TempDir;
use tracing::{debug, warn};

use contextmaker_shared::{ContextMakerError, Result};

/// A disposable temporary directory, removed on drop.
#[derive(Debug)]
pub struct Sandbox {
    dir: Option<TempDir>,
}

impl Sandbox {
    /// Create a fresh directory under the system temp dir, named `<prefix>XXXXXX`.
    pub fn new(prefix: &str) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(prefix)
            .tempdir()
            .map_err(|e| ContextMakerError::io(std::env::temp_dir(), e))?;
        debug!(path = %dir.path().display(), "created sandbox");
        Ok(Self { dir: Some(dir) })
    }

    /// Root of the sandbox.
    pub fn path(&self) -> &Path {
        // `dir` is only taken in `drop`.
        self.dir
            .as_ref()
            .map(TempDir::path)
            .unwrap_or_else(|| Path::new(""))
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let path = dir.path().to_path_buf();
        match dir.close() {
            Ok(()) => debug!(path = %path.display(), "removed sandbox"),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove sandbox"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_is_removed_on_drop() {
        let sandbox = Sandbox::new("cm_test_").unwrap();
        let path = sandbox.path().to_path_buf();
        std::fs::write(path.join("file.txt"), "data").unwrap();
        std::fs::create_dir_all(path.join("nested/deeper")).unwrap();
        assert!(path.is_dir());

        drop(sandbox);
        assert!(!path.exists());
    }

    #[test]
    fn sandbox_uses_prefix() {
        let sandbox = Sandbox::new("safe_conf_").unwrap();
        let name = sandbox.path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("safe_conf_"));
    }

    #[test]
    fn drop_tolerates_externally_removed_dir() {
        let sandbox = Sandbox::new("cm_gone_").unwrap();
        std::fs::remove_dir_all(sandbox.path()).unwrap();
        drop(sandbox);
    }
}
