//! Per-request sandbox directories.
//!
//! Every verification request gets its own randomized directory under the
//! system temp dir. Concurrent requests never share a root, and release is
//! tied to drop so the tree is deleted on every exit path, including panics
//! and timeout cancellation of the enclosing task.

use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub struct Sandbox {
    root: TempDir,
}

impl Sandbox {
    /// Create a fresh private working area.
    ///
    /// The name is randomized and created with O_EXCL semantics, so two live
    /// sandboxes cannot collide even across processes.
    pub fn acquire() -> Result<Self, String> {
        let root = tempfile::Builder::new()
            .prefix("mumei-forge-")
            .tempdir()
            .map_err(|e| format!("failed to create sandbox dir: {e}"))?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// Absolute path of `name` inside the sandbox.
    ///
    /// `name` must be a bare file name; separators or dot-dots would let a
    /// request write outside its own root.
    pub fn join(&self, name: &str) -> Result<PathBuf, String> {
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains('/')
            || name.contains('\\')
        {
            return Err(format!("invalid sandbox file name: {name:?}"));
        }
        Ok(self.root.path().join(name))
    }

    /// Write `text` to `name` inside the sandbox (atomic replace).
    pub fn write_source(&self, name: &str, text: &str) -> Result<PathBuf, String> {
        let p = self.join(name)?;
        crate::write_atomic(&p, text)?;
        Ok(p)
    }
}
