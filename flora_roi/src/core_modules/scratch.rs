// THEORY:
// External tools talk to us through files. Every task that needs such files gets
// its own directory, `<root>/<label>-<uuid>`, so two workers handling images with
// the same name still never touch each other's files. The directory and
// everything in it is deleted when the guard goes out of scope, on success, on
// error, and while unwinding from a panic.

use crate::error::{RoiError, RoiResult};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    /// Creates a fresh, uniquely named directory below `root`.
    pub fn create(root: &Path, label: &str) -> RoiResult<Self> {
        let label: String = label
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let path = root.join(format!("{label}-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&path)
            .map_err(|e| RoiError::io(format!("creating scratch directory {}", path.display()), e))?;
        debug!(path = %path.display(), "scratch directory created");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "scratch directory removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove scratch directory"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directories_are_unique_and_removed_on_drop() {
        let root = std::env::temp_dir();
        let first = ScratchDir::create(&root, "IMG 001.jpg").expect("scratch");
        let second = ScratchDir::create(&root, "IMG 001.jpg").expect("scratch");
        assert_ne!(first.path(), second.path());
        assert!(first.path().is_dir());

        std::fs::write(first.file("mask.txt"), "-1 -1 \n").expect("write");
        let kept = first.path().to_path_buf();
        drop(first);
        assert!(!kept.exists());
        assert!(second.path().is_dir());
    }

    #[test]
    fn removed_while_unwinding() {
        let root = std::env::temp_dir();
        let mut seen = PathBuf::new();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let scratch = ScratchDir::create(&root, "panicky").expect("scratch");
            seen = scratch.path().to_path_buf();
            panic!("handler blew up");
        }));
        assert!(result.is_err());
        assert!(!seen.as_os_str().is_empty());
        assert!(!seen.exists());
    }
}
