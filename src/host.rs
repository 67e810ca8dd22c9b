//! Capabilities the editor lends to the guards.

use crate::types::{Answer, NotifyLevel};
use std::fs;
use std::path::Path;
use std::rc::Rc;

/// The editor as seen by the orchestrator.
///
/// Implementations are driven from a single-threaded event loop, so none of
/// these need to be `Send`.
pub trait Host {
    /// Show a modal Yes/No confirmation and wait for the user. There is no
    /// timeout: the dialog is outstanding until the user (or the host) resolves it.
    async fn confirm(&self, message: &str) -> Answer;

    fn notify(&self, level: NotifyLevel, message: &str);

    /// Make the editor re-read the document's read-only state from disk.
    fn refresh_document(&self, path: &Path);

    /// The master toggle, read fresh on every call.
    fn enabled(&self) -> bool;

    fn is_write_protected(&self, path: &Path) -> bool {
        is_write_protected(path)
    }
}

impl<T: Host> Host for Rc<T> {
    async fn confirm(&self, message: &str) -> Answer {
        (**self).confirm(message).await
    }

    fn notify(&self, level: NotifyLevel, message: &str) {
        (**self).notify(level, message)
    }

    fn refresh_document(&self, path: &Path) {
        (**self).refresh_document(path)
    }

    fn enabled(&self) -> bool {
        (**self).enabled()
    }

    fn is_write_protected(&self, path: &Path) -> bool {
        (**self).is_write_protected(path)
    }
}

/// Whether the file's permission bits forbid writing. A file that cannot be
/// stat'ed (missing, unreadable parent) counts as writable.
pub fn is_write_protected(path: &Path) -> bool {
    fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().readonly())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readonly_file_is_write_protected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, "locked").unwrap();
        assert!(!is_write_protected(&path));

        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_readonly(true);
        fs::set_permissions(&path, perms).unwrap();
        assert!(is_write_protected(&path));
    }

    #[test]
    fn missing_file_and_directories_are_not_write_protected() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_write_protected(&dir.path().join("nope.txt")));
        assert!(!is_write_protected(dir.path()));
    }
}
