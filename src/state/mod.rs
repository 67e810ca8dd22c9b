//! Transient, process-local guard state. Nothing here outlives the process.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;
use tokio::task::AbortHandle;

// ===================================================================
// Suppression set
// ===================================================================

struct Suppression {
    id: u64,
    timer: AbortHandle,
}

/// Paths whose prompt was recently declined (or found not applicable).
///
/// Each entry owns an expiry timer running on the local task set; the entry
/// removes itself when the timer fires. Re-suppressing a path restarts its
/// window. Dropping the set cancels every outstanding timer.
#[derive(Default)]
pub struct SuppressionSet {
    entries: Rc<RefCell<HashMap<PathBuf, Suppression>>>,
    next_id: Cell<u64>,
}

impl SuppressionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.entries.borrow().contains_key(path)
    }

    /// Suppress `path` for `window`. Must be called from within a `LocalSet`.
    pub fn suppress(&self, path: &Path, window: Duration) {
        let id = self.next_id.get();
        self.next_id.set(id + 1);

        let entries = Rc::clone(&self.entries);
        let key = path.to_path_buf();
        let timer = tokio::task::spawn_local(async move {
            tokio::time::sleep(window).await;
            let mut entries = entries.borrow_mut();
            // A newer window for the same path replaces this one.
            if entries.get(&key).is_some_and(|s| s.id == id) {
                entries.remove(&key);
            }
        });

        let replaced = self.entries.borrow_mut().insert(
            path.to_path_buf(),
            Suppression {
                id,
                timer: timer.abort_handle(),
            },
        );
        if let Some(old) = replaced {
            old.timer.abort();
        }
    }

    /// End the window for `path` now.
    pub fn clear(&self, path: &Path) {
        if let Some(entry) = self.entries.borrow_mut().remove(path) {
            entry.timer.abort();
        }
    }

    /// Cancel every window and its timer.
    pub fn clear_all(&self) {
        for (_, entry) in self.entries.borrow_mut().drain() {
            entry.timer.abort();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }
}

impl Drop for SuppressionSet {
    fn drop(&mut self) {
        self.clear_all();
    }
}

// ===================================================================
// In-flight prompts
// ===================================================================

/// What an outstanding prompt is keyed on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PromptKey {
    /// The keystroke flow. Only one document has focus, so one key covers it.
    Focused,
    Path(PathBuf),
}

/// Set of prompts currently awaiting the user or their follow-up command.
#[derive(Debug, Default, Clone)]
pub struct InFlight {
    keys: Rc<RefCell<HashSet<PromptKey>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `key` outstanding. Returns `None` if it already is; the caller
    /// then drops its event instead of queueing it.
    pub fn try_begin(&self, key: PromptKey) -> Option<InFlightGuard> {
        if !self.keys.borrow_mut().insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard {
            keys: Rc::clone(&self.keys),
            key,
        })
    }

    pub fn len(&self) -> usize {
        self.keys.borrow().len()
    }
}

/// Clears its key when dropped, whichever way the prompt flow ends.
#[derive(Debug)]
pub struct InFlightGuard {
    keys: Rc<RefCell<HashSet<PromptKey>>>,
    key: PromptKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.keys.borrow_mut().remove(&self.key);
    }
}

#[cfg(test)]
mod tests;
