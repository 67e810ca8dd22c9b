use std::cell::RefCell;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::host::Host;
use crate::ignore;
use crate::p4::{CommandRunner, P4Client};
use crate::preferences::{display_name, Preferences, Prompts};
use crate::state::{InFlight, PromptKey, SuppressionSet};
use crate::types::{Answer, DeleteDecision, FocusedDocument, KeystrokeDecision, NotifyLevel};

// ===================================================================
// Options and outcomes
// ===================================================================

/// Everything the guards need from preferences, resolved once at startup.
#[derive(Debug, Clone)]
pub struct GuardOptions {
    pub suppress_window: Duration,
    pub refresh_delay: Duration,
    pub verify_tracked_on_edit: bool,
    pub ignore_file: String,
    pub prompts: Prompts,
}

impl From<&Preferences> for GuardOptions {
    fn from(prefs: &Preferences) -> Self {
        Self {
            suppress_window: prefs.suppress_window(),
            refresh_delay: prefs.refresh_delay(),
            verify_tracked_on_edit: prefs.verify_tracked_on_edit,
            ignore_file: prefs.ignore_file_name(),
            prompts: prefs.prompts.clone(),
        }
    }
}

impl Default for GuardOptions {
    fn default() -> Self {
        Self::from(&Preferences::default())
    }
}

/// Why a guard did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    Disabled,
    Ignored,
    InFlight,
    OutsideWorkspace,
    AlreadyTracked,
    NotTracked,
}

/// What a creation or deletion guard did for one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Skipped(Skip),
    /// The user said no or closed the dialog.
    Declined,
    /// The Perforce command ran and succeeded.
    Applied,
    /// The Perforce command (or building the prompt) failed; the user was told.
    Failed,
}

// ===================================================================
// Orchestrator
// ===================================================================

struct Inner<H, R> {
    host: H,
    p4: P4Client<R>,
    options: GuardOptions,
    suppressed: SuppressionSet,
    in_flight: InFlight,
    tasks: RefCell<JoinSet<()>>,
}

/// Intercepts keystrokes, creations and deletions and turns them into
/// Perforce commands once the user agrees.
///
/// Cheap to clone; clones share state. All methods must be called from
/// inside a `LocalSet`.
pub struct Orchestrator<H, R> {
    inner: Rc<Inner<H, R>>,
}

impl<H, R> Clone for Orchestrator<H, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<H, R> Orchestrator<H, R>
where
    H: Host + 'static,
    R: CommandRunner + 'static,
{
    pub fn new(host: H, p4: P4Client<R>, options: GuardOptions) -> Self {
        Self {
            inner: Rc::new(Inner {
                host,
                p4,
                options,
                suppressed: SuppressionSet::new(),
                in_flight: InFlight::new(),
                tasks: RefCell::new(JoinSet::new()),
            }),
        }
    }

    /// Run `fut` in the background, tracked so `drain`/`shutdown` can reach it.
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + 'static,
    {
        let mut tasks = self.inner.tasks.borrow_mut();
        while let Some(done) = tasks.try_join_next() {
            log_task_result(done);
        }
        tasks.spawn_local(fut);
    }

    /// Wait for all background work, including work spawned while waiting.
    pub async fn drain(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *self.inner.tasks.borrow_mut());
            if tasks.is_empty() {
                return;
            }
            while let Some(done) = tasks.join_next().await {
                log_task_result(done);
            }
        }
    }

    /// Abort background work and cancel every suppression timer.
    pub fn shutdown(&self) {
        debug!(
            suppressed = self.inner.suppressed.len(),
            in_flight = self.inner.in_flight.len(),
            "shutting down guards"
        );
        self.inner.tasks.borrow_mut().abort_all();
        self.inner.suppressed.clear_all();
    }

    // ---------------------------------------------------------------
    // Keystroke guard
    // ---------------------------------------------------------------

    /// Decide what happens to a character typed into the focused document.
    ///
    /// Never blocks: when a prompt is needed it runs in the background and
    /// the keystroke itself is swallowed.
    pub fn on_keystroke(&self, document: Option<&FocusedDocument>) -> KeystrokeDecision {
        let inner = &self.inner;
        let Some(path) = document.and_then(FocusedDocument::local_path) else {
            return KeystrokeDecision::PassThrough;
        };
        if !inner.host.enabled() || !inner.host.is_write_protected(path) {
            return KeystrokeDecision::PassThrough;
        }
        if inner.suppressed.contains(path) {
            return KeystrokeDecision::Swallow;
        }
        let Some(guard) = inner.in_flight.try_begin(PromptKey::Focused) else {
            return KeystrokeDecision::Swallow;
        };

        let this = self.clone();
        let path = path.to_path_buf();
        self.spawn(async move {
            let _guard = guard;
            this.prompt_edit(&path).await;
        });
        KeystrokeDecision::Swallow
    }

    async fn prompt_edit(&self, path: &Path) {
        let inner = &self.inner;
        if inner.options.verify_tracked_on_edit && !inner.p4.is_tracked(path).await {
            debug!(path = %path.display(), "write-protected but not tracked, leaving it alone");
            inner.suppressed.suppress(path, inner.options.suppress_window);
            return;
        }
        let Some(message) = self.message(inner.options.prompts.edit_message(path)) else {
            return;
        };
        match inner.host.confirm(&message).await {
            Answer::Yes => {
                self.open_for_edit(path).await;
            }
            Answer::No | Answer::Dismissed => {
                debug!(path = %path.display(), "edit declined");
                inner.suppressed.suppress(path, inner.options.suppress_window);
            }
        }
    }

    async fn open_for_edit(&self, path: &Path) -> Outcome {
        let inner = &self.inner;
        let name = display_name(path);
        match inner.p4.edit(path).await {
            Ok(_) => {
                inner.suppressed.clear(path);
                inner
                    .host
                    .notify(NotifyLevel::Info, &format!("Opened {name} for edit."));
                self.schedule_refresh(path.to_path_buf());
                Outcome::Applied
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "edit failed");
                inner.host.notify(
                    NotifyLevel::Error,
                    &format!("Could not open {name} for edit: {err}"),
                );
                Outcome::Failed
            }
        }
    }

    /// The server clears the read-only bit asynchronously; give it a moment
    /// before asking the editor to look again.
    fn schedule_refresh(&self, path: PathBuf) {
        let this = self.clone();
        let delay = self.inner.options.refresh_delay;
        self.spawn(async move {
            tokio::time::sleep(delay).await;
            debug!(path = %path.display(), "refreshing document");
            this.inner.host.refresh_document(&path);
        });
    }

    // ---------------------------------------------------------------
    // Creation guard
    // ---------------------------------------------------------------

    /// Offer to `p4 add` a newly created file.
    pub async fn on_file_created(&self, path: &Path) -> Outcome {
        let inner = &self.inner;
        if !inner.host.enabled() {
            return Outcome::Skipped(Skip::Disabled);
        }
        if ignore::is_ignored(path, &inner.options.ignore_file) {
            debug!(path = %path.display(), "ignored, not offering add");
            return Outcome::Skipped(Skip::Ignored);
        }
        let Some(_guard) = inner.in_flight.try_begin(PromptKey::Path(path.to_path_buf())) else {
            return Outcome::Skipped(Skip::InFlight);
        };
        if !inner.p4.is_in_workspace(path).await {
            return Outcome::Skipped(Skip::OutsideWorkspace);
        }
        if inner.p4.is_tracked(path).await {
            return Outcome::Skipped(Skip::AlreadyTracked);
        }
        let Some(message) = self.message(inner.options.prompts.add_message(path)) else {
            return Outcome::Failed;
        };
        if inner.host.confirm(&message).await != Answer::Yes {
            return Outcome::Declined;
        }
        let name = display_name(path);
        match inner.p4.add(path).await {
            Ok(_) => {
                inner
                    .host
                    .notify(NotifyLevel::Info, &format!("Added {name} to Perforce."));
                Outcome::Applied
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "add failed");
                inner
                    .host
                    .notify(NotifyLevel::Error, &format!("Could not add {name}: {err}"));
                Outcome::Failed
            }
        }
    }

    /// Evaluate each created file in turn.
    pub async fn on_files_created(&self, paths: &[PathBuf]) -> Vec<Outcome> {
        let mut outcomes = Vec::with_capacity(paths.len());
        for path in paths {
            outcomes.push(self.on_file_created(path).await);
        }
        outcomes
    }

    // ---------------------------------------------------------------
    // Deletion guard
    // ---------------------------------------------------------------

    async fn check_delete(&self, path: &Path) -> Outcome {
        let inner = &self.inner;
        if !inner.host.enabled() {
            return Outcome::Skipped(Skip::Disabled);
        }
        if ignore::is_ignored(path, &inner.options.ignore_file) {
            return Outcome::Skipped(Skip::Ignored);
        }
        let Some(_guard) = inner.in_flight.try_begin(PromptKey::Path(path.to_path_buf())) else {
            return Outcome::Skipped(Skip::InFlight);
        };
        if !inner.p4.is_in_workspace(path).await {
            return Outcome::Skipped(Skip::OutsideWorkspace);
        }
        if !inner.p4.is_tracked(path).await {
            return Outcome::Skipped(Skip::NotTracked);
        }
        let Some(message) = self.message(inner.options.prompts.delete_message(path)) else {
            return Outcome::Failed;
        };
        if inner.host.confirm(&message).await != Answer::Yes {
            return Outcome::Declined;
        }
        let name = display_name(path);
        match inner.p4.delete(path).await {
            Ok(_) => {
                inner
                    .host
                    .notify(NotifyLevel::Info, &format!("Deleted {name} from Perforce."));
                Outcome::Applied
            }
            Err(err) => {
                warn!(path = %path.display(), %err, "delete failed");
                inner
                    .host
                    .notify(NotifyLevel::Error, &format!("Could not delete {name}: {err}"));
                Outcome::Failed
            }
        }
    }

    /// Called before the host removes `path`. The Perforce delete, when the
    /// user agrees, has already run by the time this returns.
    pub async fn on_file_will_delete(&self, path: &Path) -> DeleteDecision {
        match self.check_delete(path).await {
            Outcome::Declined | Outcome::Failed => DeleteDecision::Veto,
            Outcome::Applied | Outcome::Skipped(_) => DeleteDecision::Proceed,
        }
    }

    /// Evaluate every path in turn and return the ones whose removal is
    /// vetoed. The rest, skipped files included, may be deleted.
    pub async fn on_files_will_delete(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        let mut vetoed = Vec::new();
        for path in paths {
            if self.on_file_will_delete(path).await == DeleteDecision::Veto {
                info!(path = %path.display(), "deletion vetoed");
                vetoed.push(path.clone());
            }
        }
        vetoed
    }

    fn message(&self, rendered: anyhow::Result<String>) -> Option<String> {
        match rendered {
            Ok(message) => Some(message),
            Err(err) => {
                error!(err = %format!("{err:#}"), "could not render prompt");
                self.inner
                    .host
                    .notify(NotifyLevel::Error, &format!("p4guard: {err:#}"));
                None
            }
        }
    }
}

fn log_task_result(result: Result<(), tokio::task::JoinError>) {
    if let Err(err) = result {
        if err.is_panic() {
            error!(%err, "guard task panicked");
        }
    }
}
