//! `p4guard watch <root>`: offer `p4 add` for files created under a
//! directory, asking on the terminal.

use anyhow::{Context, Result};
use notify::event::{CreateKind, ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::{mpsc, Mutex};
use tokio::task::LocalSet;
use tracing::{debug, info, warn};

use crate::host::Host;
use crate::orchestrator::{GuardOptions, Orchestrator};
use crate::p4::{P4Client, ProcessRunner};
use crate::preferences::{LiveToggle, Preferences};
use crate::types::{Answer, NotifyLevel};

// ===================================================================
// Filesystem events
// ===================================================================

/// Watches a directory tree and reports newly created files.
pub struct TreeWatcher {
    _watcher: RecommendedWatcher,
    receiver: mpsc::UnboundedReceiver<PathBuf>,
}

impl TreeWatcher {
    pub fn start(root: &Path) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(err) => {
                    warn!(%err, "watch error");
                    return;
                }
            };
            for path in created_files(event) {
                let _ = tx.send(path);
            }
        })
        .context("creating filesystem watcher")?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("watching {}", root.display()))?;

        Ok(Self {
            _watcher: watcher,
            receiver: rx,
        })
    }

    /// The next created file, or `None` once the watcher has shut down.
    pub async fn recv(&mut self) -> Option<PathBuf> {
        self.receiver.recv().await
    }
}

/// Files that newly exist after `event`. A rename into place (the usual
/// atomic save) counts as a creation of its target.
fn created_files(event: Event) -> Vec<PathBuf> {
    let paths = match event.kind {
        EventKind::Create(CreateKind::File | CreateKind::Any) => event.paths,
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => event.paths,
        // Both carries [from, to].
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.into_iter().last().into_iter().collect()
        }
        _ => return Vec::new(),
    };
    paths.into_iter().filter(|p| p.is_file()).collect()
}

// ===================================================================
// Terminal host
// ===================================================================

/// Asks on stderr, reads answers from `input` one line at a time.
pub struct TerminalHost<R> {
    input: Mutex<Lines<R>>,
    toggle: LiveToggle,
}

impl TerminalHost<BufReader<Stdin>> {
    pub fn stdin(toggle: LiveToggle) -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), toggle)
    }
}

impl<R: AsyncBufRead + Unpin> TerminalHost<R> {
    pub fn new(input: R, toggle: LiveToggle) -> Self {
        Self {
            input: Mutex::new(input.lines()),
            toggle,
        }
    }
}

/// `y`/`yes` is Yes, end of input is Dismissed, anything else No.
fn parse_answer(line: Option<&str>) -> Answer {
    match line.map(|l| l.trim().to_ascii_lowercase()) {
        None => Answer::Dismissed,
        Some(l) if l == "y" || l == "yes" => Answer::Yes,
        Some(_) => Answer::No,
    }
}

impl<R: AsyncBufRead + Unpin> Host for TerminalHost<R> {
    async fn confirm(&self, message: &str) -> Answer {
        let mut input = self.input.lock().await;
        eprint!("{message} [y/N] ");
        match input.next_line().await {
            Ok(line) => parse_answer(line.as_deref()),
            Err(err) => {
                warn!(%err, "could not read answer");
                Answer::Dismissed
            }
        }
    }

    fn notify(&self, level: NotifyLevel, message: &str) {
        match level {
            NotifyLevel::Info => eprintln!("{message}"),
            NotifyLevel::Error => eprintln!("error: {message}"),
        }
    }

    fn refresh_document(&self, _path: &Path) {}

    fn enabled(&self) -> bool {
        self.toggle.enabled()
    }
}

// ===================================================================
// Entry point
// ===================================================================

pub async fn watch(prefs: &Preferences, toggle: LiveToggle, root: &Path) -> Result<()> {
    let root = root
        .canonicalize()
        .with_context(|| format!("resolving {}", root.display()))?;
    let p4 = P4Client::new(ProcessRunner, prefs.p4.clone(), prefs.edit_commands.clone());

    match p4.client_root(&root).await {
        Ok(Some(client)) if !root.starts_with(&client) => {
            warn!(root = %root.display(), client = %client.display(), "watched directory is outside the client root");
        }
        Ok(Some(client)) => debug!(client = %client.display(), "client root"),
        Ok(None) => warn!("no Perforce client for this directory"),
        Err(err) => warn!(%err, "could not query the client root"),
    }

    let orchestrator = Orchestrator::new(
        TerminalHost::stdin(toggle),
        p4,
        GuardOptions::from(prefs),
    );
    let mut watcher = TreeWatcher::start(&root)?;
    info!(root = %root.display(), "watching for new files");

    LocalSet::new()
        .run_until(async move {
            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);
            loop {
                let path = tokio::select! {
                    _ = &mut ctrl_c => break,
                    path = watcher.recv() => match path {
                        Some(path) => path,
                        None => break,
                    },
                };
                let outcome = tokio::select! {
                    _ = &mut ctrl_c => break,
                    outcome = orchestrator.on_file_created(&path) => outcome,
                };
                debug!(path = %path.display(), ?outcome, "created file handled");
            }
            orchestrator.drain().await;
            orchestrator.shutdown();
        })
        .await;
    Ok(())
}
