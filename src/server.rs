//! `p4guard serve`: the editor talks to the guards over stdin/stdout, one
//! JSON object per line.

use anyhow::{Context, Result};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::rc::Rc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;
use tokio::task::LocalSet;
use tracing::{debug, warn};

use crate::host::Host;
use crate::orchestrator::{GuardOptions, Orchestrator};
use crate::p4::{P4Client, ProcessRunner};
use crate::preferences::{LiveToggle, Preferences};
use crate::types::{Answer, GuardMessage, HostEvent, NotifyLevel};

/// The editor on the far end of the line protocol.
pub struct ProtocolHost<W> {
    out: RefCell<W>,
    toggle: LiveToggle,
    pending: RefCell<HashMap<u64, oneshot::Sender<Answer>>>,
    next_id: Cell<u64>,
    closed: Cell<bool>,
}

impl<W: Write> ProtocolHost<W> {
    pub fn new(out: W, toggle: LiveToggle) -> Self {
        Self {
            out: RefCell::new(out),
            toggle,
            pending: RefCell::new(HashMap::new()),
            next_id: Cell::new(1),
            closed: Cell::new(false),
        }
    }

    pub fn send(&self, message: &GuardMessage) {
        let line = match serde_json::to_string(message) {
            Ok(line) => line,
            Err(err) => {
                warn!(%err, "could not serialize message");
                return;
            }
        };
        let mut out = self.out.borrow_mut();
        if let Err(err) = writeln!(out, "{line}").and_then(|()| out.flush()) {
            warn!(%err, "could not write to host");
        }
    }

    /// Deliver the host's answer to the dialog with `id`.
    pub fn resolve(&self, id: u64, answer: Answer) {
        match self.pending.borrow_mut().remove(&id) {
            Some(tx) => {
                let _ = tx.send(answer);
            }
            None => warn!(id, "answer for unknown dialog"),
        }
    }

    /// The host is gone: every open and future dialog resolves as dismissed.
    pub fn close(&self) {
        self.closed.set(true);
        self.pending.borrow_mut().clear();
    }

    pub fn toggle(&self) -> &LiveToggle {
        &self.toggle
    }
}

impl<W: Write> Host for ProtocolHost<W> {
    async fn confirm(&self, message: &str) -> Answer {
        if self.closed.get() {
            return Answer::Dismissed;
        }
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let (tx, rx) = oneshot::channel();
        self.pending.borrow_mut().insert(id, tx);
        self.send(&GuardMessage::Confirm {
            id,
            message: message.to_string(),
        });
        rx.await.unwrap_or(Answer::Dismissed)
    }

    fn notify(&self, level: NotifyLevel, message: &str) {
        self.send(&GuardMessage::Notify {
            level,
            message: message.to_string(),
        });
    }

    fn refresh_document(&self, path: &Path) {
        self.send(&GuardMessage::RefreshDocument {
            path: path.to_path_buf(),
        });
    }

    fn enabled(&self) -> bool {
        self.toggle.enabled()
    }
}

/// Read events from stdin until `shutdown` or EOF.
pub async fn serve(prefs: &Preferences, toggle: LiveToggle) -> Result<()> {
    let host = Rc::new(ProtocolHost::new(std::io::stdout(), toggle));
    let p4 = P4Client::new(ProcessRunner, prefs.p4.clone(), prefs.edit_commands.clone());
    let orchestrator = Orchestrator::new(Rc::clone(&host), p4, GuardOptions::from(prefs));

    let stdin = BufReader::new(tokio::io::stdin());
    LocalSet::new()
        .run_until(run(stdin, host, orchestrator))
        .await
}

async fn run<In, W>(
    input: In,
    host: Rc<ProtocolHost<W>>,
    orchestrator: Orchestrator<Rc<ProtocolHost<W>>, ProcessRunner>,
) -> Result<()>
where
    In: tokio::io::AsyncBufRead + Unpin,
    W: Write + 'static,
{
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await.context("reading host events")? {
        if line.trim().is_empty() {
            continue;
        }
        let event: HostEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(err) => {
                warn!(%err, "skipping malformed event");
                continue;
            }
        };
        match event {
            HostEvent::Keystroke(e) => {
                let decision = orchestrator.on_keystroke(e.document.as_ref());
                debug!(id = e.id, text = %e.text, ?decision, "keystroke");
                host.send(&GuardMessage::KeystrokeResult { id: e.id, decision });
            }
            HostEvent::FilesCreated(e) => {
                let o = orchestrator.clone();
                orchestrator.spawn(async move {
                    o.on_files_created(&e.paths).await;
                });
            }
            HostEvent::FilesWillDelete(e) => {
                let o = orchestrator.clone();
                let h = Rc::clone(&host);
                orchestrator.spawn(async move {
                    let vetoed = o.on_files_will_delete(&e.paths).await;
                    h.send(&GuardMessage::WillDeleteResult { id: e.id, vetoed });
                });
            }
            HostEvent::ConfirmResult(e) => host.resolve(e.id, e.answer),
            HostEvent::Configuration(e) => host.toggle().set_override(e.enabled),
            HostEvent::Shutdown => break,
        }
    }

    host.close();
    orchestrator.drain().await;
    orchestrator.shutdown();
    Ok(())
}
