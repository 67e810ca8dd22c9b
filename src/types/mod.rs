use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ===================================================================
// Shared Enums
// ===================================================================

/// How the user resolved a modal confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Answer {
    Yes,
    No,
    /// The dialog was closed without choosing (Escape, window closed, host gone).
    Dismissed,
}

/// What the host should do with an intercepted keystroke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum KeystrokeDecision {
    /// Insert the text as if nothing intercepted it.
    PassThrough,
    /// Drop the text. It is not applied to the document.
    Swallow,
}

/// Whether a pending file removal may go ahead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteDecision {
    Proceed,
    Veto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyLevel {
    Info,
    Error,
}

/// The document that currently has keyboard focus in the editor.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FocusedDocument {
    /// URI scheme of the document (`file`, `untitled`, `git`, ...).
    pub scheme: String,
    pub path: PathBuf,
}

impl FocusedDocument {
    /// The on-disk path, if the document lives on the local filesystem.
    pub fn local_path(&self) -> Option<&Path> {
        (self.scheme == "file").then_some(self.path.as_path())
    }
}

// ===================================================================
// Host Events (received via stdin, one JSON object per line)
// ===================================================================

#[derive(Debug, Deserialize)]
pub struct KeystrokeEvent {
    pub id: u64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub document: Option<FocusedDocument>,
}

#[derive(Debug, Deserialize)]
pub struct FilesCreatedEvent {
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct FilesWillDeleteEvent {
    pub id: u64,
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmResultEvent {
    pub id: u64,
    pub answer: Answer,
}

#[derive(Debug, Deserialize)]
pub struct ConfigurationEvent {
    /// Host-side value of the toggle; `None` falls back to the preferences file.
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// Top-level host event, tagged by the `event` field.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HostEvent {
    Keystroke(KeystrokeEvent),
    FilesCreated(FilesCreatedEvent),
    FilesWillDelete(FilesWillDeleteEvent),
    ConfirmResult(ConfirmResultEvent),
    Configuration(ConfigurationEvent),
    Shutdown,
}

// ===================================================================
// Guard Messages (written to stdout, one JSON object per line)
// ===================================================================

/// Everything p4guard tells the host, tagged by the `kind` field.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GuardMessage {
    KeystrokeResult {
        id: u64,
        decision: KeystrokeDecision,
    },
    /// Show a modal Yes/No dialog; the host replies with `confirm_result`.
    Confirm { id: u64, message: String },
    Notify { level: NotifyLevel, message: String },
    /// Re-read the document's read-only state from disk.
    RefreshDocument { path: PathBuf },
    /// Paths the host must keep; every other path in the request may go.
    WillDeleteResult { id: u64, vetoed: Vec<PathBuf> },
}
