use anyhow::{bail, Context, Result};
use minijinja::{context, Environment};
use serde::Deserialize;
use std::cell::Cell;
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Looked up in the working directory when no `--config` is given.
pub const FILENAME: &str = "p4guard.toml";

const DEFAULT_IGNORE_FILE: &str = ".p4ignore";

/// Dialog texts, as minijinja templates over `name` (file name) and `path`.
///
/// ```toml
/// [prompts]
/// add = "Add {{ name }} to the depot?"
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct Prompts {
    #[serde(default = "default_edit_prompt")]
    pub edit: String,
    #[serde(default = "default_add_prompt")]
    pub add: String,
    #[serde(default = "default_delete_prompt")]
    pub delete: String,
}

fn default_edit_prompt() -> String {
    "{{ name }} is read-only. Do you want to edit it in Perforce?".into()
}

fn default_add_prompt() -> String {
    "Do you want to add {{ name }} to Perforce?".into()
}

fn default_delete_prompt() -> String {
    "Do you want to delete {{ name }} from Perforce?".into()
}

impl Default for Prompts {
    fn default() -> Self {
        Self {
            edit: default_edit_prompt(),
            add: default_add_prompt(),
            delete: default_delete_prompt(),
        }
    }
}

impl Prompts {
    pub fn edit_message(&self, path: &Path) -> Result<String> {
        render_prompt(&self.edit, path)
    }

    pub fn add_message(&self, path: &Path) -> Result<String> {
        render_prompt(&self.add, path)
    }

    pub fn delete_message(&self, path: &Path) -> Result<String> {
        render_prompt(&self.delete, path)
    }

    fn validate(&self) -> Result<()> {
        let env = Environment::new();
        for (key, template) in [("edit", &self.edit), ("add", &self.add), ("delete", &self.delete)] {
            env.template_from_str(template)
                .with_context(|| format!("parsing prompts.{key} template"))?;
        }
        Ok(())
    }
}

/// The name shown to the user for `path`: its last component.
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn render_prompt(template: &str, path: &Path) -> Result<String> {
    let env = Environment::new();
    let tmpl = env
        .template_from_str(template)
        .context("parsing prompt template")?;
    tmpl.render(context! {
        name => display_name(path),
        path => path.display().to_string(),
    })
    .context("rendering prompt template")
}

/// User-facing preferences stored in `p4guard.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct Preferences {
    /// Master toggle. Re-read on every event through [`LiveToggle`].
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// The Perforce command-line client.
    #[serde(default = "default_p4")]
    pub p4: String,

    /// Candidate argv templates for opening a file for edit, tried in order.
    #[serde(default = "default_edit_commands")]
    pub edit_commands: Vec<Vec<String>>,

    /// Name of the ignore-rules file. Falls back to `P4IGNORE`, then `.p4ignore`.
    #[serde(default)]
    pub ignore_file: Option<String>,

    /// How long a declined edit prompt stays quiet.
    #[serde(default = "default_suppress_ms")]
    pub suppress_ms: u64,

    /// Delay between a successful edit and the document refresh.
    #[serde(default = "default_refresh_delay_ms")]
    pub refresh_delay_ms: u64,

    /// Ask the server whether a write-protected file is tracked before
    /// prompting to edit it. Untracked files are then left alone.
    #[serde(default = "default_verify_tracked_on_edit")]
    pub verify_tracked_on_edit: bool,

    #[serde(default)]
    pub prompts: Prompts,
}

fn default_enabled() -> bool {
    true
}

fn default_p4() -> String {
    "p4".into()
}

fn default_edit_commands() -> Vec<Vec<String>> {
    [["{{ p4 }}", "edit", "{{ path }}"], ["{{ p4 }}", "open", "{{ path }}"]]
        .iter()
        .map(|argv| argv.iter().map(|s| s.to_string()).collect())
        .collect()
}

fn default_suppress_ms() -> u64 {
    100
}

fn default_refresh_delay_ms() -> u64 {
    500
}

fn default_verify_tracked_on_edit() -> bool {
    true
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            p4: default_p4(),
            edit_commands: default_edit_commands(),
            ignore_file: None,
            suppress_ms: default_suppress_ms(),
            refresh_delay_ms: default_refresh_delay_ms(),
            verify_tracked_on_edit: default_verify_tracked_on_edit(),
            prompts: Prompts::default(),
        }
    }
}

impl Preferences {
    /// Load preferences from `path`.
    ///
    /// A missing file yields the defaults. Missing keys in an existing file
    /// are filled in with defaults via serde.
    pub fn load(path: &Path) -> Result<Self> {
        let prefs = match fs::read_to_string(path) {
            Ok(contents) => toml::from_str::<Preferences>(&contents)
                .with_context(|| format!("parsing {}", path.display()))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Preferences::default(),
            Err(e) => return Err(e).with_context(|| format!("reading {}", path.display())),
        };
        prefs
            .validate()
            .with_context(|| format!("validating {}", path.display()))?;
        Ok(prefs)
    }

    fn validate(&self) -> Result<()> {
        if self.edit_commands.is_empty() {
            bail!("edit_commands must list at least one command");
        }
        let env = Environment::new();
        for argv in &self.edit_commands {
            if argv.is_empty() {
                bail!("edit_commands entries must not be empty");
            }
            for arg in argv {
                env.template_from_str(arg)
                    .with_context(|| format!("parsing edit command argument `{arg}`"))?;
            }
        }
        self.prompts.validate()
    }

    pub fn ignore_file_name(&self) -> String {
        self.ignore_file
            .clone()
            .or_else(|| env::var("P4IGNORE").ok().filter(|v| !v.is_empty()))
            .unwrap_or_else(|| DEFAULT_IGNORE_FILE.into())
    }

    pub fn suppress_window(&self) -> Duration {
        Duration::from_millis(self.suppress_ms)
    }

    pub fn refresh_delay(&self) -> Duration {
        Duration::from_millis(self.refresh_delay_ms)
    }
}

#[derive(Deserialize)]
struct ToggleOnly {
    #[serde(default = "default_enabled")]
    enabled: bool,
}

/// The `enabled` toggle, read fresh on every call so edits to the
/// preferences file apply to the very next event.
///
/// A host-side override (from the editor's own settings) takes precedence
/// until it is cleared.
#[derive(Debug, Default)]
pub struct LiveToggle {
    path: Option<PathBuf>,
    host_override: Cell<Option<bool>>,
}

impl LiveToggle {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            host_override: Cell::new(None),
        }
    }

    pub fn set_override(&self, value: Option<bool>) {
        self.host_override.set(value);
    }

    pub fn enabled(&self) -> bool {
        if let Some(value) = self.host_override.get() {
            return value;
        }
        let Some(path) = &self.path else {
            return default_enabled();
        };
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<ToggleOnly>(&contents) {
                Ok(t) => t.enabled,
                Err(err) => {
                    warn!(path = %path.display(), %err, "unreadable toggle, assuming enabled");
                    default_enabled()
                }
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => default_enabled(),
            Err(err) => {
                warn!(path = %path.display(), %err, "unreadable toggle, assuming enabled");
                default_enabled()
            }
        }
    }
}
