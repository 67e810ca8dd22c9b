use minijinja::{context, Environment};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, info};

use crate::preferences::display_name;

#[cfg(test)]
pub(crate) mod fake;

// ===================================================================
// Running external commands
// ===================================================================

/// Captured result of one external process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Zero exit with something to say on stdout.
    fn has_answer(&self) -> bool {
        self.success() && !self.stdout.trim().is_empty()
    }

    /// p4 reports many errors ("file(s) not on client") on stderr while still
    /// exiting 0, so a silent stdout plus stderr text counts as failure too.
    fn failed(&self) -> bool {
        !self.success() || (self.stdout.trim().is_empty() && !self.stderr.trim().is_empty())
    }

    fn failure_message(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.status {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".into(),
        }
    }
}

/// Executes an external program and waits for it to exit.
pub trait CommandRunner {
    async fn run(&self, program: &str, args: &[String], cwd: &Path) -> io::Result<CommandOutput>;
}

impl<T: CommandRunner> CommandRunner for Rc<T> {
    async fn run(&self, program: &str, args: &[String], cwd: &Path) -> io::Result<CommandOutput> {
        (**self).run(program, args, cwd).await
    }
}

/// Spawns real processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    async fn run(&self, program: &str, args: &[String], cwd: &Path) -> io::Result<CommandOutput> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

// ===================================================================
// Errors
// ===================================================================

#[derive(Debug, Error)]
pub enum P4Error {
    #[error("could not run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("`{command}` failed: {message}")]
    Failed {
        command: String,
        code: Option<i32>,
        message: String,
    },

    #[error("bad command template `{template}`: {reason}")]
    Template { template: String, reason: String },

    #[error("no edit command configured")]
    NoEditCommand,
}

// ===================================================================
// Perforce client
// ===================================================================

/// Escape a local path for use as a Perforce file argument.
///
/// `@`, `#`, `*` and `%` are revision/wildcard syntax in file specs and must
/// be written as `%40`, `%23`, `%2A` and `%25`.
pub fn escape_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '%' => escaped.push_str("%25"),
            '@' => escaped.push_str("%40"),
            '#' => escaped.push_str("%23"),
            '*' => escaped.push_str("%2A"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn working_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

fn describe(program: &str, args: &[String]) -> String {
    std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Thin wrapper over the `p4` command-line client.
///
/// Each call runs in the file's own directory so `P4CONFIG` files and the
/// client mapping resolve the way they would for the user.
pub struct P4Client<R> {
    runner: R,
    program: String,
    edit_commands: Vec<Vec<String>>,
}

impl<R: CommandRunner> P4Client<R> {
    pub fn new(runner: R, program: impl Into<String>, edit_commands: Vec<Vec<String>>) -> Self {
        Self {
            runner,
            program: program.into(),
            edit_commands,
        }
    }

    async fn exec(&self, program: &str, args: &[String], cwd: &Path) -> Result<CommandOutput, P4Error> {
        debug!(command = %describe(program, args), cwd = %cwd.display(), "running");
        self.runner
            .run(program, args, cwd)
            .await
            .map_err(|source| P4Error::Spawn {
                command: describe(program, args),
                source,
            })
    }

    /// Run a `p4` subcommand and report whether it answered with output.
    async fn query(&self, args: &[String], cwd: &Path) -> bool {
        match self.exec(&self.program, args, cwd).await {
            Ok(output) => output.has_answer(),
            Err(err) => {
                debug!(%err, "query failed");
                false
            }
        }
    }

    /// Run a state-changing command, turning a failed exit into an error.
    async fn mutate(&self, program: &str, args: &[String], cwd: &Path) -> Result<String, P4Error> {
        let output = self.exec(program, args, cwd).await?;
        if output.failed() {
            return Err(P4Error::Failed {
                command: describe(program, args),
                code: output.status,
                message: output.failure_message(),
            });
        }
        Ok(output.stdout.trim().to_string())
    }

    /// Is this exact file known to the server?
    pub async fn is_tracked(&self, path: &Path) -> bool {
        self.query(&["fstat".into(), escape_path(path)], &working_dir(path))
            .await
    }

    /// Does the path fall under the current client's view, tracked or not?
    pub async fn is_in_workspace(&self, path: &Path) -> bool {
        self.query(&["where".into(), escape_path(path)], &working_dir(path))
            .await
    }

    /// The client workspace root as reported by `p4 info` run from `dir`.
    pub async fn client_root(&self, dir: &Path) -> Result<Option<PathBuf>, P4Error> {
        let output = self.mutate(&self.program, &["info".to_string()], dir).await?;
        Ok(parse_client_root(&output))
    }

    /// Open a file for edit, trying each configured command until one succeeds.
    pub async fn edit(&self, path: &Path) -> Result<String, P4Error> {
        let cwd = working_dir(path);
        let mut last_err = P4Error::NoEditCommand;
        for template in &self.edit_commands {
            let argv = self.render_argv(template, path)?;
            let Some((program, args)) = argv.split_first() else {
                continue;
            };
            match self.mutate(program, args, &cwd).await {
                Ok(out) => {
                    info!(path = %path.display(), command = %describe(program, args), "opened for edit");
                    return Ok(out);
                }
                Err(err) => {
                    debug!(%err, "edit candidate failed, trying next");
                    last_err = err;
                }
            }
        }
        Err(last_err)
    }

    pub async fn add(&self, path: &Path) -> Result<String, P4Error> {
        // -f accepts @#%* in file names and escapes them itself.
        let args = ["add".into(), "-f".into(), path.to_string_lossy().into_owned()];
        let out = self.mutate(&self.program, &args, &working_dir(path)).await?;
        info!(path = %path.display(), "opened for add");
        Ok(out)
    }

    pub async fn delete(&self, path: &Path) -> Result<String, P4Error> {
        let args = ["delete".into(), escape_path(path)];
        let out = self.mutate(&self.program, &args, &working_dir(path)).await?;
        info!(path = %path.display(), "opened for delete");
        Ok(out)
    }

    fn render_argv(&self, template: &[String], path: &Path) -> Result<Vec<String>, P4Error> {
        let env = Environment::new();
        let dir = working_dir(path);
        template
            .iter()
            .map(|arg| {
                let tmpl = env.template_from_str(arg).map_err(|e| P4Error::Template {
                    template: arg.clone(),
                    reason: e.to_string(),
                })?;
                tmpl.render(context! {
                    p4 => self.program.as_str(),
                    path => escape_path(path),
                    raw_path => path.to_string_lossy().into_owned(),
                    name => display_name(path),
                    dir => dir.to_string_lossy().into_owned(),
                })
                .map_err(|e| P4Error::Template {
                    template: arg.clone(),
                    reason: e.to_string(),
                })
            })
            .collect()
    }
}

/// Pull the `Client root:` line out of `p4 info` output.
fn parse_client_root(info: &str) -> Option<PathBuf> {
    info.lines()
        .find_map(|line| line.strip_prefix("Client root:"))
        .map(str::trim)
        .filter(|root| !root.is_empty() && *root != "*unknown*")
        .map(PathBuf::from)
}
