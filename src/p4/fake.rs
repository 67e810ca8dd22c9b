//! Scripted stand-in for the `p4` client, shared by unit tests.

use super::{CommandOutput, CommandRunner};
use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use tokio::time::Instant;

pub fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        status: Some(0),
        stdout: stdout.into(),
        stderr: String::new(),
    }
}

pub fn fail(stderr: &str) -> CommandOutput {
    CommandOutput {
        status: Some(1),
        stdout: String::new(),
        stderr: stderr.into(),
    }
}

#[derive(Debug, Clone)]
pub struct Call {
    pub argv: Vec<String>,
    pub cwd: PathBuf,
    pub at: Instant,
}

impl Call {
    pub fn subcommand(&self) -> &str {
        self.argv.get(1).map(String::as_str).unwrap_or("")
    }
}

/// Answers by subcommand (`fstat`, `where`, `edit`, ...). Anything
/// unscripted fails the way an unknown p4 command would.
#[derive(Default)]
pub struct FakeRunner {
    responses: RefCell<HashMap<String, CommandOutput>>,
    unspawnable: RefCell<Vec<String>>,
    calls: RefCell<Vec<Call>>,
}

impl FakeRunner {
    pub fn respond(&self, subcommand: &str, output: CommandOutput) -> &Self {
        self.responses
            .borrow_mut()
            .insert(subcommand.to_string(), output);
        self
    }

    /// Make spawning `program` fail as if it were not installed.
    pub fn missing_program(&self, program: &str) {
        self.unspawnable.borrow_mut().push(program.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }

    pub fn subcommands(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .map(|c| c.subcommand().to_string())
            .collect()
    }
}

impl CommandRunner for FakeRunner {
    async fn run(&self, program: &str, args: &[String], cwd: &Path) -> io::Result<CommandOutput> {
        let mut argv = vec![program.to_string()];
        argv.extend(args.iter().cloned());
        self.calls.borrow_mut().push(Call {
            argv,
            cwd: cwd.to_path_buf(),
            at: Instant::now(),
        });
        if self.unspawnable.borrow().iter().any(|p| p == program) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no such program"));
        }
        let subcommand = args.first().map(String::as_str).unwrap_or("");
        Ok(self
            .responses
            .borrow()
            .get(subcommand)
            .cloned()
            .unwrap_or_else(|| fail(&format!("Unknown command.  Try 'p4 help' for info.\n{subcommand}"))))
    }
}
