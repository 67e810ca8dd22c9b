#![allow(dead_code)]

use serde_json::Value;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

fn command(args: &[&str], cwd: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_p4guard"));
    cmd.args(args)
        .current_dir(cwd)
        .env_remove("P4GUARD_CONFIG")
        .env_remove("P4IGNORE")
        .env_remove("P4GUARD_LOG")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}

/// Run the binary to completion with `stdin` as input.
pub fn run_cli(args: &[&str], cwd: &Path, stdin: &str) -> (i32, String, String) {
    let mut child = command(args, cwd).spawn().expect("failed to spawn binary");

    child
        .stdin
        .as_mut()
        .unwrap()
        .write_all(stdin.as_bytes())
        .unwrap();

    let output = child.wait_with_output().unwrap();
    (
        output.status.code().unwrap_or(-1),
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
    )
}

/// Parse every stdout line as a JSON message.
pub fn messages(stdout: &str) -> Vec<Value> {
    stdout
        .lines()
        .map(|l| serde_json::from_str(l).unwrap_or_else(|e| panic!("bad line {l:?}: {e}")))
        .collect()
}

/// A `serve` process driven one line at a time.
pub struct Session {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
}

impl Session {
    pub fn start(config: &Path, cwd: &Path) -> Self {
        let mut child = command(&["--config", config.to_str().unwrap(), "serve"], cwd)
            .spawn()
            .expect("failed to spawn binary");
        let stdin = child.stdin.take();
        let stdout = BufReader::new(child.stdout.take().unwrap());
        Self {
            child,
            stdin,
            stdout,
        }
    }

    pub fn send(&mut self, event: Value) {
        let stdin = self.stdin.as_mut().unwrap();
        writeln!(stdin, "{event}").unwrap();
        stdin.flush().unwrap();
    }

    pub fn recv(&mut self) -> Value {
        let mut line = String::new();
        self.stdout.read_line(&mut line).unwrap();
        assert!(!line.is_empty(), "p4guard closed stdout");
        serde_json::from_str(&line).unwrap()
    }

    /// Close stdin and wait for a clean exit.
    pub fn finish(mut self) -> i32 {
        drop(self.stdin.take());
        self.child.wait().unwrap().code().unwrap_or(-1)
    }
}

/// Write a fake `p4` that appends its arguments to `p4.log` and then runs
/// `body`. Returns the script path.
pub fn fake_p4(dir: &Path, body: &str) -> PathBuf {
    let script = dir.join("fake-p4");
    let log = dir.join("p4.log");
    fs::write(
        &script,
        format!("#!/bin/sh\necho \"$@\" >> '{}'\n{body}\n", log.display()),
    )
    .unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    script
}

/// A `p4` that rejects everything, as when no server is reachable.
pub fn unreachable_p4(dir: &Path) -> PathBuf {
    fake_p4(
        dir,
        "echo 'Perforce client error: Connect to server failed' >&2\nexit 1",
    )
}

/// Arguments the fake `p4` has been called with, one invocation per entry.
pub fn p4_calls(dir: &Path) -> Vec<String> {
    fs::read_to_string(dir.join("p4.log"))
        .map(|s| s.lines().map(String::from).collect())
        .unwrap_or_default()
}

/// Write a preferences file pointing at `p4`, plus any `extra` TOML.
pub fn write_config(dir: &Path, p4: &Path, extra: &str) -> PathBuf {
    let path = dir.join("p4guard.toml");
    fs::write(
        &path,
        format!(
            "p4 = \"{}\"\nignore_file = \".p4ignore\"\n{extra}\n",
            p4.display()
        ),
    )
    .unwrap();
    path
}

pub fn read_only_file(path: &Path) {
    fs::write(path, "locked\n").unwrap();
    let mut perms = fs::metadata(path).unwrap().permissions();
    perms.set_readonly(true);
    fs::set_permissions(path, perms).unwrap();
}
