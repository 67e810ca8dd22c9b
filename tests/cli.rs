mod common;

use common::run_cli;
use std::fs;

#[test]
fn check_ignore_reports_the_governing_file() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::create_dir_all(root.join("sub")).unwrap();
    fs::write(root.join(".p4ignore"), "*.log\n").unwrap();
    fs::write(root.join("sub/.p4ignore"), "*.tmp\n").unwrap();

    let (code, stdout, stderr) = run_cli(
        &["check-ignore", "app.log", "sub/a.tmp", "sub/b.log", "main.c"],
        root,
        "",
    );
    assert_eq!(code, 0, "stderr: {stderr}");

    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].ends_with(&format!("app.log: ignored by {}", root.join(".p4ignore").display())));
    assert!(lines[1].ends_with(&format!("a.tmp: ignored by {}", root.join("sub/.p4ignore").display())));
    // Only the nearest ignore file counts.
    assert!(lines[2].ends_with("b.log: not ignored"));
    assert!(lines[3].ends_with("main.c: not ignored"));
}

#[test]
fn check_ignore_honours_configured_file_name() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join(".customignore"), "secret*\n").unwrap();
    fs::write(root.join("p4guard.toml"), "ignore_file = \".customignore\"\n").unwrap();

    let (code, stdout, _) = run_cli(&["check-ignore", "secrets.txt"], root, "");
    assert_eq!(code, 0);
    assert!(stdout.contains("secrets.txt: ignored by"));
}

#[test]
fn check_ignore_requires_a_path() {
    let dir = tempfile::tempdir().unwrap();
    let (code, _, stderr) = run_cli(&["check-ignore"], dir.path(), "");
    assert_ne!(code, 0);
    assert!(stderr.contains("PATHS"), "stderr: {stderr}");
}

#[test]
fn version_flag_prints_name() {
    let dir = tempfile::tempdir().unwrap();
    let (code, stdout, _) = run_cli(&["--version"], dir.path(), "");
    assert_eq!(code, 0);
    assert!(stdout.starts_with("p4guard "));
}
