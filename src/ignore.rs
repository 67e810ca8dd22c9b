//! Best-effort reading of Perforce ignore files (`.p4ignore` / `P4IGNORE`).
//!
//! Only the nearest ignore file above a path is consulted; files further up
//! the tree are not merged in.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Pattern {
    /// Leading `/`: match from the ignore file's directory only.
    anchored: bool,
    /// Trailing `/`: only directories match.
    dir_only: bool,
    /// Leading `!`: re-include what an earlier pattern excluded.
    negated: bool,
    segments: Vec<String>,
}

impl Pattern {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        let (negated, rest) = match line.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, line),
        };
        let anchored = rest.starts_with('/');
        let dir_only = rest.ends_with('/');
        let segments: Vec<String> = rest
            .split('/')
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        if segments.is_empty() {
            return None;
        }
        Some(Self {
            anchored,
            dir_only,
            negated,
            segments,
        })
    }

    /// Does the pattern match a window of `rel` starting at `start`?
    fn matches_at(&self, rel: &[String], start: usize) -> bool {
        let end = start + self.segments.len();
        if end > rel.len() {
            return false;
        }
        // A directory-only pattern cannot end on the file itself.
        if self.dir_only && end == rel.len() {
            return false;
        }
        self.segments
            .iter()
            .zip(&rel[start..end])
            .all(|(pat, name)| glob_segment(pat, name))
    }

    fn matches(&self, rel: &[String]) -> bool {
        if self.anchored {
            self.matches_at(rel, 0)
        } else {
            (0..rel.len()).any(|start| self.matches_at(rel, start))
        }
    }
}

/// `*` matches any run of characters, `?` any single one; within one segment.
fn glob_segment(pattern: &str, name: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = name.chars().collect();
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < txt.len() {
        if p < pat.len() && (pat[p] == '?' || pat[p] == txt[t]) {
            p += 1;
            t += 1;
        } else if p < pat.len() && pat[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    pat[p..].iter().all(|&c| c == '*')
}

/// Parsed contents of one ignore file.
#[derive(Debug, Clone)]
pub struct IgnoreRules {
    source: PathBuf,
    base: PathBuf,
    patterns: Vec<Pattern>,
}

impl IgnoreRules {
    pub fn parse(source: PathBuf, contents: &str) -> Self {
        let base = source
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let patterns = contents.lines().filter_map(Pattern::parse).collect();
        Self {
            source,
            base,
            patterns,
        }
    }

    /// The ignore file these rules came from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Last matching pattern decides; no match means not ignored.
    pub fn matches(&self, path: &Path) -> bool {
        let Ok(rel) = path.strip_prefix(&self.base) else {
            return false;
        };
        let rel: Vec<String> = rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        if rel.is_empty() {
            return false;
        }
        self.patterns
            .iter()
            .rev()
            .find(|p| p.matches(&rel))
            .is_some_and(|p| !p.negated)
    }
}

/// Find and parse the ignore file governing `path`.
///
/// Walks upward from the file's directory; the first `file_name` found wins.
/// An absolute `file_name` names the one ignore file directly.
pub fn find_rules(path: &Path, file_name: &str) -> Result<Option<IgnoreRules>> {
    let direct = Path::new(file_name);
    if direct.is_absolute() {
        return read_rules(direct);
    }
    for dir in path.ancestors().skip(1) {
        let candidate = dir.join(file_name);
        if candidate.is_file() {
            return read_rules(&candidate);
        }
    }
    Ok(None)
}

fn read_rules(source: &Path) -> Result<Option<IgnoreRules>> {
    if !source.is_file() {
        return Ok(None);
    }
    let contents = fs::read_to_string(source)
        .with_context(|| format!("reading {}", source.display()))?;
    Ok(Some(IgnoreRules::parse(source.to_path_buf(), &contents)))
}

/// Whether `path` is excluded by its nearest ignore file. Errors fail open.
pub fn is_ignored(path: &Path, file_name: &str) -> bool {
    match find_rules(path, file_name) {
        Ok(Some(rules)) => rules.matches(path),
        Ok(None) => false,
        Err(err) => {
            debug!(path = %path.display(), err = %format!("{err:#}"), "ignore check failed, treating as not ignored");
            false
        }
    }
}
