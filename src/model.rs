use std::path::{Path, PathBuf};

/// A classified editor action. Produced by the event thread and handled
/// exactly once by the interaction loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Reset,
    Search(String),
    Fuzzy(String),
    Delete,
    PlumbWord(String),
}

impl Command {
    pub fn kind(&self) -> &'static str {
        match self {
            Command::Reset => "reset",
            Command::Search(_) => "search",
            Command::Fuzzy(_) => "fuzzy",
            Command::Delete => "delete",
            Command::PlumbWord(_) => "plumb",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchResult {
    pub line: String,
    pub score: i64,
}

/// Process-wide state for one run: where we started, what we run, and the
/// output of the last successful run.
#[derive(Debug)]
pub struct Session {
    root: PathBuf,
    command: Vec<String>,
    cached_output: Vec<u8>,
    cached_lines: Vec<String>,
}

impl Session {
    pub fn new(root: PathBuf, command: Vec<String>) -> Self {
        Self {
            root,
            command,
            cached_output: Vec::new(),
            cached_lines: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// Window name shown in the acme tag, e.g. `/home/me/src/-afz`.
    pub fn title(&self, suffix: &str) -> String {
        let root = self.root.display().to_string();
        format!("{}/{suffix}", root.trim_end_matches('/'))
    }

    /// Swaps in a fresh run's output. Lines are rebuilt from scratch, never
    /// patched.
    pub fn replace_output(&mut self, raw: Vec<u8>) {
        self.cached_lines = split_lines(&raw);
        self.cached_output = raw;
    }

    pub fn output(&self) -> &[u8] {
        &self.cached_output
    }

    pub fn lines(&self) -> &[String] {
        &self.cached_lines
    }

    /// Cached lines minus the empty tail left behind by output ending in `\n`.
    pub fn searchable_lines(&self) -> &[String] {
        match self.cached_lines.split_last() {
            Some((last, rest)) if last.is_empty() => rest,
            _ => &self.cached_lines,
        }
    }
}

pub fn split_lines(raw: &[u8]) -> Vec<String> {
    raw.split(|byte| *byte == b'\n')
        .map(|line| String::from_utf8_lossy(line).into_owned())
        .collect()
}
