//! Command lines and their captured results.

use std::fmt;

/// A shell command, either written as one string or assembled from ordered
/// fragments. Fragments are joined with a single space, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandLine {
    fragments: Vec<String>,
}

impl CommandLine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment.
    pub fn arg(mut self, fragment: impl ToString) -> Self {
        self.fragments.push(fragment.to_string());
        self
    }

    pub fn push(&mut self, fragment: impl ToString) {
        self.fragments.push(fragment.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.iter().all(|f| f.trim().is_empty())
    }

    /// The shell line that is actually executed.
    pub fn render(&self) -> String {
        self.fragments.join(" ")
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

impl From<&str> for CommandLine {
    fn from(line: &str) -> Self {
        Self {
            fragments: vec![line.to_string()],
        }
    }
}

impl From<String> for CommandLine {
    fn from(line: String) -> Self {
        Self {
            fragments: vec![line],
        }
    }
}

impl From<&String> for CommandLine {
    fn from(line: &String) -> Self {
        Self::from(line.as_str())
    }
}

impl From<Vec<String>> for CommandLine {
    fn from(fragments: Vec<String>) -> Self {
        Self { fragments }
    }
}

impl From<Vec<&str>> for CommandLine {
    fn from(fragments: Vec<&str>) -> Self {
        Self {
            fragments: fragments.into_iter().map(str::to_string).collect(),
        }
    }
}

impl<const N: usize> From<[&str; N]> for CommandLine {
    fn from(fragments: [&str; N]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
        }
    }
}

impl<const N: usize> From<[String; N]> for CommandLine {
    fn from(fragments: [String; N]) -> Self {
        Self {
            fragments: fragments.into_iter().collect(),
        }
    }
}

/// Result of a command that ran to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status was zero.
    pub ok: bool,
    /// Exit code, if the process was not killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            ok: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            ok: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}
