//! Process snapshots: query building and output parsing.

use crate::error::{ValidationError, ValidationResult};
use crate::host::shell_quote;

/// Process ids captured once, at watch start.
///
/// Ids spawned after the snapshot are never tracked by it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessSnapshot {
    pids: Vec<u32>,
}

impl ProcessSnapshot {
    /// Build a snapshot from `pgrep`-style output (whitespace-separated ids).
    ///
    /// Tokens that are not ids are ignored; duplicates are dropped while the
    /// first-seen order is kept.
    pub fn parse(output: &str) -> Self {
        let mut pids: Vec<u32> = Vec::new();
        for pid in output.split_whitespace().filter_map(|t| t.parse().ok()) {
            if !pids.contains(&pid) {
                pids.push(pid);
            }
        }
        Self { pids }
    }

    /// Tracked ids, in capture order.
    pub fn pids(&self) -> &[u32] {
        &self.pids
    }

    /// Whether nothing was captured.
    pub fn is_empty(&self) -> bool {
        self.pids.is_empty()
    }

    /// Ids from this snapshot that appear in `ps`-style output.
    ///
    /// Anything in `output` that was not captured is ignored.
    pub fn still_alive(&self, output: &str) -> Vec<u32> {
        let seen = Self::parse(output);
        self.pids
            .iter()
            .copied()
            .filter(|pid| seen.pids.contains(pid))
            .collect()
    }

    /// Command listing which of the captured ids are still alive.
    ///
    /// Prints one id per line; exits 1 with no output once all are gone.
    pub fn liveness_command(&self) -> String {
        let list = self
            .pids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        format!("ps -o pid= -p {}", list)
    }
}

/// Command listing ids of processes whose command line matches `pattern`.
///
/// The first character is wrapped in a bracket class when possible so the
/// querying shell, whose own command line contains the pattern, does not
/// match itself.
pub fn snapshot_command(pattern: &str) -> ValidationResult<String> {
    if pattern.trim().is_empty() {
        return Err(ValidationError::Empty("process pattern"));
    }
    let mut chars = pattern.chars();
    let guarded = match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {
            format!("[{}]{}", first, chars.as_str())
        }
        _ => pattern.to_string(),
    };
    Ok(format!("pgrep -f -- {}", shell_quote(&guarded)))
}

/// `pgrep` exit status meaning "no process matched".
pub const PGREP_NO_MATCH: i32 = 1;
