//! Line-oriented outbound logs (privacy log, attack log).
//!
//! Lines are colon-separated field lists consumed by downstream tooling, so
//! their format is stable. Diagnostics go through `tracing` instead.

use std::sync::Mutex;

pub trait LogSink: Send + Sync {
    fn log(&self, line: &str);
}

/// Emits every line as a `tracing` event under the given target.
#[derive(Debug, Clone)]
pub struct TracingSink {
    channel: &'static str,
}

impl TracingSink {
    pub fn privacy() -> Self {
        Self { channel: "privacy" }
    }

    pub fn attack() -> Self {
        Self { channel: "attack" }
    }
}

impl LogSink for TracingSink {
    fn log(&self, line: &str) {
        tracing::info!(target: "vanet::log", channel = self.channel, "{line}");
    }
}

/// Collects lines in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl LogSink for MemorySink {
    fn log(&self, line: &str) {
        let mut lines = self
            .lines
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        lines.push(line.to_string());
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl LogSink for NullSink {
    fn log(&self, _line: &str) {}
}

/// Formats an identifier the way log consumers expect it: lowercase hex of
/// the value widened to 64 bits, so negative ids print all sixteen digits.
pub fn hex_id(id: impl Into<i64>) -> String {
    format!("{:x}", id.into())
}
