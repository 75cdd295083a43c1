//! Progress events and the rolling per-step log buffer.
//!
//! These are plain value types (§6 "Job control and progress"): the core
//! produces them, an external transport (out of scope here) would relay
//! them over SSE/WebSocket.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Maximum number of log lines retained per step, per spec §6.
pub const LOG_BUFFER_CAPACITY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Complete,
    Warning,
    Error,
    Skipped,
}

/// A single progress update for one pipeline step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub step_id: String,
    pub status: StepStatus,
    /// 0..=100
    pub progress: u8,
    pub message: String,
    pub metrics: serde_json::Value,
    pub current_action: Option<String>,
    pub error: Option<String>,
    pub logs: Vec<String>,
}

impl ProgressEvent {
    pub fn new(step_id: impl Into<String>, status: StepStatus, progress: u8, message: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            status,
            progress: progress.min(100),
            message: message.into(),
            metrics: serde_json::Value::Null,
            current_action: None,
            error: None,
            logs: Vec::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: serde_json::Value) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// A bounded, append-only log ring shared by a single step. Multiple readers
/// may snapshot it; only the step producing events appends.
#[derive(Debug, Default)]
pub struct RollingLogBuffer {
    lines: VecDeque<String>,
}

impl RollingLogBuffer {
    pub fn new() -> Self {
        Self {
            lines: VecDeque::with_capacity(LOG_BUFFER_CAPACITY),
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        if self.lines.len() == LOG_BUFFER_CAPACITY {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_buffer_drops_oldest_past_capacity() {
        let mut buf = RollingLogBuffer::new();
        for i in 0..(LOG_BUFFER_CAPACITY + 10) {
            buf.push(format!("line {i}"));
        }
        assert_eq!(buf.len(), LOG_BUFFER_CAPACITY);
        assert_eq!(buf.snapshot().first().unwrap(), "line 10");
        assert_eq!(buf.snapshot().last().unwrap(), &format!("line {}", LOG_BUFFER_CAPACITY + 9));
    }

    #[test]
    fn progress_event_clamps_progress() {
        let event = ProgressEvent::new("step1", StepStatus::Running, 250, "over");
        assert_eq!(event.progress, 100);
    }
}
