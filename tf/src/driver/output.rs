//! Worker output categorization
//!
//! Every line a specialist prints lands in one of four buckets. Important
//! lines (progress, task, error) feed the task_progress event stream; the
//! full categorized tail is kept for diagnostics.

use std::collections::VecDeque;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;

/// Full output retained per invocation (lines)
const MAX_RETAINED_LINES: usize = 4_096;

/// Diagnostic tail reported on failure (lines)
pub const FAILURE_TAIL_LINES: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineCategory {
    Progress,
    Task,
    Error,
    Debug,
}

impl LineCategory {
    /// Progress, task and error lines are surfaced to subscribers; debug
    /// lines only reach the detailed tail.
    pub fn is_important(self) -> bool {
        !matches!(self, LineCategory::Debug)
    }

    pub fn label(self) -> &'static str {
        match self {
            LineCategory::Progress => "progress",
            LineCategory::Task => "task",
            LineCategory::Error => "error",
            LineCategory::Debug => "debug",
        }
    }
}

fn error_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\b(error|failed|failure|exception|panic|fatal)\b").unwrap())
}

fn progress_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(^\s*\[\d+/\d+\]|\b\d{1,3}%|\bprogress\b|\bworking on\b|\bstep \d+\b)").unwrap())
}

fn task_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(created|wrote|generated|implemented|updated|added|completed|task)\b").unwrap()
    })
}

/// Classify one output line
pub fn categorize(line: &str) -> LineCategory {
    if error_pattern().is_match(line) {
        LineCategory::Error
    } else if progress_pattern().is_match(line) {
        LineCategory::Progress
    } else if task_pattern().is_match(line) {
        LineCategory::Task
    } else {
        LineCategory::Debug
    }
}

/// Bounded collector for one invocation's output
#[derive(Debug, Default)]
pub struct OutputCollector {
    lines: VecDeque<(LineCategory, String)>,
    /// Last single-line JSON object seen on stdout; checkpoint verdicts and
    /// task results ride on this.
    last_json: Option<Value>,
}

impl OutputCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one line; stdout lines are additionally sniffed for a JSON
    /// object payload. Returns the category assigned.
    pub fn push(&mut self, line: &str, is_stderr: bool) -> LineCategory {
        let category = categorize(line);
        if self.lines.len() >= MAX_RETAINED_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back((category, line.to_string()));

        if !is_stderr {
            let trimmed = line.trim();
            if trimmed.starts_with('{') && trimmed.ends_with('}') {
                if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
                    self.last_json = Some(value);
                }
            }
        }
        category
    }

    /// Progress + task + error lines, in order
    pub fn important(&self) -> Vec<String> {
        self.lines
            .iter()
            .filter(|(c, _)| c.is_important())
            .map(|(_, l)| l.clone())
            .collect()
    }

    /// Last `n` categorized lines with their labels
    pub fn tail(&self, n: usize) -> Vec<String> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines
            .iter()
            .skip(skip)
            .map(|(c, l)| format!("[{}] {}", c.label(), l))
            .collect()
    }

    pub fn last_json(&self) -> Option<&Value> {
        self.last_json.as_ref()
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }
}
