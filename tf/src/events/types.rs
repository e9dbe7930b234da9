//! Event types - the observable vocabulary of a project run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Error taxonomy carried on failure events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    InputError,
    PayloadTooLarge,
    CyclicGraph,
    MissingProducer,
    WorkerUnavailable,
    Timeout,
    WorkerExitError,
    CheckpointFailed,
    ReworkExhausted,
    LoopDetected,
    Cancelled,
    LlmError,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InputError => "InputError",
            Self::PayloadTooLarge => "PayloadTooLarge",
            Self::CyclicGraph => "CyclicGraph",
            Self::MissingProducer => "MissingProducer",
            Self::WorkerUnavailable => "WorkerUnavailable",
            Self::Timeout => "Timeout",
            Self::WorkerExitError => "WorkerExitError",
            Self::CheckpointFailed => "CheckpointFailed",
            Self::ReworkExhausted => "ReworkExhausted",
            Self::LoopDetected => "LoopDetected",
            Self::Cancelled => "Cancelled",
            Self::LlmError => "LLMError",
            Self::Internal => "Internal",
        };
        write!(f, "{}", s)
    }
}

/// One lifecycle event
///
/// The serialized `kind` discriminator is bit-exact; renaming a variant is a
/// breaking change for every observer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Event {
    /// The graph was built and quality gates injected
    ProjectOrchestrated {
        project_id: String,
        task_count: usize,
        critical_path_tasks: usize,
    },
    TaskReady { task_id: String },
    TaskStarted { task_id: String, worker_id: String },
    /// One important output line from a running worker
    TaskProgress { task_id: String, line: String },
    TaskCompleted {
        task_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        quality_score: Option<f64>,
    },
    TaskFailed {
        task_id: String,
        error: ErrorKind,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        diagnostic: Option<String>,
    },
    CheckpointStarted {
        task_id: String,
        reviews_task_id: String,
    },
    CheckpointCompleted {
        task_id: String,
        passed: bool,
        quality_score: f64,
    },
    CheckpointFailed {
        task_id: String,
        error: ErrorKind,
        message: String,
    },
    WorkerAssigned {
        task_id: String,
        worker_id: String,
        confidence: f64,
        expected_effort: u32,
    },
    WorkerHeartbeat {
        task_id: String,
        worker_id: String,
        elapsed_ms: u64,
    },
    ReworkRequested {
        task_id: String,
        attempt: u32,
        findings: Vec<String>,
    },
    ProjectCompleted { project_id: String },
    ProjectFailed {
        project_id: String,
        error: ErrorKind,
        message: String,
    },
    ProjectCancelled { project_id: String },
    /// Emitted after invocation teardown on shutdown or cancellation
    SessionCleanup { terminated: usize },
}

impl Event {
    /// The wire kind string for this event
    pub fn kind(&self) -> &'static str {
        match self {
            Event::ProjectOrchestrated { .. } => "project_orchestrated",
            Event::TaskReady { .. } => "task_ready",
            Event::TaskStarted { .. } => "task_started",
            Event::TaskProgress { .. } => "task_progress",
            Event::TaskCompleted { .. } => "task_completed",
            Event::TaskFailed { .. } => "task_failed",
            Event::CheckpointStarted { .. } => "checkpoint_started",
            Event::CheckpointCompleted { .. } => "checkpoint_completed",
            Event::CheckpointFailed { .. } => "checkpoint_failed",
            Event::WorkerAssigned { .. } => "worker_assigned",
            Event::WorkerHeartbeat { .. } => "worker_heartbeat",
            Event::ReworkRequested { .. } => "rework_requested",
            Event::ProjectCompleted { .. } => "project_completed",
            Event::ProjectFailed { .. } => "project_failed",
            Event::ProjectCancelled { .. } => "project_cancelled",
            Event::SessionCleanup { .. } => "session_cleanup",
        }
    }

    /// The task this event concerns, when task-scoped
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Event::TaskReady { task_id }
            | Event::TaskStarted { task_id, .. }
            | Event::TaskProgress { task_id, .. }
            | Event::TaskCompleted { task_id, .. }
            | Event::TaskFailed { task_id, .. }
            | Event::CheckpointStarted { task_id, .. }
            | Event::CheckpointCompleted { task_id, .. }
            | Event::CheckpointFailed { task_id, .. }
            | Event::WorkerAssigned { task_id, .. }
            | Event::WorkerHeartbeat { task_id, .. }
            | Event::ReworkRequested { task_id, .. } => Some(task_id),
            _ => None,
        }
    }

    /// True for the three run-terminal events
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::ProjectCompleted { .. } | Event::ProjectFailed { .. } | Event::ProjectCancelled { .. }
        )
    }
}

/// A timestamped event for log persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub event: Event,
}

impl EventRecord {
    pub fn new(event: Event) -> Self {
        Self { timestamp: Utc::now(), event }
    }
}
