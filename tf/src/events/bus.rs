//! EventBus - broadcast pub/sub for project lifecycle events
//!
//! Components emit, consumers subscribe. Emission is fire-and-forget: with
//! no subscribers the event is dropped, and a lagging subscriber loses the
//! oldest events rather than blocking emitters.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use super::types::{ErrorKind, Event};

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4_096;

/// Central event bus for one orchestrator
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Emit an event to all subscribers
    pub fn emit(&self, event: Event) {
        debug!(kind = event.kind(), task_id = ?event.task_id(), "EventBus::emit");
        let _ = self.tx.send(event);
    }

    /// Subscribe to events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Create an emitter handle bound to a project id
    pub fn emitter_for(&self, project_id: impl Into<String>) -> ProjectEvents {
        ProjectEvents {
            tx: self.tx.clone(),
            project_id: project_id.into(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Cheap-to-clone emitter handle with the project id pre-bound
#[derive(Clone)]
pub struct ProjectEvents {
    tx: broadcast::Sender<Event>,
    project_id: String,
}

impl ProjectEvents {
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn emit(&self, event: Event) {
        debug!(kind = event.kind(), "ProjectEvents::emit");
        let _ = self.tx.send(event);
    }

    pub fn project_orchestrated(&self, task_count: usize, critical_path_tasks: usize) {
        self.emit(Event::ProjectOrchestrated {
            project_id: self.project_id.clone(),
            task_count,
            critical_path_tasks,
        });
    }

    pub fn task_ready(&self, task_id: &str) {
        self.emit(Event::TaskReady { task_id: task_id.to_string() });
    }

    pub fn task_started(&self, task_id: &str, worker_id: &str) {
        self.emit(Event::TaskStarted {
            task_id: task_id.to_string(),
            worker_id: worker_id.to_string(),
        });
    }

    pub fn task_progress(&self, task_id: &str, line: &str) {
        self.emit(Event::TaskProgress {
            task_id: task_id.to_string(),
            line: line.to_string(),
        });
    }

    pub fn task_completed(&self, task_id: &str, quality_score: Option<f64>) {
        self.emit(Event::TaskCompleted {
            task_id: task_id.to_string(),
            quality_score,
        });
    }

    pub fn task_failed(&self, task_id: &str, error: ErrorKind, message: &str, diagnostic: Option<String>) {
        self.emit(Event::TaskFailed {
            task_id: task_id.to_string(),
            error,
            message: message.to_string(),
            diagnostic,
        });
    }

    pub fn checkpoint_started(&self, task_id: &str, reviews_task_id: &str) {
        self.emit(Event::CheckpointStarted {
            task_id: task_id.to_string(),
            reviews_task_id: reviews_task_id.to_string(),
        });
    }

    pub fn checkpoint_completed(&self, task_id: &str, passed: bool, quality_score: f64) {
        self.emit(Event::CheckpointCompleted {
            task_id: task_id.to_string(),
            passed,
            quality_score,
        });
    }

    pub fn checkpoint_failed(&self, task_id: &str, error: ErrorKind, message: &str) {
        self.emit(Event::CheckpointFailed {
            task_id: task_id.to_string(),
            error,
            message: message.to_string(),
        });
    }

    pub fn worker_assigned(&self, task_id: &str, worker_id: &str, confidence: f64, expected_effort: u32) {
        self.emit(Event::WorkerAssigned {
            task_id: task_id.to_string(),
            worker_id: worker_id.to_string(),
            confidence,
            expected_effort,
        });
    }

    pub fn worker_heartbeat(&self, task_id: &str, worker_id: &str, elapsed_ms: u64) {
        self.emit(Event::WorkerHeartbeat {
            task_id: task_id.to_string(),
            worker_id: worker_id.to_string(),
            elapsed_ms,
        });
    }

    pub fn rework_requested(&self, task_id: &str, attempt: u32, findings: Vec<String>) {
        self.emit(Event::ReworkRequested {
            task_id: task_id.to_string(),
            attempt,
            findings,
        });
    }

    pub fn project_completed(&self) {
        self.emit(Event::ProjectCompleted { project_id: self.project_id.clone() });
    }

    pub fn project_failed(&self, error: ErrorKind, message: &str) {
        self.emit(Event::ProjectFailed {
            project_id: self.project_id.clone(),
            error,
            message: message.to_string(),
        });
    }

    pub fn project_cancelled(&self) {
        self.emit(Event::ProjectCancelled { project_id: self.project_id.clone() });
    }

    pub fn session_cleanup(&self, terminated: usize) {
        self.emit(Event::SessionCleanup { terminated });
    }
}

/// Create an event bus wrapped in an Arc for shared ownership
pub fn create_event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::with_default_capacity())
}
