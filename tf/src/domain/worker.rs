//! Worker catalog types, assignments and invocations

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::generate_id;
use super::task::CheckpointKind;

/// Experience level for one capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum ExperienceLevel {
    Beginner,
    #[default]
    Intermediate,
    Advanced,
    Expert,
}

impl ExperienceLevel {
    /// Flat score bonus applied during capability matching
    pub fn bonus(self) -> f64 {
        match self {
            ExperienceLevel::Beginner => 0.0,
            ExperienceLevel::Intermediate => 5.0,
            ExperienceLevel::Advanced => 10.0,
            ExperienceLevel::Expert => 15.0,
        }
    }
}

/// One skill entry in a worker's capability map
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
    /// Efficiency in [0, 1]
    pub efficiency: f64,
    pub experience: ExperienceLevel,
}

impl Capability {
    pub fn new(efficiency: f64, experience: ExperienceLevel) -> Self {
        Self { efficiency: efficiency.clamp(0.0, 1.0), experience }
    }
}

/// What a worker is for: development work or a dedicated checkpoint role
///
/// The scheduler never branches on worker identity - it dispatches on role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "role")]
pub enum WorkerRole {
    Developer,
    CheckpointReviewer { kind: CheckpointKind },
}

impl WorkerRole {
    pub fn is_checkpoint(self) -> bool {
        matches!(self, WorkerRole::CheckpointReviewer { .. })
    }
}

/// Rolling per-worker performance counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct PerformanceStats {
    pub tasks_completed: u64,
    pub tasks_failed: u64,
    /// Rolling average of checkpoint quality scores for this worker's output
    pub avg_quality: f64,
}

impl PerformanceStats {
    /// Fold one completed task with its quality score into the rolling stats
    pub fn record_completion(&mut self, quality: f64) {
        let n = self.tasks_completed as f64;
        self.avg_quality = (self.avg_quality * n + quality) / (n + 1.0);
        self.tasks_completed += 1;
    }

    pub fn record_failure(&mut self) {
        self.tasks_failed += 1;
    }
}

/// A catalog entry for one specialist
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Worker {
    pub id: String,
    pub name: String,
    /// Specialization tag matched against Task::specialist_kind
    pub specialization: String,
    #[serde(flatten)]
    pub role: WorkerRole,
    /// Skill name -> capability; BTreeMap keeps scoring deterministic
    pub capabilities: BTreeMap<String, Capability>,
    pub max_concurrent_tasks: u32,
    pub current_load: u32,
    #[serde(default)]
    pub performance_stats: PerformanceStats,
}

impl Worker {
    /// Create a development worker
    pub fn developer(id: impl Into<String>, name: impl Into<String>, specialization: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            specialization: specialization.into(),
            role: WorkerRole::Developer,
            capabilities: BTreeMap::new(),
            max_concurrent_tasks: 1,
            current_load: 0,
            performance_stats: PerformanceStats::default(),
        }
    }

    /// Create a dedicated checkpoint worker
    pub fn reviewer(id: impl Into<String>, name: impl Into<String>, kind: CheckpointKind) -> Self {
        let specialization = if kind.is_code_review() { "code-review" } else { "qa-test" };
        Self {
            id: id.into(),
            name: name.into(),
            specialization: specialization.to_string(),
            role: WorkerRole::CheckpointReviewer { kind },
            capabilities: BTreeMap::new(),
            max_concurrent_tasks: 2,
            current_load: 0,
            performance_stats: PerformanceStats::default(),
        }
    }

    pub fn with_capability(mut self, skill: impl Into<String>, capability: Capability) -> Self {
        self.capabilities.insert(skill.into(), capability);
        self
    }

    pub fn with_max_concurrent(mut self, max: u32) -> Self {
        self.max_concurrent_tasks = max.max(1);
        self
    }

    /// Whether the worker can accept one more task
    pub fn has_capacity(&self) -> bool {
        self.current_load < self.max_concurrent_tasks
    }
}

/// A scored alternate for a low-confidence assignment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedWorker {
    pub worker_id: String,
    pub score: f64,
}

/// The chosen (task, worker) pairing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub task_id: String,
    pub worker_id: String,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Expected effort in minutes
    pub expected_effort: u32,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub alternates: Vec<RankedWorker>,
}

/// Invocation lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InvocationStatus {
    InProgress,
    Completed,
    Failed,
    Terminated,
}

/// One execution attempt of one task by one worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invocation {
    pub invocation_id: String,
    pub task_id: String,
    pub worker_id: String,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub status: InvocationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl Invocation {
    pub fn begin(task_id: impl Into<String>, worker_id: impl Into<String>) -> Self {
        let task_id = task_id.into();
        let now = Utc::now();
        Self {
            invocation_id: generate_id("inv", &task_id),
            task_id,
            worker_id: worker_id.into(),
            started_at: now,
            last_activity_at: now,
            status: InvocationStatus::InProgress,
            exit_code: None,
        }
    }
}
