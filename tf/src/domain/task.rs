//! Task - the graph node type
//!
//! A Task is owned by the graph engine; every other component references it
//! by id. Only the engine mutates status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::id::generate_id;

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum TaskStatus {
    /// Waiting on dependencies
    #[default]
    Pending,
    /// All dependencies satisfied, eligible for assignment
    Ready,
    /// A worker invocation is running
    InProgress,
    /// Work done, checkpoint outcome pending
    InReview,
    /// A checkpoint rejected the work; awaiting rework
    NeedsRevision,
    /// Terminal: work accepted
    Completed,
    /// Terminal: work failed or rework exhausted
    Failed,
    /// Terminal: never ran (cancelled run or failed ancestor)
    Skipped,
}

impl TaskStatus {
    /// Terminal statuses never transition again (except Completed via rework)
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Skipped)
    }

    /// Allowed forward transitions; rework (Completed -> NeedsRevision ->
    /// Pending) is the only sanctioned backward path.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, Ready) | (Pending, Skipped) => true,
            // Ready -> Failed covers assignment failures (no worker meets
            // the confidence bar, oversized payload) before any invocation.
            (Ready, InProgress) | (Ready, Skipped) | (Ready, Pending) | (Ready, Failed) => true,
            (InProgress, Completed) | (InProgress, Failed) | (InProgress, InReview) => true,
            (InProgress, Skipped) => true,
            (InReview, Completed) | (InReview, NeedsRevision) | (InReview, Failed) => true,
            (Completed, NeedsRevision) => true,
            (NeedsRevision, Pending) | (NeedsRevision, Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::InProgress => "inProgress",
            Self::InReview => "inReview",
            Self::NeedsRevision => "needsRevision",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// What kind of work a task represents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum TaskKind {
    #[default]
    Implementation,
    Review,
    Test,
    FinalReview,
}

/// Checkpoint role for injected gate tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CheckpointKind {
    CodeReview,
    QaTest,
    FinalCodeReview,
    FinalQaTest,
}

impl CheckpointKind {
    /// Whether this is one of the whole-project final gates
    pub fn is_final(self) -> bool {
        matches!(self, CheckpointKind::FinalCodeReview | CheckpointKind::FinalQaTest)
    }

    /// The review family this checkpoint belongs to (code review vs QA)
    pub fn is_code_review(self) -> bool {
        matches!(self, CheckpointKind::CodeReview | CheckpointKind::FinalCodeReview)
    }
}

/// Task priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

/// Dependency edge classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EdgeKind {
    /// Plain ordering: predecessor must complete
    Completion,
    /// Inferred from a required input matching a provided output
    Data,
    /// Inferred from consumesAPI -> providesAPI
    Integration,
    /// Inferred from requiresSchema -> definesSchema
    Schema,
}

/// One predecessor reference with its edge type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub task_id: String,
    pub edge: EdgeKind,
}

impl Dependency {
    pub fn completion(task_id: impl Into<String>) -> Self {
        Self { task_id: task_id.into(), edge: EdgeKind::Completion }
    }

    pub fn new(task_id: impl Into<String>, edge: EdgeKind) -> Self {
        Self { task_id: task_id.into(), edge }
    }
}

/// A typed data item a task consumes or produces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct DataItem {
    pub name: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
}

impl DataItem {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    /// Contract compatibility: names match case-insensitively by substring in
    /// either direction, or the structured fields (type / format / schema)
    /// are equal where both sides declare them.
    pub fn compatible_with(&self, other: &DataItem) -> bool {
        let a = self.name.to_lowercase();
        let b = other.name.to_lowercase();
        if !a.is_empty() && !b.is_empty() && (a.contains(&b) || b.contains(&a)) {
            return true;
        }
        let structural = [
            (&self.kind, &other.kind),
            (&self.format, &other.format),
            (&self.schema, &other.schema),
        ];
        structural
            .iter()
            .any(|(x, y)| matches!((x, y), (Some(x), Some(y)) if x.eq_ignore_ascii_case(y)))
    }
}

/// Integration contract declarations, keyed by contract name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IntegrationContracts {
    #[serde(rename = "providesAPI", skip_serializing_if = "Vec::is_empty")]
    pub provides_api: Vec<String>,
    #[serde(rename = "consumesAPI", skip_serializing_if = "Vec::is_empty")]
    pub consumes_api: Vec<String>,
    #[serde(rename = "definesSchema", skip_serializing_if = "Vec::is_empty")]
    pub defines_schema: Vec<String>,
    #[serde(rename = "requiresSchema", skip_serializing_if = "Vec::is_empty")]
    pub requires_schema: Vec<String>,
    #[serde(rename = "establishesInterface", skip_serializing_if = "Vec::is_empty")]
    pub establishes_interface: Vec<String>,
}

impl IntegrationContracts {
    pub fn is_empty(&self) -> bool {
        self.provides_api.is_empty()
            && self.consumes_api.is_empty()
            && self.defines_schema.is_empty()
            && self.requires_schema.is_empty()
            && self.establishes_interface.is_empty()
    }

    /// True when the task declares any producing contract
    pub fn provides_anything(&self) -> bool {
        !self.provides_api.is_empty()
            || !self.defines_schema.is_empty()
            || !self.establishes_interface.is_empty()
    }

    /// Contract-name match, case-insensitive substring either direction
    pub fn names_match(a: &str, b: &str) -> bool {
        let a = a.to_lowercase();
        let b = b.to_lowercase();
        a.contains(&b) || b.contains(&a)
    }
}

/// A node in the task graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Task {
    /// Stable unique identifier
    pub id: String,

    pub title: String,
    pub description: String,

    #[serde(rename = "type")]
    pub kind: TaskKind,

    /// Required worker specialization (e.g. "backend", "code-review")
    pub specialist_kind: String,

    /// Typed data items this task consumes
    pub required_inputs: Vec<DataItem>,

    /// Typed data items this task produces
    pub provided_outputs: Vec<DataItem>,

    pub integration_contracts: IntegrationContracts,

    /// Explicit predecessor references
    pub dependencies: Vec<Dependency>,

    /// Human-readable conditions the quality gate checks
    pub validation_criteria: Vec<String>,

    /// Estimated duration in minutes, always >= 1
    pub estimated_duration: u32,

    pub priority: Priority,

    pub status: TaskStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_worker: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,

    /// Worker-produced result payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Last checkpoint quality score in [0, 1]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,

    /// Rework counter; lives on the original task and is never reset
    pub attempt_count: u32,

    /// Set on injected gate tasks
    pub is_checkpoint: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_type: Option<CheckpointKind>,
    /// For checkpoint tasks: the task whose output is being reviewed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reviews_task_id: Option<String>,

    /// Set during build when the node lies on the critical path
    pub on_critical_path: bool,
}

impl Default for Task {
    fn default() -> Self {
        Self {
            id: String::new(),
            title: String::new(),
            description: String::new(),
            kind: TaskKind::default(),
            specialist_kind: "developer".to_string(),
            required_inputs: Vec::new(),
            provided_outputs: Vec::new(),
            integration_contracts: IntegrationContracts::default(),
            dependencies: Vec::new(),
            validation_criteria: Vec::new(),
            estimated_duration: 1,
            priority: Priority::default(),
            status: TaskStatus::default(),
            assigned_worker: None,
            started_at: None,
            completed_at: None,
            failed_at: None,
            result: None,
            quality_score: None,
            attempt_count: 0,
            is_checkpoint: false,
            checkpoint_type: None,
            reviews_task_id: None,
            on_critical_path: false,
        }
    }
}

impl Task {
    /// Create a new implementation task with a generated id
    pub fn new(title: impl Into<String>, specialist_kind: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            id: generate_id("task", &title),
            title,
            specialist_kind: specialist_kind.into(),
            ..Default::default()
        }
    }

    /// Create with a specific id (adapter output, tests, recovery)
    pub fn with_id(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_kind(mut self, kind: TaskKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_duration(mut self, minutes: u32) -> Self {
        self.estimated_duration = minutes.max(1);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dependency(mut self, dep: Dependency) -> Self {
        self.dependencies.push(dep);
        self
    }

    pub fn with_output(mut self, output: DataItem) -> Self {
        self.provided_outputs.push(output);
        self
    }

    pub fn with_input(mut self, input: DataItem) -> Self {
        self.required_inputs.push(input);
        self
    }

    pub fn with_contracts(mut self, contracts: IntegrationContracts) -> Self {
        self.integration_contracts = contracts;
        self
    }

    /// A standard development task: not a checkpoint
    pub fn is_standard(&self) -> bool {
        !self.is_checkpoint
    }

    /// Whether the task already references the given predecessor
    pub fn depends_on(&self, task_id: &str) -> bool {
        self.dependencies.iter().any(|d| d.task_id == task_id)
    }
}
