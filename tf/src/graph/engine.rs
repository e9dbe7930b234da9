//! GraphEngine - the stateful graph owner
//!
//! All shared state (nodes, reverse edges, the transition ring, invocation
//! accounting) lives behind one mutex; `update_status` is atomic across the
//! task, the ready set and the transition log. A Notify wakes the scheduler
//! whenever anything transitions.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::domain::{DataItem, EdgeKind, IntegrationContracts, Invocation, Task, TaskStatus};

use super::build::{infer_edges, mark_critical_path, topological_order};

/// Bounded transition ring size
pub const EVENT_RING_CAP: usize = 1_000;

/// Errors from graph operations
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Cycle detected among tasks: {tasks:?}")]
    CyclicGraph { tasks: Vec<String> },

    #[error("Unknown task: {0}")]
    UnknownTask(String),

    #[error("Duplicate task id: {0}")]
    DuplicateTask(String),

    #[error("Task {task_id} depends on itself")]
    SelfDependency { task_id: String },

    #[error("Invalid transition for {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("{0}")]
    MissingProducer(String),

    #[error("Global invocation cap ({cap}) exceeded")]
    LoopDetected { cap: u32 },

    #[error("Task {0} already has an invocation in progress")]
    InvocationActive(String),
}

/// One entry of the bounded transition log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionRecord {
    pub at: DateTime<Utc>,
    pub task_id: String,
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Serializable snapshot of the whole graph; derived maps are rebuilt on
/// restore, so two exports of the same state are identical.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphExport {
    pub project_id: String,
    pub nodes: Vec<Task>,
    pub invocations_started: u32,
    pub transition_log: Vec<TransitionRecord>,
    pub cancelled: bool,
}

/// Output payloads of one satisfied predecessor, passed into worker prompts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyOutput {
    pub task_id: String,
    pub outputs: Vec<DataItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

/// A ready task snapshot with the data its worker prompt needs
#[derive(Debug, Clone)]
pub struct ReadyTask {
    pub task: Task,
    pub dependency_outputs: Vec<DependencyOutput>,
    /// Number of tasks depending on this one, for ordering and display
    pub dependent_count: usize,
}

/// Result of a status update
#[derive(Debug, Default)]
pub struct UpdateOutcome {
    /// Tasks that became ready because of this update
    pub newly_ready: Vec<String>,
    /// Dependents transitively skipped because of a failure
    pub skipped: Vec<String>,
}

/// Rework transition result
#[derive(Debug)]
pub struct ReworkOutcome {
    /// Attempt count after the increment
    pub attempt: u32,
    /// True when the rework budget is spent; the task is now failed
    pub exhausted: bool,
    /// Checkpoint tasks reset to pending for the next cycle
    pub reset_checkpoints: Vec<String>,
    /// Dependents skipped on exhaustion
    pub skipped: Vec<String>,
}

/// Aggregate counts for status displays
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStats {
    pub total: usize,
    pub pending: usize,
    pub ready: usize,
    pub in_progress: usize,
    pub in_review: usize,
    pub needs_revision: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Minutes of critical-path work not yet completed
    pub critical_path_remaining: u32,
}

struct GraphInner {
    project_id: String,
    nodes: Vec<Task>,
    index: HashMap<String, usize>,
    /// Reverse edges: task id -> ids of tasks depending on it
    dependents: HashMap<String, Vec<String>>,
    transition_log: VecDeque<TransitionRecord>,
    invocations_started: u32,
    /// Task ids with a live invocation
    active_invocations: HashMap<String, String>,
    cancelled: bool,
}

impl GraphInner {
    fn empty() -> Self {
        Self {
            project_id: String::new(),
            nodes: Vec::new(),
            index: HashMap::new(),
            dependents: HashMap::new(),
            transition_log: VecDeque::new(),
            invocations_started: 0,
            active_invocations: HashMap::new(),
            cancelled: false,
        }
    }

    fn rebuild_derived(&mut self) {
        self.index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.clone(), i))
            .collect();
        self.dependents.clear();
        for task in &self.nodes {
            for dep in &task.dependencies {
                self.dependents
                    .entry(dep.task_id.clone())
                    .or_default()
                    .push(task.id.clone());
            }
        }
        for list in self.dependents.values_mut() {
            list.sort();
            list.dedup();
        }
    }

    fn record(&mut self, task_id: &str, from: TaskStatus, to: TaskStatus) {
        if self.transition_log.len() >= EVENT_RING_CAP {
            self.transition_log.pop_front();
        }
        self.transition_log.push_back(TransitionRecord {
            at: Utc::now(),
            task_id: task_id.to_string(),
            from,
            to,
        });
    }

    fn task(&self, task_id: &str) -> Result<&Task, GraphError> {
        self.index
            .get(task_id)
            .map(|&i| &self.nodes[i])
            .ok_or_else(|| GraphError::UnknownTask(task_id.to_string()))
    }

    fn task_mut(&mut self, task_id: &str) -> Result<&mut Task, GraphError> {
        match self.index.get(task_id) {
            Some(&i) => Ok(&mut self.nodes[i]),
            None => Err(GraphError::UnknownTask(task_id.to_string())),
        }
    }

    /// A predecessor satisfies an edge when it is completed and the contract
    /// holds. A task sitting in review satisfies only the checkpoints that
    /// review it - that is what lets the gates run before full completion.
    fn dep_satisfied(&self, successor: &Task, dep_id: &str, edge: EdgeKind) -> bool {
        let Some(&p) = self.index.get(dep_id) else { return false };
        let pred = &self.nodes[p];
        match pred.status {
            TaskStatus::Completed => contract_holds(pred, successor, edge),
            TaskStatus::InReview => {
                successor.is_checkpoint && successor.reviews_task_id.as_deref() == Some(dep_id)
            }
            _ => false,
        }
    }

    fn dependencies_satisfied(&self, task: &Task) -> bool {
        task.dependencies
            .iter()
            .all(|dep| self.dep_satisfied(task, &dep.task_id, dep.edge))
    }

    /// Move every satisfied pending task to ready; returns the ids
    fn refresh_ready(&mut self) -> Vec<String> {
        let candidates: Vec<String> = self
            .nodes
            .iter()
            .filter(|t| t.status == TaskStatus::Pending && self.dependencies_satisfied(t))
            .map(|t| t.id.clone())
            .collect();
        for id in &candidates {
            let i = self.index[id];
            self.nodes[i].status = TaskStatus::Ready;
            self.record(id, TaskStatus::Pending, TaskStatus::Ready);
        }
        candidates
    }

    /// Transitively skip non-terminal dependents of a failed task
    fn skip_dependents_of(&mut self, task_id: &str) -> Vec<String> {
        let mut skipped = Vec::new();
        let mut frontier = vec![task_id.to_string()];
        while let Some(id) = frontier.pop() {
            let children = self.dependents.get(&id).cloned().unwrap_or_default();
            for child in children {
                let i = self.index[&child];
                let status = self.nodes[i].status;
                if !status.is_terminal() {
                    self.nodes[i].status = TaskStatus::Skipped;
                    self.record(&child, status, TaskStatus::Skipped);
                    skipped.push(child.clone());
                    frontier.push(child);
                }
            }
        }
        skipped
    }

    fn stats(&self) -> GraphStats {
        let mut stats = GraphStats { total: self.nodes.len(), ..Default::default() };
        for task in &self.nodes {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Ready => stats.ready += 1,
                TaskStatus::InProgress => stats.in_progress += 1,
                TaskStatus::InReview => stats.in_review += 1,
                TaskStatus::NeedsRevision => stats.needs_revision += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Skipped => stats.skipped += 1,
            }
            if task.on_critical_path && !matches!(task.status, TaskStatus::Completed | TaskStatus::Skipped) {
                stats.critical_path_remaining += task.estimated_duration;
            }
        }
        stats
    }
}

/// Contract compatibility between a completed predecessor and its successor
fn contract_holds(pred: &Task, succ: &Task, edge: EdgeKind) -> bool {
    match edge {
        EdgeKind::Completion => true,
        EdgeKind::Data => {
            let declared = succ.required_inputs.iter().any(|input| {
                pred.provided_outputs.iter().any(|out| out.compatible_with(input))
            });
            declared || result_covers_inputs(pred, succ)
        }
        EdgeKind::Integration => succ.integration_contracts.consumes_api.iter().any(|consumed| {
            pred.integration_contracts
                .provides_api
                .iter()
                .any(|provided| IntegrationContracts::names_match(provided, consumed))
        }),
        EdgeKind::Schema => succ.integration_contracts.requires_schema.iter().any(|required| {
            pred.integration_contracts
                .defines_schema
                .iter()
                .any(|defined| IntegrationContracts::names_match(defined, required))
        }),
    }
}

/// A worker result may list produced outputs explicitly; accept those as
/// evidence when declarations are missing.
fn result_covers_inputs(pred: &Task, succ: &Task) -> bool {
    let Some(result) = &pred.result else { return false };
    let Some(outputs) = result.get("outputs").and_then(|v| v.as_array()) else {
        return false;
    };
    succ.required_inputs.iter().any(|input| {
        outputs.iter().filter_map(|o| o.as_str()).any(|name| {
            let produced = DataItem::named(name);
            produced.compatible_with(input)
        })
    })
}

/// The graph engine
pub struct GraphEngine {
    inner: Mutex<GraphInner>,
    notify: Notify,
    global_cap: u32,
    strict_contracts: bool,
}

impl GraphEngine {
    pub fn new(global_cap: u32, strict_contracts: bool) -> Self {
        Self {
            inner: Mutex::new(GraphInner::empty()),
            notify: Notify::new(),
            global_cap,
            strict_contracts,
        }
    }

    /// Build the graph: clear prior state, insert nodes, infer edges,
    /// validate acyclicity, mark the critical path, compute the ready set.
    /// Returns edge-inference warnings.
    pub async fn build(&self, project_id: &str, mut tasks: Vec<Task>) -> Result<Vec<String>, GraphError> {
        // Validate before touching shared state
        let mut seen: Vec<&str> = Vec::new();
        for task in &tasks {
            if seen.contains(&task.id.as_str()) {
                return Err(GraphError::DuplicateTask(task.id.clone()));
            }
            if task.dependencies.iter().any(|d| d.task_id == task.id) {
                return Err(GraphError::SelfDependency { task_id: task.id.clone() });
            }
            seen.push(&task.id);
        }

        let warnings = infer_edges(&mut tasks, self.strict_contracts)?;
        topological_order(&tasks)?;
        let critical = mark_critical_path(&mut tasks);

        let mut inner = self.inner.lock().await;
        *inner = GraphInner::empty();
        inner.project_id = project_id.to_string();
        inner.nodes = tasks;
        inner.rebuild_derived();
        let ready = inner.refresh_ready();

        info!(
            project_id,
            task_count = inner.nodes.len(),
            critical,
            initially_ready = ready.len(),
            "Graph built"
        );
        drop(inner);
        self.notify.notify_waiters();
        Ok(warnings)
    }

    /// Snapshot of ready tasks, highest scheduling preference first:
    /// critical-path tasks, then most-depended-on, then contract producers,
    /// then shortest, with task id as the final deterministic tie-break.
    pub async fn ready_tasks(&self) -> Vec<ReadyTask> {
        let inner = self.inner.lock().await;
        let mut ready: Vec<ReadyTask> = inner
            .nodes
            .iter()
            .filter(|t| t.status == TaskStatus::Ready)
            .map(|task| {
                let dependency_outputs = task
                    .dependencies
                    .iter()
                    .filter_map(|dep| {
                        let &p = inner.index.get(&dep.task_id)?;
                        let pred = &inner.nodes[p];
                        if matches!(pred.status, TaskStatus::Completed | TaskStatus::InReview) {
                            Some(DependencyOutput {
                                task_id: pred.id.clone(),
                                outputs: pred.provided_outputs.clone(),
                                result: pred.result.clone(),
                            })
                        } else {
                            None
                        }
                    })
                    .collect();
                ReadyTask {
                    dependent_count: inner.dependents.get(&task.id).map(|d| d.len()).unwrap_or(0),
                    task: task.clone(),
                    dependency_outputs,
                }
            })
            .collect();

        ready.sort_by(|a, b| {
            b.task
                .on_critical_path
                .cmp(&a.task.on_critical_path)
                .then(b.dependent_count.cmp(&a.dependent_count))
                .then(
                    b.task
                        .integration_contracts
                        .provides_anything()
                        .cmp(&a.task.integration_contracts.provides_anything()),
                )
                .then(a.task.estimated_duration.cmp(&b.task.estimated_duration))
                .then(a.task.id.cmp(&b.task.id))
        });
        ready
    }

    /// All dependencies of the task completed with compatible contracts
    pub async fn dependencies_satisfied(&self, task_id: &str) -> Result<bool, GraphError> {
        let inner = self.inner.lock().await;
        let task = inner.task(task_id)?;
        Ok(inner.dependencies_satisfied(task))
    }

    /// Transition a task, atomically updating runtime fields, the ready set
    /// and the transition log.
    pub async fn update_status(
        &self,
        task_id: &str,
        status: TaskStatus,
        result: Option<Value>,
    ) -> Result<UpdateOutcome, GraphError> {
        let mut inner = self.inner.lock().await;
        let from = inner.task(task_id)?.status;
        if !from.can_transition_to(status) {
            return Err(GraphError::InvalidTransition {
                task_id: task_id.to_string(),
                from,
                to: status,
            });
        }

        let now = Utc::now();
        {
            let task = inner.task_mut(task_id)?;
            task.status = status;
            match status {
                TaskStatus::InProgress => task.started_at = Some(now),
                TaskStatus::InReview => {
                    if result.is_some() {
                        task.result = result.clone();
                    }
                }
                TaskStatus::Completed => {
                    task.completed_at = Some(now);
                    if result.is_some() {
                        task.result = result.clone();
                    }
                }
                TaskStatus::Failed => task.failed_at = Some(now),
                TaskStatus::Pending => {
                    task.assigned_worker = None;
                    task.started_at = None;
                    task.completed_at = None;
                    task.failed_at = None;
                }
                _ => {}
            }
        }
        inner.record(task_id, from, status);

        let mut outcome = UpdateOutcome::default();
        match status {
            TaskStatus::Completed | TaskStatus::InReview => {
                outcome.newly_ready = inner.refresh_ready();
            }
            TaskStatus::Failed => {
                outcome.skipped = inner.skip_dependents_of(task_id);
            }
            _ => {}
        }

        debug!(task_id, %from, to = %status, newly_ready = outcome.newly_ready.len(), "Status updated");
        drop(inner);
        self.notify.notify_waiters();
        Ok(outcome)
    }

    /// Record the worker chosen for a task
    pub async fn assign_worker(&self, task_id: &str, worker_id: &str) -> Result<(), GraphError> {
        let mut inner = self.inner.lock().await;
        inner.task_mut(task_id)?.assigned_worker = Some(worker_id.to_string());
        Ok(())
    }

    /// Record the checkpoint quality score on a task
    pub async fn set_quality_score(&self, task_id: &str, score: f64) -> Result<(), GraphError> {
        let mut inner = self.inner.lock().await;
        inner.task_mut(task_id)?.quality_score = Some(score.clamp(0.0, 1.0));
        Ok(())
    }

    /// The rework transition: the only sanctioned cycle in the graph.
    ///
    /// Increments the attempt counter (never reset), appends the findings to
    /// the task description, sends the task back to pending and resets its
    /// checkpoints. Once the budget is spent the task fails instead and all
    /// dependents are skipped.
    pub async fn request_rework(
        &self,
        task_id: &str,
        findings: &[String],
        max_attempts: u32,
    ) -> Result<ReworkOutcome, GraphError> {
        let mut inner = self.inner.lock().await;
        let from = inner.task(task_id)?.status;
        if !matches!(from, TaskStatus::Completed | TaskStatus::InReview) {
            return Err(GraphError::InvalidTransition {
                task_id: task_id.to_string(),
                from,
                to: TaskStatus::NeedsRevision,
            });
        }

        let attempt = {
            let task = inner.task_mut(task_id)?;
            task.attempt_count += 1;
            task.attempt_count
        };

        if attempt > max_attempts {
            warn!(task_id, attempt, max_attempts, "Rework budget exhausted");
            {
                let task = inner.task_mut(task_id)?;
                task.status = TaskStatus::NeedsRevision;
            }
            inner.record(task_id, from, TaskStatus::NeedsRevision);
            {
                let task = inner.task_mut(task_id)?;
                task.status = TaskStatus::Failed;
                task.failed_at = Some(Utc::now());
            }
            inner.record(task_id, TaskStatus::NeedsRevision, TaskStatus::Failed);
            let skipped = inner.skip_dependents_of(task_id);
            drop(inner);
            self.notify.notify_waiters();
            return Ok(ReworkOutcome {
                attempt,
                exhausted: true,
                reset_checkpoints: Vec::new(),
                skipped,
            });
        }

        {
            let task = inner.task_mut(task_id)?;
            task.status = TaskStatus::NeedsRevision;
            if !findings.is_empty() {
                task.description = format!(
                    "{}\n\nRework findings (attempt {}):\n- {}",
                    task.description,
                    attempt,
                    findings.join("\n- ")
                );
            }
        }
        inner.record(task_id, from, TaskStatus::NeedsRevision);
        {
            let task = inner.task_mut(task_id)?;
            task.status = TaskStatus::Pending;
            task.assigned_worker = None;
            task.started_at = None;
            task.completed_at = None;
            task.failed_at = None;
            task.result = None;
            task.quality_score = None;
        }
        inner.record(task_id, TaskStatus::NeedsRevision, TaskStatus::Pending);

        // Reset this task's checkpoints so the next cycle reviews the rework
        let checkpoint_ids: Vec<String> = inner
            .nodes
            .iter()
            .filter(|t| t.is_checkpoint && t.reviews_task_id.as_deref() == Some(task_id))
            .map(|t| t.id.clone())
            .collect();
        for id in &checkpoint_ids {
            let i = inner.index[id];
            let status = inner.nodes[i].status;
            // Skipped/failed checkpoints stay where they are; anything that
            // ran or was queued goes back to pending.
            let resettable = matches!(
                status,
                TaskStatus::Ready | TaskStatus::InProgress | TaskStatus::InReview | TaskStatus::Completed
            );
            if resettable {
                let task = &mut inner.nodes[i];
                task.status = TaskStatus::Pending;
                task.assigned_worker = None;
                task.started_at = None;
                task.completed_at = None;
                task.failed_at = None;
                task.result = None;
                inner.record(id, status, TaskStatus::Pending);
            }
        }

        inner.refresh_ready();
        info!(task_id, attempt, reset = checkpoint_ids.len(), "Rework requested");
        drop(inner);
        self.notify.notify_waiters();
        Ok(ReworkOutcome {
            attempt,
            exhausted: false,
            reset_checkpoints: checkpoint_ids,
            skipped: Vec::new(),
        })
    }

    /// Account one invocation start; enforces the global cap and the
    /// one-invocation-per-task invariant.
    pub async fn begin_invocation(&self, task_id: &str, worker_id: &str) -> Result<Invocation, GraphError> {
        let mut inner = self.inner.lock().await;
        inner.task(task_id)?;
        if inner.invocations_started >= self.global_cap {
            return Err(GraphError::LoopDetected { cap: self.global_cap });
        }
        if inner.active_invocations.contains_key(task_id) {
            return Err(GraphError::InvocationActive(task_id.to_string()));
        }
        inner.invocations_started += 1;
        let invocation = Invocation::begin(task_id, worker_id);
        inner
            .active_invocations
            .insert(task_id.to_string(), invocation.invocation_id.clone());
        debug!(task_id, worker_id, total = inner.invocations_started, "Invocation started");
        Ok(invocation)
    }

    /// Release the per-task invocation slot
    pub async fn end_invocation(&self, task_id: &str) {
        let mut inner = self.inner.lock().await;
        inner.active_invocations.remove(task_id);
    }

    /// Loop-detection predicate: false once the cap is reached
    pub async fn within_limits(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.invocations_started < self.global_cap
    }

    pub async fn invocations_started(&self) -> u32 {
        self.inner.lock().await.invocations_started
    }

    /// Number of tasks with a live invocation
    pub async fn active_invocation_count(&self) -> usize {
        self.inner.lock().await.active_invocations.len()
    }

    /// Cancellation sweep: every pending/ready/in-progress task is skipped
    pub async fn skip_runnable(&self) -> Vec<String> {
        let mut inner = self.inner.lock().await;
        inner.cancelled = true;
        let ids: Vec<String> = inner
            .nodes
            .iter()
            .filter(|t| {
                matches!(
                    t.status,
                    TaskStatus::Pending | TaskStatus::Ready | TaskStatus::InProgress | TaskStatus::InReview
                )
            })
            .map(|t| t.id.clone())
            .collect();
        for id in &ids {
            let i = inner.index[id];
            let from = inner.nodes[i].status;
            inner.nodes[i].status = TaskStatus::Skipped;
            inner.record(id, from, TaskStatus::Skipped);
        }
        drop(inner);
        self.notify.notify_waiters();
        ids
    }

    pub async fn is_cancelled(&self) -> bool {
        self.inner.lock().await.cancelled
    }

    /// Every node completed or skipped
    pub async fn is_complete(&self) -> bool {
        let inner = self.inner.lock().await;
        !inner.nodes.is_empty()
            && inner
                .nodes
                .iter()
                .all(|t| matches!(t.status, TaskStatus::Completed | TaskStatus::Skipped))
    }

    /// Any task failed (the run can never complete)
    pub async fn has_failures(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.nodes.iter().any(|t| t.status == TaskStatus::Failed)
    }

    /// No runnable work left: every node is terminal
    pub async fn is_settled(&self) -> bool {
        let inner = self.inner.lock().await;
        !inner.nodes.is_empty() && inner.nodes.iter().all(|t| t.status.is_terminal())
    }

    pub async fn stats(&self) -> GraphStats {
        self.inner.lock().await.stats()
    }

    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        let inner = self.inner.lock().await;
        inner.index.get(task_id).map(|&i| inner.nodes[i].clone())
    }

    pub async fn task_count(&self) -> usize {
        self.inner.lock().await.nodes.len()
    }

    /// Tail of the transition ring, oldest first
    pub async fn transition_log(&self) -> Vec<TransitionRecord> {
        let inner = self.inner.lock().await;
        inner.transition_log.iter().cloned().collect()
    }

    /// Deep-copy snapshot of the entire graph state
    pub async fn export(&self) -> GraphExport {
        let inner = self.inner.lock().await;
        GraphExport {
            project_id: inner.project_id.clone(),
            nodes: inner.nodes.clone(),
            invocations_started: inner.invocations_started,
            transition_log: inner.transition_log.iter().cloned().collect(),
            cancelled: inner.cancelled,
        }
    }

    /// Replace the graph with a snapshot; live invocation slots are
    /// discarded (their processes are the driver's problem).
    pub async fn restore(&self, export: GraphExport) {
        let mut inner = self.inner.lock().await;
        inner.project_id = export.project_id;
        inner.nodes = export.nodes;
        inner.invocations_started = export.invocations_started;
        inner.transition_log = export.transition_log.into();
        inner.cancelled = export.cancelled;
        inner.active_invocations.clear();
        inner.rebuild_derived();
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Await the next state transition
    pub async fn wait_for_change(&self) {
        self.notify.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Dependency;

    fn engine() -> GraphEngine {
        GraphEngine::new(100, false)
    }

    fn task(id: &str) -> Task {
        Task::with_id(id, id).with_duration(10)
    }

    /// Minimal dependency resolution through declared data items
    #[tokio::test]
    async fn test_minimal_dependency_resolution() {
        let engine = engine();
        let a = task("a").with_output(DataItem::named("schema:users"));
        let mut b = task("b").with_dependency(Dependency::completion("a"));
        b.integration_contracts.consumes_api.push("users".into());

        // b's consumed API has no provider: warning, not fatal
        let warnings = engine.build("p", vec![a, b]).await.unwrap();
        assert_eq!(warnings.len(), 1);

        let ready = engine.ready_tasks().await;
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].task.id, "a");

        engine.update_status("a", TaskStatus::InProgress, None).await.unwrap();
        let outcome = engine.update_status("a", TaskStatus::Completed, None).await.unwrap();
        assert_eq!(outcome.newly_ready, vec!["b".to_string()]);

        let ready = engine.ready_tasks().await;
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].task.id, "b");
        // Ready task carries its satisfied dependency's outputs
        assert_eq!(ready[0].dependency_outputs.len(), 1);
        assert_eq!(ready[0].dependency_outputs[0].outputs[0].name, "schema:users");

        engine.update_status("b", TaskStatus::InProgress, None).await.unwrap();
        engine.update_status("b", TaskStatus::Completed, None).await.unwrap();
        assert!(engine.is_complete().await);
    }

    #[tokio::test]
    async fn test_build_rejects_cycles() {
        let engine = engine();
        let tasks = vec![
            task("a").with_dependency(Dependency::completion("b")),
            task("b").with_dependency(Dependency::completion("a")),
        ];
        assert!(matches!(
            engine.build("p", tasks).await,
            Err(GraphError::CyclicGraph { .. })
        ));
    }

    #[tokio::test]
    async fn test_build_rejects_duplicates_and_self_deps() {
        let engine = engine();
        assert!(matches!(
            engine.build("p", vec![task("a"), task("a")]).await,
            Err(GraphError::DuplicateTask(_))
        ));
        assert!(matches!(
            engine.build("p", vec![task("a").with_dependency(Dependency::completion("a"))]).await,
            Err(GraphError::SelfDependency { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_transition_rejected() {
        let engine = engine();
        engine.build("p", vec![task("a")]).await.unwrap();
        // a is Ready; Ready -> Completed is not allowed
        let err = engine.update_status("a", TaskStatus::Completed, None).await.unwrap_err();
        assert!(matches!(err, GraphError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_ready_ordering() {
        let engine = engine();
        // hub has two dependents; solo has none. Equal durations, no
        // critical-path difference is guaranteed, so build a clear case:
        // all tasks independent, hub produces a contract.
        let mut hub = task("m-hub").with_duration(10);
        hub.integration_contracts.provides_api.push("x".into());
        let d1 = task("z1").with_dependency(Dependency::completion("m-hub"));
        let d2 = task("z2").with_dependency(Dependency::completion("m-hub"));
        let solo = task("a-solo").with_duration(10);

        engine.build("p", vec![hub, d1, d2, solo]).await.unwrap();
        let ready = engine.ready_tasks().await;
        // hub: on critical path (longest chain) and most depended upon
        assert_eq!(ready[0].task.id, "m-hub");
        assert_eq!(ready[0].dependent_count, 2);
    }

    #[tokio::test]
    async fn test_shorter_duration_breaks_ties() {
        let engine = engine();
        let long = task("a-long").with_duration(60);
        let short = task("b-short").with_duration(60);
        // Same duration, no dependents: falls through to id ordering
        engine.build("p", vec![long, short]).await.unwrap();
        let ready = engine.ready_tasks().await;
        assert_eq!(ready[0].task.id, "a-long");

        let engine = GraphEngine::new(100, false);
        let long = task("a-long").with_duration(60);
        let short = task("b-short").with_duration(5);
        engine.build("p", vec![long, short]).await.unwrap();
        let ready = engine.ready_tasks().await;
        // both independent chains: the longer one is the critical path
        assert_eq!(ready[0].task.id, "a-long");
        // shorter-first applies within the same criticality class
        assert!(!ready[1].task.on_critical_path);
    }

    #[tokio::test]
    async fn test_failure_skips_dependents_transitively() {
        let engine = engine();
        let tasks = vec![
            task("a"),
            task("b").with_dependency(Dependency::completion("a")),
            task("c").with_dependency(Dependency::completion("b")),
        ];
        engine.build("p", tasks).await.unwrap();

        engine.update_status("a", TaskStatus::InProgress, None).await.unwrap();
        let outcome = engine.update_status("a", TaskStatus::Failed, None).await.unwrap();
        assert_eq!(outcome.skipped.len(), 2);
        assert!(engine.is_settled().await);
        assert!(!engine.is_complete().await);
        assert!(engine.has_failures().await);
    }

    #[tokio::test]
    async fn test_rework_cycle_bounded() {
        let engine = engine();
        let mut review = task("review-a");
        review.is_checkpoint = true;
        review.reviews_task_id = Some("a".to_string());
        review.dependencies.push(Dependency::completion("a"));
        let tasks = vec![task("a"), review];
        engine.build("p", tasks).await.unwrap();

        engine.update_status("a", TaskStatus::InProgress, None).await.unwrap();
        engine.update_status("a", TaskStatus::InReview, None).await.unwrap();

        // First rework
        let outcome = engine.request_rework("a", &["missing tests".to_string()], 5).await.unwrap();
        assert_eq!(outcome.attempt, 1);
        assert!(!outcome.exhausted);
        assert_eq!(outcome.reset_checkpoints, vec!["review-a".to_string()]);

        let a = engine.get_task("a").await.unwrap();
        assert_eq!(a.status, TaskStatus::Pending);
        assert_eq!(a.attempt_count, 1);
        assert!(a.description.contains("missing tests"));
        // a has no dependencies, so it is immediately ready again
        let ready = engine.ready_tasks().await;
        assert!(ready.iter().any(|r| r.task.id == "a"));
    }

    /// Five failures exhaust the budget; the task fails and its
    /// dependents are skipped
    #[tokio::test]
    async fn test_rework_exhaustion_fails_and_skips() {
        let engine = engine();
        let tasks = vec![task("t1"), task("t2").with_dependency(Dependency::completion("t1"))];
        engine.build("p", tasks).await.unwrap();

        for attempt in 1..=5u32 {
            engine.update_status("t1", TaskStatus::InProgress, None).await.unwrap();
            engine.update_status("t1", TaskStatus::InReview, None).await.unwrap();
            let outcome = engine.request_rework("t1", &[], 5).await.unwrap();
            assert_eq!(outcome.attempt, attempt);
            assert!(!outcome.exhausted);
        }

        // Sixth cycle: over budget
        engine.update_status("t1", TaskStatus::InProgress, None).await.unwrap();
        engine.update_status("t1", TaskStatus::InReview, None).await.unwrap();
        let outcome = engine.request_rework("t1", &[], 5).await.unwrap();
        assert!(outcome.exhausted);
        assert_eq!(outcome.attempt, 6);
        assert_eq!(outcome.skipped, vec!["t2".to_string()]);

        let t1 = engine.get_task("t1").await.unwrap();
        assert_eq!(t1.status, TaskStatus::Failed);
        let t2 = engine.get_task("t2").await.unwrap();
        assert_eq!(t2.status, TaskStatus::Skipped);
    }

    #[tokio::test]
    async fn test_invocation_cap() {
        let engine = GraphEngine::new(2, false);
        engine.build("p", vec![task("a"), task("b"), task("c")]).await.unwrap();

        engine.begin_invocation("a", "w").await.unwrap();
        assert!(engine.within_limits().await);
        engine.begin_invocation("b", "w").await.unwrap();
        assert!(!engine.within_limits().await);

        let err = engine.begin_invocation("c", "w").await.unwrap_err();
        assert!(matches!(err, GraphError::LoopDetected { cap: 2 }));
    }

    #[tokio::test]
    async fn test_one_invocation_per_task() {
        let engine = engine();
        engine.build("p", vec![task("a")]).await.unwrap();

        engine.begin_invocation("a", "w").await.unwrap();
        let err = engine.begin_invocation("a", "w").await.unwrap_err();
        assert!(matches!(err, GraphError::InvocationActive(_)));

        engine.end_invocation("a").await;
        engine.begin_invocation("a", "w").await.unwrap();
        assert_eq!(engine.invocations_started().await, 2);
    }

    #[tokio::test]
    async fn test_cancellation_sweep() {
        let engine = engine();
        let tasks = vec![
            task("a"),
            task("b"),
            task("c").with_dependency(Dependency::completion("a")),
        ];
        engine.build("p", tasks).await.unwrap();
        engine.update_status("a", TaskStatus::InProgress, None).await.unwrap();

        let skipped = engine.skip_runnable().await;
        assert_eq!(skipped.len(), 3);
        assert!(engine.is_cancelled().await);
        assert!(engine.is_settled().await);

        let a = engine.get_task("a").await.unwrap();
        assert_eq!(a.status, TaskStatus::Skipped);
    }

    #[tokio::test]
    async fn test_export_restore_round_trip() {
        let engine = engine();
        let tasks = vec![task("a"), task("b").with_dependency(Dependency::completion("a"))];
        engine.build("p", tasks).await.unwrap();
        engine.update_status("a", TaskStatus::InProgress, None).await.unwrap();
        engine.begin_invocation("a", "w").await.unwrap();

        let snapshot = engine.export().await;
        let snapshot_bytes = serde_json::to_vec(&snapshot).unwrap();

        // Mutate, then restore
        engine.update_status("a", TaskStatus::Failed, None).await.unwrap();
        engine.restore(serde_json::from_slice(&snapshot_bytes).unwrap()).await;

        let exported = engine.export().await;
        assert_eq!(serde_json::to_vec(&exported).unwrap(), snapshot_bytes);

        let a = engine.get_task("a").await.unwrap();
        assert_eq!(a.status, TaskStatus::InProgress);
        // Invocation slots do not survive restore
        assert_eq!(engine.active_invocation_count().await, 0);
    }

    #[tokio::test]
    async fn test_transition_ring_bounded() {
        let engine = engine();
        engine.build("p", vec![task("a")]).await.unwrap();

        // Cycle a through rework many times to overflow the ring
        for _ in 0..600 {
            engine.update_status("a", TaskStatus::InProgress, None).await.unwrap();
            engine.update_status("a", TaskStatus::InReview, None).await.unwrap();
            engine.request_rework("a", &[], u32::MAX).await.unwrap();
        }
        let log = engine.transition_log().await;
        assert_eq!(log.len(), EVENT_RING_CAP);
    }

    #[tokio::test]
    async fn test_data_contract_gating() {
        // b data-depends on a, but a declares no compatible output and its
        // result lists none: b stays pending even after a completes.
        let engine = engine();
        let a = task("a");
        let b = task("b")
            .with_input(DataItem::named("users"))
            .with_dependency(Dependency::new("a", EdgeKind::Data));
        // inference adds nothing (no producer); explicit data edge remains
        engine.build("p", vec![a, b]).await.unwrap();

        engine.update_status("a", TaskStatus::InProgress, None).await.unwrap();
        engine.update_status("a", TaskStatus::Completed, None).await.unwrap();
        let ready = engine.ready_tasks().await;
        assert!(ready.is_empty(), "b must stay blocked: contract unsatisfied");

        // A result declaring the output satisfies the contract
        let engine = GraphEngine::new(100, false);
        let a = task("a");
        let b = task("b")
            .with_input(DataItem::named("users"))
            .with_dependency(Dependency::new("a", EdgeKind::Data));
        engine.build("p", vec![a, b]).await.unwrap();
        engine.update_status("a", TaskStatus::InProgress, None).await.unwrap();
        engine
            .update_status(
                "a",
                TaskStatus::Completed,
                Some(serde_json::json!({"outputs": ["schema:users"]})),
            )
            .await
            .unwrap();
        let ready = engine.ready_tasks().await;
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].task.id, "b");
    }

    #[tokio::test]
    async fn test_checkpoint_ready_while_reviewed_task_in_review() {
        let engine = engine();
        let mut review = task("r");
        review.is_checkpoint = true;
        review.reviews_task_id = Some("t".to_string());
        review.dependencies.push(Dependency::completion("t"));
        let mut other = task("d");
        other.dependencies.push(Dependency::completion("t"));

        engine.build("p", vec![task("t"), review, other]).await.unwrap();
        engine.update_status("t", TaskStatus::InProgress, None).await.unwrap();
        engine.update_status("t", TaskStatus::InReview, None).await.unwrap();

        let ready: Vec<String> = engine.ready_tasks().await.into_iter().map(|r| r.task.id).collect();
        // The checkpoint reviewing t may run; the ordinary dependent may not
        assert!(ready.contains(&"r".to_string()));
        assert!(!ready.contains(&"d".to_string()));
    }
}
