//! Scheduler / executor
//!
//! Drives the graph to completion: assigns ready tasks to workers under
//! per-worker and global caps, multiplexes invocations without ever blocking
//! on a single one, routes checkpoint verdicts through the quality gates,
//! applies the retry policy, and honors cooperative cancellation.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::domain::{CheckpointKind, TaskStatus};
use crate::driver::{FailureKind, InvocationOutcome, PromptBuilder, WorkerDriver};
use crate::events::{ErrorKind, ProjectEvents};
use crate::gates::{CheckpointVerdict, QualityGates};
use crate::graph::{GraphEngine, GraphError, ReadyTask};
use crate::registry::{RegistryError, WorkerRegistry};
use crate::sanitize::Sanitizer;

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every task completed or was legitimately skipped
    Completed,
    Failed { error: ErrorKind, message: String },
    Cancelled,
}

struct TaskRunResult {
    task_id: String,
    worker_id: String,
    checkpoint: Option<(CheckpointKind, Option<String>)>,
    outcome: Result<InvocationOutcome, GraphError>,
}

/// The executor
pub struct Scheduler {
    engine: Arc<GraphEngine>,
    registry: Arc<WorkerRegistry>,
    driver: Arc<WorkerDriver>,
    prompts: Arc<PromptBuilder>,
    gates: QualityGates,
    events: ProjectEvents,
    config: Arc<Config>,
    /// First task-level failure of the run; reported when the graph settles
    last_failure: std::sync::Mutex<Option<(ErrorKind, String)>>,
}

impl Scheduler {
    pub fn new(
        engine: Arc<GraphEngine>,
        registry: Arc<WorkerRegistry>,
        driver: Arc<WorkerDriver>,
        events: ProjectEvents,
        config: Arc<Config>,
    ) -> Self {
        let sanitizer = Sanitizer::new(config.description_max_chars, config.prompt_max_bytes);
        Self {
            engine,
            registry,
            driver,
            prompts: Arc::new(PromptBuilder::new(sanitizer)),
            gates: QualityGates::from_config(&config),
            events,
            config,
            last_failure: std::sync::Mutex::new(None),
        }
    }

    fn note_failure(&self, error: ErrorKind, message: &str) {
        if let Ok(mut slot) = self.last_failure.lock() {
            if slot.is_none() {
                *slot = Some((error, message.to_string()));
            }
        }
    }

    /// Run the graph to completion, failure or cancellation
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) -> RunOutcome {
        let mut inflight: JoinSet<TaskRunResult> = JoinSet::new();

        loop {
            if *cancel.borrow() {
                return self.finish_cancelled(&mut inflight).await;
            }

            if self.engine.is_complete().await {
                info!("All tasks completed");
                self.events.project_completed();
                return RunOutcome::Completed;
            }
            if inflight.is_empty() && self.engine.is_settled().await {
                let (error, cause) = self
                    .last_failure
                    .lock()
                    .ok()
                    .and_then(|slot| slot.clone())
                    .unwrap_or((ErrorKind::Internal, "unknown cause".to_string()));
                let stats = self.engine.stats().await;
                let message = format!(
                    "{} task(s) failed, {} skipped; first failure: {}",
                    stats.failed, stats.skipped, cause
                );
                // Graph-level kinds go through the recovery ladder first;
                // their terminal event fires only once recovery is exhausted.
                if !matches!(error, ErrorKind::Internal | ErrorKind::LoopDetected) {
                    self.events.project_failed(error, &message);
                }
                return RunOutcome::Failed { error, message };
            }

            // Assignment pass over the current ready snapshot
            for ready in self.engine.ready_tasks().await {
                if let Some(outcome) = self.try_assign(ready, &cancel, &mut inflight).await {
                    self.abort_inflight(&mut inflight).await;
                    return outcome;
                }
            }

            // Deadlock guard: nothing running, nothing assignable, graph not
            // settled (e.g. every worker at capacity forever). The tick
            // timeout below keeps polling; stalling forever is prevented by
            // the global invocation cap on every new assignment.
            tokio::select! {
                joined = inflight.join_next(), if !inflight.is_empty() => {
                    if let Some(result) = joined {
                        match result {
                            Ok(result) => {
                                if let Some(outcome) = self.handle_result(result).await {
                                    self.abort_inflight(&mut inflight).await;
                                    return outcome;
                                }
                            }
                            Err(e) => warn!(error = %e, "Invocation task panicked"),
                        }
                    }
                }
                _ = self.engine.wait_for_change() => {}
                _ = cancel.changed() => {}
                _ = tokio::time::sleep(self.config.tick_interval()) => {}
            }
        }
    }

    /// Try to hand one ready task to a worker. Returns Some(outcome) only
    /// for run-level aborts (loop detection).
    async fn try_assign(
        &self,
        ready: ReadyTask,
        cancel: &watch::Receiver<bool>,
        inflight: &mut JoinSet<TaskRunResult>,
    ) -> Option<RunOutcome> {
        let task = &ready.task;
        let task_id = task.id.clone();

        // Global cap check up front: hitting it is a loop-detection fault.
        // The terminal project_failed event belongs to the recovery layer,
        // which may still restore a snapshot and resume.
        if !self.engine.within_limits().await {
            let message = format!(
                "Invocation cap ({}) reached, aborting run",
                self.config.global_max_invocations
            );
            warn!(%message);
            return Some(RunOutcome::Failed { error: ErrorKind::LoopDetected, message });
        }

        let selection = match self.registry.find_best_worker(task).await {
            Ok(selection) => selection,
            Err(RegistryError::AtCapacity(_)) => {
                // Capacity frees up when something finishes; leave it ready
                return None;
            }
            Err(e) => {
                self.fail_ready_task(&task_id, ErrorKind::WorkerUnavailable, &e.to_string()).await;
                return None;
            }
        };

        if !selection.is_confident() && self.config.pause_on_low_confidence {
            let message = format!(
                "Assignment confidence {:.2} below threshold {:.2}; manual override required",
                selection.assignment().confidence,
                self.config.assignment_confidence_threshold
            );
            self.fail_ready_task(&task_id, ErrorKind::WorkerUnavailable, &message).await;
            return None;
        }

        let assignment = selection.assignment().clone();
        let prompt = match self.prompts.compose(task, &ready.dependency_outputs) {
            Ok(prompt) => prompt,
            Err(e) => {
                self.fail_ready_task(&task_id, ErrorKind::PayloadTooLarge, &e.to_string()).await;
                return None;
            }
        };

        if self.registry.reserve(&assignment.worker_id).await.is_err() {
            return None;
        }

        if self.engine.assign_worker(&task_id, &assignment.worker_id).await.is_err()
            || self
                .engine
                .update_status(&task_id, TaskStatus::InProgress, None)
                .await
                .is_err()
        {
            self.registry.release(&assignment.worker_id, None, false).await;
            return None;
        }

        self.events.worker_assigned(
            &task_id,
            &assignment.worker_id,
            assignment.confidence,
            assignment.expected_effort,
        );
        if task.is_checkpoint {
            self.events
                .checkpoint_started(&task_id, task.reviews_task_id.as_deref().unwrap_or(""));
        } else {
            self.events.task_started(&task_id, &assignment.worker_id);
        }

        let engine = Arc::clone(&self.engine);
        let driver = Arc::clone(&self.driver);
        let events = self.events.clone();
        let cancel = cancel.clone();
        let worker_id = assignment.worker_id.clone();
        let checkpoint = task.checkpoint_type.map(|k| (k, task.reviews_task_id.clone()));
        let complex = WorkerDriver::is_complex(&task.description);
        let retries = if task.is_checkpoint { 0 } else { self.config.worker_max_retries };

        inflight.spawn(async move {
            let mut attempt = 0u32;
            loop {
                let invocation = match engine.begin_invocation(&task_id, &worker_id).await {
                    Ok(invocation) => invocation,
                    Err(e) => {
                        return TaskRunResult { task_id, worker_id, checkpoint, outcome: Err(e) };
                    }
                };
                let outcome = driver
                    .invoke(
                        &invocation.invocation_id,
                        &task_id,
                        &worker_id,
                        &prompt,
                        complex,
                        cancel.clone(),
                        &events,
                    )
                    .await;
                engine.end_invocation(&task_id).await;

                if let Some(FailureKind::Exit(code)) = &outcome.failure {
                    if attempt < retries {
                        attempt += 1;
                        warn!(task_id = %task_id, code, attempt, "Worker exited nonzero, retrying");
                        continue;
                    }
                }
                return TaskRunResult { task_id, worker_id, checkpoint, outcome: Ok(outcome) };
            }
        });
        None
    }

    /// Process one finished invocation. Returns Some(outcome) only for
    /// run-level aborts.
    async fn handle_result(&self, result: TaskRunResult) -> Option<RunOutcome> {
        let TaskRunResult { task_id, worker_id, checkpoint, outcome } = result;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(GraphError::LoopDetected { cap }) => {
                let message = format!("Total invocations exceeded the cap of {}", cap);
                warn!(%message);
                self.registry.release(&worker_id, None, false).await;
                return Some(RunOutcome::Failed { error: ErrorKind::LoopDetected, message });
            }
            Err(e) => {
                self.registry.release(&worker_id, None, true).await;
                self.fail_running_task(&task_id, ErrorKind::Internal, &e.to_string(), None).await;
                return None;
            }
        };

        match checkpoint {
            Some((kind, reviews)) => {
                self.handle_checkpoint_result(&task_id, &worker_id, kind, reviews, outcome).await
            }
            None => self.handle_standard_result(&task_id, &worker_id, outcome).await,
        }
        None
    }

    async fn handle_standard_result(&self, task_id: &str, worker_id: &str, outcome: InvocationOutcome) {
        match &outcome.failure {
            None => {
                self.registry.release(worker_id, None, false).await;
                let result = outcome
                    .result_json
                    .clone()
                    .unwrap_or_else(|| serde_json::json!({ "important": outcome.important }));
                match self.engine.update_status(task_id, TaskStatus::InReview, Some(result)).await {
                    Ok(update) => self.emit_ready(&update.newly_ready).await,
                    Err(e) => warn!(task_id, error = %e, "Failed to move task into review"),
                }
            }
            Some(FailureKind::Cancelled) => {
                self.registry.release(worker_id, None, false).await;
                // The cancellation sweep settles the task status
            }
            Some(FailureKind::Timeout(kind)) => {
                self.registry.release(worker_id, None, true).await;
                let message = format!("Invocation exceeded the {} limit", kind);
                self.fail_running_task(task_id, ErrorKind::Timeout, &message, Some(&outcome)).await;
            }
            Some(FailureKind::Exit(code)) => {
                self.registry.release(worker_id, None, true).await;
                let message = format!("Worker exited with code {}", code);
                self.fail_running_task(task_id, ErrorKind::WorkerExitError, &message, Some(&outcome))
                    .await;
            }
            Some(FailureKind::Spawn(reason)) => {
                self.registry.release(worker_id, None, true).await;
                let message = format!("Worker process could not be spawned: {}", reason);
                self.fail_running_task(task_id, ErrorKind::WorkerExitError, &message, Some(&outcome))
                    .await;
            }
        }
    }

    async fn handle_checkpoint_result(
        &self,
        task_id: &str,
        worker_id: &str,
        kind: CheckpointKind,
        reviews: Option<String>,
        outcome: InvocationOutcome,
    ) {
        match &outcome.failure {
            Some(FailureKind::Cancelled) => {
                self.registry.release(worker_id, None, false).await;
                return;
            }
            Some(FailureKind::Timeout(timeout_kind)) => {
                self.registry.release(worker_id, None, true).await;
                let message = format!("Checkpoint invocation exceeded the {} limit", timeout_kind);
                self.fail_running_task(task_id, ErrorKind::Timeout, &message, Some(&outcome)).await;
                return;
            }
            Some(FailureKind::Spawn(reason)) => {
                self.registry.release(worker_id, None, true).await;
                let message = format!("Checkpoint worker could not be spawned: {}", reason);
                self.fail_running_task(task_id, ErrorKind::WorkerExitError, &message, Some(&outcome))
                    .await;
                return;
            }
            // A clean exit (zero or nonzero) carries the verdict
            None | Some(FailureKind::Exit(_)) => {}
        }

        let verdict = CheckpointVerdict::from_output(outcome.result_json.as_ref(), outcome.exit_code);
        let passed = self.gates.passes(kind, &verdict);
        debug!(task_id, ?kind, passed, score = verdict.quality_score, "Checkpoint verdict");

        if passed {
            self.registry.release(worker_id, Some(verdict.quality_score), false).await;
            let _ = self.engine.set_quality_score(task_id, verdict.quality_score).await;
            let verdict_json = serde_json::to_value(&verdict).ok();
            match self.engine.update_status(task_id, TaskStatus::Completed, verdict_json).await {
                Ok(update) => {
                    self.events.checkpoint_completed(task_id, true, verdict.quality_score);
                    self.emit_ready(&update.newly_ready).await;
                }
                Err(e) => warn!(task_id, error = %e, "Failed to complete checkpoint"),
            }

            // A passed QA gate finishes the reviewed task
            if kind == CheckpointKind::QaTest {
                if let Some(reviewed_id) = reviews {
                    self.finish_reviewed_task(&reviewed_id, verdict.quality_score).await;
                }
            }
            return;
        }

        // Failed verdict
        self.registry.release(worker_id, None, false).await;
        let message = format!(
            "Checkpoint rejected the work (score {:.2}, {} findings)",
            verdict.quality_score,
            verdict.findings.len()
        );
        self.events.checkpoint_failed(task_id, ErrorKind::CheckpointFailed, &message);

        if kind.is_final() {
            // Final gates have no rework target; the project fails
            self.fail_running_task(task_id, ErrorKind::CheckpointFailed, &message, Some(&outcome))
                .await;
            return;
        }

        let Some(reviewed_id) = reviews else {
            warn!(task_id, "Checkpoint without a reviewed task, failing it");
            self.fail_running_task(task_id, ErrorKind::Internal, "missing reviewsTaskId", None).await;
            return;
        };

        match self
            .engine
            .request_rework(&reviewed_id, &verdict.finding_messages(), self.gates.max_rework_attempts)
            .await
        {
            Ok(rework) if rework.exhausted => {
                let message = format!(
                    "Rework attempts exhausted after {} cycles",
                    self.gates.max_rework_attempts
                );
                self.note_failure(ErrorKind::ReworkExhausted, &message);
                self.events
                    .task_failed(&reviewed_id, ErrorKind::ReworkExhausted, &message, None);
                info!(task_id = %reviewed_id, skipped = rework.skipped.len(), "Task failed after rework exhaustion");
            }
            Ok(rework) => {
                self.events
                    .rework_requested(&reviewed_id, rework.attempt, verdict.finding_messages());
            }
            Err(e) => {
                warn!(task_id = %reviewed_id, error = %e, "Rework transition rejected");
            }
        }
    }

    /// InReview -> Completed for the reviewed task once its QA gate passes
    async fn finish_reviewed_task(&self, reviewed_id: &str, quality: f64) {
        let _ = self.engine.set_quality_score(reviewed_id, quality).await;
        match self.engine.update_status(reviewed_id, TaskStatus::Completed, None).await {
            Ok(update) => {
                self.events.task_completed(reviewed_id, Some(quality));
                if let Some(task) = self.engine.get_task(reviewed_id).await {
                    if let Some(worker_id) = task.assigned_worker {
                        self.registry.record_quality(&worker_id, quality).await;
                    }
                }
                self.emit_ready(&update.newly_ready).await;
            }
            Err(e) => warn!(reviewed_id, error = %e, "Failed to finish reviewed task"),
        }
    }

    async fn fail_ready_task(&self, task_id: &str, error: ErrorKind, message: &str) {
        warn!(task_id, %error, message, "Failing unassignable task");
        self.note_failure(error, message);
        match self.engine.update_status(task_id, TaskStatus::Failed, None).await {
            Ok(_) => self.events.task_failed(task_id, error, message, None),
            Err(e) => warn!(task_id, error = %e, "Could not fail task"),
        }
    }

    async fn fail_running_task(
        &self,
        task_id: &str,
        error: ErrorKind,
        message: &str,
        outcome: Option<&InvocationOutcome>,
    ) {
        let diagnostic = outcome.map(|o| o.tail.join("\n")).filter(|d| !d.is_empty());
        self.note_failure(error, message);
        match self.engine.update_status(task_id, TaskStatus::Failed, None).await {
            Ok(_) => self.events.task_failed(task_id, error, message, diagnostic),
            Err(e) => warn!(task_id, error = %e, "Could not fail task"),
        }
    }

    async fn emit_ready(&self, task_ids: &[String]) {
        for task_id in task_ids {
            self.events.task_ready(task_id);
        }
    }

    async fn abort_inflight(&self, inflight: &mut JoinSet<TaskRunResult>) {
        let terminated = self.driver.cleanup_session();
        inflight.abort_all();
        while inflight.join_next().await.is_some() {}
        if terminated > 0 {
            self.events.session_cleanup(terminated);
        }
    }

    async fn finish_cancelled(&self, inflight: &mut JoinSet<TaskRunResult>) -> RunOutcome {
        info!("Run cancelled, terminating invocations");
        // The cancel watch already reached every invocation; give them the
        // grace period, then force-terminate what is left.
        let drain = async {
            while inflight.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.config.cancellation_grace(), drain).await.is_err() {
            warn!("Invocations did not stop within the grace period, killing");
        }
        let terminated = self.driver.cleanup_session();
        inflight.abort_all();
        while inflight.join_next().await.is_some() {}

        let skipped = self.engine.skip_runnable().await;
        info!(skipped = skipped.len(), terminated, "Cancellation sweep done");
        self.events.session_cleanup(terminated);
        self.events.project_cancelled();
        RunOutcome::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Task;
    use crate::driver::DriverConfig;
    use crate::events::EventBus;
    use crate::gates::QualityGates;
    use std::time::Duration;

    const PASS_SCRIPT: &str =
        r#"cat > /dev/null; echo working; echo '{"passed": true, "qualityScore": 0.97, "outputs": []}'"#;
    const FAIL_VERDICT_SCRIPT: &str =
        r#"cat > /dev/null; echo '{"passed": false, "qualityScore": 0.4, "findings": [{"severity": "high", "message": "broken"}]}'"#;

    fn test_config(script: &str, cap: u32) -> Arc<Config> {
        Arc::new(Config {
            global_max_invocations: cap,
            worker_command: "sh".to_string(),
            worker_args: vec!["-c".to_string(), script.to_string()],
            worker_max_retries: 0,
            tick_interval_ms: 20,
            cancellation_grace_ms: 500,
            invocation_max_runtime_ms: 10_000,
            invocation_max_runtime_complex_ms: 20_000,
            invocation_max_inactivity_ms: 10_000,
            heartbeat_ms: 5_000,
            ..Config::default()
        })
    }

    fn stack(config: &Arc<Config>) -> (Arc<GraphEngine>, Arc<WorkerRegistry>, Scheduler, EventBus) {
        let engine = Arc::new(GraphEngine::new(config.global_max_invocations, false));
        let registry = Arc::new(WorkerRegistry::new(
            WorkerRegistry::default_catalog(config.per_worker_max_concurrent),
            config.assignment_confidence_threshold,
        ));
        let driver = Arc::new(WorkerDriver::new(DriverConfig::from_config(config)));
        let bus = EventBus::new(4_096);
        let events = bus.emitter_for("proj-test");
        let scheduler = Scheduler::new(
            Arc::clone(&engine),
            Arc::clone(&registry),
            driver,
            events,
            Arc::clone(config),
        );
        (engine, registry, scheduler, bus)
    }

    fn gated_tasks() -> Vec<Task> {
        let t1 = Task::with_id("t1", "Implement backend piece").with_duration(30);
        QualityGates::inject(vec![t1])
    }

    #[tokio::test]
    async fn test_run_completes_gated_graph() {
        let config = test_config(PASS_SCRIPT, 100);
        let (engine, _, scheduler, bus) = stack(&config);
        let mut rx = bus.subscribe();

        engine.build("p", gated_tasks()).await.unwrap();
        let (_tx, cancel) = watch::channel(false);

        let outcome = tokio::time::timeout(Duration::from_secs(30), scheduler.run(cancel))
            .await
            .expect("run should finish");
        assert_eq!(outcome, RunOutcome::Completed);
        assert!(engine.is_complete().await);

        let t1 = engine.get_task("t1").await.unwrap();
        assert_eq!(t1.status, TaskStatus::Completed);
        assert!((t1.quality_score.unwrap() - 0.97).abs() < 1e-9);

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind().to_string());
        }
        assert!(kinds.contains(&"task_started".to_string()));
        assert!(kinds.contains(&"checkpoint_started".to_string()));
        assert!(kinds.contains(&"checkpoint_completed".to_string()));
        assert!(kinds.contains(&"task_completed".to_string()));
        assert_eq!(kinds.last().unwrap(), "project_completed");
    }

    #[tokio::test]
    async fn test_failing_checkpoints_trip_loop_detection() {
        // A tiny invocation budget plus endlessly failing checkpoints
        // must abort with LoopDetected rather than spin forever.
        let config = test_config(FAIL_VERDICT_SCRIPT, 3);
        let (engine, _, scheduler, bus) = stack(&config);
        let mut rx = bus.subscribe();

        engine.build("p", gated_tasks()).await.unwrap();
        let (_tx, cancel) = watch::channel(false);

        let outcome = tokio::time::timeout(Duration::from_secs(30), scheduler.run(cancel))
            .await
            .expect("run should finish");
        assert!(matches!(outcome, RunOutcome::Failed { error: ErrorKind::LoopDetected, .. }));
        assert_eq!(engine.invocations_started().await, 3);

        // The terminal project_failed event is the recovery layer's call,
        // emitted only after the restore ladder is exhausted.
        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(event.kind().to_string());
        }
        assert!(!kinds.contains(&"project_failed".to_string()));
        assert!(kinds.contains(&"checkpoint_failed".to_string()));
    }

    #[tokio::test]
    async fn test_cancellation_skips_and_emits() {
        let config = test_config("cat > /dev/null; sleep 30", 100);
        let (engine, _, scheduler, bus) = stack(&config);
        let mut rx = bus.subscribe();

        engine.build("p", gated_tasks()).await.unwrap();
        let (tx, cancel) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let _ = tx.send(true);
        });

        let outcome = tokio::time::timeout(Duration::from_secs(30), scheduler.run(cancel))
            .await
            .expect("run should finish");
        assert_eq!(outcome, RunOutcome::Cancelled);

        // No task reached completed; runnables were skipped
        let t1 = engine.get_task("t1").await.unwrap();
        assert_eq!(t1.status, TaskStatus::Skipped);

        let mut cancelled_events = 0;
        while let Ok(event) = rx.try_recv() {
            if event.kind() == "project_cancelled" {
                cancelled_events += 1;
            }
        }
        assert_eq!(cancelled_events, 1);
    }

    #[tokio::test]
    async fn test_worker_exit_fails_task_and_skips_dependents() {
        let config = test_config("cat > /dev/null; echo boom; exit 7", 100);
        let (engine, _, scheduler, bus) = stack(&config);
        let mut rx = bus.subscribe();

        engine.build("p", gated_tasks()).await.unwrap();
        let (_tx, cancel) = watch::channel(false);

        let outcome = tokio::time::timeout(Duration::from_secs(30), scheduler.run(cancel))
            .await
            .expect("run should finish");
        assert!(matches!(outcome, RunOutcome::Failed { .. }));

        let t1 = engine.get_task("t1").await.unwrap();
        assert_eq!(t1.status, TaskStatus::Failed);
        // Gates behind it never ran
        let review = engine.get_task("t1-review").await.unwrap();
        assert_eq!(review.status, TaskStatus::Skipped);

        let mut saw_task_failed = false;
        while let Ok(event) = rx.try_recv() {
            if let crate::events::Event::TaskFailed { error, diagnostic, .. } = event {
                assert_eq!(error, ErrorKind::WorkerExitError);
                assert!(diagnostic.unwrap_or_default().contains("boom"));
                saw_task_failed = true;
            }
        }
        assert!(saw_task_failed);
    }
}
