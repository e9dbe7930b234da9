//! Orchestrator - the request surface
//!
//! One orchestrator drives projects end to end: createProject analyzes the
//! request, injects quality gates and builds the graph; startProject hands
//! the graph to the scheduler under a cancellation signal; status and event
//! subscription read back run state. Each project owns its event bus, state
//! directory and recovery snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use eyre::{bail, Context, Result};
use graphstore::ProjectStore;
use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{info, warn};

use crate::analyzer::RequirementsAnalyzer;
use crate::config::Config;
use crate::domain::{Request, Worker};
use crate::driver::{emergency_cleanup, DriverConfig, WorkerDriver};
use crate::events::{spawn_event_logger, Event, EventBus, ErrorKind};
use crate::gates::QualityGates;
use crate::graph::{GraphEngine, GraphExport};
use crate::llm::LlmAdapter;
use crate::recovery::{
    CheckpointStore, SNAPSHOT_BEFORE_ERROR, SNAPSHOT_EXECUTION_START, SNAPSHOT_INITIALIZED,
    SNAPSHOT_LAST_SUCCESSFUL,
};
use crate::registry::WorkerRegistry;
use crate::scheduler::{RunOutcome, Scheduler};

/// Caller-facing project status summary
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectStatus {
    pub project_id: String,
    /// "created" | "running" | "completed" | "failed" | "cancelled"
    pub status: String,
    pub ready_count: usize,
    pub in_progress_count: usize,
    pub completed_count: usize,
    pub failed_count: usize,
    /// Minutes of critical-path work remaining
    pub critical_path_remaining: u32,
}

struct ProjectHandle {
    engine: Arc<GraphEngine>,
    store: ProjectStore,
    bus: Arc<EventBus>,
    cancel_tx: watch::Sender<bool>,
    outcome: Arc<Mutex<Option<RunOutcome>>>,
    running: bool,
    warnings: Vec<String>,
}

/// The orchestration facade
pub struct Orchestrator {
    config: Arc<Config>,
    adapter: Arc<dyn LlmAdapter>,
    registry: Arc<WorkerRegistry>,
    projects: Mutex<HashMap<String, ProjectHandle>>,
}

impl Orchestrator {
    /// Create with the default worker catalog
    pub fn new(config: Arc<Config>, adapter: Arc<dyn LlmAdapter>) -> Self {
        let catalog = WorkerRegistry::default_catalog(config.per_worker_max_concurrent);
        Self::with_workers(config, adapter, catalog)
    }

    pub fn with_workers(config: Arc<Config>, adapter: Arc<dyn LlmAdapter>, workers: Vec<Worker>) -> Self {
        let registry = Arc::new(WorkerRegistry::new(workers, config.assignment_confidence_threshold));
        Self {
            config,
            adapter,
            registry,
            projects: Mutex::new(HashMap::new()),
        }
    }

    /// Analyze a request into a gated graph, ready to start
    pub async fn create_project(&self, request: Request) -> Result<String> {
        let analyzer = RequirementsAnalyzer::new(Arc::clone(&self.adapter), &self.config);
        let specialists = self.registry.specialist_kinds().await;
        let analyzed = analyzer.analyze_project(&request, &specialists).await?;

        let project_id = analyzed.blueprint.project_id.clone();
        let gated = QualityGates::inject(analyzed.tasks);

        let engine = Arc::new(GraphEngine::new(
            self.config.global_max_invocations,
            self.config.strict_contracts,
        ));
        let build_warnings = engine
            .build(&project_id, gated)
            .await
            .wrap_err("Graph construction failed")?;

        let store = ProjectStore::open(self.config.project_dir(&project_id))
            .wrap_err("Failed to open project state directory")?;
        let bus = Arc::new(EventBus::with_default_capacity());

        let checkpoints = CheckpointStore::new(Arc::clone(&engine), store.clone());
        checkpoints
            .snapshot(SNAPSHOT_INITIALIZED)
            .await
            .wrap_err("Failed to write the initial snapshot")?;

        let export = engine.export().await;
        let critical = export.nodes.iter().filter(|t| t.on_critical_path).count();
        let events = bus.emitter_for(&project_id);
        events.project_orchestrated(export.nodes.len(), critical);
        for ready in engine.ready_tasks().await {
            events.task_ready(&ready.task.id);
        }

        let mut warnings = analyzed.warnings;
        warnings.extend(build_warnings);

        info!(
            project_id = %project_id,
            tasks = export.nodes.len(),
            critical,
            warnings = warnings.len(),
            "Project created"
        );

        let (cancel_tx, _) = watch::channel(false);
        let handle = ProjectHandle {
            engine,
            store,
            bus,
            cancel_tx,
            outcome: Arc::new(Mutex::new(None)),
            running: false,
            warnings,
        };
        self.projects.lock().await.insert(project_id.clone(), handle);
        Ok(project_id)
    }

    /// Start the scheduler for a created project
    pub async fn start_project(&self, project_id: &str) -> Result<()> {
        let mut projects = self.projects.lock().await;
        let handle = projects
            .get_mut(project_id)
            .ok_or_else(|| eyre::eyre!("Unknown project: {}", project_id))?;
        if handle.running {
            bail!("Project {} is already running", project_id);
        }
        handle.running = true;

        let engine = Arc::clone(&handle.engine);
        let store = handle.store.clone();
        let bus = Arc::clone(&handle.bus);
        let events = bus.emitter_for(project_id);
        let cancel_rx = handle.cancel_tx.subscribe();
        let outcome_slot = Arc::clone(&handle.outcome);
        let config = Arc::clone(&self.config);
        let registry = Arc::clone(&self.registry);

        // Persist the event stream for this project
        spawn_event_logger(bus.subscribe(), store.clone(), config.event_log_keep);

        let checkpoints = CheckpointStore::new(Arc::clone(&engine), store.clone());
        checkpoints.snapshot(SNAPSHOT_EXECUTION_START).await?;

        // Rolling snapshots follow the event stream
        spawn_snapshot_watcher(bus.subscribe(), checkpoints.clone());

        let driver = Arc::new(WorkerDriver::new(DriverConfig::from_config(&config)));
        let run_events = bus.emitter_for(project_id);
        let scheduler = Scheduler::new(engine, registry, driver, events, Arc::clone(&config));

        tokio::spawn(async move {
            let depth_cap = config.recursion_depth_cap;
            let mut attempts = 0u32;
            let outcome = loop {
                let outcome = scheduler.run(cancel_rx.clone()).await;
                // Graph-level errors (loop detection, invariant violations)
                // go through the recovery ladder; their project_failed event
                // fires only once recovery is exhausted. Cancellation and
                // ordinary task failures are final and already announced.
                if let RunOutcome::Failed { error, message } = &outcome {
                    if matches!(error, ErrorKind::Internal | ErrorKind::LoopDetected) {
                        if attempts < depth_cap {
                            attempts += 1;
                            match checkpoints.restore_ladder().await {
                                Ok(Some(name)) => {
                                    warn!(attempts, snapshot = %name, "Recovered from snapshot, resuming run");
                                    continue;
                                }
                                Ok(None) => {
                                    run_events.project_failed(*error, message);
                                    break outcome;
                                }
                                Err(e) => {
                                    warn!(error = %e, "Recovery ladder failed");
                                    run_events.project_failed(*error, message);
                                    break outcome;
                                }
                            }
                        }
                        run_events.project_failed(*error, message);
                        break outcome;
                    }
                }
                break outcome;
            };
            info!(?outcome, "Run finished");
            let _ = checkpoints.snapshot(SNAPSHOT_LAST_SUCCESSFUL).await;
            *outcome_slot.lock().await = Some(outcome);
        });

        Ok(())
    }

    /// Signal cancellation; the scheduler terminates invocations within the
    /// grace period and skips everything runnable.
    pub async fn cancel_project(&self, project_id: &str) -> Result<()> {
        let projects = self.projects.lock().await;
        let handle = projects
            .get(project_id)
            .ok_or_else(|| eyre::eyre!("Unknown project: {}", project_id))?;
        handle
            .cancel_tx
            .send(true)
            .map_err(|_| eyre::eyre!("Project {} has no live run to cancel", project_id))?;
        Ok(())
    }

    pub async fn get_project_status(&self, project_id: &str) -> Result<ProjectStatus> {
        let projects = self.projects.lock().await;
        let handle = projects
            .get(project_id)
            .ok_or_else(|| eyre::eyre!("Unknown project: {}", project_id))?;

        let stats = handle.engine.stats().await;
        let status = match &*handle.outcome.lock().await {
            Some(RunOutcome::Completed) => "completed",
            Some(RunOutcome::Failed { .. }) => "failed",
            Some(RunOutcome::Cancelled) => "cancelled",
            None if handle.running => "running",
            None => "created",
        };

        Ok(ProjectStatus {
            project_id: project_id.to_string(),
            status: status.to_string(),
            ready_count: stats.ready,
            in_progress_count: stats.in_progress,
            completed_count: stats.completed,
            failed_count: stats.failed,
            critical_path_remaining: stats.critical_path_remaining,
        })
    }

    /// Snapshot-then-stream subscription: the current graph state plus every
    /// event emitted after this call.
    pub async fn subscribe_events(&self, project_id: &str) -> Result<(GraphExport, broadcast::Receiver<Event>)> {
        let projects = self.projects.lock().await;
        let handle = projects
            .get(project_id)
            .ok_or_else(|| eyre::eyre!("Unknown project: {}", project_id))?;
        Ok((handle.engine.export().await, handle.bus.subscribe()))
    }

    /// Analyzer and build warnings recorded at creation
    pub async fn project_warnings(&self, project_id: &str) -> Result<Vec<String>> {
        let projects = self.projects.lock().await;
        let handle = projects
            .get(project_id)
            .ok_or_else(|| eyre::eyre!("Unknown project: {}", project_id))?;
        Ok(handle.warnings.clone())
    }

    /// Block until the project's run finishes
    pub async fn wait_for_project(&self, project_id: &str) -> Result<RunOutcome> {
        let outcome_slot = {
            let projects = self.projects.lock().await;
            let handle = projects
                .get(project_id)
                .ok_or_else(|| eyre::eyre!("Unknown project: {}", project_id))?;
            if !handle.running {
                bail!("Project {} has not been started", project_id);
            }
            Arc::clone(&handle.outcome)
        };
        loop {
            if let Some(outcome) = outcome_slot.lock().await.clone() {
                return Ok(outcome);
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    }

    /// Cancel everything and sweep for orphan worker processes
    pub async fn shutdown(&self) {
        let projects = self.projects.lock().await;
        for (project_id, handle) in projects.iter() {
            if handle.running && handle.outcome.try_lock().map(|o| o.is_none()).unwrap_or(true) {
                info!(%project_id, "Cancelling project for shutdown");
                let _ = handle.cancel_tx.send(true);
            }
        }
        drop(projects);

        let terminated = emergency_cleanup(&self.config.worker_command).await;
        if terminated > 0 {
            warn!(terminated, "Emergency cleanup terminated orphan workers");
        }
    }
}

/// Keep rolling recovery snapshots in step with the event stream
fn spawn_snapshot_watcher(mut rx: broadcast::Receiver<Event>, checkpoints: CheckpointStore) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    match &event {
                        Event::TaskCompleted { .. } => {
                            let _ = checkpoints.snapshot(SNAPSHOT_LAST_SUCCESSFUL).await;
                        }
                        Event::TaskFailed { .. } | Event::CheckpointFailed { .. } => {
                            let _ = checkpoints.snapshot(SNAPSHOT_BEFORE_ERROR).await;
                        }
                        _ => {}
                    }
                    if event.is_terminal() {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    });
}
