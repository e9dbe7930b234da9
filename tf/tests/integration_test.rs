//! End-to-end tests for the orchestration core
//!
//! These drive the full stack - rule-based analyzer, gate injection, graph
//! engine, scheduler, subprocess driver - against shell one-liners standing
//! in for the specialist tool.

use std::sync::Arc;
use std::time::Duration;

use taskforge::config::Config;
use taskforge::domain::{Request, TaskStatus};
use taskforge::events::Event;
use taskforge::orchestrator::Orchestrator;
use taskforge::scheduler::RunOutcome;
use taskforge::RuleBasedPlanner;
use tempfile::tempdir;

const PASS_WORKER: &str = r#"cat > /dev/null; echo working; echo '{"passed": true, "qualityScore": 0.95}'"#;

fn config_with_worker(script: &str) -> Arc<Config> {
    let temp = tempdir().expect("tempdir");
    Arc::new(Config {
        data_dir: Some(temp.keep()),
        worker_command: "sh".to_string(),
        worker_args: vec!["-c".to_string(), script.to_string()],
        tick_interval_ms: 20,
        cancellation_grace_ms: 1_000,
        ..Config::default()
    })
}

fn orchestrator(config: &Arc<Config>) -> Orchestrator {
    Orchestrator::new(Arc::clone(config), Arc::new(RuleBasedPlanner::new()))
}

async fn run_to_outcome(orchestrator: &Orchestrator, project_id: &str) -> RunOutcome {
    orchestrator.start_project(project_id).await.expect("start");
    tokio::time::timeout(Duration::from_secs(60), orchestrator.wait_for_project(project_id))
        .await
        .expect("run should finish in time")
        .expect("wait")
}

#[tokio::test]
async fn test_full_run_completes_with_gates() {
    let config = config_with_worker(PASS_WORKER);
    let orchestrator = orchestrator(&config);

    let project_id = orchestrator
        .create_project(Request::new("employee onboarding portal"))
        .await
        .expect("create");

    let outcome = run_to_outcome(&orchestrator, &project_id).await;
    assert_eq!(outcome, RunOutcome::Completed);

    let status = orchestrator.get_project_status(&project_id).await.unwrap();
    assert_eq!(status.status, "completed");
    assert_eq!(status.failed_count, 0);
    assert_eq!(status.critical_path_remaining, 0);
}

#[tokio::test]
async fn test_gates_complete_before_dependents_start() {
    // Every original dependent must wait for its predecessor's review and
    // QA checkpoints, not just the predecessor itself.
    let config = config_with_worker(PASS_WORKER);
    let orchestrator = orchestrator(&config);

    let project_id = orchestrator
        .create_project(Request::new("employee onboarding portal"))
        .await
        .expect("create");
    let outcome = run_to_outcome(&orchestrator, &project_id).await;
    assert_eq!(outcome, RunOutcome::Completed);

    let (snapshot, _) = orchestrator.subscribe_events(&project_id).await.unwrap();
    let by_id = |id: &str| snapshot.nodes.iter().find(|t| t.id == id).unwrap();

    for task in snapshot.nodes.iter().filter(|t| t.is_standard()) {
        let review = by_id(&format!("{}-review", task.id));
        let qa = by_id(&format!("{}-qa", task.id));
        assert_eq!(review.status, TaskStatus::Completed);
        assert_eq!(qa.status, TaskStatus::Completed);

        // Any standard task depending on this one (through its QA gate)
        // started only after the QA gate completed.
        let qa_done = qa.completed_at.expect("qa completion time");
        for dependent in snapshot.nodes.iter().filter(|t| t.is_standard()) {
            if dependent.depends_on(&qa.id) {
                let started = dependent.started_at.expect("dependent start time");
                assert!(
                    started >= qa_done,
                    "{} started before {} completed",
                    dependent.id,
                    qa.id
                );
            }
        }
    }
}

#[tokio::test]
async fn test_rework_cycle_recovers() {
    // The code review for the database task rejects the first attempt and
    // accepts the second; the run still completes and the attempt counter
    // records one rework cycle.
    let state = tempdir().expect("state dir");
    let marker = state.path().join("rejected-once");
    let script = format!(
        r#"input=$(cat)
case "$input" in
  *"Code review: Implement hr-store"*)
    if [ ! -f {marker} ]; then
      touch {marker}
      echo '{{"passed": false, "qualityScore": 0.5, "findings": [{{"severity": "medium", "message": "missing index"}}]}}'
    else
      echo '{{"passed": true, "qualityScore": 0.92}}'
    fi ;;
  *)
    echo '{{"passed": true, "qualityScore": 0.95}}' ;;
esac"#,
        marker = marker.display()
    );
    let config = config_with_worker(&script);
    let orchestrator = orchestrator(&config);

    let project_id = orchestrator
        .create_project(Request::new("employee onboarding portal"))
        .await
        .expect("create");

    let (_, mut events) = orchestrator.subscribe_events(&project_id).await.unwrap();
    let outcome = run_to_outcome(&orchestrator, &project_id).await;
    assert_eq!(outcome, RunOutcome::Completed);

    let (snapshot, _) = orchestrator.subscribe_events(&project_id).await.unwrap();
    let db_task = snapshot
        .nodes
        .iter()
        .find(|t| t.id == "task-hr-database")
        .expect("database task");
    assert_eq!(db_task.status, TaskStatus::Completed);
    assert_eq!(db_task.attempt_count, 1);
    assert!(db_task.description.contains("missing index"));

    let mut saw_rework = false;
    let mut saw_checkpoint_failed = false;
    while let Ok(event) = events.try_recv() {
        match event {
            Event::ReworkRequested { task_id, attempt, .. } => {
                assert_eq!(task_id, "task-hr-database");
                assert_eq!(attempt, 1);
                saw_rework = true;
            }
            Event::CheckpointFailed { .. } => saw_checkpoint_failed = true,
            _ => {}
        }
    }
    assert!(saw_rework, "expected a rework_requested event");
    assert!(saw_checkpoint_failed, "expected a checkpoint_failed event");
}

#[tokio::test]
async fn test_cancellation_mid_run() {
    // Workers hang; cancelling must terminate them, skip the remaining
    // graph and emit exactly one project_cancelled event.
    let config = config_with_worker("cat > /dev/null; sleep 60");
    let orchestrator = orchestrator(&config);

    let project_id = orchestrator
        .create_project(Request::new("invoice tracker api only"))
        .await
        .expect("create");
    let (_, mut events) = orchestrator.subscribe_events(&project_id).await.unwrap();

    orchestrator.start_project(&project_id).await.expect("start");
    tokio::time::sleep(Duration::from_millis(500)).await;
    orchestrator.cancel_project(&project_id).await.expect("cancel");

    let outcome = tokio::time::timeout(Duration::from_secs(15), orchestrator.wait_for_project(&project_id))
        .await
        .expect("cancellation should finish within the grace period")
        .expect("wait");
    assert_eq!(outcome, RunOutcome::Cancelled);

    let (snapshot, _) = orchestrator.subscribe_events(&project_id).await.unwrap();
    assert!(
        snapshot
            .nodes
            .iter()
            .all(|t| matches!(t.status, TaskStatus::Skipped)),
        "every task should be skipped after cancellation"
    );

    let mut cancelled = 0;
    let mut completed_tasks = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            Event::ProjectCancelled { .. } => cancelled += 1,
            Event::TaskCompleted { .. } => completed_tasks += 1,
            _ => {}
        }
    }
    assert_eq!(cancelled, 1);
    assert_eq!(completed_tasks, 0, "no task may complete during cancellation");
}

#[tokio::test]
async fn test_loop_detection_aborts_run() {
    // Reviews never pass: the rework loop spins until the invocation cap
    // trips loop detection.
    let always_fail = r#"input=$(cat)
case "$input" in
  *"Code review"*) echo '{"passed": false, "qualityScore": 0.2}' ;;
  *) echo '{"passed": true, "qualityScore": 0.95}' ;;
esac"#;
    let temp = tempdir().expect("tempdir");
    let config = Arc::new(Config {
        data_dir: Some(temp.keep()),
        worker_command: "sh".to_string(),
        worker_args: vec!["-c".to_string(), always_fail.to_string()],
        global_max_invocations: 6,
        tick_interval_ms: 20,
        ..Config::default()
    });
    let orchestrator = orchestrator(&config);

    let project_id = orchestrator
        .create_project(Request::new("invoice tracker api only"))
        .await
        .expect("create");

    let outcome = run_to_outcome(&orchestrator, &project_id).await;
    match outcome {
        RunOutcome::Failed { error, .. } => {
            assert_eq!(error, taskforge::ErrorKind::LoopDetected)
        }
        other => panic!("expected loop detection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_event_log_persisted() {
    let config = config_with_worker(PASS_WORKER);
    let orchestrator = orchestrator(&config);

    let project_id = orchestrator
        .create_project(Request::new("helpdesk triage api only"))
        .await
        .expect("create");
    let outcome = run_to_outcome(&orchestrator, &project_id).await;
    assert_eq!(outcome, RunOutcome::Completed);

    // The event logger persists through the project store; the terminal
    // event flushes the log.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let store = graphstore::ProjectStore::open(config.project_dir(&project_id)).unwrap();
    let events = store.read_events().unwrap();
    assert!(!events.is_empty());
    let kinds: Vec<&str> = events.iter().filter_map(|e| e["kind"].as_str()).collect();
    assert!(kinds.contains(&"task_started"));
    assert!(kinds.contains(&"checkpoint_completed"));
    assert_eq!(*kinds.last().unwrap(), "project_completed");
}

#[tokio::test]
async fn test_snapshots_written_during_run() {
    let config = config_with_worker(PASS_WORKER);
    let orchestrator = orchestrator(&config);

    let project_id = orchestrator
        .create_project(Request::new("helpdesk triage api only"))
        .await
        .expect("create");
    let outcome = run_to_outcome(&orchestrator, &project_id).await;
    assert_eq!(outcome, RunOutcome::Completed);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let store = graphstore::ProjectStore::open(config.project_dir(&project_id)).unwrap();
    let names = store.list_checkpoints().unwrap();
    assert!(names.contains(&"initialized".to_string()));
    assert!(names.contains(&"executionStart".to_string()));
    assert!(names.contains(&"lastSuccessfulNode".to_string()));
}
