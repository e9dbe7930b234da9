//! Invocation supervision
//!
//! Spawns the specialist subprocess with the composed prompt on stdin,
//! multiplexes its output streams, and enforces the three termination
//! conditions: max runtime, max inactivity, external cancellation.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use regex::Regex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::events::ProjectEvents;

use super::cleanup::InvocationTracker;
use super::output::{OutputCollector, FAILURE_TAIL_LINES};

/// Word set marking a task as complex work, which gets the longer runtime cap
fn complex_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(complete|full|frontend|backend|database|integration|migration|end-to-end)\b").unwrap()
    })
}

/// Which timeout fired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    Runtime,
    Inactivity,
}

impl std::fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutKind::Runtime => write!(f, "runtime"),
            TimeoutKind::Inactivity => write!(f, "inactivity"),
        }
    }
}

/// Why an invocation did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    Timeout(TimeoutKind),
    Exit(i32),
    Spawn(String),
    Cancelled,
}

/// Result of one invocation attempt
#[derive(Debug)]
pub struct InvocationOutcome {
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    /// Progress/task/error lines, in order
    pub important: Vec<String>,
    /// Last categorized lines for diagnostics
    pub tail: Vec<String>,
    /// Last JSON object the worker printed on stdout; forced termination
    /// never yields one.
    pub result_json: Option<Value>,
    pub failure: Option<FailureKind>,
}

impl InvocationOutcome {
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    fn failed(failure: FailureKind, collector: &OutputCollector, duration_ms: u64, exit_code: Option<i32>) -> Self {
        Self {
            exit_code,
            duration_ms,
            important: collector.important(),
            tail: collector.tail(FAILURE_TAIL_LINES),
            result_json: None,
            failure: Some(failure),
        }
    }
}

/// Driver limits, extracted from the main configuration
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub command: String,
    pub args: Vec<String>,
    pub max_runtime: Duration,
    pub max_runtime_complex: Duration,
    pub max_inactivity: Duration,
    pub heartbeat: Duration,
    pub grace: Duration,
}

impl DriverConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            command: config.worker_command.clone(),
            args: config.worker_args.clone(),
            max_runtime: config.invocation_max_runtime(),
            max_runtime_complex: config.invocation_max_runtime_complex(),
            max_inactivity: config.invocation_max_inactivity(),
            heartbeat: config.heartbeat(),
            grace: config.cancellation_grace(),
        }
    }
}

enum StreamLine {
    Out(String),
    Err(String),
}

/// Spawns and supervises specialist subprocesses
pub struct WorkerDriver {
    config: DriverConfig,
    tracker: Arc<InvocationTracker>,
}

impl WorkerDriver {
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            tracker: Arc::new(InvocationTracker::new()),
        }
    }

    pub fn tracker(&self) -> Arc<InvocationTracker> {
        Arc::clone(&self.tracker)
    }

    /// Whether a task description falls under the complex-work runtime cap
    pub fn is_complex(description: &str) -> bool {
        complex_pattern().is_match(description)
    }

    /// Run one invocation to completion or termination
    pub async fn invoke(
        &self,
        invocation_id: &str,
        task_id: &str,
        worker_id: &str,
        prompt: &str,
        complex: bool,
        mut cancel: watch::Receiver<bool>,
        events: &ProjectEvents,
    ) -> InvocationOutcome {
        let started = Instant::now();
        let mut collector = OutputCollector::new();

        let max_runtime = if complex {
            self.config.max_runtime_complex
        } else {
            self.config.max_runtime
        };
        debug!(invocation_id, task_id, worker_id, complex, ?max_runtime, "WorkerDriver::invoke");

        let mut child = match tokio::process::Command::new(&self.config.command)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                warn!(invocation_id, command = %self.config.command, error = %e, "Failed to spawn worker");
                return InvocationOutcome::failed(FailureKind::Spawn(e.to_string()), &collector, 0, None);
            }
        };

        if let Some(pid) = child.id() {
            self.tracker.register(invocation_id, pid as i32);
        }

        let (line_tx, mut line_rx) = mpsc::channel::<StreamLine>(256);
        if let Some(stdout) = child.stdout.take() {
            let tx = line_tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(StreamLine::Out(line)).await.is_err() {
                        break;
                    }
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let tx = line_tx.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx.send(StreamLine::Err(line)).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(line_tx);

        // Feed the prompt concurrently with output draining; writing first
        // could deadlock against a worker that floods its pipes before
        // reading stdin. Dropping the handle closes the stream for EOF.
        if let Some(mut stdin) = child.stdin.take() {
            let prompt = prompt.to_string();
            let id = invocation_id.to_string();
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    debug!(invocation_id = %id, error = %e, "Failed writing prompt to worker stdin");
                }
            });
        }

        let runtime_deadline = started + max_runtime;
        let mut last_activity = Instant::now();
        let mut heartbeat = tokio::time::interval(self.config.heartbeat);
        heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        heartbeat.tick().await; // the immediate first tick

        let failure = loop {
            let inactivity_deadline = last_activity + self.config.max_inactivity;
            tokio::select! {
                maybe_line = line_rx.recv() => match maybe_line {
                    Some(line) => {
                        last_activity = Instant::now();
                        let (text, is_stderr) = match &line {
                            StreamLine::Out(text) => (text.as_str(), false),
                            StreamLine::Err(text) => (text.as_str(), true),
                        };
                        let category = collector.push(text, is_stderr);
                        if category.is_important() {
                            events.task_progress(task_id, text);
                        }
                    }
                    // Both streams closed: the worker is finishing
                    None => break None,
                },
                _ = tokio::time::sleep_until(runtime_deadline) => {
                    warn!(invocation_id, task_id, "Max runtime exceeded");
                    break Some(FailureKind::Timeout(TimeoutKind::Runtime));
                }
                _ = tokio::time::sleep_until(inactivity_deadline) => {
                    warn!(invocation_id, task_id, "Max inactivity exceeded");
                    break Some(FailureKind::Timeout(TimeoutKind::Inactivity));
                }
                _ = heartbeat.tick() => {
                    events.worker_heartbeat(task_id, worker_id, started.elapsed().as_millis() as u64);
                }
                changed = cancel.changed() => {
                    if changed.is_err() || *cancel.borrow() {
                        info!(invocation_id, task_id, "Invocation cancelled");
                        break Some(FailureKind::Cancelled);
                    }
                }
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;

        if let Some(failure) = failure {
            self.terminate(&mut child).await;
            self.tracker.unregister(invocation_id);
            return InvocationOutcome::failed(failure, &collector, duration_ms, None);
        }

        // Output ended; collect the exit status
        let status = tokio::time::timeout(self.config.grace, child.wait()).await;
        self.tracker.unregister(invocation_id);
        let exit_code = match status {
            Ok(Ok(status)) => status.code(),
            Ok(Err(e)) => {
                warn!(invocation_id, error = %e, "Failed to reap worker");
                None
            }
            Err(_) => {
                warn!(invocation_id, "Worker closed its streams but did not exit, killing");
                let _ = child.kill().await;
                None
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        match exit_code {
            Some(0) => {
                debug!(invocation_id, task_id, duration_ms, "Invocation succeeded");
                InvocationOutcome {
                    exit_code,
                    duration_ms,
                    important: collector.important(),
                    tail: collector.tail(FAILURE_TAIL_LINES),
                    result_json: collector.last_json().cloned(),
                    failure: None,
                }
            }
            code => {
                info!(invocation_id, task_id, ?code, "Invocation failed");
                let mut outcome = InvocationOutcome::failed(
                    FailureKind::Exit(code.unwrap_or(-1)),
                    &collector,
                    duration_ms,
                    code,
                );
                // A clean nonzero exit still carries a parseable verdict;
                // checkpoint workers report failed reviews this way.
                outcome.result_json = collector.last_json().cloned();
                outcome
            }
        }
    }

    /// SIGTERM, wait out the grace period, then SIGKILL
    async fn terminate(&self, child: &mut tokio::process::Child) {
        if let Some(pid) = child.id() {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
            if tokio::time::timeout(self.config.grace, child.wait()).await.is_ok() {
                return;
            }
            warn!(pid, "Worker survived SIGTERM, killing");
        }
        let _ = child.kill().await;
    }

    /// Terminate every tracked invocation; used on shutdown and cancellation
    pub fn cleanup_session(&self) -> usize {
        self.tracker.terminate_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;

    fn driver(script: &str, max_runtime_ms: u64, max_inactivity_ms: u64) -> WorkerDriver {
        WorkerDriver::new(DriverConfig {
            command: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            max_runtime: Duration::from_millis(max_runtime_ms),
            max_runtime_complex: Duration::from_millis(max_runtime_ms * 2),
            max_inactivity: Duration::from_millis(max_inactivity_ms),
            heartbeat: Duration::from_millis(50),
            grace: Duration::from_millis(500),
        })
    }

    fn cancel_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(false)
    }

    async fn run(driver: &WorkerDriver, cancel: watch::Receiver<bool>) -> (InvocationOutcome, EventBus) {
        let bus = EventBus::new(1024);
        let events = bus.emitter_for("p");
        let outcome = driver
            .invoke("inv-1", "t-1", "w-1", "the prompt", false, cancel, &events)
            .await;
        (outcome, bus)
    }

    #[tokio::test]
    async fn test_successful_invocation_reads_prompt() {
        // The worker echoes its stdin back; prompt round-trips
        let driver = driver("cat", 5_000, 5_000);
        let (_tx, cancel) = cancel_channel();
        let (outcome, _) = run(&driver, cancel).await;

        assert!(outcome.succeeded());
        assert_eq!(outcome.exit_code, Some(0));
        assert!(outcome.tail.iter().any(|l| l.contains("the prompt")));
    }

    #[tokio::test]
    async fn test_result_json_captured() {
        let driver = driver(
            r#"cat > /dev/null; echo working; echo '{"passed": true, "qualityScore": 0.9}'"#,
            5_000,
            5_000,
        );
        let (_tx, cancel) = cancel_channel();
        let (outcome, _) = run(&driver, cancel).await;

        assert!(outcome.succeeded());
        let json = outcome.result_json.unwrap();
        assert_eq!(json["passed"], true);
    }

    #[tokio::test]
    async fn test_nonzero_exit_reports_failure_with_verdict() {
        let driver = driver(
            r#"cat > /dev/null; echo '{"passed": false, "qualityScore": 0.3}'; exit 3"#,
            5_000,
            5_000,
        );
        let (_tx, cancel) = cancel_channel();
        let (outcome, _) = run(&driver, cancel).await;

        assert!(!outcome.succeeded());
        assert_eq!(outcome.failure, Some(FailureKind::Exit(3)));
        assert_eq!(outcome.exit_code, Some(3));
        // Verdict survives a clean nonzero exit
        assert_eq!(outcome.result_json.unwrap()["passed"], false);
    }

    #[tokio::test]
    async fn test_runtime_timeout() {
        let driver = driver("cat > /dev/null; while true; do echo tick; sleep 0.05; done", 400, 5_000);
        let (_tx, cancel) = cancel_channel();
        let (outcome, _) = run(&driver, cancel).await;

        assert_eq!(outcome.failure, Some(FailureKind::Timeout(TimeoutKind::Runtime)));
        // Forced termination produces no result payload
        assert!(outcome.result_json.is_none());
    }

    #[tokio::test]
    async fn test_inactivity_timeout() {
        let driver = driver("cat > /dev/null; echo started; sleep 30", 10_000, 300);
        let (_tx, cancel) = cancel_channel();
        let (outcome, _) = run(&driver, cancel).await;

        assert_eq!(outcome.failure, Some(FailureKind::Timeout(TimeoutKind::Inactivity)));
        assert!(outcome.tail.iter().any(|l| l.contains("started")));
    }

    #[tokio::test]
    async fn test_cancellation_terminates() {
        let driver = driver("cat > /dev/null; sleep 30", 60_000, 60_000);
        let (tx, cancel) = cancel_channel();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            let _ = tx.send(true);
        });
        let (outcome, _) = run(&driver, cancel).await;
        assert_eq!(outcome.failure, Some(FailureKind::Cancelled));
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let driver = WorkerDriver::new(DriverConfig {
            command: "/nonexistent/specialist-tool".to_string(),
            args: vec![],
            max_runtime: Duration::from_secs(1),
            max_runtime_complex: Duration::from_secs(2),
            max_inactivity: Duration::from_secs(1),
            heartbeat: Duration::from_secs(1),
            grace: Duration::from_millis(100),
        });
        let (_tx, cancel) = cancel_channel();
        let (outcome, _) = run(&driver, cancel).await;
        assert!(matches!(outcome.failure, Some(FailureKind::Spawn(_))));
    }

    #[tokio::test]
    async fn test_progress_events_emitted() {
        let driver = driver("cat > /dev/null; echo 'working on step 1'; echo 'plain chatter'", 5_000, 5_000);
        let bus = EventBus::new(1024);
        let mut rx = bus.subscribe();
        let events = bus.emitter_for("p");
        let (_tx, cancel) = cancel_channel();

        let outcome = driver
            .invoke("inv-1", "t-1", "w-1", "prompt", false, cancel, &events)
            .await;
        assert!(outcome.succeeded());

        let mut progress_lines = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let crate::events::Event::TaskProgress { line, .. } = event {
                progress_lines.push(line);
            }
        }
        // Important line surfaced, debug chatter not
        assert!(progress_lines.iter().any(|l| l.contains("step 1")));
        assert!(!progress_lines.iter().any(|l| l.contains("chatter")));
    }

    #[tokio::test]
    async fn test_heartbeat_events() {
        let driver = driver("cat > /dev/null; sleep 0.4; echo done", 5_000, 5_000);
        let bus = EventBus::new(1024);
        let mut rx = bus.subscribe();
        let events = bus.emitter_for("p");
        let (_tx, cancel) = cancel_channel();

        driver.invoke("inv-1", "t-1", "w-1", "prompt", false, cancel, &events).await;

        let mut heartbeats = 0;
        while let Ok(event) = rx.try_recv() {
            if event.kind() == "worker_heartbeat" {
                heartbeats += 1;
            }
        }
        assert!(heartbeats >= 2, "expected heartbeats at 50ms interval, got {}", heartbeats);
    }

    #[test]
    fn test_complex_word_set() {
        assert!(WorkerDriver::is_complex("Build the complete backend service"));
        assert!(WorkerDriver::is_complex("full database migration"));
        assert!(!WorkerDriver::is_complex("fix a typo in the readme"));
    }

    #[test]
    fn test_driver_config_from_config() {
        let config = Config::default();
        let driver_config = DriverConfig::from_config(&config);
        assert_eq!(driver_config.max_runtime, Duration::from_secs(600));
        assert_eq!(driver_config.max_runtime_complex, Duration::from_secs(1_200));
        assert_eq!(driver_config.max_inactivity, Duration::from_secs(180));
        assert_eq!(driver_config.heartbeat, Duration::from_secs(30));
    }
}
