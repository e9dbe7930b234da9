//! Configuration types and loading
//!
//! All limits and thresholds of the orchestration core in one place,
//! YAML-loadable with per-field defaults so a partial file works.

use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result, bail};
use serde::{Deserialize, Serialize};

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct Config {
    /// Hard cap on worker invocations per run; breach aborts with LoopDetected
    pub global_max_invocations: u32,

    /// Default per-worker concurrency cap (workers may declare their own)
    pub per_worker_max_concurrent: u32,

    /// Hard ceiling for any outbound prompt, in bytes
    pub prompt_max_bytes: usize,

    /// Per-field cap applied by the sanitizer, in characters
    pub description_max_chars: usize,

    /// Max runtime per invocation
    pub invocation_max_runtime_ms: u64,

    /// Max runtime for tasks matching the complex-work word set
    pub invocation_max_runtime_complex_ms: u64,

    /// Max silence on stdout/stderr before the invocation is killed
    pub invocation_max_inactivity_ms: u64,

    /// Heartbeat event interval while an invocation runs
    pub heartbeat_ms: u64,

    /// Bounded rework: max failed-checkpoint cycles per task
    pub max_rework_attempts: u32,

    /// Code-review checkpoint pass threshold
    pub review_pass_threshold: f64,

    /// QA-test checkpoint pass threshold
    pub qa_pass_threshold: f64,

    /// Cap on graph-rebuild retries during recovery
    pub recursion_depth_cap: u32,

    /// Below this assignment confidence the scheduler may pause for override
    pub assignment_confidence_threshold: f64,

    /// When true, a low-confidence assignment fails the task instead of
    /// proceeding with the best candidate
    pub pause_on_low_confidence: bool,

    /// LLM response cache TTL in seconds
    pub cache_ttl_seconds: u64,

    /// Grace period between SIGTERM and SIGKILL on cancellation
    pub cancellation_grace_ms: u64,

    /// Treat an unsatisfied consumer contract as fatal at build time
    pub strict_contracts: bool,

    /// Scheduler wake interval when no transition arrives
    pub tick_interval_ms: u64,

    /// Event log entries kept after rotation
    pub event_log_keep: usize,

    /// Retries for transient worker exit failures before a task fails
    pub worker_max_retries: u32,

    /// External specialist command
    pub worker_command: String,

    /// Extra arguments passed to the specialist command
    pub worker_args: Vec<String>,

    /// Root directory for per-project state; defaults to the platform data dir
    pub data_dir: Option<PathBuf>,

    /// Log level when not overridden on the CLI
    pub log_level: Option<String>,

    pub llm: LlmConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            global_max_invocations: 100,
            per_worker_max_concurrent: 5,
            prompt_max_bytes: 100_000,
            description_max_chars: 2_000,
            invocation_max_runtime_ms: 600_000,
            invocation_max_runtime_complex_ms: 1_200_000,
            invocation_max_inactivity_ms: 180_000,
            heartbeat_ms: 30_000,
            max_rework_attempts: 5,
            review_pass_threshold: 0.85,
            qa_pass_threshold: 0.90,
            recursion_depth_cap: 10,
            assignment_confidence_threshold: 0.7,
            pause_on_low_confidence: false,
            cache_ttl_seconds: 1_800,
            cancellation_grace_ms: 5_000,
            strict_contracts: false,
            tick_interval_ms: 500,
            event_log_keep: 1_000,
            worker_max_retries: 2,
            worker_command: "specialist".to_string(),
            worker_args: Vec::new(),
            data_dir: None,
            log_level: None,
            llm: LlmConfig::default(),
        }
    }
}

impl Config {
    /// Load from a YAML file; missing keys take defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .wrap_err_with(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot work
    pub fn validate(&self) -> Result<()> {
        if self.global_max_invocations == 0 {
            bail!("global_max_invocations must be at least 1");
        }
        if self.per_worker_max_concurrent == 0 {
            bail!("per_worker_max_concurrent must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.review_pass_threshold)
            || !(0.0..=1.0).contains(&self.qa_pass_threshold)
            || !(0.0..=1.0).contains(&self.assignment_confidence_threshold)
        {
            bail!("thresholds must be within [0, 1]");
        }
        if self.cancellation_grace_ms > self.invocation_max_runtime_ms {
            bail!("cancellation_grace_ms must not exceed invocation_max_runtime_ms");
        }
        if self.prompt_max_bytes == 0 || self.description_max_chars == 0 {
            bail!("prompt and description caps must be nonzero");
        }
        Ok(())
    }

    /// Per-project state directory under the configured data root
    pub fn project_dir(&self, project_id: &str) -> PathBuf {
        let root = self.data_dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("taskforge")
        });
        root.join(project_id)
    }

    pub fn invocation_max_runtime(&self) -> Duration {
        Duration::from_millis(self.invocation_max_runtime_ms)
    }

    pub fn invocation_max_runtime_complex(&self) -> Duration {
        Duration::from_millis(self.invocation_max_runtime_complex_ms)
    }

    pub fn invocation_max_inactivity(&self) -> Duration {
        Duration::from_millis(self.invocation_max_inactivity_ms)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }

    pub fn cancellation_grace(&self) -> Duration {
        Duration::from_millis(self.cancellation_grace_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

/// LLM adapter transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct LlmConfig {
    /// HTTP endpoint accepting the typed {kind, payload} request
    pub endpoint: String,

    /// Environment variable holding the API key
    pub api_key_env: String,

    /// Request timeout
    pub timeout_ms: u64,

    /// Retries on schema violations and transient failures
    pub max_retries: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8700/v1/analyze".to_string(),
            api_key_env: "TASKFORGE_LLM_KEY".to_string(),
            timeout_ms: 60_000,
            max_retries: 3,
        }
    }
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}
