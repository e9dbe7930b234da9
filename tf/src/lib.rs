//! TaskForge - task orchestration core for a multi-agent development system
//!
//! TaskForge turns a natural-language project request into a dependency
//! graph of executable tasks, assigns each task to the best-matching
//! specialist worker, drives the graph to completion under concurrency and
//! failure, and enforces review/QA quality gates between tasks.
//!
//! # Core flow
//!
//! - **Analyze**: [`analyzer`] distills the request into a blueprint and a
//!   task list through the [`llm`] adapter, falling back to a rule-based
//!   planner when the service is unreachable
//! - **Gate**: [`gates`] injects code-review and QA checkpoints behind every
//!   development task
//! - **Graph**: [`graph`] owns nodes, inferred edges, the critical path and
//!   every status transition
//! - **Execute**: [`scheduler`] assigns ready tasks to [`registry`] workers
//!   and supervises external specialist processes through [`driver`]
//! - **Observe & recover**: [`events`] streams the run; [`recovery`] keeps
//!   named snapshots for the restore ladder

pub mod analyzer;
pub mod cli;
pub mod config;
pub mod domain;
pub mod driver;
pub mod events;
pub mod gates;
pub mod graph;
pub mod llm;
pub mod orchestrator;
pub mod recovery;
pub mod registry;
pub mod sanitize;
pub mod scheduler;

// Re-export commonly used types
pub use analyzer::{RequirementsAnalyzer, RuleBasedPlanner};
pub use config::{Config, LlmConfig};
pub use domain::{
    AnalyzedProject, Analysis, Assignment, Blueprint, Capability, CheckpointKind, DataItem, Dependency, EdgeKind,
    ExperienceLevel, IntegrationContracts, Priority, Request, Task, TaskKind, TaskStatus, Worker, WorkerRole,
};
pub use driver::{DriverConfig, InvocationOutcome, PromptBuilder, WorkerDriver};
pub use events::{Event, EventBus, EventRecord, ErrorKind, ProjectEvents};
pub use gates::{CheckpointVerdict, Finding, QualityGates, Severity};
pub use graph::{GraphEngine, GraphError, GraphExport, GraphStats, ReadyTask};
pub use llm::{create_adapter, CachedAdapter, HttpAdapter, LlmAdapter, LlmError};
pub use orchestrator::{Orchestrator, ProjectStatus};
pub use recovery::{CheckpointStore, RECOVERY_LADDER};
pub use registry::{RegistryError, Selection, WorkerRegistry};
pub use sanitize::{PromptTooLarge, Sanitizer, SizeCheck};
pub use scheduler::{RunOutcome, Scheduler};
