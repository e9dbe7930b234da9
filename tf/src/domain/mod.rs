//! Domain types for the orchestration core
//!
//! Core types: Task (graph node), Blueprint (analyzed plan), Worker
//! (specialist catalog entry), Assignment, Invocation.
//!
//! Persisted JSON field names are part of the recovery contract and use the
//! camelCase renames declared on each type.

mod blueprint;
mod id;
mod task;
mod worker;

pub use blueprint::{AnalyzedProject, Analysis, Blueprint, Component, Request, RequestContext};
pub use id::generate_id;
pub use task::{
    CheckpointKind, DataItem, Dependency, EdgeKind, IntegrationContracts, Priority, Task, TaskKind, TaskStatus,
};
pub use worker::{
    Assignment, Capability, ExperienceLevel, Invocation, InvocationStatus, PerformanceStats, RankedWorker, Worker,
    WorkerRole,
};
