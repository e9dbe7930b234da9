//! Task graph engine
//!
//! The authoritative store of the dependency graph and the only component
//! allowed to mutate task status. Edges exist in four flavors (completion,
//! data, integration, schema); the data/integration/schema ones are inferred
//! at build time from declared inputs/outputs and contracts.

mod build;
mod engine;

pub use build::{infer_edges, mark_critical_path, topological_order};
pub use engine::{
    DependencyOutput, GraphEngine, GraphError, GraphExport, GraphStats, ReadyTask, ReworkOutcome, TransitionRecord,
    UpdateOutcome, EVENT_RING_CAP,
};
