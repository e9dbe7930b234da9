//! GraphStore - per-project persistent state for the orchestrator
//!
//! Each project owns one directory:
//!
//! - `graph.json` - the exported task graph (nodes + edges + status)
//! - `events.log` - append-only JSONL event log, rotated to a tail
//! - `checkpoints/<name>.json` - named recovery snapshots
//!
//! Every write is atomic per file: content goes to a temp file in the same
//! directory, then a rename replaces the target. Readers never observe a
//! partially written file.

mod store;

pub use store::{ProjectStore, StoreError, CHECKPOINTS_DIR, EVENTS_FILE, GRAPH_FILE};

/// Current time as Unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
