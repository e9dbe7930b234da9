//! Checkpoint store and recovery ladder
//!
//! Snapshots are immutable deep copies of the graph (structure, per-task
//! status, counters, transition-log tail) written atomically under named
//! slots. On a fatal graph error the ladder restores the first snapshot
//! that still validates.

use std::sync::Arc;

use graphstore::{ProjectStore, StoreError};
use tracing::{info, warn};

use crate::graph::{topological_order, GraphEngine, GraphExport};

/// Written right after the graph is built
pub const SNAPSHOT_INITIALIZED: &str = "initialized";

/// Written when the scheduler takes over
pub const SNAPSHOT_EXECUTION_START: &str = "executionStart";

/// Rolling snapshot after every completed task
pub const SNAPSHOT_LAST_SUCCESSFUL: &str = "lastSuccessfulNode";

/// Rolling snapshot taken when a failure is first observed
pub const SNAPSHOT_BEFORE_ERROR: &str = "autoSnapshotBeforeError";

/// Restore preference order
pub const RECOVERY_LADDER: [&str; 4] = [
    SNAPSHOT_LAST_SUCCESSFUL,
    SNAPSHOT_BEFORE_ERROR,
    SNAPSHOT_EXECUTION_START,
    SNAPSHOT_INITIALIZED,
];

/// Snapshot/restore facade over the engine and the project store
#[derive(Clone)]
pub struct CheckpointStore {
    engine: Arc<GraphEngine>,
    store: ProjectStore,
}

impl CheckpointStore {
    pub fn new(engine: Arc<GraphEngine>, store: ProjectStore) -> Self {
        Self { engine, store }
    }

    /// Take a named snapshot of the current graph state; also refreshes
    /// graph.json so external readers see the same state.
    pub async fn snapshot(&self, name: &str) -> Result<(), StoreError> {
        let export = self.engine.export().await;
        self.store.write_checkpoint(name, &export)?;
        self.store.write_graph(&export)?;
        info!(name, tasks = export.nodes.len(), "Snapshot written");
        Ok(())
    }

    /// Walk the ladder; restore and return the first snapshot that
    /// validates. Returns None when nothing on the ladder is usable.
    pub async fn restore_ladder(&self) -> Result<Option<String>, StoreError> {
        for name in RECOVERY_LADDER {
            let Some(export) = self.store.read_checkpoint::<GraphExport>(name)? else {
                continue;
            };
            if !Self::validates(&export) {
                warn!(name, "Snapshot failed validation, trying next rung");
                continue;
            }
            self.engine.restore(export).await;
            info!(name, "Graph restored from snapshot");
            return Ok(Some(name.to_string()));
        }
        warn!("No snapshot on the recovery ladder validates");
        Ok(None)
    }

    /// A usable snapshot has at least one node and an acyclic edge set
    fn validates(export: &GraphExport) -> bool {
        !export.nodes.is_empty() && topological_order(&export.nodes).is_ok()
    }

    /// Read a snapshot without restoring it
    pub fn peek(&self, name: &str) -> Result<Option<GraphExport>, StoreError> {
        self.store.read_checkpoint(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Dependency, Task, TaskStatus};
    use tempfile::tempdir;

    fn task(id: &str) -> Task {
        Task::with_id(id, id).with_duration(10)
    }

    async fn setup() -> (Arc<GraphEngine>, CheckpointStore, tempfile::TempDir) {
        let temp = tempdir().unwrap();
        let engine = Arc::new(GraphEngine::new(100, false));
        engine
            .build("p", vec![task("a"), task("b").with_dependency(Dependency::completion("a"))])
            .await
            .unwrap();
        let store = ProjectStore::open(temp.path()).unwrap();
        let checkpoints = CheckpointStore::new(Arc::clone(&engine), store);
        (engine, checkpoints, temp)
    }

    #[tokio::test]
    async fn test_snapshot_restore_is_exact() {
        let (engine, checkpoints, _temp) = setup().await;

        engine.update_status("a", TaskStatus::InProgress, None).await.unwrap();
        checkpoints.snapshot(SNAPSHOT_LAST_SUCCESSFUL).await.unwrap();
        let before = serde_json::to_vec(&engine.export().await).unwrap();

        // Diverge, then recover
        engine.update_status("a", TaskStatus::Failed, None).await.unwrap();
        let restored = checkpoints.restore_ladder().await.unwrap();
        assert_eq!(restored.as_deref(), Some(SNAPSHOT_LAST_SUCCESSFUL));

        let after = serde_json::to_vec(&engine.export().await).unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_ladder_order() {
        let (_engine, checkpoints, _temp) = setup().await;

        checkpoints.snapshot(SNAPSHOT_EXECUTION_START).await.unwrap();
        checkpoints.snapshot(SNAPSHOT_BEFORE_ERROR).await.unwrap();

        // lastSuccessfulNode absent: the ladder lands on the next rung
        let restored = checkpoints.restore_ladder().await.unwrap();
        assert_eq!(restored.as_deref(), Some(SNAPSHOT_BEFORE_ERROR));
    }

    #[tokio::test]
    async fn test_ladder_skips_invalid_snapshot() {
        let (_engine, checkpoints, temp) = setup().await;
        let store = ProjectStore::open(temp.path()).unwrap();

        // Corrupt rung: a cyclic pair of nodes
        let bad = GraphExport {
            project_id: "p".into(),
            nodes: vec![
                task("x").with_dependency(Dependency::completion("y")),
                task("y").with_dependency(Dependency::completion("x")),
            ],
            invocations_started: 0,
            transition_log: Vec::new(),
            cancelled: false,
        };
        store.write_checkpoint(SNAPSHOT_LAST_SUCCESSFUL, &bad).unwrap();
        checkpoints.snapshot(SNAPSHOT_EXECUTION_START).await.unwrap();

        let restored = checkpoints.restore_ladder().await.unwrap();
        assert_eq!(restored.as_deref(), Some(SNAPSHOT_EXECUTION_START));
    }

    #[tokio::test]
    async fn test_empty_ladder_returns_none() {
        let (_engine, checkpoints, _temp) = setup().await;
        assert!(checkpoints.restore_ladder().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_snapshot_refreshes_graph_json() {
        let (_engine, checkpoints, temp) = setup().await;
        checkpoints.snapshot(SNAPSHOT_INITIALIZED).await.unwrap();

        let store = ProjectStore::open(temp.path()).unwrap();
        let graph: Option<GraphExport> = store.read_graph().unwrap();
        assert_eq!(graph.unwrap().nodes.len(), 2);
    }
}
