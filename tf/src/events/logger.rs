//! Event logger - persists bus events through the project store

use graphstore::ProjectStore;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::types::{Event, EventRecord};

/// How many appends between rotation passes
const ROTATE_EVERY: u64 = 256;

/// Spawn a task that appends every bus event to the project's events.log,
/// rotating periodically to keep the last `keep` entries. The task ends when
/// the bus is dropped or a terminal project event arrives.
pub fn spawn_event_logger(
    mut rx: broadcast::Receiver<Event>,
    store: ProjectStore,
    keep: usize,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut appended: u64 = 0;
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let terminal = event.is_terminal();
                    let record = EventRecord::new(event);
                    if let Err(e) = store.append_event(&record) {
                        warn!(error = %e, "Failed to persist event");
                    }
                    appended += 1;
                    if appended % ROTATE_EVERY == 0 {
                        if let Err(e) = store.rotate_events(keep) {
                            warn!(error = %e, "Failed to rotate event log");
                        }
                    }
                    if terminal {
                        let _ = store.rotate_events(keep);
                        debug!(appended, "Event logger finished after terminal event");
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "Event logger lagged, events lost");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!(appended, "Event bus closed, logger exiting");
                    return;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_logger_persists_events() {
        let temp = tempdir().unwrap();
        let store = ProjectStore::open(temp.path()).unwrap();
        let bus = EventBus::new(64);
        let handle = spawn_event_logger(bus.subscribe(), store.clone(), 100);

        bus.emit(Event::TaskReady { task_id: "t-1".into() });
        bus.emit(Event::ProjectCompleted { project_id: "p".into() });

        // Terminal event ends the logger
        handle.await.unwrap();

        let events = store.read_events().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0]["kind"], "task_ready");
        assert_eq!(events[1]["kind"], "project_completed");
        assert!(events[0].get("ts").is_some());
    }

    #[tokio::test]
    async fn test_logger_exits_on_bus_drop() {
        let temp = tempdir().unwrap();
        let store = ProjectStore::open(temp.path()).unwrap();
        let bus = EventBus::new(64);
        let handle = spawn_event_logger(bus.subscribe(), store, 100);

        drop(bus);
        handle.await.unwrap();
    }
}
