//! Lifecycle event streaming
//!
//! Components emit events to a broadcast bus; consumers (CLI, event logger,
//! subscribers joined via the orchestrator) receive them in emission order
//! per task. The `kind` strings are a wire contract - observers depend on
//! the exact set.

mod bus;
mod logger;
mod types;

pub use bus::{create_event_bus, EventBus, ProjectEvents, DEFAULT_CHANNEL_CAPACITY};
pub use logger::spawn_event_logger;
pub use types::{ErrorKind, Event, EventRecord};
