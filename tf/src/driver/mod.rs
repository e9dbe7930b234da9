//! Worker driver
//!
//! Invokes the external specialist command-line tool for one task at a time:
//! composes the size-validated prompt, feeds it on stdin, streams and
//! categorizes stdout/stderr, enforces runtime and inactivity timeouts, and
//! emits heartbeats. On shutdown the tracker terminates every live child,
//! and an emergency sweep catches orphans by process name.

mod cleanup;
mod invocation;
mod output;
mod prompt;

pub use cleanup::{emergency_cleanup, InvocationTracker};
pub use invocation::{DriverConfig, FailureKind, InvocationOutcome, TimeoutKind, WorkerDriver};
pub use output::{categorize, LineCategory, OutputCollector};
pub use prompt::PromptBuilder;
