//! Session and emergency cleanup of worker processes

use std::collections::HashMap;
use std::sync::Mutex;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

/// Tracks the OS process behind every live invocation
///
/// The driver registers each spawned child and unregisters it on exit; a
/// shutdown or cancellation sweep terminates whatever is still tracked.
#[derive(Debug, Default)]
pub struct InvocationTracker {
    pids: Mutex<HashMap<String, i32>>,
}

impl InvocationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, invocation_id: &str, pid: i32) {
        debug!(invocation_id, pid, "InvocationTracker::register");
        if let Ok(mut pids) = self.pids.lock() {
            pids.insert(invocation_id.to_string(), pid);
        }
    }

    pub fn unregister(&self, invocation_id: &str) {
        if let Ok(mut pids) = self.pids.lock() {
            pids.remove(invocation_id);
        }
    }

    pub fn tracked_count(&self) -> usize {
        self.pids.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// SIGTERM every tracked invocation; returns how many were signalled
    pub fn terminate_all(&self) -> usize {
        let entries: Vec<(String, i32)> = match self.pids.lock() {
            Ok(mut pids) => pids.drain().collect(),
            Err(_) => return 0,
        };
        let mut terminated = 0;
        for (invocation_id, pid) in entries {
            match kill(Pid::from_raw(pid), Signal::SIGTERM) {
                Ok(()) => {
                    info!(%invocation_id, pid, "Terminated invocation");
                    terminated += 1;
                }
                Err(e) => debug!(%invocation_id, pid, error = %e, "Process already gone"),
            }
        }
        terminated
    }
}

/// Last-resort sweep: enumerate OS processes matching the specialist tool's
/// name and terminate any that escaped tracking. Returns the number
/// signalled.
pub async fn emergency_cleanup(worker_command: &str) -> usize {
    let output = tokio::process::Command::new("pgrep")
        .args(["-f", worker_command])
        .output()
        .await;

    let output = match output {
        Ok(output) => output,
        Err(e) => {
            warn!(error = %e, "pgrep unavailable, skipping emergency cleanup");
            return 0;
        }
    };

    let own_pid = std::process::id() as i32;
    let mut terminated = 0;
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        let Ok(pid) = line.trim().parse::<i32>() else { continue };
        if pid == own_pid {
            continue;
        }
        if kill(Pid::from_raw(pid), Signal::SIGTERM).is_ok() {
            warn!(pid, worker_command, "Emergency cleanup terminated orphan worker");
            terminated += 1;
        }
    }
    terminated
}
