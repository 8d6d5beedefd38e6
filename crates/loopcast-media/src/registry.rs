//! Registry of live backend processes.
//!
//! Owned by the application root and handed to every component that spawns
//! ffmpeg, so shutdown can terminate whatever is still running.

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Handle returned by [`ProcessRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(u64);

#[derive(Debug, Clone)]
struct Entry {
    pid: u32,
    label: &'static str,
}

/// Tracks process ids of running backend invocations.
#[derive(Debug, Default)]
pub struct ProcessRegistry {
    next_id: AtomicU64,
    entries: Mutex<HashMap<RegistrationId, Entry>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a spawned process.
    pub fn register(&self, pid: u32, label: &'static str) -> RegistrationId {
        let id = RegistrationId(self.next_id.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(id, Entry { pid, label });
        }
        debug!(pid, label, "Registered backend process");
        id
    }

    /// Forget a process that has exited.
    pub fn unregister(&self, id: RegistrationId) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.remove(&id);
        }
    }

    /// Number of processes currently tracked.
    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Send SIGTERM to every tracked process and clear the registry.
    ///
    /// Returns the number of processes signalled.
    pub fn terminate_all(&self) -> usize {
        let drained: Vec<Entry> = match self.entries.lock() {
            Ok(mut entries) => entries.drain().map(|(_, e)| e).collect(),
            Err(_) => return 0,
        };

        let mut signalled = 0;
        for entry in drained {
            let Ok(raw) = i32::try_from(entry.pid) else {
                continue;
            };
            match kill(Pid::from_raw(raw), Signal::SIGTERM) {
                Ok(()) => signalled += 1,
                Err(e) => warn!(pid = entry.pid, label = entry.label, "Failed to terminate process: {}", e),
            }
        }
        signalled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_unregister() {
        let registry = ProcessRegistry::new();
        let a = registry.register(1001, "transcode");
        let b = registry.register(1002, "stream");
        assert_ne!(a, b);
        assert_eq!(registry.len(), 2);

        registry.unregister(a);
        assert_eq!(registry.len(), 1);
        registry.unregister(b);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_terminate_all_signals_live_process() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let registry = ProcessRegistry::new();
        registry.register(child.id().unwrap(), "test");

        assert_eq!(registry.terminate_all(), 1);
        assert!(registry.is_empty());

        let status = child.wait().await.unwrap();
        assert!(!status.success());
    }
}
