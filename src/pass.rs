//! Single-writer gate: at most one pass mutates the catalog at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PassError {
    /// Another pass holds the gate. Requests are rejected, not queued.
    #[error("another pass is already running")]
    AlreadyRunning,
}

#[derive(Clone, Debug, Default)]
pub struct PassGate {
    running: Arc<AtomicBool>,
}

impl PassGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the gate busy until the returned guard is dropped.
    pub fn try_acquire(&self) -> Result<PassGuard, PassError> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| PassError::AlreadyRunning)?;
        Ok(PassGuard {
            running: self.running.clone(),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Releases the gate on drop.
#[derive(Debug)]
pub struct PassGuard {
    running: Arc<AtomicBool>,
}

impl Drop for PassGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_is_rejected_until_release() {
        let gate = PassGate::new();
        let guard = gate.try_acquire().unwrap();
        assert!(gate.is_running());
        assert_eq!(gate.clone().try_acquire().unwrap_err(), PassError::AlreadyRunning);

        drop(guard);
        assert!(!gate.is_running());
        assert!(gate.try_acquire().is_ok());
    }

    #[tokio::test]
    async fn guard_can_move_into_a_task() {
        let gate = PassGate::new();
        let guard = gate.try_acquire().unwrap();
        let handle = tokio::spawn(async move {
            let _guard = guard;
        });
        handle.await.unwrap();
        assert!(!gate.is_running());
    }
}
