//! Per-process bookkeeping shared between the supervising task and callers
//! that want to terminate a session from outside.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;
use tokio::sync::Notify;

const RUNNING: u8 = 0;
const TERMINATING: u8 = 1;
const REAPED: u8 = 2;

/// Lifecycle of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotState {
    Running,
    Terminating,
    Reaped,
}

/// Entry in the engine's process table.
///
/// State only moves forward: `Running -> Terminating -> Reaped`, or straight
/// from `Running` to `Reaped` when the process exits on its own.
#[derive(Debug)]
pub struct ProcessSlot {
    pid: Option<u32>,
    state: AtomicU8,
    terminate: Notify,
}

impl ProcessSlot {
    pub fn new(pid: Option<u32>) -> Self {
        Self {
            pid,
            state: AtomicU8::new(RUNNING),
            terminate: Notify::new(),
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> SlotState {
        match self.state.load(Ordering::Acquire) {
            RUNNING => SlotState::Running,
            TERMINATING => SlotState::Terminating,
            _ => SlotState::Reaped,
        }
    }

    /// Move `Running -> Terminating`. Returns `false` if termination was
    /// already underway or the process is gone.
    pub fn begin_termination(&self) -> bool {
        self.state
            .compare_exchange(RUNNING, TERMINATING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Ask the supervising task to terminate the process.
    ///
    /// Only the first request on a running slot has any effect.
    pub fn request_termination(&self) -> bool {
        if self.begin_termination() {
            self.terminate.notify_one();
            true
        } else {
            false
        }
    }

    /// Resolves once [`request_termination`](Self::request_termination) has
    /// been called. A request made before the first poll is not lost.
    pub async fn termination_requested(&self) {
        self.terminate.notified().await;
    }

    pub fn mark_reaped(&self) {
        self.state.store(REAPED, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn termination_is_idempotent() {
        let slot = ProcessSlot::new(Some(1));
        assert_eq!(slot.state(), SlotState::Running);
        assert!(slot.request_termination());
        assert!(!slot.request_termination());
        assert!(!slot.begin_termination());
        assert_eq!(slot.state(), SlotState::Terminating);
    }

    #[test]
    fn reaped_slot_ignores_termination() {
        let slot = ProcessSlot::new(None);
        slot.mark_reaped();
        assert!(!slot.request_termination());
        assert_eq!(slot.state(), SlotState::Reaped);
    }

    #[tokio::test]
    async fn request_before_wait_is_observed() {
        let slot = Arc::new(ProcessSlot::new(Some(7)));
        slot.request_termination();
        tokio::time::timeout(Duration::from_secs(1), slot.termination_requested())
            .await
            .expect("stored notification should wake the waiter");
    }

    #[tokio::test]
    async fn concurrent_requests_signal_once() {
        let slot = Arc::new(ProcessSlot::new(Some(7)));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let slot = slot.clone();
            handles.push(tokio::spawn(async move { slot.request_termination() }));
        }
        let mut wins = 0;
        for h in handles {
            if h.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }
}
