//! Blocking approve/reject handoff between a worker and the UI

use std::sync::{Condvar, Mutex};
use std::time::Duration;

use tracing::debug;

const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalOutcome {
    Approved,
    Rejected,
    Cancelled,
}

#[derive(Default)]
struct GateState {
    decision: Option<bool>,
    cancel_requested: bool,
}

/// A worker parks in [`wait`](Self::wait) until the UI approves, rejects,
/// or cancels. There is no timeout.
#[derive(Default)]
pub struct ApprovalGate {
    state: Mutex<GateState>,
    signal: Condvar,
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn approve(&self) {
        self.decide(true);
    }

    pub fn reject(&self) {
        self.decide(false);
    }

    fn decide(&self, approved: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.decision = Some(approved);
        }
        self.signal.notify_all();
    }

    pub fn cancel(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.cancel_requested = true;
        }
        self.signal.notify_all();
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.state.lock().map(|s| s.cancel_requested).unwrap_or(false)
    }

    /// Clear any cancel request so the gate can be reused
    pub fn reset(&self) {
        if let Ok(mut state) = self.state.lock() {
            *state = GateState::default();
        }
    }

    /// Block until a decision arrives, the gate is cancelled, or
    /// `is_cancelled` reports true. The decision is consumed.
    pub fn wait(&self, is_cancelled: impl Fn() -> bool) -> ApprovalOutcome {
        let Ok(mut state) = self.state.lock() else {
            return ApprovalOutcome::Cancelled;
        };
        loop {
            if state.cancel_requested || is_cancelled() {
                state.decision = None;
                debug!("Approval wait cancelled");
                return ApprovalOutcome::Cancelled;
            }
            if let Some(approved) = state.decision.take() {
                return if approved { ApprovalOutcome::Approved } else { ApprovalOutcome::Rejected };
            }
            state = match self.signal.wait_timeout(state, CANCEL_CHECK_INTERVAL) {
                Ok((guard, _)) => guard,
                Err(_) => return ApprovalOutcome::Cancelled,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn test_approve_wakes_waiter() {
        let gate = Arc::new(ApprovalGate::new());
        let waiter = gate.clone();
        let handle = thread::spawn(move || waiter.wait(|| false));
        thread::sleep(Duration::from_millis(30));
        gate.approve();
        assert_eq!(handle.join().unwrap(), ApprovalOutcome::Approved);
    }

    #[test]
    fn test_decision_is_consumed() {
        let gate = ApprovalGate::new();
        gate.reject();
        assert_eq!(gate.wait(|| false), ApprovalOutcome::Rejected);
        gate.cancel();
        assert_eq!(gate.wait(|| false), ApprovalOutcome::Cancelled);
        gate.reset();
        assert!(!gate.is_cancel_requested());
    }

    #[test]
    fn test_external_cancel_interrupts_wait() {
        let gate = Arc::new(ApprovalGate::new());
        let flag = Arc::new(AtomicBool::new(false));
        let (waiter, waiter_flag) = (gate.clone(), flag.clone());
        let handle = thread::spawn(move || waiter.wait(|| waiter_flag.load(Ordering::SeqCst)));
        thread::sleep(Duration::from_millis(30));
        flag.store(true, Ordering::SeqCst);
        assert_eq!(handle.join().unwrap(), ApprovalOutcome::Cancelled);
    }
}
