//! Cooperative cancellation and coalesced progress reporting for running jobs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::job_queue::{JobEvent, JobId};

/// Slice length used by [`sleep_with_cancellation`]
pub const CANCEL_POLL_INTERVAL_MS: u64 = 20;

struct TokenState {
    job_id: JobId,
    cancelled: AtomicBool,
    latest: Mutex<Option<(f32, String)>>,
    has_update: AtomicBool,
    events: Option<Sender<JobEvent>>,
}

/// Shared handle passed into every job closure.
///
/// Cancellation is monotonic. Progress is latest-value-wins: bursts of
/// `set_progress` calls between two UI dispatches collapse into one update.
#[derive(Clone)]
pub struct ProgressToken {
    state: Arc<TokenState>,
}

impl ProgressToken {
    pub(crate) fn for_job(job_id: JobId, events: Sender<JobEvent>) -> Self {
        Self::build(job_id, Some(events))
    }

    /// A token not attached to any queue, for running planners inline
    pub fn detached() -> Self {
        Self::build(0, None)
    }

    fn build(job_id: JobId, events: Option<Sender<JobEvent>>) -> Self {
        Self {
            state: Arc::new(TokenState {
                job_id,
                cancelled: AtomicBool::new(false),
                latest: Mutex::new(None),
                has_update: AtomicBool::new(false),
                events,
            }),
        }
    }

    pub fn job_id(&self) -> JobId {
        self.state.job_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
    }

    pub fn set_progress(&self, fraction: f32, message: impl Into<String>) {
        let fraction = if fraction.is_finite() { fraction.clamp(0.0, 1.0) } else { 0.0 };
        if let Ok(mut latest) = self.state.latest.lock() {
            *latest = Some((fraction, message.into()));
        }

        // Only the first update since the last dispatch wakes the UI
        if !self.state.has_update.swap(true, Ordering::AcqRel) {
            if let Some(events) = &self.state.events {
                let _ = events.send(JobEvent::Progress(self.clone()));
            }
        }
    }

    /// Take the pending progress value, if any, clearing the update flag
    pub fn take_progress(&self) -> Option<(f32, String)> {
        self.state.has_update.store(false, Ordering::Release);
        self.state.latest.lock().ok().and_then(|mut l| l.take())
    }
}

/// Sleep for `delay_ms` in short slices, stopping early on cancellation.
/// Returns false if the token was cancelled.
pub fn sleep_with_cancellation(token: &ProgressToken, delay_ms: u64) -> bool {
    let mut waited = 0;
    while waited < delay_ms {
        if token.is_cancelled() {
            return false;
        }
        let step = CANCEL_POLL_INTERVAL_MS.min(delay_ms - waited);
        thread::sleep(Duration::from_millis(step));
        waited += step;
    }
    !token.is_cancelled()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_progress_is_latest_value_wins() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let token = ProgressToken::for_job(3, tx);
        token.set_progress(0.1, "a");
        token.set_progress(0.5, "b");
        token.set_progress(2.0, "c");

        // One wake-up for the whole burst
        assert_eq!(rx.try_iter().count(), 1);
        assert_eq!(token.take_progress(), Some((1.0, "c".to_string())));
        assert_eq!(token.take_progress(), None);

        token.set_progress(0.7, "d");
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn test_sleep_with_cancellation_stops_early() {
        let token = ProgressToken::detached();
        let canceller = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            canceller.cancel();
        });

        let start = Instant::now();
        assert!(!sleep_with_cancellation(&token, 5_000));
        assert!(start.elapsed() < Duration::from_secs(2));
        handle.join().unwrap();
    }

    #[test]
    fn test_sleep_without_cancel_completes() {
        let token = ProgressToken::detached();
        assert!(sleep_with_cancellation(&token, 30));
        assert!(sleep_with_cancellation(&token, 0));
    }
}
