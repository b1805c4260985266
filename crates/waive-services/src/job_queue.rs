//! Serial background job queue with UI-thread listener delivery

use std::collections::{HashMap, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info};
use waive_core::Result;

use crate::progress::ProgressToken;

pub type JobId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Cancelled,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

/// Display fields for a job
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobMeta {
    pub title: String,
    pub category: String,
}

impl JobMeta {
    pub fn new(title: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            category: category.into(),
        }
    }
}

/// Job lifecycle notifications, delivered on the thread calling
/// [`JobQueue::dispatch_events`]
pub trait JobListener: Send + Sync {
    fn job_started(&self, _id: JobId, _meta: &JobMeta) {}
    fn job_progress(&self, _id: JobId, _fraction: f32, _message: &str) {}
    fn job_finished(&self, _id: JobId, _status: JobStatus) {}
}

pub type JobFn = Box<dyn FnOnce(&ProgressToken) -> Result<()> + Send>;
pub type CompletionFn = Box<dyn FnOnce(JobId, JobStatus) + Send>;

struct Job {
    id: JobId,
    meta: JobMeta,
    token: ProgressToken,
    run: JobFn,
    complete: Option<CompletionFn>,
}

pub(crate) enum JobEvent {
    Started(JobId, JobMeta),
    Progress(ProgressToken),
    Finished(JobId, JobStatus, Option<CompletionFn>),
}

/// Terminal statuses kept for [`JobQueue::status`]; older ones are forgotten
const FINISHED_STATUS_LIMIT: usize = 256;

#[derive(Default)]
struct StatusTable {
    statuses: HashMap<JobId, JobStatus>,
    /// Finished jobs, oldest first
    finished: VecDeque<JobId>,
}

#[derive(Default)]
struct Shared {
    statuses: Mutex<StatusTable>,
    tokens: Mutex<HashMap<JobId, ProgressToken>>,
}

impl Shared {
    fn set_status(&self, id: JobId, status: JobStatus) {
        let Ok(mut table) = self.statuses.lock() else { return };
        table.statuses.insert(id, status);
        if status.is_terminal() {
            table.finished.push_back(id);
            while table.finished.len() > FINISHED_STATUS_LIMIT {
                if let Some(old) = table.finished.pop_front() {
                    table.statuses.remove(&old);
                }
            }
        }
    }
}

/// FIFO queue running one job at a time on a dedicated worker thread.
///
/// Lifecycle events are buffered and handed to listeners (and each job's
/// completion callback) only from [`dispatch_events`](Self::dispatch_events),
/// so they arrive on whichever thread plays the UI role.
pub struct JobQueue {
    shared: Arc<Shared>,
    job_tx: Option<Sender<Job>>,
    event_tx: Sender<JobEvent>,
    event_rx: Receiver<JobEvent>,
    listeners: Mutex<Vec<Arc<dyn JobListener>>>,
    next_id: AtomicU64,
    /// Jobs submitted whose finish has not been dispatched yet
    active: AtomicUsize,
    worker: Option<JoinHandle<()>>,
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl JobQueue {
    pub fn new() -> Self {
        let (job_tx, job_rx) = unbounded::<Job>();
        let (event_tx, event_rx) = unbounded();
        let shared = Arc::new(Shared::default());

        let worker_shared = shared.clone();
        let worker_events = event_tx.clone();
        let worker = thread::spawn(move || worker_loop(job_rx, worker_events, worker_shared));

        Self {
            shared,
            job_tx: Some(job_tx),
            event_tx,
            event_rx,
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            active: AtomicUsize::new(0),
            worker: Some(worker),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn JobListener>) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push(listener);
        }
    }

    pub fn remove_listener(&self, listener: &Arc<dyn JobListener>) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.retain(|l| !Arc::ptr_eq(l, listener));
        }
    }

    /// Queue `run` behind any pending jobs. Returns immediately.
    pub fn submit(&self, meta: JobMeta, run: JobFn, complete: Option<CompletionFn>) -> JobId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = ProgressToken::for_job(id, self.event_tx.clone());

        self.shared.set_status(id, JobStatus::Queued);
        if let Ok(mut tokens) = self.shared.tokens.lock() {
            tokens.insert(id, token.clone());
        }
        self.active.fetch_add(1, Ordering::AcqRel);

        debug!(job = id, title = %meta.title, category = %meta.category, "Job queued");
        let job = Job { id, meta, token, run, complete };
        let sent = self.job_tx.as_ref().is_some_and(|tx| tx.send(job).is_ok());
        if !sent {
            error!(job = id, "Job worker is not running");
            self.shared.set_status(id, JobStatus::Failed);
            let _ = self.event_tx.send(JobEvent::Finished(id, JobStatus::Failed, None));
        }
        id
    }

    /// Request cooperative cancellation. A job that has not started yet is
    /// dropped without running. Returns false for unknown or finished jobs.
    pub fn cancel_job(&self, id: JobId) -> bool {
        let token = self.shared.tokens.lock().ok().and_then(|t| t.get(&id).cloned());
        match token {
            Some(token) => {
                info!(job = id, "Job cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        if let Ok(tokens) = self.shared.tokens.lock() {
            for token in tokens.values() {
                token.cancel();
            }
        }
    }

    pub fn status(&self, id: JobId) -> Option<JobStatus> {
        self.shared.statuses.lock().ok().and_then(|t| t.statuses.get(&id).copied())
    }

    /// Jobs submitted whose completion has not yet been dispatched
    pub fn pending_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Deliver buffered lifecycle events to listeners. Call from the UI thread.
    /// Returns the number of events handled.
    pub fn dispatch_events(&self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.event_rx.try_recv() {
            self.handle_event(event);
            handled += 1;
        }
        handled
    }

    /// Pump events until every submitted job has finished and been
    /// dispatched, or `timeout` elapses. Returns true when idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            self.dispatch_events();
            if self.pending_count() == 0 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match self.event_rx.recv_timeout(deadline - now) {
                Ok(event) => self.handle_event(event),
                Err(RecvTimeoutError::Timeout) => return false,
                Err(RecvTimeoutError::Disconnected) => return self.pending_count() == 0,
            }
        }
    }

    fn listeners(&self) -> Vec<Arc<dyn JobListener>> {
        self.listeners.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn handle_event(&self, event: JobEvent) {
        // Listener calls happen outside the listener lock
        let listeners = self.listeners();
        match event {
            JobEvent::Started(id, meta) => {
                for l in &listeners {
                    l.job_started(id, &meta);
                }
            }
            JobEvent::Progress(token) => {
                let Some((fraction, message)) = token.take_progress() else { return };
                for l in &listeners {
                    l.job_progress(token.job_id(), fraction, &message);
                }
            }
            JobEvent::Finished(id, status, complete) => {
                for l in &listeners {
                    l.job_finished(id, status);
                }
                if let Some(complete) = complete {
                    complete(id, status);
                }
                self.active.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }
}

impl Drop for JobQueue {
    fn drop(&mut self) {
        self.cancel_all();
        self.job_tx.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn worker_loop(jobs: Receiver<Job>, events: Sender<JobEvent>, shared: Arc<Shared>) {
    for job in jobs.iter() {
        let Job { id, meta, token, run, complete } = job;

        let status = if token.is_cancelled() {
            debug!(job = id, "Dropping job cancelled before start");
            JobStatus::Cancelled
        } else {
            shared.set_status(id, JobStatus::Running);
            info!(job = id, title = %meta.title, "Job started");
            let _ = events.send(JobEvent::Started(id, meta.clone()));
            run_job(id, &meta, &token, run)
        };

        shared.set_status(id, status);
        if let Ok(mut tokens) = shared.tokens.lock() {
            tokens.remove(&id);
        }
        info!(job = id, ?status, "Job finished");
        let _ = events.send(JobEvent::Finished(id, status, complete));
    }
}

fn run_job(id: JobId, meta: &JobMeta, token: &ProgressToken, run: JobFn) -> JobStatus {
    match panic::catch_unwind(AssertUnwindSafe(|| run(token))) {
        Ok(_) if token.is_cancelled() => JobStatus::Cancelled,
        Ok(Ok(())) => JobStatus::Completed,
        Ok(Err(e)) => {
            error!(job = id, title = %meta.title, error = %e, "Job failed");
            JobStatus::Failed
        }
        Err(_) => {
            error!(job = id, title = %meta.title, "Job panicked");
            JobStatus::Failed
        }
    }
}
