//! Drives one tool at a time from request through planning, review, and apply

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, warn};

use waive_core::{summarise_plan, Result, SessionHost, ToolPlan, WaiveError};

use crate::analysis::AnalysisCache;
use crate::approval::ApprovalGate;
use crate::config::WaiveConfig;
use crate::job_queue::{JobId, JobMeta, JobQueue, JobStatus};
use crate::model_store::ModelStore;
use crate::tools::external::ExternalToolRunner;
use crate::tools::{ToolContext, ToolRegistry};

pub const PLAN_JOB_CATEGORY: &str = "tool_plan";

/// What became of a planning job, as seen by [`ToolSession::poll`]
#[derive(Debug, Clone, PartialEq)]
pub enum PlanOutcome {
    /// A plan with changes is pending review
    Ready,
    NoChanges,
    Cancelled,
    Failed(String),
    /// Auto-apply committed the plan
    Applied,
    /// Auto-apply was attempted and refused
    ApplyFailed(String),
}

impl PlanOutcome {
    pub fn status_text(&self) -> String {
        match self {
            Self::Ready => "Plan ready".into(),
            Self::NoChanges => "Plan produced no changes".into(),
            Self::Cancelled => "Plan cancelled".into(),
            Self::Failed(msg) => format!("Plan failed: {msg}"),
            Self::Applied => "Plan applied".into(),
            Self::ApplyFailed(msg) => format!("Apply failed: {msg}"),
        }
    }
}

struct Finished {
    job: JobId,
    status: JobStatus,
    plan: Option<ToolPlan>,
    error: Option<String>,
}

/// Slot a planner job writes into; drained on the session thread
type Inbox = Arc<Mutex<Vec<Finished>>>;

/// Owns the registry, the job queue, and the plan awaiting review.
///
/// All methods run on the thread that owns the [`SessionHost`]; planners run
/// on the queue's worker. An agent thread may park on
/// [`approval_gate`](Self::approval_gate) until the user applies, rejects, or
/// cancels.
pub struct ToolSession {
    registry: ToolRegistry,
    context: ToolContext,
    queue: JobQueue,
    inbox: Inbox,
    running: Option<JobId>,
    pending: Option<ToolPlan>,
    approval: Arc<ApprovalGate>,
    auto_apply: bool,
    status: String,
}

impl ToolSession {
    pub fn new(registry: ToolRegistry, context: ToolContext) -> Self {
        Self {
            registry,
            context,
            queue: JobQueue::new(),
            inbox: Arc::new(Mutex::new(Vec::new())),
            running: None,
            pending: None,
            approval: Arc::new(ApprovalGate::new()),
            auto_apply: false,
            status: String::new(),
        }
    }

    /// Build the full service stack from user settings, registering any
    /// external tools found in the configured directories
    pub fn from_config(config: &WaiveConfig) -> Result<Self> {
        let models = ModelStore::new(config.model_storage_dir())?;
        let cache = AnalysisCache::new(config.analysis.cache_capacity);
        let runner = Arc::new(ExternalToolRunner::new());
        for dir in &config.tools.directories {
            runner.add_tools_directory(dir.clone());
        }

        let mut registry = ToolRegistry::new();
        let external = registry.register_external_tools(&runner);
        info!(tools = registry.tools().len(), external, "Tool registry ready");

        let mut session = Self::new(registry, ToolContext::new(Arc::new(models), Arc::new(cache)));
        session.set_auto_apply(config.agent.auto_apply);
        Ok(session)
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ToolRegistry {
        &mut self.registry
    }

    pub fn context(&self) -> &ToolContext {
        &self.context
    }

    /// The queue, for attaching progress listeners
    pub fn job_queue(&self) -> &JobQueue {
        &self.queue
    }

    pub fn approval_gate(&self) -> Arc<ApprovalGate> {
        self.approval.clone()
    }

    pub fn set_auto_apply(&mut self, enabled: bool) {
        self.auto_apply = enabled;
    }

    pub fn auto_apply(&self) -> bool {
        self.auto_apply
    }

    pub fn pending_plan(&self) -> Option<&ToolPlan> {
        self.pending.as_ref()
    }

    pub fn running_job(&self) -> Option<JobId> {
        self.running
    }

    /// Last user-facing status line
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Check preconditions and queue the planner. Precondition failures are
    /// returned here; the plan itself arrives through [`poll`](Self::poll).
    pub fn run_tool(&mut self, name: &str, params: &Value, host: &dyn SessionHost) -> Result<JobId> {
        let tool = self
            .registry
            .find_tool(name)
            .ok_or_else(|| WaiveError::UnknownTool(name.to_string()))?;
        let description = tool.describe();

        let task = match tool.prepare_plan(&self.context, &host.snapshot(), params) {
            Ok(task) => task,
            Err(e) => {
                self.status = e.to_string();
                return Err(e);
            }
        };

        self.pending = None;
        self.approval.reset();
        if let Some(previous) = self.running.take() {
            self.queue.cancel_job(previous);
        }

        let result: Arc<Mutex<Option<Result<ToolPlan>>>> = Arc::new(Mutex::new(None));
        let writer = result.clone();
        let inbox = self.inbox.clone();
        let run = task.run;

        let job = self.queue.submit(
            JobMeta::new(format!("Plan: {}", description.display_name), PLAN_JOB_CATEGORY),
            Box::new(move |token| {
                let outcome = run(token);
                let failed = outcome.as_ref().err().map(|e| WaiveError::precondition(e.to_string()));
                if let Ok(mut slot) = writer.lock() {
                    *slot = Some(outcome);
                }
                failed.map_or(Ok(()), Err)
            }),
            Some(Box::new(move |job, status| {
                let (plan, error) = match result.lock().ok().and_then(|mut r| r.take()) {
                    Some(Ok(plan)) => (Some(plan), None),
                    Some(Err(e)) => (None, Some(e.to_string())),
                    None => (None, None),
                };
                if let Ok(mut inbox) = inbox.lock() {
                    inbox.push(Finished { job, status, plan, error });
                }
            })),
        );

        info!(tool = %description.name, job, "Planning started");
        self.running = Some(job);
        self.status = format!("Running {}", description.display_name);
        Ok(job)
    }

    /// Deliver queue events and settle finished planning jobs. Returns the
    /// outcome of the current job once it finishes.
    pub fn poll(&mut self, host: &mut dyn SessionHost) -> Option<PlanOutcome> {
        self.queue.dispatch_events();
        let finished: Vec<Finished> = self.inbox.lock().map(|mut i| i.drain(..).collect()).unwrap_or_default();

        let mut outcome = None;
        for done in finished {
            if self.running != Some(done.job) {
                debug!(job = done.job, "Ignoring superseded plan");
                continue;
            }
            self.running = None;
            outcome = Some(self.settle(done, host));
        }
        outcome
    }

    /// Poll until the current job settles or `timeout` elapses
    pub fn wait_for_plan(&mut self, host: &mut dyn SessionHost, timeout: Duration) -> Option<PlanOutcome> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(outcome) = self.poll(host) {
                return Some(outcome);
            }
            if self.running.is_none() {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            self.queue.wait_idle((deadline - now).min(Duration::from_millis(50)));
        }
    }

    fn settle(&mut self, done: Finished, host: &mut dyn SessionHost) -> PlanOutcome {
        let outcome = match (done.status, done.plan) {
            (JobStatus::Cancelled, _) => PlanOutcome::Cancelled,
            (JobStatus::Completed, Some(plan)) if !plan.is_empty() => {
                debug!(plan = %summarise_plan(&plan), "Plan ready");
                self.pending = Some(plan);
                if self.auto_apply {
                    match self.apply_pending(host) {
                        Ok(()) => PlanOutcome::Applied,
                        Err(e) => PlanOutcome::ApplyFailed(e.to_string()),
                    }
                } else {
                    PlanOutcome::Ready
                }
            }
            (JobStatus::Completed, _) => PlanOutcome::NoChanges,
            _ => PlanOutcome::Failed(done.error.unwrap_or_else(|| "planner did not finish".into())),
        };
        self.status = outcome.status_text();
        outcome
    }

    /// Apply the pending plan through the tool that produced it. The plan is
    /// cleared whether or not apply succeeds.
    pub fn apply_pending(&mut self, host: &mut dyn SessionHost) -> Result<()> {
        let plan = self
            .pending
            .take()
            .ok_or_else(|| WaiveError::precondition("No pending plan to apply"))?;
        let tool = self
            .registry
            .find_tool(&plan.tool_name)
            .ok_or_else(|| WaiveError::UnknownTool(plan.tool_name.clone()))?;

        match tool.apply(host, &plan) {
            Ok(()) => {
                info!(tool = %plan.tool_name, plan_id = %plan.plan_id, changes = plan.changes.len(), "Plan applied");
                self.status = "Plan applied".into();
                self.approval.approve();
                Ok(())
            }
            Err(e) => {
                warn!(tool = %plan.tool_name, error = %e, "Plan apply failed");
                self.status = format!("Apply failed: {e}");
                self.approval.reject();
                Err(e)
            }
        }
    }

    pub fn reject_pending(&mut self) -> Option<ToolPlan> {
        let plan = self.pending.take();
        if plan.is_some() {
            self.status = "Plan rejected".into();
            self.approval.reject();
        }
        plan
    }

    /// Request cancellation of the running planner. Returns false if idle.
    pub fn cancel_running(&mut self) -> bool {
        self.approval.cancel();
        match self.running {
            Some(job) => self.queue.cancel_job(job),
            None => false,
        }
    }
}
