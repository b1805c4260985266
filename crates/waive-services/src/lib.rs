//! Tool execution services: background jobs, audio analysis, model and
//! artifact storage, the built-in and external tools, and the controller
//! tying them to an editing session.

pub mod analysis;
pub mod approval;
pub mod artifact_store;
pub mod config;
pub mod controller;
pub mod job_queue;
pub mod model_store;
pub mod progress;
pub mod tools;

pub use analysis::{analyse_audio_file, AnalysisCache, AnalysisSummary};
pub use approval::{ApprovalGate, ApprovalOutcome};
pub use config::WaiveConfig;
pub use controller::{PlanOutcome, ToolSession};
pub use job_queue::{JobId, JobListener, JobMeta, JobQueue, JobStatus};
pub use model_store::{InstalledModelInfo, ModelCatalogEntry, ModelStore};
pub use progress::{sleep_with_cancellation, ProgressToken};
pub use tools::{Tool, ToolContext, ToolDescription, ToolRegistry};
pub use waive_core::{Result, WaiveError};
