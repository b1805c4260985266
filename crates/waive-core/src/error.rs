//! Error types for the waive tool core

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WaiveError {
    /// A tool refused to plan; the message is shown to the user verbatim.
    #[error("{0}")]
    Precondition(String),
    #[error("Model '{0}' is not installed. Install it via ModelManager before planning.")]
    ModelRequired(String),
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("Tool plan does not match {0}")]
    PlanMismatch(String),
    #[error("Tool plan has no changes to apply")]
    EmptyPlan,
    /// Apply ran but nothing in the plan could be applied.
    #[error("{0}")]
    NothingApplied(String),

    #[error("Invalid model ID: must match [a-zA-Z0-9_-]+")]
    InvalidIdentifier,
    #[error("Invalid path component: {0:?}")]
    InvalidPathComponent(String),
    #[error("Unknown model: {0}")]
    UnknownModel(String),
    #[error("Model '{model}' does not provide version {version}")]
    UnsupportedVersion { model: String, version: String },
    #[error("Installing model would exceed quota")]
    OverQuota,
    #[error("Quota is below current usage ({0} bytes)")]
    QuotaBelowUsage(u64),
    #[error("Directory is outside allowed storage location")]
    PathOutsideStorage,
    #[error("Model version is not installed")]
    NotInstalled,

    #[error("Invalid tool manifest: {0}")]
    Manifest(String),
    #[error("External tool execution cancelled")]
    ExternalToolCancelled,
    #[error("External tool execution timed out after {0}ms")]
    ExternalToolTimeout(u64),
    #[error("External tool failed with exit code {0}")]
    ExternalToolExit(i32),
    #[error("Failed to create temp directory")]
    TempDirectory,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WaiveError {
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition(message.into())
    }
}

pub type Result<T> = std::result::Result<T, WaiveError>;
