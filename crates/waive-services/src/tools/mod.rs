//! Tool interface, shared planner helpers, and the built-in tools

pub mod align;
pub mod apply;
pub mod auto_mix;
pub mod external;
pub mod gain_stage;
pub mod normalize;
pub mod registry;
pub mod rename;
pub mod silence;
pub mod stems;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use waive_core::{ClipId, Result, SessionHost, SessionView, ToolPlan};

use crate::analysis::AnalysisCache;
use crate::artifact_store;
use crate::model_store::ModelStore;
use crate::progress::ProgressToken;

pub use registry::ToolRegistry;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescription {
    /// Stable identifier, unique within a registry
    pub name: String,
    pub display_name: String,
    pub version: String,
    pub description: String,
    /// JSON-Schema-shaped description of accepted params
    pub input_schema: Value,
    pub default_params: Value,
    pub model_requirement: Option<String>,
}

/// Planner closure run on the job worker
pub type PlanFn = Box<dyn FnOnce(&ProgressToken) -> Result<ToolPlan> + Send>;

pub struct PlanTask {
    pub job_name: String,
    pub run: PlanFn,
}

/// Services tools may consult while preparing a plan
#[derive(Clone)]
pub struct ToolContext {
    pub models: Arc<ModelStore>,
    pub analysis_cache: Arc<AnalysisCache>,
}

impl ToolContext {
    pub fn new(models: Arc<ModelStore>, analysis_cache: Arc<AnalysisCache>) -> Self {
        Self { models, analysis_cache }
    }
}

pub trait Tool: Send + Sync {
    fn describe(&self) -> ToolDescription;

    /// Check preconditions against `session` and capture everything the
    /// planner needs by value. Runs on the session thread.
    fn prepare_plan(&self, ctx: &ToolContext, session: &SessionView, params: &Value) -> Result<PlanTask>;

    /// Replay `plan` onto the session as one undoable transaction
    fn apply(&self, host: &mut dyn SessionHost, plan: &ToolPlan) -> Result<()>;
}

/// Read a numeric param, falling back to `default`
pub fn param_f64(params: &Value, key: &str, default: f64) -> f64 {
    params.get(key).and_then(Value::as_f64).unwrap_or(default)
}

pub fn param_bool(params: &Value, key: &str, default: bool) -> bool {
    params.get(key).and_then(Value::as_bool).unwrap_or(default)
}

pub fn param_str(params: &Value, key: &str) -> String {
    params
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default()
        .to_string()
}

/// `analysis_delay_ms`, never negative
pub fn param_delay_ms(params: &Value) -> u64 {
    param_f64(params, "analysis_delay_ms", 0.0).max(0.0) as u64
}

/// Empty plan stamped with the tool's identity and a fresh ID
pub(crate) fn new_plan(description: &ToolDescription, params: &Value) -> ToolPlan {
    ToolPlan::new(
        description.name.clone(),
        description.version.clone(),
        Uuid::new_v4().to_string(),
        params.clone(),
    )
}

/// Write the plan artifact when the project has a cache directory.
/// Failures are logged and leave `artifact_file` unset.
pub(crate) fn persist_plan(cache_dir: Option<&Path>, plan: &mut ToolPlan) {
    let Some(cache_dir) = cache_dir else { return };
    if let Err(e) = artifact_store::write_plan_artifact(cache_dir, plan) {
        warn!(tool = %plan.tool_name, error = %e, "Failed to write plan artifact");
    }
}

/// Selected wave clip with a readable source, captured by value
#[derive(Debug, Clone)]
pub(crate) struct ClipInput {
    pub clip_id: ClipId,
    pub name: String,
    pub source_file: PathBuf,
    pub track_index: usize,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub offset_seconds: f64,
    pub gain_db: f64,
}

/// Selected wave clips whose source file exists, in selection order
pub(crate) fn analysable_clips(session: &SessionView) -> Vec<ClipInput> {
    session
        .selected_clips()
        .into_iter()
        .filter_map(|(track_index, clip)| {
            let source = clip.readable_source()?;
            Some(ClipInput {
                clip_id: clip.id,
                name: clip.name.clone(),
                source_file: source.clone(),
                track_index,
                start_seconds: clip.start_seconds,
                end_seconds: clip.end_seconds,
                offset_seconds: clip.offset_seconds,
                gain_db: clip.gain_db,
            })
        })
        .collect()
}

/// A track with the selected clips that feed its peak estimate
#[derive(Debug, Clone)]
pub(crate) struct TrackInput {
    pub track_index: usize,
    pub name: String,
    pub volume_db: f64,
    pub pan: f64,
    pub clips: Vec<ClipInput>,
}

/// Group analysable selected clips by track, ordered by track index
pub(crate) fn analysable_tracks(session: &SessionView) -> Vec<TrackInput> {
    let mut tracks: BTreeMap<usize, TrackInput> = BTreeMap::new();
    for clip in analysable_clips(session) {
        let Some(track) = session.track(clip.track_index) else { continue };
        tracks
            .entry(clip.track_index)
            .or_insert_with(|| TrackInput {
                track_index: track.index,
                name: track.name.clone(),
                volume_db: track.volume_db,
                pan: track.pan,
                clips: Vec::new(),
            })
            .clips
            .push(clip);
    }
    tracks.into_values().collect()
}

/// Loudest clip-gain-adjusted peak across a track's clips, 0 when silent or cancelled
pub(crate) fn track_effective_peak(track: &TrackInput, token: &ProgressToken, cache: &AnalysisCache) -> f64 {
    track
        .clips
        .iter()
        .map(|clip| {
            let analysis = crate::analysis::analyse_audio_file(
                &clip.source_file,
                0.0,
                0.0,
                || token.is_cancelled(),
                Some(cache),
            );
            if !analysis.valid || analysis.peak_gain <= 0.0 {
                return 0.0;
            }
            f64::from(analysis.peak_gain) * crate::analysis::db_to_gain(clip.gain_db)
        })
        .fold(0.0, f64::max)
}
