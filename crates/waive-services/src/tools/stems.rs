//! Model-backed two-band stem separation

use std::collections::HashSet;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use waive_core::diff::{PARAM_CLIP_FILE, PARAM_TRACK_NAME};
use waive_core::{
    is_within_directory, ClipId, Result, SessionEditor, SessionHost, SessionView, ToolDiffEntry, ToolDiffKind, ToolPlan, WaiveError,
};

use super::apply::{check_plan, finish_apply, is_allowed_output_file};
use super::{analysable_clips, new_plan, param_delay_ms, param_str, PlanTask, Tool, ToolContext, ToolDescription};
use crate::analysis::{open_sample_stream, ANALYSIS_BLOCK_FRAMES};
use crate::artifact_store::{plan_output_dir, read_json, write_plan_with_payload};
use crate::progress::{sleep_with_cancellation, ProgressToken};

pub const NAME: &str = "stem_separation";
pub const MODEL_ID: &str = "stem_separator";

pub const LOW_TRACK: &str = "Stem Low";
pub const HIGH_TRACK: &str = "Stem High";

/// One-pole smoothing factor for the low band
const LOW_SMOOTHING: f32 = 0.03;

#[derive(Debug, Default)]
pub struct StemSeparation;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StemModel {
    pub model_id: String,
    pub model_version: String,
    pub model_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StemFile {
    pub stem_name: String,
    pub file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StemOutput {
    pub source_clip_id: ClipId,
    pub source_track_index: usize,
    pub source_clip_name: String,
    pub clip_start_seconds: f64,
    pub clip_end_seconds: f64,
    pub stems: Vec<StemFile>,
}

/// Contents of the plan's `payload.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StemPayload {
    pub model: StemModel,
    pub outputs: Vec<StemOutput>,
}

/// File-system safe base name for generated stems
pub fn stem_base_name(clip_name: &str) -> String {
    let name: String = clip_name
        .trim()
        .replace(' ', "_")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if name.is_empty() { "clip".to_string() } else { name }
}

/// Split `source` into a smoothed low band and its residual. Returns
/// `Ok(false)` if cancelled or the source is unreadable.
fn write_separated_stems(
    source: &Path,
    low_file: &Path,
    high_file: &Path,
    token: &ProgressToken,
) -> std::result::Result<bool, hound::Error> {
    let Some(stream) = open_sample_stream(source) else {
        return Ok(false);
    };

    let spec = hound::WavSpec {
        channels: stream.spec.channels,
        sample_rate: stream.spec.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut low_writer = hound::WavWriter::new(BufWriter::new(File::create(low_file)?), spec)?;
    let mut high_writer = hound::WavWriter::new(BufWriter::new(File::create(high_file)?), spec)?;

    let channels = usize::from(spec.channels);
    let mut state = vec![0.0_f32; channels];
    let mut samples = stream.samples;
    let mut block = Vec::with_capacity(ANALYSIS_BLOCK_FRAMES * channels);

    loop {
        if token.is_cancelled() {
            return Ok(false);
        }
        block.clear();
        block.extend(samples.by_ref().take(ANALYSIS_BLOCK_FRAMES * channels));
        if block.is_empty() {
            break;
        }
        for (i, x) in block.iter().enumerate() {
            let low = &mut state[i % channels];
            *low += (x - *low) * LOW_SMOOTHING;
            low_writer.write_sample(to_i16(*low))?;
            high_writer.write_sample(to_i16(x - *low))?;
        }
    }

    low_writer.finalize()?;
    high_writer.finalize()?;
    Ok(true)
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)) as i16
}

fn optional_version(params: &Value) -> Option<String> {
    Some(param_str(params, "model_version")).filter(|v| !v.is_empty())
}

impl Tool for StemSeparation {
    fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: NAME.into(),
            display_name: "Stem Separation (Model)".into(),
            version: "1.0.0".into(),
            description: "Split selected clips into low and high stems using the installed stem separator model."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "model_version": {
                        "type": "string",
                        "description": "Optional model version; uses the pinned or latest installed version when empty"
                    },
                    "analysis_delay_ms": {
                        "type": "integer", "minimum": 0, "default": 0,
                        "description": "Extra processing delay per clip for deterministic cancellation tests"
                    }
                }
            }),
            default_params: json!({ "model_version": "", "analysis_delay_ms": 0 }),
            model_requirement: Some(MODEL_ID.into()),
        }
    }

    fn prepare_plan(&self, ctx: &ToolContext, session: &SessionView, params: &Value) -> Result<PlanTask> {
        let model = ctx
            .models
            .resolve_installed(MODEL_ID, optional_version(params).as_deref())
            .ok_or_else(|| WaiveError::ModelRequired(MODEL_ID.into()))?;
        if session.selection.is_empty() {
            return Err(WaiveError::precondition("No clips selected"));
        }
        let clips = analysable_clips(session);
        if clips.is_empty() {
            return Err(WaiveError::precondition("Selected clips are not analysable wave clips"));
        }
        let cache_dir = session
            .cache_dir
            .clone()
            .ok_or_else(|| WaiveError::precondition("Project cache directory is not available"))?;

        let delay_ms = param_delay_ms(params);
        let description = self.describe();
        let params = params.clone();

        Ok(PlanTask {
            job_name: format!("Plan: {}", description.display_name),
            run: Box::new(move |token| {
                let mut plan = new_plan(&description, &params);
                let output_dir = plan_output_dir(&cache_dir, &description.name, &plan.plan_id)?;
                std::fs::create_dir_all(&output_dir)?;

                let mut payload = StemPayload {
                    model: StemModel {
                        model_id: model.model_id.clone(),
                        model_version: model.version.clone(),
                        model_path: model.install_directory.clone(),
                    },
                    outputs: Vec::new(),
                };
                let total = clips.len();
                let mut used_bases = HashSet::new();

                for (i, clip) in clips.iter().enumerate() {
                    if token.is_cancelled() || !sleep_with_cancellation(token, delay_ms) {
                        return Ok(plan);
                    }

                    // Same-named clips are told apart by clip id
                    let mut base = stem_base_name(&clip.name);
                    if !used_bases.insert(base.clone()) {
                        base = format!("{base}_{}", clip.clip_id.0);
                    }
                    let low_file = output_dir.join(format!("{base}_low.wav"));
                    let high_file = output_dir.join(format!("{base}_high.wav"));
                    match write_separated_stems(&clip.source_file, &low_file, &high_file, token) {
                        Ok(true) => {}
                        Ok(false) => continue,
                        Err(e) => {
                            warn!(clip = %clip.name, error = %e, "Stem separation failed");
                            continue;
                        }
                    }

                    if payload.outputs.is_empty() {
                        for track in [LOW_TRACK, HIGH_TRACK] {
                            plan.changes.push(ToolDiffEntry {
                                kind: ToolDiffKind::TrackAdded,
                                summary: format!("Create destination track '{track}'"),
                                target_name: track.into(),
                                parameter_id: PARAM_TRACK_NAME.into(),
                                after_text: track.into(),
                                ..Default::default()
                            });
                        }
                    }

                    for (stem, file) in [("low", &low_file), ("high", &high_file)] {
                        plan.changes.push(ToolDiffEntry {
                            kind: ToolDiffKind::ClipInserted,
                            summary: format!("Insert {stem} stem for clip '{}'", clip.name),
                            track_index: clip.track_index as i64,
                            clip_id: clip.clip_id,
                            target_name: format!("{} [{stem}]", clip.name),
                            parameter_id: PARAM_CLIP_FILE.into(),
                            before_value: clip.start_seconds,
                            after_value: clip.end_seconds,
                            after_text: file.display().to_string(),
                            ..Default::default()
                        });
                    }

                    payload.outputs.push(StemOutput {
                        source_clip_id: clip.clip_id,
                        source_track_index: clip.track_index,
                        source_clip_name: clip.name.clone(),
                        clip_start_seconds: clip.start_seconds,
                        clip_end_seconds: clip.end_seconds,
                        stems: vec![
                            StemFile { stem_name: "low".into(), file: low_file },
                            StemFile { stem_name: "high".into(), file: high_file },
                        ],
                    });
                    token.set_progress((i + 1) as f32 / total as f32, format!("Separated clip {} / {}", i + 1, total));
                }

                plan.summary = format!(
                    "Generate stems for {} clip(s) using model {}",
                    payload.outputs.len(),
                    payload.model.model_version
                );
                write_plan_with_payload(&output_dir, &mut plan, &serde_json::to_value(&payload)?)?;
                debug!(plan_id = %plan.plan_id, outputs = payload.outputs.len(), "Stem plan ready");
                Ok(plan)
            }),
        })
    }

    fn apply(&self, host: &mut dyn SessionHost, plan: &ToolPlan) -> Result<()> {
        check_plan(plan, NAME, "stem separation tool")?;

        let payload_file = plan
            .artifact_file
            .as_ref()
            .filter(|f| f.is_file())
            .ok_or_else(|| WaiveError::precondition("Stem plan artifact payload is missing"))?;
        let payload: StemPayload = read_json(payload_file)
            .and_then(|v| serde_json::from_value::<StemPayload>(v).map_err(WaiveError::from))
            .map_err(|_| WaiveError::precondition("Stem plan artifact payload is invalid"))?;
        if payload.outputs.is_empty() {
            return Err(WaiveError::precondition("Stem plan contains no generated outputs"));
        }
        let output_root = payload_file.parent().unwrap_or(Path::new(""));
        let cache_dir = host
            .snapshot()
            .cache_dir
            .ok_or_else(|| WaiveError::precondition("Project cache directory is not available"))?;
        if !is_within_directory(output_root, &cache_dir) {
            return Err(WaiveError::precondition("Stem plan artifact is outside the project cache"));
        }

        host.perform_edit("Stem Separation", false, &mut |editor: &mut dyn SessionEditor| {
            let mut applied = 0;
            let low_track = editor.find_or_create_track(LOW_TRACK);
            let high_track = editor.find_or_create_track(HIGH_TRACK);

            for output in &payload.outputs {
                for stem in &output.stems {
                    if !is_allowed_output_file(&stem.file, output_root) {
                        continue;
                    }
                    let track = if stem.stem_name == "low" { low_track } else { high_track };
                    let name = format!("{} [{}]", output.source_clip_name, stem.stem_name);
                    if editor
                        .insert_wave_clip(track, &name, &stem.file, output.clip_start_seconds, output.clip_end_seconds)
                        .is_some()
                    {
                        applied += 1;
                    }
                }
            }
            // Roll back the destination tracks when nothing landed on them
            finish_apply(applied, "No stem clips from the plan could be inserted")
        })
    }
}
