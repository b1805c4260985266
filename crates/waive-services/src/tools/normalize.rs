//! Per-clip gain to hit a target peak

use serde_json::{json, Value};

use waive_core::diff::PARAM_CLIP_GAIN;
use waive_core::{Result, SessionEditor, SessionHost, SessionView, ToolDiffEntry, ToolDiffKind, ToolPlan, WaiveError};

use super::apply::{check_plan, finish_apply};
use super::{analysable_clips, new_plan, param_delay_ms, param_f64, persist_plan, PlanTask, Tool, ToolContext, ToolDescription};
use crate::analysis::{analyse_audio_file, gain_to_db};
use crate::progress::sleep_with_cancellation;

pub const NAME: &str = "normalize_selected_clips";

#[derive(Debug, Default)]
pub struct NormalizeSelectedClips;

impl Tool for NormalizeSelectedClips {
    fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: NAME.into(),
            display_name: "Normalize Selected Clips".into(),
            version: "1.0.0".into(),
            description: "Analyse selected audio clips and adjust clip gain to a target peak dB.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "target_peak_db": {
                        "type": "number", "minimum": -24.0, "maximum": 0.0, "default": -1.0,
                        "description": "Target peak level in dBFS"
                    },
                    "analysis_delay_ms": {
                        "type": "integer", "minimum": 0, "default": 0,
                        "description": "Extra analysis delay per clip for deterministic cancellation tests"
                    }
                }
            }),
            default_params: json!({ "target_peak_db": -1.0, "analysis_delay_ms": 0 }),
            model_requirement: None,
        }
    }

    fn prepare_plan(&self, ctx: &ToolContext, session: &SessionView, params: &Value) -> Result<PlanTask> {
        if session.selection.is_empty() {
            return Err(WaiveError::precondition("No clips selected"));
        }
        let clips = analysable_clips(session);
        if clips.is_empty() {
            return Err(WaiveError::precondition("Selected clips are not analysable audio clips"));
        }

        let target_peak_db = param_f64(params, "target_peak_db", -1.0).clamp(-24.0, 0.0);
        let delay_ms = param_delay_ms(params);
        let cache_dir = session.cache_dir.clone();
        let cache = ctx.analysis_cache.clone();
        let description = self.describe();
        let params = params.clone();

        Ok(PlanTask {
            job_name: format!("Plan: {}", description.display_name),
            run: Box::new(move |token| {
                let mut plan = new_plan(&description, &params);
                let total = clips.len();

                for (i, clip) in clips.iter().enumerate() {
                    if token.is_cancelled() || !sleep_with_cancellation(token, delay_ms) {
                        return Ok(plan);
                    }
                    let fraction = (i + 1) as f32 / total as f32;

                    let analysis = analyse_audio_file(&clip.source_file, 0.0, 0.0, || token.is_cancelled(), Some(&cache));
                    if analysis.cancelled {
                        return Ok(plan);
                    }
                    if !analysis.valid || analysis.peak_gain <= 0.0 {
                        token.set_progress(fraction, format!("Skipped silent clip: {}", clip.name));
                        continue;
                    }

                    let source_peak_db = gain_to_db(f64::from(analysis.peak_gain));
                    let new_gain_db = (clip.gain_db + (target_peak_db - source_peak_db)).clamp(-60.0, 24.0);

                    plan.changes.push(ToolDiffEntry {
                        kind: ToolDiffKind::ParameterChanged,
                        summary: format!("Set clip '{}' gain {:.2} dB -> {:.2} dB", clip.name, clip.gain_db, new_gain_db),
                        track_index: clip.track_index as i64,
                        clip_id: clip.clip_id,
                        target_name: clip.name.clone(),
                        parameter_id: PARAM_CLIP_GAIN.into(),
                        before_value: clip.gain_db,
                        after_value: new_gain_db,
                        ..Default::default()
                    });
                    token.set_progress(fraction, format!("Analysed {} / {}", i + 1, total));
                }

                plan.summary = format!(
                    "Normalize {} clip(s) to target peak {:.1} dBFS",
                    plan.changes.len(),
                    target_peak_db
                );
                persist_plan(cache_dir.as_deref(), &mut plan);
                Ok(plan)
            }),
        })
    }

    fn apply(&self, host: &mut dyn SessionHost, plan: &ToolPlan) -> Result<()> {
        check_plan(plan, NAME, "normalize tool")?;

        host.perform_edit("Normalize Selected Clips", false, &mut |editor: &mut dyn SessionEditor| {
            let mut applied = 0;
            for change in &plan.changes {
                if change.kind != ToolDiffKind::ParameterChanged || change.parameter_id != PARAM_CLIP_GAIN {
                    continue;
                }
                if editor.set_clip_gain_db(change.clip_id, change.after_value) {
                    applied += 1;
                }
            }
            finish_apply(applied, "No clips from the plan could be applied")
        })
    }
}
