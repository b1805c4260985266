//! Model-backed track volume and pan suggestions

use serde_json::{json, Map, Value};
use tracing::warn;

use waive_core::diff::{PARAM_TRACK_PAN, PARAM_TRACK_VOLUME};
use waive_core::{Result, SessionEditor, SessionHost, SessionView, ToolDiffEntry, ToolDiffKind, ToolPlan, WaiveError};

use super::apply::{check_plan, finish_apply};
use super::{
    analysable_tracks, new_plan, param_bool, param_delay_ms, param_f64, param_str, track_effective_peak, PlanTask,
    Tool, ToolContext, ToolDescription,
};
use crate::analysis::gain_to_db;
use crate::artifact_store::write_plan_artifact_with;
use crate::progress::sleep_with_cancellation;

pub const NAME: &str = "auto_mix_suggestions";
pub const MODEL_ID: &str = "auto_mix_suggester";

/// Pan moves at or below this are not suggested
const MIN_PAN_CHANGE: f64 = 0.03;

#[derive(Debug, Default)]
pub struct AutoMixSuggestions;

/// Evenly spread pan position for the `i`th of `total` tracks
fn spread_pan(i: usize, total: usize) -> f64 {
    if total > 1 { -0.6 + 1.2 * i as f64 / (total - 1) as f64 } else { 0.0 }
}

impl Tool for AutoMixSuggestions {
    fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: NAME.into(),
            display_name: "Auto-Mix Suggestions (Model)".into(),
            version: "1.0.0".into(),
            description: "Suggest track volume and pan moves for selected tracks using the installed auto-mix model."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "target_peak_db": {
                        "type": "number", "minimum": -24.0, "maximum": -6.0, "default": -14.0,
                        "description": "Target track peak in dBFS"
                    },
                    "max_adjust_db": {
                        "type": "number", "minimum": 1.0, "maximum": 24.0, "default": 8.0,
                        "description": "Largest volume move per track in dB"
                    },
                    "stereo_spread": {
                        "type": "boolean", "default": true,
                        "description": "Suggest pan positions spreading tracks across the stereo field"
                    },
                    "model_version": {
                        "type": "string",
                        "description": "Optional model version; uses the pinned or latest installed version when empty"
                    },
                    "analysis_delay_ms": {
                        "type": "integer", "minimum": 0, "default": 0,
                        "description": "Extra analysis delay per track for deterministic cancellation tests"
                    }
                }
            }),
            default_params: json!({
                "target_peak_db": -14.0,
                "max_adjust_db": 8.0,
                "stereo_spread": true,
                "model_version": "",
                "analysis_delay_ms": 0
            }),
            model_requirement: Some(MODEL_ID.into()),
        }
    }

    fn prepare_plan(&self, ctx: &ToolContext, session: &SessionView, params: &Value) -> Result<PlanTask> {
        let requested = param_str(params, "model_version");
        let model = ctx
            .models
            .resolve_installed(MODEL_ID, Some(requested.as_str()).filter(|v| !v.is_empty()))
            .ok_or_else(|| WaiveError::ModelRequired(MODEL_ID.into()))?;
        if session.selection.is_empty() {
            return Err(WaiveError::precondition("No clips selected"));
        }
        let tracks = analysable_tracks(session);
        if tracks.is_empty() {
            return Err(WaiveError::precondition("Selected clips do not map to analysable tracks"));
        }

        let target_peak_db = param_f64(params, "target_peak_db", -14.0).clamp(-24.0, -6.0);
        let max_adjust_db = param_f64(params, "max_adjust_db", 8.0).clamp(1.0, 24.0);
        let stereo_spread = param_bool(params, "stereo_spread", true);
        let delay_ms = param_delay_ms(params);
        let cache_dir = session.cache_dir.clone();
        let cache = ctx.analysis_cache.clone();
        let description = self.describe();
        let params = params.clone();

        Ok(PlanTask {
            job_name: format!("Plan: {}", description.display_name),
            run: Box::new(move |token| {
                let mut plan = new_plan(&description, &params);
                let total = tracks.len();

                for (i, track) in tracks.iter().enumerate() {
                    if token.is_cancelled() || !sleep_with_cancellation(token, delay_ms) {
                        return Ok(plan);
                    }

                    let peak = track_effective_peak(track, token, &cache);
                    if token.is_cancelled() {
                        return Ok(plan);
                    }
                    if peak <= 0.0 {
                        continue;
                    }

                    let delta_db = (target_peak_db - gain_to_db(peak)).clamp(-max_adjust_db, max_adjust_db);
                    let volume_db = (track.volume_db + delta_db).clamp(-60.0, 6.0);
                    plan.changes.push(ToolDiffEntry {
                        kind: ToolDiffKind::ParameterChanged,
                        summary: format!(
                            "Suggest volume for '{}' {:.2} dB -> {:.2} dB",
                            track.name, track.volume_db, volume_db
                        ),
                        track_index: track.track_index as i64,
                        target_name: track.name.clone(),
                        parameter_id: PARAM_TRACK_VOLUME.into(),
                        before_value: track.volume_db,
                        after_value: volume_db,
                        ..Default::default()
                    });

                    if stereo_spread {
                        let pan = (track.pan * 0.35 + spread_pan(i, total) * 0.65).clamp(-1.0, 1.0);
                        if (pan - track.pan).abs() > MIN_PAN_CHANGE {
                            plan.changes.push(ToolDiffEntry {
                                kind: ToolDiffKind::ParameterChanged,
                                summary: format!("Suggest pan for '{}' {:.2} -> {:.2}", track.name, track.pan, pan),
                                track_index: track.track_index as i64,
                                target_name: track.name.clone(),
                                parameter_id: PARAM_TRACK_PAN.into(),
                                before_value: track.pan,
                                after_value: pan,
                                ..Default::default()
                            });
                        }
                    }

                    token.set_progress((i + 1) as f32 / total as f32, format!("Analysed track {} / {}", i + 1, total));
                }

                plan.summary = format!("Auto-mix suggestions for {total} track(s) with model {}", model.version);
                if let Some(cache_dir) = &cache_dir {
                    let mut extra = Map::new();
                    extra.insert("model_version".into(), Value::String(model.version.clone()));
                    if let Err(e) = write_plan_artifact_with(cache_dir, &mut plan, extra) {
                        warn!(tool = %plan.tool_name, error = %e, "Failed to write plan artifact");
                    }
                }
                Ok(plan)
            }),
        })
    }

    fn apply(&self, host: &mut dyn SessionHost, plan: &ToolPlan) -> Result<()> {
        check_plan(plan, NAME, "auto-mix suggestion tool")?;

        host.perform_edit("Apply Auto-Mix Suggestions", false, &mut |editor: &mut dyn SessionEditor| {
            let mut applied = 0;
            for change in &plan.changes {
                if change.kind != ToolDiffKind::ParameterChanged {
                    continue;
                }
                let Some(index) = change.track() else { continue };
                let done = match change.parameter_id.as_str() {
                    PARAM_TRACK_VOLUME => editor.set_track_volume_db(index, change.after_value),
                    PARAM_TRACK_PAN => editor.set_track_pan(index, change.after_value),
                    _ => false,
                };
                if done {
                    applied += 1;
                }
            }
            finish_apply(applied, "No auto-mix changes from the plan could be applied")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{context, run_inline, write_mono_wav};
    use waive_core::{EditSession, Project};

    #[test]
    fn test_spread_pan() {
        assert_eq!(spread_pan(0, 1), 0.0);
        assert!((spread_pan(0, 3) + 0.6).abs() < 1e-12);
        assert!(spread_pan(1, 3).abs() < 1e-12);
        assert!((spread_pan(2, 3) - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_requires_model_before_selection() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new();
        let err = AutoMixSuggestions
            .prepare_plan(&context(dir.path()), &project.snapshot(), &json!({}))
            .err()
            .unwrap();
        assert!(matches!(err, WaiveError::ModelRequired(_)));
    }

    #[test]
    fn test_suggests_volume_and_pan() {
        let dir = tempfile::tempdir().unwrap();
        let quiet = dir.path().join("quiet.wav");
        let loud = dir.path().join("loud.wav");
        write_mono_wav(&quiet, 8000, 800, |_| 0.1);
        write_mono_wav(&loud, 8000, 800, |_| 0.9);

        let ctx = context(dir.path());
        ctx.models.install(MODEL_ID, None, false).unwrap();

        let mut project = Project::new();
        let t0 = project.add_track("Pad");
        let t1 = project.add_track("Lead");
        let a = project.add_wave_clip(t0, "Pad", &quiet, 0.0, 0.1).unwrap();
        let b = project.add_wave_clip(t1, "Lead", &loud, 0.0, 0.1).unwrap();
        project.select([b, a]);
        let mut session = EditSession::new(project);

        let tool = AutoMixSuggestions;
        let params = json!({ "max_adjust_db": 3.0 });
        let plan = run_inline(tool.prepare_plan(&ctx, &session.snapshot(), &params).unwrap()).unwrap();

        // Both tracks get a volume and a pan suggestion, ordered by track index
        assert_eq!(plan.changes.len(), 4);
        assert_eq!(plan.changes[0].target_name, "Pad");
        assert_eq!(plan.changes[0].after_value, 3.0);
        assert_eq!(plan.changes[2].after_value, -3.0);
        assert!((plan.changes[1].after_value + 0.39).abs() < 1e-9);

        tool.apply(&mut session, &plan).unwrap();
        let tracks = &session.project().tracks;
        assert_eq!(tracks[0].volume_db, 3.0);
        assert!((tracks[1].pan - 0.39).abs() < 1e-9);
    }

    #[test]
    fn test_missing_track_keeps_history() {
        let mut session = EditSession::new(Project::new());
        let mut plan = ToolPlan::new(NAME, "1.0.0", "plan", Value::Null);
        plan.changes.push(ToolDiffEntry {
            track_index: 1,
            parameter_id: PARAM_TRACK_PAN.into(),
            after_value: 0.3,
            ..ToolDiffEntry::new(ToolDiffKind::ParameterChanged)
        });

        let err = AutoMixSuggestions.apply(&mut session, &plan).err().unwrap();
        assert_eq!(err.to_string(), "No auto-mix changes from the plan could be applied");
        assert!(!session.can_undo());
    }
}
