//! Track fader moves toward a target peak

use serde_json::{json, Value};

use waive_core::diff::PARAM_TRACK_VOLUME;
use waive_core::{Result, SessionEditor, SessionHost, SessionView, ToolDiffEntry, ToolDiffKind, ToolPlan, WaiveError};

use super::apply::{check_plan, finish_apply};
use super::{
    analysable_tracks, new_plan, param_delay_ms, param_f64, persist_plan, track_effective_peak, PlanTask, Tool,
    ToolContext, ToolDescription,
};
use crate::analysis::gain_to_db;
use crate::progress::sleep_with_cancellation;

pub const NAME: &str = "gain_stage_selected_tracks";

#[derive(Debug, Default)]
pub struct GainStageSelectedTracks;

impl Tool for GainStageSelectedTracks {
    fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: NAME.into(),
            display_name: "Gain-Stage Selected Tracks".into(),
            version: "1.0.0".into(),
            description: "Estimate peak level from selected clips and adjust track fader levels toward a target peak."
                .into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "target_peak_db": {
                        "type": "number", "minimum": -24.0, "maximum": -3.0, "default": -12.0,
                        "description": "Target track peak in dBFS"
                    },
                    "analysis_delay_ms": {
                        "type": "integer", "minimum": 0, "default": 0,
                        "description": "Extra analysis delay per track for deterministic cancellation tests"
                    }
                }
            }),
            default_params: json!({ "target_peak_db": -12.0, "analysis_delay_ms": 0 }),
            model_requirement: None,
        }
    }

    fn prepare_plan(&self, ctx: &ToolContext, session: &SessionView, params: &Value) -> Result<PlanTask> {
        if session.selection.is_empty() {
            return Err(WaiveError::precondition("No clips selected"));
        }
        let tracks = analysable_tracks(session);
        if tracks.is_empty() {
            return Err(WaiveError::precondition("Selected clips do not map to analysable audio tracks"));
        }

        let target_peak_db = param_f64(params, "target_peak_db", -12.0).clamp(-24.0, -3.0);
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

                    let delta_db = target_peak_db - gain_to_db(peak);
                    let new_volume_db = (track.volume_db + delta_db).clamp(-60.0, 6.0);

                    plan.changes.push(ToolDiffEntry {
                        kind: ToolDiffKind::ParameterChanged,
                        summary: format!(
                            "Set track '{}' volume {:.2} dB -> {:.2} dB",
                            track.name, track.volume_db, new_volume_db
                        ),
                        track_index: track.track_index as i64,
                        target_name: track.name.clone(),
                        parameter_id: PARAM_TRACK_VOLUME.into(),
                        before_value: track.volume_db,
                        after_value: new_volume_db,
                        ..Default::default()
                    });
                    token.set_progress((i + 1) as f32 / total as f32, format!("Analysed track {} / {}", i + 1, total));
                }

                plan.summary = format!(
                    "Gain-stage {} track(s) to target peak {:.1} dBFS",
                    plan.changes.len(),
                    target_peak_db
                );
                persist_plan(cache_dir.as_deref(), &mut plan);
                Ok(plan)
            }),
        })
    }

    fn apply(&self, host: &mut dyn SessionHost, plan: &ToolPlan) -> Result<()> {
        check_plan(plan, NAME, "gain-stage tool")?;

        host.perform_edit("Gain-Stage Selected Tracks", false, &mut |editor: &mut dyn SessionEditor| {
            let mut applied = 0;
            for change in &plan.changes {
                if change.kind != ToolDiffKind::ParameterChanged || change.parameter_id != PARAM_TRACK_VOLUME {
                    continue;
                }
                let Some(index) = change.track() else { continue };
                if editor.set_track_volume_db(index, change.after_value) {
                    applied += 1;
                }
            }
            finish_apply(applied, "No gain-stage changes from the plan could be applied")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{context, run_inline, write_mono_wav};
    use waive_core::{EditSession, Project};

    #[test]
    fn test_uses_loudest_clip_with_clip_gain() {
        let dir = tempfile::tempdir().unwrap();
        let quiet = dir.path().join("quiet.wav");
        write_mono_wav(&quiet, 8000, 2000, |_| 0.25);

        let mut project = Project::new();
        let t = project.add_track("Gtr");
        let a = project.add_wave_clip(t, "a", &quiet, 0.0, 0.25).unwrap();
        let b = project.add_wave_clip(t, "b", &quiet, 1.0, 1.25).unwrap();
        project.tracks[t].clips[1].gain_db = 6.0;
        project.tracks[t].volume_db = -2.0;
        project.select([a, b]);
        let mut session = EditSession::new(project);

        let tool = GainStageSelectedTracks;
        let task = tool
            .prepare_plan(&context(dir.path()), &session.snapshot(), &json!({ "target_peak_db": -12.0 }))
            .unwrap();
        let plan = run_inline(task).unwrap();
        assert_eq!(plan.changes.len(), 1);
        assert!(plan.summary.starts_with("Gain-stage 1 track(s) to target peak -12.0 dBFS"));

        // 0.25 boosted 6 dB peaks near -6 dBFS, so the fader drops about 6 dB
        let change = &plan.changes[0];
        assert_eq!(change.parameter_id, PARAM_TRACK_VOLUME);
        assert!((change.after_value - (-2.0 - 6.0)).abs() < 0.1, "after {}", change.after_value);

        tool.apply(&mut session, &plan).unwrap();
        assert!((session.project().tracks[0].volume_db - change.after_value).abs() < 1e-9);
    }

    #[test]
    fn test_target_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("x.wav");
        write_mono_wav(&wav, 8000, 100, |_| 0.5);
        let mut project = Project::new();
        let t = project.add_track("T");
        let a = project.add_wave_clip(t, "a", &wav, 0.0, 0.1).unwrap();
        project.select([a]);

        let task = GainStageSelectedTracks
            .prepare_plan(&context(dir.path()), &project.snapshot(), &json!({ "target_peak_db": 10.0 }))
            .unwrap();
        let plan = run_inline(task).unwrap();
        assert!(plan.summary.ends_with("-3.0 dBFS"));
    }

    #[test]
    fn test_missing_track_keeps_history() {
        let mut session = EditSession::new(Project::new());
        let mut plan = ToolPlan::new(NAME, "1.0.0", "plan", Value::Null);
        plan.changes.push(ToolDiffEntry {
            track_index: 4,
            parameter_id: PARAM_TRACK_VOLUME.into(),
            after_value: -3.0,
            ..ToolDiffEntry::new(ToolDiffKind::ParameterChanged)
        });

        assert!(GainStageSelectedTracks.apply(&mut session, &plan).is_err());
        assert!(!session.can_undo());
    }
}
