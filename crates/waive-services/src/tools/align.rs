//! Line up selected clips on their first detected transient

use serde_json::{json, Value};

use waive_core::diff::PARAM_CLIP_START;
use waive_core::{Result, SessionEditor, SessionHost, SessionView, ToolDiffEntry, ToolDiffKind, ToolPlan, WaiveError};

use super::apply::{check_plan, finish_apply};
use super::{analysable_clips, new_plan, param_delay_ms, param_f64, persist_plan, ClipInput, PlanTask, Tool, ToolContext, ToolDescription};
use crate::analysis::{analyse_audio_file, db_to_gain};
use crate::progress::sleep_with_cancellation;

pub const NAME: &str = "align_clips_by_transient";

/// Moves smaller than this are dropped from the plan
const MIN_MOVE_SECONDS: f64 = 0.001;

#[derive(Debug, Default)]
pub struct AlignClipsByTransient;

struct ClipTransient {
    clip: ClipInput,
    /// Timeline position of the transient
    transient_seconds: f64,
}

impl Tool for AlignClipsByTransient {
    fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: NAME.into(),
            display_name: "Align Clips By Transient".into(),
            version: "1.0.0".into(),
            description: "Align selected clips by their first detected transient.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "threshold_db": {
                        "type": "number", "minimum": -80.0, "maximum": -6.0, "default": -30.0,
                        "description": "Transient detection threshold in dBFS"
                    },
                    "max_shift_ms": {
                        "type": "number", "minimum": 1.0, "maximum": 5000.0, "default": 500.0,
                        "description": "Maximum clip shift in milliseconds"
                    },
                    "analysis_delay_ms": {
                        "type": "integer", "minimum": 0, "default": 0,
                        "description": "Extra analysis delay per clip for deterministic cancellation tests"
                    }
                }
            }),
            default_params: json!({ "threshold_db": -30.0, "max_shift_ms": 500.0, "analysis_delay_ms": 0 }),
            model_requirement: None,
        }
    }

    fn prepare_plan(&self, ctx: &ToolContext, session: &SessionView, params: &Value) -> Result<PlanTask> {
        if session.selection.len() < 2 {
            return Err(WaiveError::precondition("Select at least two clips for transient alignment"));
        }
        let clips = analysable_clips(session);
        if clips.len() < 2 {
            return Err(WaiveError::precondition("Selected clips are not analysable audio clips"));
        }

        let threshold_gain = db_to_gain(param_f64(params, "threshold_db", -30.0).clamp(-80.0, -6.0)) as f32;
        let rise_gain = (threshold_gain * 0.5).max(0.01);
        let max_shift_seconds = param_f64(params, "max_shift_ms", 500.0).clamp(1.0, 5000.0) / 1000.0;
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
                let mut analysed = Vec::with_capacity(total);

                for (i, clip) in clips.into_iter().enumerate() {
                    if token.is_cancelled() || !sleep_with_cancellation(token, delay_ms) {
                        return Ok(plan);
                    }
                    let fraction = (i + 1) as f32 / total as f32;

                    let analysis = analyse_audio_file(
                        &clip.source_file,
                        threshold_gain,
                        rise_gain,
                        || token.is_cancelled(),
                        Some(&cache),
                    );
                    if analysis.cancelled {
                        return Ok(plan);
                    }
                    if !analysis.valid || analysis.sample_rate == 0 || analysis.first_transient_sample < 0 {
                        token.set_progress(fraction, format!("Skipped clip: {}", clip.name));
                        continue;
                    }

                    let source_seconds = analysis.first_transient_sample as f64 / f64::from(analysis.sample_rate);
                    let transient_seconds = clip.start_seconds + source_seconds - clip.offset_seconds;
                    analysed.push(ClipTransient { clip, transient_seconds });
                    token.set_progress(fraction, format!("Analysed {} / {}", i + 1, total));
                }

                // A single analysable clip has nothing to align against
                if analysed.len() >= 2 {
                    let reference = analysed
                        .iter()
                        .map(|a| a.transient_seconds)
                        .fold(f64::INFINITY, f64::min);

                    for ClipTransient { clip, transient_seconds } in &analysed {
                        let shift = (reference - transient_seconds).clamp(-max_shift_seconds, max_shift_seconds);
                        let new_start = (clip.start_seconds + shift).max(0.0);
                        if (new_start - clip.start_seconds).abs() < MIN_MOVE_SECONDS {
                            continue;
                        }
                        plan.changes.push(ToolDiffEntry {
                            kind: ToolDiffKind::ClipMoved,
                            summary: format!("Move clip '{}' {:.3} s -> {:.3} s", clip.name, clip.start_seconds, new_start),
                            track_index: clip.track_index as i64,
                            clip_id: clip.clip_id,
                            target_name: clip.name.clone(),
                            parameter_id: PARAM_CLIP_START.into(),
                            before_value: clip.start_seconds,
                            after_value: new_start,
                            ..Default::default()
                        });
                    }
                }

                plan.summary = format!("Align {} clip(s) by detected transient", plan.changes.len());
                persist_plan(cache_dir.as_deref(), &mut plan);
                Ok(plan)
            }),
        })
    }

    fn apply(&self, host: &mut dyn SessionHost, plan: &ToolPlan) -> Result<()> {
        check_plan(plan, NAME, "transient align tool")?;

        host.perform_edit("Align Clips By Transient", false, &mut |editor: &mut dyn SessionEditor| {
            let mut applied = 0;
            for change in &plan.changes {
                if change.kind != ToolDiffKind::ClipMoved || change.parameter_id != PARAM_CLIP_START {
                    continue;
                }
                if editor.set_clip_start_seconds(change.clip_id, change.after_value, true) {
                    applied += 1;
                }
            }
            finish_apply(applied, "No transient alignment changes from the plan could be applied")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{context, run_inline, write_mono_wav};
    use waive_core::{EditSession, Project};

    fn click_at(path: &std::path::Path, onset: usize) {
        write_mono_wav(path, 8000, 8000, |i| if i >= onset && i < onset + 200 { 0.8 } else { 0.0 });
    }

    #[test]
    fn test_requires_two_selected_clips() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("a.wav");
        click_at(&wav, 100);
        let mut project = Project::new();
        let t = project.add_track("Drums");
        let a = project.add_wave_clip(t, "Kick", &wav, 0.0, 1.0).unwrap();
        project.select([a]);

        let err = AlignClipsByTransient
            .prepare_plan(&context(dir.path()), &project.snapshot(), &json!({}))
            .err()
            .unwrap();
        assert_eq!(err.to_string(), "Select at least two clips for transient alignment");
    }

    #[test]
    fn test_moves_late_clip_to_reference() {
        let dir = tempfile::tempdir().unwrap();
        let early = dir.path().join("early.wav");
        let late = dir.path().join("late.wav");
        click_at(&early, 800); // 0.1 s
        click_at(&late, 2400); // 0.3 s

        let mut project = Project::new();
        let t0 = project.add_track("Kick");
        let t1 = project.add_track("Snare");
        let a = project.add_wave_clip(t0, "Kick", &early, 1.0, 2.0).unwrap();
        let b = project.add_wave_clip(t1, "Snare", &late, 1.0, 2.0).unwrap();
        project.select([a, b]);
        let mut session = EditSession::new(project);

        let tool = AlignClipsByTransient;
        let plan = run_inline(tool.prepare_plan(&context(dir.path()), &session.snapshot(), &json!({})).unwrap()).unwrap();

        assert_eq!(plan.changes.len(), 1);
        let change = &plan.changes[0];
        assert_eq!(change.clip_id, b);
        assert!((change.after_value - 0.8).abs() < 1e-3);
        assert_eq!(plan.summary, "Align 1 clip(s) by detected transient");

        tool.apply(&mut session, &plan).unwrap();
        let moved = session.project().get_clip(b).unwrap();
        assert!((moved.start_seconds - 0.8).abs() < 1e-3);
        assert!((moved.length_seconds() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_shift_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let early = dir.path().join("early.wav");
        let late = dir.path().join("late.wav");
        click_at(&early, 0);
        click_at(&late, 4000); // 0.5 s

        let mut project = Project::new();
        let t = project.add_track("Perc");
        let a = project.add_wave_clip(t, "A", &early, 2.0, 3.0).unwrap();
        let b = project.add_wave_clip(t, "B", &late, 2.0, 3.0).unwrap();
        project.select([a, b]);

        let plan = run_inline(
            AlignClipsByTransient
                .prepare_plan(&context(dir.path()), &project.snapshot(), &json!({ "max_shift_ms": 100.0 }))
                .unwrap(),
        )
        .unwrap();
        assert_eq!(plan.changes.len(), 1);
        assert!((plan.changes[0].after_value - 1.9).abs() < 1e-6);
    }

    #[test]
    fn test_missing_clip_keeps_history() {
        let mut session = EditSession::new(Project::new());
        let mut plan = ToolPlan::new(NAME, "1.0.0", "plan", Value::Null);
        plan.changes.push(ToolDiffEntry {
            clip_id: waive_core::ClipId(42),
            parameter_id: PARAM_CLIP_START.into(),
            after_value: 1.0,
            ..ToolDiffEntry::new(ToolDiffKind::ClipMoved)
        });

        let err = AlignClipsByTransient.apply(&mut session, &plan).err().unwrap();
        assert_eq!(err.to_string(), "No transient alignment changes from the plan could be applied");
        assert!(!session.can_undo());
    }

    #[test]
    fn test_single_transient_still_persists_plan() {
        let dir = tempfile::tempdir().unwrap();
        let click = dir.path().join("click.wav");
        let quiet = dir.path().join("quiet.wav");
        click_at(&click, 800);
        write_mono_wav(&quiet, 8000, 8000, |_| 0.0);

        let mut project = Project::with_cache_dir(dir.path().join("cache"));
        let t = project.add_track("Perc");
        let a = project.add_wave_clip(t, "Click", &click, 0.0, 1.0).unwrap();
        let b = project.add_wave_clip(t, "Quiet", &quiet, 0.0, 1.0).unwrap();
        project.select([a, b]);

        let plan = run_inline(
            AlignClipsByTransient
                .prepare_plan(&context(dir.path()), &project.snapshot(), &json!({}))
                .unwrap(),
        )
        .unwrap();
        assert!(plan.changes.is_empty());
        assert_eq!(plan.summary, "Align 0 clip(s) by detected transient");
        assert!(plan.artifact_file.as_ref().is_some_and(|p| p.is_file()));
    }
}
