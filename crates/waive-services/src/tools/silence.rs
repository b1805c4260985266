//! Trim leading and trailing silence from clips

use serde_json::{json, Value};

use waive_core::diff::{PARAM_CLIP_END, PARAM_CLIP_START};
use waive_core::{
    ClipId, Result, SessionEditor, SessionHost, SessionView, ToolDiffEntry, ToolDiffKind, ToolPlan, WaiveError,
};

use super::apply::{check_plan, finish_apply};
use super::{analysable_clips, new_plan, param_delay_ms, param_f64, persist_plan, PlanTask, Tool, ToolContext, ToolDescription};
use crate::analysis::{analyse_audio_file, db_to_gain};
use crate::progress::sleep_with_cancellation;

pub const NAME: &str = "detect_silence_and_cut_regions";

/// Shortest clip interior a trim may leave
const MIN_INTERIOR_SECONDS: f64 = 0.01;

#[derive(Debug, Default)]
pub struct DetectSilenceAndCutRegions;

impl Tool for DetectSilenceAndCutRegions {
    fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: NAME.into(),
            display_name: "Detect Silence And Cut Regions".into(),
            version: "1.0.0".into(),
            description: "Trim leading and trailing silence from selected audio clips.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "threshold_db": {
                        "type": "number", "minimum": -80.0, "maximum": -6.0, "default": -42.0,
                        "description": "Silence threshold in dBFS"
                    },
                    "min_trim_ms": {
                        "type": "number", "minimum": 0.0, "maximum": 2000.0, "default": 20.0,
                        "description": "Minimum trim size per side in milliseconds"
                    },
                    "padding_ms": {
                        "type": "number", "minimum": 0.0, "maximum": 250.0, "default": 5.0,
                        "description": "Padding to keep around detected content in milliseconds"
                    },
                    "analysis_delay_ms": {
                        "type": "integer", "minimum": 0, "default": 0,
                        "description": "Extra analysis delay per clip for deterministic cancellation tests"
                    }
                }
            }),
            default_params: json!({
                "threshold_db": -42.0, "min_trim_ms": 20.0, "padding_ms": 5.0, "analysis_delay_ms": 0
            }),
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

        let threshold_gain = db_to_gain(param_f64(params, "threshold_db", -42.0).clamp(-80.0, -6.0)) as f32;
        let min_trim_seconds = param_f64(params, "min_trim_ms", 20.0).clamp(0.0, 2000.0) / 1000.0;
        let padding_seconds = param_f64(params, "padding_ms", 5.0).clamp(0.0, 250.0) / 1000.0;
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
                let mut trimmed_clips = 0;

                for (i, clip) in clips.iter().enumerate() {
                    if token.is_cancelled() || !sleep_with_cancellation(token, delay_ms) {
                        return Ok(plan);
                    }
                    let fraction = (i + 1) as f32 / total as f32;

                    let analysis = analyse_audio_file(
                        &clip.source_file,
                        threshold_gain,
                        threshold_gain,
                        || token.is_cancelled(),
                        Some(&cache),
                    );
                    if analysis.cancelled {
                        return Ok(plan);
                    }
                    if !analysis.has_activity() {
                        token.set_progress(fraction, format!("Skipped silent clip: {}", clip.name));
                        continue;
                    }

                    let length = clip.end_seconds - clip.start_seconds;
                    if length <= MIN_INTERIOR_SECONDS {
                        continue;
                    }

                    // Activity bounds relative to the clip start
                    let rate = f64::from(analysis.sample_rate);
                    let active_start = (analysis.first_above_sample as f64 / rate - clip.offset_seconds - padding_seconds)
                        .clamp(0.0, length);
                    let active_end = (analysis.last_above_sample as f64 / rate - clip.offset_seconds + padding_seconds)
                        .clamp(0.0, length);

                    let new_start = (clip.start_seconds + active_start)
                        .clamp(clip.start_seconds, clip.end_seconds - MIN_INTERIOR_SECONDS);
                    let new_end = (clip.start_seconds + active_end)
                        .clamp(new_start + MIN_INTERIOR_SECONDS, clip.end_seconds);

                    let trim_start = new_start - clip.start_seconds;
                    let trim_end = clip.end_seconds - new_end;
                    let mut changed = false;

                    if trim_start >= min_trim_seconds {
                        plan.changes.push(ToolDiffEntry {
                            kind: ToolDiffKind::ClipTrimmed,
                            summary: format!("Trim start of clip '{}' by {:.3} s", clip.name, trim_start),
                            track_index: clip.track_index as i64,
                            clip_id: clip.clip_id,
                            target_name: clip.name.clone(),
                            parameter_id: PARAM_CLIP_START.into(),
                            before_value: clip.start_seconds,
                            after_value: new_start,
                            ..Default::default()
                        });
                        changed = true;
                    }
                    if trim_end >= min_trim_seconds {
                        plan.changes.push(ToolDiffEntry {
                            kind: ToolDiffKind::ClipTrimmed,
                            summary: format!("Trim end of clip '{}' by {:.3} s", clip.name, trim_end),
                            track_index: clip.track_index as i64,
                            clip_id: clip.clip_id,
                            target_name: clip.name.clone(),
                            parameter_id: PARAM_CLIP_END.into(),
                            before_value: clip.end_seconds,
                            after_value: new_end,
                            ..Default::default()
                        });
                        changed = true;
                    }
                    if changed {
                        trimmed_clips += 1;
                    }
                    token.set_progress(fraction, format!("Analysed {} / {}", i + 1, total));
                }

                plan.summary = format!("Trim silence on {trimmed_clips} clip(s)");
                persist_plan(cache_dir.as_deref(), &mut plan);
                Ok(plan)
            }),
        })
    }

    fn apply(&self, host: &mut dyn SessionHost, plan: &ToolPlan) -> Result<()> {
        check_plan(plan, NAME, "silence cut tool")?;

        let trims = collect_trims(plan);
        if trims.is_empty() {
            return Err(WaiveError::NothingApplied("No clip trim changes in plan".into()));
        }

        host.perform_edit("Detect Silence And Cut Regions", false, &mut |editor: &mut dyn SessionEditor| {
            let mut applied = 0;
            for (id, trim) in &trims {
                let Some(clip) = editor.find_clip(*id) else { continue };
                let new_start = trim.start.unwrap_or(clip.start_seconds);
                let new_end = trim.end.unwrap_or(clip.end_seconds);
                if new_end <= new_start + MIN_INTERIOR_SECONDS {
                    continue;
                }
                editor.set_clip_start_seconds(*id, new_start, false);
                editor.set_clip_end_seconds(*id, new_end);
                applied += 1;
            }
            finish_apply(applied, "No clip trim changes from the plan could be applied")
        })
    }
}

#[derive(Debug, Default, PartialEq)]
struct ClipTrim {
    start: Option<f64>,
    end: Option<f64>,
}

/// Start/end trims per clip, in the order clips first appear in the plan
fn collect_trims(plan: &ToolPlan) -> Vec<(ClipId, ClipTrim)> {
    let mut trims: Vec<(ClipId, ClipTrim)> = Vec::new();
    for change in plan.changes.iter().filter(|c| c.kind == ToolDiffKind::ClipTrimmed) {
        let slot = match trims.iter().position(|(id, _)| *id == change.clip_id) {
            Some(slot) => slot,
            None => {
                trims.push((change.clip_id, ClipTrim::default()));
                trims.len() - 1
            }
        };
        let trim = &mut trims[slot].1;
        match change.parameter_id.as_str() {
            PARAM_CLIP_START => trim.start = Some(change.after_value),
            PARAM_CLIP_END => trim.end = Some(change.after_value),
            _ => {}
        }
    }
    trims.retain(|(_, t)| t.start.is_some() || t.end.is_some());
    trims
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{context, run_inline, write_mono_wav};
    use waive_core::{EditSession, Project};

    #[test]
    fn test_silent_source_yields_no_changes() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("silence.wav");
        write_mono_wav(&wav, 8000, 8000, |_| 0.0);

        let mut project = Project::new();
        let t = project.add_track("Room");
        let a = project.add_wave_clip(t, "Room", &wav, 0.0, 1.0).unwrap();
        project.select([a]);

        let task = DetectSilenceAndCutRegions
            .prepare_plan(&context(dir.path()), &project.snapshot(), &json!({}))
            .unwrap();
        let plan = run_inline(task).unwrap();
        assert!(plan.changes.is_empty());
        assert_eq!(plan.summary, "Trim silence on 0 clip(s)");
    }

    #[test]
    fn test_trims_only_large_enough_regions() {
        let dir = tempfile::tempdir().unwrap();
        let wav = dir.path().join("late.wav");
        // Content from 0.5 s to the end
        write_mono_wav(&wav, 8000, 8000, |i| if i >= 4000 { 0.5 } else { 0.0 });

        let mut project = Project::new();
        let t = project.add_track("Vox");
        let a = project.add_wave_clip(t, "Vox", &wav, 0.0, 1.0).unwrap();
        project.select([a]);
        let mut session = EditSession::new(project);

        let tool = DetectSilenceAndCutRegions;
        let params = json!({ "threshold_db": -30.0, "min_trim_ms": 50.0, "padding_ms": 0.0 });
        let plan = run_inline(tool.prepare_plan(&context(dir.path()), &session.snapshot(), &params).unwrap()).unwrap();

        assert_eq!(plan.changes.len(), 1);
        assert_eq!(plan.changes[0].parameter_id, PARAM_CLIP_START);
        assert!(plan.changes[0].summary.starts_with("Trim start of clip 'Vox' by 0.500 s"));

        tool.apply(&mut session, &plan).unwrap();
        let clip = session.project().get_clip(a).unwrap();
        assert!((clip.start_seconds - 0.5).abs() < 1e-3);
        assert!((clip.end_seconds - 1.0).abs() < 1e-9);
        assert!((clip.offset_seconds - 0.5).abs() < 1e-3);
    }

    fn trim_entry(clip: u64, parameter: &str, after: f64) -> ToolDiffEntry {
        ToolDiffEntry {
            clip_id: ClipId(clip),
            parameter_id: parameter.into(),
            after_value: after,
            ..ToolDiffEntry::new(ToolDiffKind::ClipTrimmed)
        }
    }

    #[test]
    fn test_trims_follow_plan_order() {
        let mut plan = ToolPlan::new(NAME, "1.0.0", "plan", Value::Null);
        plan.changes.push(trim_entry(7, PARAM_CLIP_END, 3.0));
        plan.changes.push(trim_entry(3, PARAM_CLIP_START, 0.5));
        plan.changes.push(trim_entry(7, PARAM_CLIP_START, 1.0));

        let trims = collect_trims(&plan);
        let ids: Vec<ClipId> = trims.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![ClipId(7), ClipId(3)]);
        assert_eq!(trims[0].1, ClipTrim { start: Some(1.0), end: Some(3.0) });
    }

    #[test]
    fn test_unapplicable_trim_keeps_history() {
        let mut project = Project::new();
        let t = project.add_track("Vox");
        project.add_midi_clip(t, "Notes", 0.0, 1.0).unwrap();
        let mut session = EditSession::new(project);

        let mut plan = ToolPlan::new(NAME, "1.0.0", "plan", Value::Null);
        plan.changes.push(trim_entry(999, PARAM_CLIP_START, 0.5));

        let err = DetectSilenceAndCutRegions.apply(&mut session, &plan).err().unwrap();
        assert_eq!(err.to_string(), "No clip trim changes from the plan could be applied");
        assert!(!session.can_undo());
    }
}
