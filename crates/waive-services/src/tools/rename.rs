//! Name tracks after the earliest clip they contain

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::{json, Value};

use waive_core::diff::PARAM_TRACK_NAME;
use waive_core::{Result, SessionEditor, SessionHost, SessionView, ToolDiffEntry, ToolDiffKind, ToolPlan, WaiveError};

use super::apply::{check_plan, finish_apply};
use super::{new_plan, param_bool, persist_plan, PlanTask, Tool, ToolContext, ToolDescription};

pub const NAME: &str = "rename_tracks_from_clips";

#[derive(Debug, Default)]
pub struct RenameTracksFromClips;

#[derive(Debug, Clone)]
struct RenameCandidate {
    track_index: usize,
    current_name: String,
    new_name: String,
}

/// Turn a clip name like `lead__vox_take2.wav` into `lead vox take2`
pub fn sanitise_track_name(clip_name: &str) -> String {
    let mut name = clip_name.trim().to_string();
    if name.contains('.') {
        name = Path::new(&name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
    }
    while name.contains("__") {
        name = name.replace("__", "_");
    }
    name.replace('_', " ").trim().to_string()
}

fn rename_candidates(session: &SessionView, selected_only: bool) -> Result<Vec<RenameCandidate>> {
    // track index -> (start, clip name), earliest wins and ties keep the first seen
    let mut earliest: BTreeMap<usize, (f64, String)> = BTreeMap::new();
    let mut consider = |track_index: usize, start: f64, name: &str| {
        let replace = earliest.get(&track_index).is_none_or(|(s, _)| start < *s);
        if replace {
            earliest.insert(track_index, (start, name.to_string()));
        }
    };

    if selected_only {
        let selected = session.selected_clips();
        if selected.is_empty() {
            return Err(WaiveError::precondition("No clips selected"));
        }
        for (track_index, clip) in selected {
            consider(track_index, clip.start_seconds, &clip.name);
        }
    } else {
        for track in &session.tracks {
            if let Some(clip) = track.earliest_clip() {
                consider(track.index, clip.start_seconds, &clip.name);
            }
        }
    }

    let candidates: Vec<RenameCandidate> = earliest
        .into_iter()
        .filter_map(|(track_index, (_, clip_name))| {
            let track = session.track(track_index)?;
            let new_name = sanitise_track_name(&clip_name);
            (!new_name.is_empty() && new_name != track.name).then(|| RenameCandidate {
                track_index,
                current_name: track.name.clone(),
                new_name,
            })
        })
        .collect();

    if candidates.is_empty() {
        return Err(WaiveError::precondition("No track renames required"));
    }
    Ok(candidates)
}

impl Tool for RenameTracksFromClips {
    fn describe(&self) -> ToolDescription {
        ToolDescription {
            name: NAME.into(),
            display_name: "Rename Tracks From Clips".into(),
            version: "1.0.0".into(),
            description: "Rename tracks using the earliest clip name found on each target track.".into(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "selected_only": {
                        "type": "boolean", "default": true,
                        "description": "Rename only tracks that contain selected clips"
                    }
                }
            }),
            default_params: json!({ "selected_only": true }),
            model_requirement: None,
        }
    }

    fn prepare_plan(&self, _ctx: &ToolContext, session: &SessionView, params: &Value) -> Result<PlanTask> {
        let selected_only = param_bool(params, "selected_only", true);
        let candidates = rename_candidates(session, selected_only)?;
        let cache_dir = session.cache_dir.clone();
        let description = self.describe();
        let params = params.clone();

        Ok(PlanTask {
            job_name: format!("Plan: {}", description.display_name),
            run: Box::new(move |token| {
                let mut plan = new_plan(&description, &params);
                let total = candidates.len();

                for (i, candidate) in candidates.iter().enumerate() {
                    if token.is_cancelled() {
                        return Ok(plan);
                    }
                    plan.changes.push(ToolDiffEntry {
                        kind: ToolDiffKind::TrackRenamed,
                        summary: format!(
                            "Rename track {} '{}' -> '{}'",
                            candidate.track_index + 1,
                            candidate.current_name,
                            candidate.new_name
                        ),
                        track_index: candidate.track_index as i64,
                        target_name: candidate.new_name.clone(),
                        parameter_id: PARAM_TRACK_NAME.into(),
                        before_text: candidate.current_name.clone(),
                        after_text: candidate.new_name.clone(),
                        ..Default::default()
                    });
                    token.set_progress((i + 1) as f32 / total as f32, format!("Prepared {} / {} rename(s)", i + 1, total));
                }

                let source = if selected_only { "selected clips" } else { "earliest track clips" };
                plan.summary = format!("Rename {} track(s) from {source}", plan.changes.len());
                persist_plan(cache_dir.as_deref(), &mut plan);
                Ok(plan)
            }),
        })
    }

    fn apply(&self, host: &mut dyn SessionHost, plan: &ToolPlan) -> Result<()> {
        check_plan(plan, NAME, "track rename tool")?;

        host.perform_edit("Rename Tracks From Clips", false, &mut |editor: &mut dyn SessionEditor| {
            let mut applied = 0;
            for change in &plan.changes {
                if change.kind != ToolDiffKind::TrackRenamed {
                    continue;
                }
                let Some(index) = change.track() else { continue };
                let new_name = if change.after_text.is_empty() { &change.target_name } else { &change.after_text };
                if new_name.is_empty() {
                    continue;
                }
                if editor.set_track_name(index, new_name) {
                    applied += 1;
                }
            }
            finish_apply(applied, "No track renames from the plan could be applied")
        })
    }
}
