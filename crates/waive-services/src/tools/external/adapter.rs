//! Adapts a manifest tool to the common tool interface

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tracing::error;

use waive_core::diff::PARAM_CLIP_FILE;
use waive_core::{Result, SessionEditor, SessionHost, SessionView, ToolDiffEntry, ToolDiffKind, ToolPlan, WaiveError};

use super::manifest::ExternalToolManifest;
use super::runner::ExternalToolRunner;
use crate::tools::apply::{check_plan, finish_apply, is_allowed_output_file};
use crate::tools::{new_plan, PlanTask, Tool, ToolContext, ToolDescription};

/// Exposes a manifest tool through the common [`Tool`] interface
pub struct ExternalTool {
    manifest: ExternalToolManifest,
    runner: Arc<ExternalToolRunner>,
}

struct AudioInput {
    file: PathBuf,
    clip_name: String,
    start_seconds: f64,
    end_seconds: f64,
}

impl ExternalTool {
    pub fn new(manifest: ExternalToolManifest, runner: Arc<ExternalToolRunner>) -> Self {
        Self { manifest, runner }
    }

    pub fn manifest(&self) -> &ExternalToolManifest {
        &self.manifest
    }

    fn audio_input(session: &SessionView) -> Result<AudioInput> {
        let (_, clip) = session
            .selected_clips()
            .into_iter()
            .next()
            .ok_or_else(|| WaiveError::precondition("No clips selected (external tool requires audio input)"))?;
        if !clip.is_wave() {
            return Err(WaiveError::precondition("Selected clip is not a wave audio clip"));
        }
        let file = clip
            .readable_source()
            .ok_or_else(|| WaiveError::precondition("Selected clip audio file not found"))?;
        Ok(AudioInput {
            file: file.clone(),
            clip_name: clip.name.clone(),
            start_seconds: clip.start_seconds,
            end_seconds: clip.end_seconds,
        })
    }
}

impl Tool for ExternalTool {
    fn describe(&self) -> ToolDescription {
        let m = &self.manifest;
        ToolDescription {
            name: m.name.clone(),
            display_name: m.display_name.clone(),
            version: m.version.clone(),
            description: m.description.clone(),
            input_schema: m.input_schema.clone(),
            default_params: m.default_params.clone(),
            model_requirement: None,
        }
    }

    fn prepare_plan(&self, _ctx: &ToolContext, session: &SessionView, params: &Value) -> Result<PlanTask> {
        let input = if self.manifest.accepts_audio_input { Some(Self::audio_input(session)?) } else { None };

        let description = self.describe();
        let manifest = self.manifest.clone();
        let runner = self.runner.clone();
        let params = params.clone();

        Ok(PlanTask {
            job_name: manifest.display_name.clone(),
            run: Box::new(move |token| {
                let mut plan = new_plan(&description, &params);
                let output = match runner.run(&manifest, &params, input.as_ref().map(|i| i.file.as_path()), token) {
                    Ok(output) => output,
                    Err(e) => {
                        error!(tool = %manifest.name, error = %e, "External tool failed");
                        plan.summary = format!("External tool failed: {e}");
                        return Ok(plan);
                    }
                };
                plan.summary = output.message;

                if let Some(audio) = output.output_audio_file.filter(|_| manifest.produces_audio_output) {
                    let (target_name, start, end) = match &input {
                        Some(i) => (format!("{} [processed]", i.clip_name), i.start_seconds, i.end_seconds),
                        None => ("External Tool Output".to_string(), 0.0, 0.0),
                    };
                    plan.changes.push(ToolDiffEntry {
                        kind: ToolDiffKind::ClipInserted,
                        summary: "Insert processed audio clip".into(),
                        target_name,
                        parameter_id: PARAM_CLIP_FILE.into(),
                        before_value: start,
                        after_value: end,
                        after_text: audio.display().to_string(),
                        ..Default::default()
                    });
                }
                Ok(plan)
            }),
        })
    }

    fn apply(&self, host: &mut dyn SessionHost, plan: &ToolPlan) -> Result<()> {
        if plan.tool_name != self.manifest.name {
            return Err(WaiveError::PlanMismatch("external tool".into()));
        }
        if !self.manifest.produces_audio_output {
            return Ok(());
        }
        check_plan(plan, &self.manifest.name, "external tool")?;

        let temp_root = std::env::temp_dir();
        let track_name = format!("{} Output", self.manifest.display_name);
        host.perform_edit(&self.manifest.display_name, false, &mut |editor: &mut dyn SessionEditor| {
            let track = editor.find_or_create_track(&track_name);
            let mut applied = 0;
            for change in plan.changes.iter().filter(|c| c.kind == ToolDiffKind::ClipInserted) {
                let file = PathBuf::from(&change.after_text);
                if !is_allowed_output_file(&file, &temp_root) {
                    continue;
                }
                if editor
                    .insert_wave_clip(track, &change.target_name, &file, change.before_value, change.after_value)
                    .is_some()
                {
                    applied += 1;
                }
            }
            finish_apply(applied, "No output clips from the plan could be inserted")
        })
    }
}
