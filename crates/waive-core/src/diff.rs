//! Tool plans and the semantic diff entries they carry

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::clip::ClipId;

pub const PARAM_CLIP_START: &str = "clip.start_seconds";
pub const PARAM_CLIP_END: &str = "clip.end_seconds";
pub const PARAM_CLIP_GAIN: &str = "clip.gain_db";
pub const PARAM_CLIP_FILE: &str = "clip.file_path";
pub const PARAM_TRACK_NAME: &str = "track.name";
pub const PARAM_TRACK_VOLUME: &str = "track.volume_db";
pub const PARAM_TRACK_PAN: &str = "track.pan";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolDiffKind {
    TrackAdded,
    TrackRemoved,
    TrackRenamed,
    ClipInserted,
    ClipMoved,
    ClipTrimmed,
    ClipFadeChanged,
    ParameterChanged,
    AutomationChanged,
}

impl ToolDiffKind {
    pub const ALL: [ToolDiffKind; 9] = [
        Self::TrackAdded,
        Self::TrackRemoved,
        Self::TrackRenamed,
        Self::ClipInserted,
        Self::ClipMoved,
        Self::ClipTrimmed,
        Self::ClipFadeChanged,
        Self::ParameterChanged,
        Self::AutomationChanged,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TrackAdded => "track_added",
            Self::TrackRemoved => "track_removed",
            Self::TrackRenamed => "track_renamed",
            Self::ClipInserted => "clip_inserted",
            Self::ClipMoved => "clip_moved",
            Self::ClipTrimmed => "clip_trimmed",
            Self::ClipFadeChanged => "clip_fade_changed",
            Self::ParameterChanged => "parameter_changed",
            Self::AutomationChanged => "automation_changed",
        }
    }
}

impl fmt::Display for ToolDiffKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolDiffKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown diff kind: {s}"))
    }
}

/// One semantic change inside a plan.
///
/// For `ClipInserted`, `before_value`/`after_value` hold the clip start/end
/// in seconds and `after_text` the absolute path of the audio to insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolDiffEntry {
    pub kind: ToolDiffKind,
    pub summary: String,
    /// -1 when the change does not target a track
    pub track_index: i64,
    pub clip_id: ClipId,
    pub target_name: String,
    pub parameter_id: String,
    pub before_text: String,
    pub after_text: String,
    pub before_value: f64,
    pub after_value: f64,
}

impl Default for ToolDiffEntry {
    fn default() -> Self {
        Self {
            kind: ToolDiffKind::ParameterChanged,
            summary: String::new(),
            track_index: -1,
            clip_id: ClipId(0),
            target_name: String::new(),
            parameter_id: String::new(),
            before_text: String::new(),
            after_text: String::new(),
            before_value: 0.0,
            after_value: 0.0,
        }
    }
}

impl ToolDiffEntry {
    pub fn new(kind: ToolDiffKind) -> Self {
        Self { kind, ..Default::default() }
    }

    /// Target track index, if the entry carries one
    pub fn track(&self) -> Option<usize> {
        usize::try_from(self.track_index).ok()
    }
}

/// Immutable, declarative description of proposed session changes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPlan {
    pub tool_name: String,
    pub tool_version: String,
    pub plan_id: String,
    pub summary: String,
    pub input_params: serde_json::Value,
    #[serde(serialize_with = "serialize_path", deserialize_with = "deserialize_path")]
    pub artifact_file: Option<PathBuf>,
    pub changes: Vec<ToolDiffEntry>,
}

impl ToolPlan {
    pub fn new(
        tool_name: impl Into<String>,
        tool_version: impl Into<String>,
        plan_id: impl Into<String>,
        input_params: serde_json::Value,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_version: tool_version.into(),
            plan_id: plan_id.into(),
            input_params,
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

// The artifact path is written as a plain string, empty when absent.
fn serialize_path<S: Serializer>(path: &Option<PathBuf>, s: S) -> Result<S::Ok, S::Error> {
    match path {
        Some(p) => s.serialize_str(&p.to_string_lossy()),
        None => s.serialize_str(""),
    }
}

fn deserialize_path<'de, D: Deserializer<'de>>(d: D) -> Result<Option<PathBuf>, D::Error> {
    let raw = Option::<String>::deserialize(d)?;
    Ok(raw.filter(|s| !s.is_empty()).map(PathBuf::from))
}

/// Human-readable multi-line description of a plan for preview panels
pub fn summarise_plan(plan: &ToolPlan) -> String {
    let mut text = format!("Tool: {}", plan.tool_name);
    if !plan.tool_version.is_empty() {
        text.push_str(&format!(" v{}", plan.tool_version));
    }
    if !plan.plan_id.is_empty() {
        text.push_str(&format!("\nPlan ID: {}", plan.plan_id));
    }
    if !plan.summary.is_empty() {
        text.push_str(&format!("\nSummary: {}", plan.summary));
    }

    text.push_str(&format!("\nChanges ({}):\n", plan.changes.len()));
    for (i, change) in plan.changes.iter().enumerate() {
        let line = if change.summary.is_empty() { change.kind.as_str() } else { change.summary.as_str() };
        text.push_str(&format!("  {}. {}\n", i + 1, line));
    }

    if let Some(artifact) = &plan.artifact_file {
        text.push_str(&format!("\nArtifact: {}", artifact.display()));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plan() -> ToolPlan {
        let mut plan = ToolPlan::new(
            "normalize_selected_clips",
            "1.0.0",
            "1234",
            serde_json::json!({ "target_peak_db": -6.0 }),
        );
        plan.summary = "Normalize 1 clip(s) to target peak -6.0 dBFS".into();
        plan.changes.push(ToolDiffEntry {
            kind: ToolDiffKind::ParameterChanged,
            summary: "Set clip 'A' gain 0.00 dB -> 6.50 dB".into(),
            track_index: 0,
            clip_id: ClipId(7),
            target_name: "A".into(),
            parameter_id: PARAM_CLIP_GAIN.into(),
            before_value: 0.0,
            after_value: 6.5,
            ..Default::default()
        });
        plan.changes.push(ToolDiffEntry::new(ToolDiffKind::TrackAdded));
        plan
    }

    #[test]
    fn test_kind_names_parse_back() {
        for kind in ToolDiffKind::ALL {
            assert_eq!(kind.as_str().parse::<ToolDiffKind>(), Ok(kind));
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
        assert!("clip_exploded".parse::<ToolDiffKind>().is_err());
    }

    #[test]
    fn test_entry_defaults() {
        let entry = ToolDiffEntry::new(ToolDiffKind::ClipMoved);
        assert_eq!(entry.track_index, -1);
        assert_eq!(entry.track(), None);
        assert_eq!(entry.clip_id, ClipId(0));
    }

    #[test]
    fn test_plan_json_layout() {
        let plan = sample_plan();
        let value = serde_json::to_value(&plan).unwrap();
        assert_eq!(value["tool_name"], "normalize_selected_clips");
        assert_eq!(value["artifact_file"], "");
        assert_eq!(value["changes"][0]["kind"], "parameter_changed");
        assert_eq!(value["changes"][0]["clip_id"], 7);
        assert_eq!(value["changes"][1]["track_index"], -1);

        let parsed: ToolPlan = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, plan);
    }

    #[test]
    fn test_summarise_plan() {
        let mut plan = sample_plan();
        plan.artifact_file = Some(PathBuf::from("/tmp/plan_1234.json"));
        let text = summarise_plan(&plan);
        assert!(text.starts_with("Tool: normalize_selected_clips v1.0.0\nPlan ID: 1234\n"));
        assert!(text.contains("Changes (2):\n  1. Set clip 'A' gain"));
        assert!(text.contains("  2. track_added\n"));
        assert!(text.ends_with("\nArtifact: /tmp/plan_1234.json"));
    }
}
