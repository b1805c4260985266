//! On-disk JSON records of tool plans

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;

use waive_core::{sanitize_path_component, Result, ToolPlan, WaiveError};

pub const PLAN_FILE: &str = "plan.json";
pub const PAYLOAD_FILE: &str = "payload.json";

fn component(raw: &str) -> Result<&str> {
    if sanitize_path_component(raw).is_empty() {
        return Err(WaiveError::InvalidPathComponent(raw.to_string()));
    }
    Ok(raw)
}

/// `<cache>/tools/<tool_name>`
pub fn tool_artifact_dir(cache_dir: &Path, tool_name: &str) -> Result<PathBuf> {
    Ok(cache_dir.join("tools").join(component(tool_name)?))
}

/// `<cache>/tools/<tool_name>/plan_<plan_id>`, used by plans with side-payloads
pub fn plan_output_dir(cache_dir: &Path, tool_name: &str, plan_id: &str) -> Result<PathBuf> {
    let plan_dir = format!("plan_{}", component(plan_id)?);
    Ok(tool_artifact_dir(cache_dir, tool_name)?.join(plan_dir))
}

pub fn plan_to_json(plan: &ToolPlan) -> Result<Value> {
    Ok(serde_json::to_value(plan)?)
}

/// Write `plan` to `<cache>/tools/<tool>/plan_<id>.json` and point its
/// `artifact_file` at the result
pub fn write_plan_artifact(cache_dir: &Path, plan: &mut ToolPlan) -> Result<PathBuf> {
    write_plan_artifact_with(cache_dir, plan, Map::new())
}

/// As [`write_plan_artifact`], merging `extra` top-level fields into the record
pub fn write_plan_artifact_with(cache_dir: &Path, plan: &mut ToolPlan, extra: Map<String, Value>) -> Result<PathBuf> {
    let dir = tool_artifact_dir(cache_dir, &plan.tool_name)?;
    fs::create_dir_all(&dir)?;
    let path = dir.join(format!("plan_{}.json", component(&plan.plan_id)?));

    let mut record = plan_to_json(plan)?;
    if let Value::Object(fields) = &mut record {
        fields.extend(extra);
    }
    fs::write(&path, serde_json::to_string_pretty(&record)?)?;
    debug!(path = %path.display(), changes = plan.changes.len(), "Plan artifact written");

    plan.artifact_file = Some(path.clone());
    Ok(path)
}

/// Write `plan.json` and `payload.json` into `plan_dir`; the payload becomes
/// the plan's artifact file
pub fn write_plan_with_payload(plan_dir: &Path, plan: &mut ToolPlan, payload: &Value) -> Result<PathBuf> {
    fs::create_dir_all(plan_dir)?;
    let payload_path = plan_dir.join(PAYLOAD_FILE);
    fs::write(&payload_path, serde_json::to_string_pretty(payload)?)?;

    plan.artifact_file = Some(payload_path.clone());
    fs::write(plan_dir.join(PLAN_FILE), serde_json::to_string_pretty(&plan_to_json(plan)?)?)?;
    debug!(path = %payload_path.display(), "Plan payload written");
    Ok(payload_path)
}

pub fn read_plan(path: &Path) -> Result<ToolPlan> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

pub fn read_json(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use waive_core::{ToolDiffEntry, ToolDiffKind};

    fn plan() -> ToolPlan {
        let mut plan = ToolPlan::new("rename_tracks_from_clips", "1.0.0", "abc", serde_json::json!({}));
        plan.summary = "Rename 1 track(s) from selected clips".into();
        plan.changes.push(ToolDiffEntry {
            kind: ToolDiffKind::TrackRenamed,
            track_index: 0,
            after_text: "Kick".into(),
            ..Default::default()
        });
        plan
    }

    #[test]
    fn test_write_and_read_plan() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = plan();
        let path = write_plan_artifact(dir.path(), &mut plan).unwrap();

        assert_eq!(path, dir.path().join("tools/rename_tracks_from_clips/plan_abc.json"));
        assert_eq!(plan.artifact_file.as_deref(), Some(path.as_path()));

        let parsed = read_plan(&path).unwrap();
        assert_eq!(parsed.changes, plan.changes);
        assert_eq!(parsed.summary, plan.summary);
        assert_eq!(parsed.artifact_file, None);
    }

    #[test]
    fn test_extra_fields_are_merged() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = plan();
        let mut extra = Map::new();
        extra.insert("model_version".into(), "1.0.0".into());
        let path = write_plan_artifact_with(dir.path(), &mut plan, extra).unwrap();
        assert_eq!(read_json(&path).unwrap()["model_version"], "1.0.0");
    }

    #[test]
    fn test_payload_layout() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = plan();
        let plan_dir = plan_output_dir(dir.path(), "stem_separation", "abc").unwrap();
        let payload = write_plan_with_payload(&plan_dir, &mut plan, &serde_json::json!({ "outputs": [] })).unwrap();

        assert!(plan_dir.join(PLAN_FILE).is_file());
        assert_eq!(plan.artifact_file, Some(payload.clone()));
        let stored = read_plan(&plan_dir.join(PLAN_FILE)).unwrap();
        assert_eq!(stored.artifact_file, Some(payload));
    }

    #[test]
    fn test_rejects_unsafe_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut plan = plan();
        plan.plan_id = "../escape".into();
        assert!(write_plan_artifact(dir.path(), &mut plan).is_err());
    }
}
