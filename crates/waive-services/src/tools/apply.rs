//! Checks shared by every plan applier

use std::path::{Component, Path};

use tracing::{debug, warn};

use waive_core::{is_within_directory, Result, ToolPlan, WaiveError};

/// Reject plans from another tool and plans with nothing in them
pub(crate) fn check_plan(plan: &ToolPlan, tool_name: &str, tool_label: &str) -> Result<()> {
    if plan.tool_name != tool_name {
        return Err(WaiveError::PlanMismatch(tool_label.to_string()));
    }
    if plan.changes.is_empty() {
        return Err(WaiveError::EmptyPlan);
    }
    Ok(())
}

/// True if `file` exists and resolves inside `root`. Plans may be edited by
/// hand, so inserted audio is only accepted from known output locations.
pub fn is_allowed_output_file(file: &Path, root: &Path) -> bool {
    if file.components().any(|c| c == Component::ParentDir) {
        warn!(path = %file.display(), "Rejected output path with parent traversal");
        return false;
    }
    if !file.is_file() {
        debug!(path = %file.display(), "Output file missing");
        return false;
    }
    if !is_within_directory(file, root) {
        warn!(path = %file.display(), root = %root.display(), "Rejected output outside allowed directory");
        return false;
    }
    true
}

/// Turn an applied-change count into the apply result
pub(crate) fn finish_apply(applied: usize, nothing_applied: &str) -> Result<()> {
    if applied == 0 {
        return Err(WaiveError::NothingApplied(nothing_applied.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use waive_core::{ToolDiffEntry, ToolDiffKind};

    #[test]
    fn test_check_plan() {
        let mut plan = ToolPlan::new("a", "1", "id", serde_json::Value::Null);
        assert!(matches!(check_plan(&plan, "b", "b tool"), Err(WaiveError::PlanMismatch(_))));
        assert!(matches!(check_plan(&plan, "a", "a tool"), Err(WaiveError::EmptyPlan)));
        plan.changes.push(ToolDiffEntry::new(ToolDiffKind::TrackAdded));
        assert!(check_plan(&plan, "a", "a tool").is_ok());
    }

    #[test]
    fn test_allowed_output_file() {
        let root = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let inside = root.path().join("out.wav");
        let outside = other.path().join("out.wav");
        std::fs::write(&inside, b"x").unwrap();
        std::fs::write(&outside, b"x").unwrap();

        assert!(is_allowed_output_file(&inside, root.path()));
        assert!(!is_allowed_output_file(&outside, root.path()));
        assert!(!is_allowed_output_file(&root.path().join("missing.wav"), root.path()));
        let sneaky = root.path().join("sub").join("..").join("out.wav");
        assert!(!is_allowed_output_file(&sneaky, root.path()));
    }
}
