//! Name-indexed set of available tools

use std::sync::Arc;

use tracing::{info, warn};

use waive_core::{Result, WaiveError};

use super::align::AlignClipsByTransient;
use super::auto_mix::AutoMixSuggestions;
use super::external::{ExternalTool, ExternalToolRunner};
use super::gain_stage::GainStageSelectedTracks;
use super::normalize::NormalizeSelectedClips;
use super::rename::RenameTracksFromClips;
use super::silence::DetectSilenceAndCutRegions;
use super::stems::StemSeparation;
use super::{Tool, ToolDescription};

pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    /// Registry holding the built-in tools
    pub fn new() -> Self {
        let tools: Vec<Arc<dyn Tool>> = vec![
            Arc::new(NormalizeSelectedClips),
            Arc::new(RenameTracksFromClips),
            Arc::new(GainStageSelectedTracks),
            Arc::new(DetectSilenceAndCutRegions),
            Arc::new(AlignClipsByTransient),
            Arc::new(StemSeparation),
            Arc::new(AutoMixSuggestions),
        ];
        Self { tools }
    }

    pub fn empty() -> Self {
        Self { tools: Vec::new() }
    }

    pub fn tools(&self) -> &[Arc<dyn Tool>] {
        &self.tools
    }

    pub fn descriptions(&self) -> Vec<ToolDescription> {
        self.tools.iter().map(|t| t.describe()).collect()
    }

    pub fn find_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.describe().name == name).cloned()
    }

    /// Add a tool; names must be unique
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.describe().name;
        if self.find_tool(&name).is_some() {
            return Err(WaiveError::precondition(format!("Tool already registered: {name}")));
        }
        info!(tool = %name, "Registered tool");
        self.tools.push(tool);
        Ok(())
    }

    /// Register every valid manifest found in the runner's directories.
    /// Returns the number of tools added.
    pub fn register_external_tools(&mut self, runner: &Arc<ExternalToolRunner>) -> usize {
        let mut added = 0;
        for manifest in runner.scan() {
            let name = manifest.name.clone();
            match self.register(Arc::new(ExternalTool::new(manifest, runner.clone()))) {
                Ok(()) => added += 1,
                Err(e) => warn!(tool = %name, error = %e, "Skipping external tool"),
            }
        }
        added
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_builtin_order() {
        let names: Vec<String> = ToolRegistry::new().descriptions().into_iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            [
                "normalize_selected_clips",
                "rename_tracks_from_clips",
                "gain_stage_selected_tracks",
                "detect_silence_and_cut_regions",
                "align_clips_by_transient",
                "stem_separation",
                "auto_mix_suggestions",
            ]
        );
    }

    #[test]
    fn test_find_and_duplicate_register() {
        let mut registry = ToolRegistry::new();
        assert!(registry.find_tool("stem_separation").is_some());
        assert!(registry.find_tool("missing").is_none());
        assert!(registry.register(Arc::new(StemSeparation)).is_err());
        assert_eq!(registry.tools().len(), 7);
    }

    #[test]
    fn test_register_external_tools() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("reverse.waive-tool.json"),
            r#"{ "name": "reverse", "displayName": "Reverse", "executable": "python3" }"#,
        )
        .unwrap();
        // Collides with a built-in name
        fs::write(
            dir.path().join("clash.waive-tool.json"),
            r#"{ "name": "stem_separation", "executable": "python3" }"#,
        )
        .unwrap();

        let runner = Arc::new(ExternalToolRunner::new());
        runner.add_tools_directory(dir.path());
        let mut registry = ToolRegistry::new();
        assert_eq!(registry.register_external_tools(&runner), 1);
        assert_eq!(registry.find_tool("reverse").unwrap().describe().display_name, "Reverse");
    }
}
