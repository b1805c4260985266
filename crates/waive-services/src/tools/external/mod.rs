//! Third-party tools described by `*.waive-tool.json` manifests and run as
//! child processes in a scratch sandbox

mod adapter;
mod manifest;
mod runner;

pub use adapter::ExternalTool;
pub use manifest::{parse_manifest, scan_tool_directory, ExternalToolManifest, MANIFEST_SUFFIX};
pub use runner::{default_tools_directory, ExternalToolOutput, ExternalToolRunner};
