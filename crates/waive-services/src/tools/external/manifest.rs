use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use waive_core::{Result, WaiveError};

pub const MANIFEST_SUFFIX: &str = ".waive-tool.json";

pub const DEFAULT_TIMEOUT_MS: u64 = 300_000;
pub const MAX_TIMEOUT_MS: i64 = 3_600_000;

const ALLOWED_INTERPRETERS: [&str; 5] = ["python3", "python", "node", "ruby", "perl"];

const FORBIDDEN_ARGUMENT_PATTERNS: [&str; 15] = [
    ";", "&", "|", "`", "$", "(", ")", "<", ">", "rm ", "dd ", "curl ", "/dev/", "--force", "-f ",
];

const FORBIDDEN_BASE_PREFIXES: [&str; 4] = ["/etc", "/root", "/sys", "/proc"];

#[derive(Debug, Clone, PartialEq)]
pub struct ExternalToolManifest {
    pub name: String,
    pub display_name: String,
    pub version: String,
    pub description: String,
    pub input_schema: Value,
    pub default_params: Value,
    /// One of the allowed interpreters, resolved through `PATH`
    pub executable: String,
    pub arguments: Vec<String>,
    /// Directory holding the manifest; the process runs here
    pub base_directory: PathBuf,
    pub timeout_ms: u64,
    pub accepts_audio_input: bool,
    pub produces_audio_output: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawManifest {
    name: Option<String>,
    executable: Option<String>,
    display_name: Option<String>,
    version: Option<String>,
    description: Option<String>,
    input_schema: Option<Value>,
    default_params: Option<Value>,
    #[serde(default)]
    arguments: Vec<String>,
    timeout_ms: Option<i64>,
    #[serde(default)]
    accepts_audio_input: bool,
    #[serde(default)]
    produces_audio_output: bool,
}

fn required(field: Option<String>, key: &str) -> Result<String> {
    field
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| WaiveError::Manifest(format!("missing {key}")))
}

fn check_base_directory(dir: &Path) -> Result<()> {
    let text = dir.to_string_lossy();
    if text.contains("..") || FORBIDDEN_BASE_PREFIXES.iter().any(|p| text.starts_with(p)) {
        return Err(WaiveError::Manifest(format!("location not allowed: {text}")));
    }
    Ok(())
}

/// Parse and validate one manifest file
pub fn parse_manifest(path: &Path) -> Result<ExternalToolManifest> {
    if !path.is_file() {
        return Err(WaiveError::Manifest(format!("not a file: {}", path.display())));
    }
    let parent = path.parent().unwrap_or(Path::new("."));
    let base_directory = parent.canonicalize().unwrap_or_else(|_| parent.to_path_buf());
    check_base_directory(&base_directory)?;

    let raw: RawManifest = serde_json::from_str(&fs::read_to_string(path)?)
        .map_err(|e| WaiveError::Manifest(e.to_string()))?;

    let name = required(raw.name, "name")?;
    let executable = required(raw.executable, "executable")?;
    if !ALLOWED_INTERPRETERS.contains(&executable.as_str()) {
        return Err(WaiveError::Manifest(format!("executable not allowed: {executable}")));
    }

    if let Some(arg) = raw
        .arguments
        .iter()
        .find(|arg| FORBIDDEN_ARGUMENT_PATTERNS.iter().any(|p| arg.contains(p)))
    {
        return Err(WaiveError::Manifest(format!("unsafe argument: {arg}")));
    }

    let timeout_ms = match raw.timeout_ms {
        None => DEFAULT_TIMEOUT_MS,
        Some(ms) if (0..=MAX_TIMEOUT_MS).contains(&ms) => ms as u64,
        Some(ms) => return Err(WaiveError::Manifest(format!("timeoutMs out of range: {ms}"))),
    };

    Ok(ExternalToolManifest {
        display_name: raw.display_name.unwrap_or_else(|| name.clone()),
        version: raw.version.unwrap_or_else(|| "1.0.0".into()),
        description: raw.description.unwrap_or_default(),
        input_schema: raw.input_schema.unwrap_or(Value::Null),
        default_params: raw.default_params.unwrap_or(Value::Null),
        arguments: raw.arguments,
        accepts_audio_input: raw.accepts_audio_input,
        produces_audio_output: raw.produces_audio_output,
        name,
        executable,
        base_directory,
        timeout_ms,
    })
}

/// Parse every `*.waive-tool.json` directly inside `dir`, skipping invalid ones
pub fn scan_tool_directory(dir: &Path) -> Vec<ExternalToolManifest> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .filter(|p| p.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.ends_with(MANIFEST_SUFFIX)))
        .collect();
    paths.sort();

    paths
        .iter()
        .filter_map(|path| match parse_manifest(path) {
            Ok(manifest) => {
                debug!(tool = %manifest.name, path = %path.display(), "Found external tool");
                Some(manifest)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping external tool manifest");
                None
            }
        })
        .collect()
}
