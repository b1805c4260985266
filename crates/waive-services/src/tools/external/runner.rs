//! Sandboxed execution of manifest-described tools

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use waive_core::{Result, WaiveError};

use super::manifest::{scan_tool_directory, ExternalToolManifest};
use crate::progress::ProgressToken;

/// How often a running child is checked for exit, cancellation, and timeout
const POLL_INTERVAL: Duration = Duration::from_millis(500);

const SUCCESS_MESSAGE: &str = "External tool executed successfully";

/// `<data dir>/Waive/tools`, always scanned
pub fn default_tools_directory() -> PathBuf {
    dirs::data_dir().unwrap_or_else(std::env::temp_dir).join("Waive").join("tools")
}

#[derive(Debug, Clone, Default)]
pub struct ExternalToolOutput {
    pub message: String,
    /// Parsed `output/result.json`, `Null` when absent
    pub result_data: Value,
    pub output_audio_file: Option<PathBuf>,
}

/// Launches manifest tools and tracks where manifests are looked up
pub struct ExternalToolRunner {
    directories: Mutex<Vec<PathBuf>>,
}

impl Default for ExternalToolRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ExternalToolRunner {
    pub fn new() -> Self {
        Self { directories: Mutex::new(vec![default_tools_directory()]) }
    }

    /// Add a directory to scan; duplicates are ignored
    pub fn add_tools_directory(&self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        let mut dirs = self.directories.lock().unwrap_or_else(|p| p.into_inner());
        if !dirs.contains(&dir) {
            dirs.push(dir);
        }
    }

    pub fn tools_directories(&self) -> Vec<PathBuf> {
        self.directories.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Manifests from every configured directory, in directory order
    pub fn scan(&self) -> Vec<ExternalToolManifest> {
        self.tools_directories().iter().flat_map(|d| scan_tool_directory(d)).collect()
    }

    /// Run the tool to completion in a fresh sandbox under the temp directory.
    /// Blocks the calling thread; cancellation and timeout kill the child.
    pub fn run(
        &self,
        manifest: &ExternalToolManifest,
        params: &Value,
        input_audio: Option<&Path>,
        token: &ProgressToken,
    ) -> Result<ExternalToolOutput> {
        let sandbox = std::env::temp_dir().join(format!("waive_tool_{}", Uuid::new_v4().simple()));
        let result = self.run_in_sandbox(&sandbox, manifest, params, input_audio, token);
        if let Err(e) = fs::remove_dir_all(&sandbox) {
            debug!(sandbox = %sandbox.display(), error = %e, "Sandbox not removed");
        }
        result
    }

    /// The produced audio is moved next to the sandbox as `<sandbox>.wav`,
    /// since the sandbox itself is removed once the run ends.
    fn run_in_sandbox(
        &self,
        sandbox: &Path,
        manifest: &ExternalToolManifest,
        params: &Value,
        input_audio: Option<&Path>,
        token: &ProgressToken,
    ) -> Result<ExternalToolOutput> {
        let input_dir = sandbox.join("input");
        let output_dir = sandbox.join("output");
        fs::create_dir_all(&input_dir)
            .and_then(|_| fs::create_dir_all(&output_dir))
            .map_err(|_| WaiveError::TempDirectory)?;

        fs::write(input_dir.join("params.json"), serde_json::to_string(params)?)?;
        if manifest.accepts_audio_input {
            if let Some(input) = input_audio.filter(|p| p.is_file()) {
                fs::copy(input, input_dir.join("input.wav"))?;
            }
        }

        let mut child = Command::new(&manifest.executable)
            .args(&manifest.arguments)
            .arg("--input-dir")
            .arg(&input_dir)
            .arg("--output-dir")
            .arg(&output_dir)
            .current_dir(&manifest.base_directory)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;
        info!(tool = %manifest.name, pid = child.id(), sandbox = %sandbox.display(), "External tool started");

        let started = Instant::now();
        let timeout = Duration::from_millis(manifest.timeout_ms);
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if token.is_cancelled() {
                let _ = child.kill();
                let _ = child.wait();
                warn!(tool = %manifest.name, "External tool cancelled");
                return Err(WaiveError::ExternalToolCancelled);
            }
            if started.elapsed() > timeout {
                let _ = child.kill();
                let _ = child.wait();
                warn!(tool = %manifest.name, timeout_ms = manifest.timeout_ms, "External tool timed out");
                return Err(WaiveError::ExternalToolTimeout(manifest.timeout_ms));
            }
            thread::sleep(POLL_INTERVAL);
        };

        if !status.success() {
            return Err(WaiveError::ExternalToolExit(status.code().unwrap_or(-1)));
        }

        let mut output = ExternalToolOutput::default();
        let result_file = output_dir.join("result.json");
        if result_file.is_file() {
            match fs::read_to_string(&result_file).map(|t| serde_json::from_str::<Value>(&t)) {
                Ok(Ok(data)) => {
                    if let Some(message) = data.get("message").and_then(Value::as_str) {
                        output.message = message.to_string();
                    }
                    output.result_data = data;
                }
                _ => warn!(path = %result_file.display(), "Ignoring unreadable result.json"),
            }
        }
        let audio = output_dir.join("output.wav");
        if audio.is_file() {
            let kept = sandbox.with_extension("wav");
            fs::rename(&audio, &kept)?;
            output.output_audio_file = Some(kept);
        }
        if output.message.is_empty() {
            output.message = SUCCESS_MESSAGE.into();
        }
        debug!(tool = %manifest.name, elapsed_ms = started.elapsed().as_millis() as u64, "External tool finished");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn have(executable: &str) -> bool {
        Command::new(executable)
            .arg("-v")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok()
    }

    fn perl_manifest(dir: &Path, script: &str, timeout_ms: u64) -> ExternalToolManifest {
        fs::write(dir.join("tool.pl"), script).unwrap();
        ExternalToolManifest {
            name: "perl_tool".into(),
            display_name: "Perl Tool".into(),
            version: "1.0.0".into(),
            description: String::new(),
            input_schema: Value::Null,
            default_params: Value::Null,
            executable: "perl".into(),
            arguments: vec!["tool.pl".into()],
            base_directory: dir.to_path_buf(),
            timeout_ms,
            accepts_audio_input: false,
            produces_audio_output: true,
        }
    }

    #[test]
    fn test_tools_directories_dedup() {
        let runner = ExternalToolRunner::new();
        runner.add_tools_directory("/tmp/waive-extra");
        runner.add_tools_directory("/tmp/waive-extra");
        let dirs = runner.tools_directories();
        assert_eq!(dirs.len(), 2);
        assert_eq!(dirs[0], default_tools_directory());
    }

    #[test]
    fn test_reads_result_and_output() {
        if !have("perl") {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let script = r#"
my %a = @ARGV;
open(my $p, '<', "$a{'--input-dir'}/params.json") or die;
my $params = <$p>;
close($p);
open(my $r, '>', "$a{'--output-dir'}/result.json") or die;
print $r '{"message":"done","params":' . $params . '}';
close($r);
open(my $w, '>', "$a{'--output-dir'}/output.wav") or die;
close($w);
"#;
        let manifest = perl_manifest(dir.path(), script, 10_000);
        let output = ExternalToolRunner::new()
            .run(&manifest, &serde_json::json!({ "k": 1 }), None, &ProgressToken::detached())
            .unwrap();
        assert_eq!(output.message, "done");
        assert_eq!(output.result_data["params"]["k"], 1);
        let audio = output.output_audio_file.unwrap();
        assert!(audio.is_file());
        assert_eq!(audio.parent(), Some(std::env::temp_dir().as_path()));
        assert!(!audio.with_extension("").exists());
        fs::remove_file(audio).unwrap();
    }

    #[test]
    fn test_exit_code_and_cancel() {
        if !have("perl") {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let failing = perl_manifest(dir.path(), "exit 3;\n", 10_000);
        let runner = ExternalToolRunner::new();
        let err = runner.run(&failing, &Value::Null, None, &ProgressToken::detached()).unwrap_err();
        assert!(matches!(err, WaiveError::ExternalToolExit(3)));

        let sleeper = perl_manifest(dir.path(), "sleep 30;\n", 60_000);
        let token = ProgressToken::detached();
        token.cancel();
        let err = runner.run(&sleeper, &Value::Null, None, &token).unwrap_err();
        assert!(matches!(err, WaiveError::ExternalToolCancelled));

        let timed_out = perl_manifest(dir.path(), "sleep 30;\n", 100);
        let err = runner.run(&timed_out, &Value::Null, None, &ProgressToken::detached()).unwrap_err();
        assert!(matches!(err, WaiveError::ExternalToolTimeout(100)));
    }
}
