//! Dynamic Sandbox: executes a candidate skill under isolation and reports the
//! outcome (§4.9). Mirrors the teacher's subprocess-based `ExecutionSandbox`,
//! hardened with an ephemeral working directory, a scrubbed environment, and
//! explicit unavailability reporting instead of a bare pattern check (that part
//! moved to the Static Validator).

use crate::config::SandboxConfig;
use crate::core::scanner::{ExecutionMode, ToolRecord};
use serde::Serialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{info, warn};

/// Sentinel a generated smoke test must print to stdout for a pass verdict.
pub const SUCCESS_SENTINEL: &str = "__SANDBOX_OK__";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DynamicOutcome {
    pub pass: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    /// True when the isolation primitive (the interpreter) could not be found at
    /// all — the Immune Controller treats this as rejection-by-policy, not a
    /// failing test.
    pub unavailable: bool,
}

impl DynamicOutcome {
    fn unavailable(reason: &str) -> Self {
        warn!("sandbox unavailable: {reason}");
        Self {
            pass: false,
            stdout: String::new(),
            stderr: reason.to_string(),
            exit_code: None,
            duration_ms: 0,
            unavailable: true,
        }
    }
}

pub struct DynamicSandbox {
    config: SandboxConfig,
}

impl DynamicSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    fn interpreter_for(mode: ExecutionMode) -> Option<&'static str> {
        match mode {
            ExecutionMode::Python => Some("python3"),
            ExecutionMode::JavaScript => Some("node"),
            ExecutionMode::Shell => Some("sh"),
            ExecutionMode::Unknown => None,
        }
    }

    /// Copies the candidate into an ephemeral directory, generates a smoke test
    /// that invokes its documented entry point with a benign input, and runs it
    /// under a wall-clock deadline with no outbound network (best-effort: the
    /// child inherits no proxy/credential env beyond the configured passthrough
    /// list) and a working directory that is the only writable path.
    pub async fn run(&self, tool: &ToolRecord) -> DynamicOutcome {
        let Some(interpreter) = Self::interpreter_for(tool.execution_mode) else {
            return DynamicOutcome::unavailable(&format!(
                "no interpreter known for execution mode {:?}",
                tool.execution_mode
            ));
        };

        if which(interpreter).is_none() {
            return DynamicOutcome::unavailable(&format!(
                "interpreter '{interpreter}' not found on PATH"
            ));
        }

        if tool.execution_mode != ExecutionMode::Python {
            // Smoke-test harness generation below only targets Python entry
            // points; other execution modes report unavailable rather than
            // attempting to synthesize a harness this core doesn't generate yet.
            return DynamicOutcome::unavailable(&format!(
                "no smoke-test harness generator for execution mode {:?}",
                tool.execution_mode
            ));
        }

        let ephemeral = match tempfile::tempdir() {
            Ok(d) => d,
            Err(e) => return DynamicOutcome::unavailable(&format!("could not create ephemeral dir: {e}")),
        };

        let candidate_path = ephemeral.path().join(
            tool.file_path
                .file_name()
                .unwrap_or_else(|| std::ffi::OsStr::new("candidate")),
        );
        if let Err(e) = std::fs::copy(&tool.file_path, &candidate_path) {
            return DynamicOutcome::unavailable(&format!("could not copy candidate into sandbox: {e}"));
        }

        let harness_path = ephemeral.path().join("__smoke_test__.py");
        let harness = smoke_test_source(tool, &candidate_path);
        if let Err(e) = std::fs::write(&harness_path, harness) {
            return DynamicOutcome::unavailable(&format!("could not write smoke test: {e}"));
        }

        let start = Instant::now();
        let mut cmd = Command::new(interpreter);
        cmd.arg(&harness_path)
            .current_dir(ephemeral.path())
            .env_clear()
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for key in &self.config.passthrough_env {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }

        let run = timeout(self.config.timeout, cmd.output()).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match run {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                let stderr = String::from_utf8_lossy(&output.stderr).to_string();
                let exit_code = output.status.code();
                let pass = exit_code == Some(0) && stdout.contains(SUCCESS_SENTINEL);
                info!(
                    "sandbox run for {} exited {:?} in {}ms (pass={})",
                    tool.id(),
                    exit_code,
                    duration_ms,
                    pass
                );
                DynamicOutcome {
                    pass,
                    stdout,
                    stderr,
                    exit_code,
                    duration_ms,
                    unavailable: false,
                }
            }
            Ok(Err(e)) => DynamicOutcome::unavailable(&format!("failed to spawn interpreter: {e}")),
            Err(_) => DynamicOutcome {
                pass: false,
                stdout: String::new(),
                stderr: format!("sandbox timed out after {:?}", self.config.timeout),
                exit_code: None,
                duration_ms,
                unavailable: false,
            },
        }
    }
}

/// Generates a minimal harness that imports the candidate module and calls its
/// entry point with benign defaults for every required parameter, printing the
/// success sentinel iff the call returns without raising.
fn smoke_test_source(tool: &ToolRecord, candidate_path: &PathBuf) -> String {
    let module_dir = candidate_path
        .parent()
        .map(|p| p.display().to_string())
        .unwrap_or_default();
    let module_name = candidate_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "candidate".to_string());

    let args: Vec<String> = tool
        .parameters
        .iter()
        .filter(|p| p.required)
        .map(|p| format!("{}={}", p.name, benign_literal(&p.param_type)))
        .collect();

    format!(
        "import sys\nsys.path.insert(0, {module_dir:?})\nimport {module_name} as __candidate__\ntry:\n    __candidate__.{entry}({args})\n    print({sentinel:?})\nexcept Exception as e:\n    print(str(e), file=sys.stderr)\n    sys.exit(1)\n",
        entry = tool.entry_point,
        args = args.join(", "),
        sentinel = SUCCESS_SENTINEL,
    )
}

fn benign_literal(param_type: &crate::core::scanner::ParamType) -> &'static str {
    use crate::core::scanner::ParamType;
    match param_type {
        ParamType::String => "\"smoke-test\"",
        ParamType::Integer => "1",
        ParamType::Boolean => "False",
        ParamType::Number => "1.0",
        ParamType::Array => "[]",
        ParamType::Object => "{}",
    }
}

fn which(binary: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.is_file())
}
