//! Spawning the external Mumei verifier.
//!
//! One invocation abstraction for every entry point: the process runs with its
//! working directory fixed to the tooling root (so it can find its own
//! toolchain) while all file arguments are absolute paths, and every call
//! carries an explicit timeout. Success is decided purely by exit status;
//! distinguishing a compile error from a logical counterexample is the report
//! reader's job.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

/// Artifact extensions the verifier may emit next to the output base.
/// Absence of any of them is not an error (partial output is valid).
pub const ARTIFACT_EXTS: [&str; 4] = ["rs", "go", "ts", "ll"];

#[derive(Debug, Clone)]
pub struct VerifierConfig {
    pub program: PathBuf,
    /// Spawn directory for the verifier process (see module docs).
    pub tooling_root: PathBuf,
}

impl VerifierConfig {
    pub fn from_env() -> Self {
        Self {
            program: crate::resolve_verifier(),
            tooling_root: crate::tooling_root(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationOutcome {
    pub ok: bool,
    /// True when the per-invocation timeout fired and the process was killed.
    /// Distinct from a plain nonzero exit.
    pub timeout: bool,
    pub returncode: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub cmd: Vec<String>,
    pub cwd: String,
    /// Artifacts actually produced, keyed by extension.
    pub artifacts: BTreeMap<String, String>,
}

impl VerificationOutcome {
    pub fn transcript(&self) -> String {
        format!("{}\n{}", self.stdout, self.stderr)
    }
}

/// Run the verifier against `source_path`, optionally asking for artifacts at
/// `output_base` (`--output`). Returns `Err` only when the executable cannot
/// be spawned at all; verification failures and timeouts are regular outcomes.
pub async fn run_verifier(
    config: &VerifierConfig,
    source_path: &Path,
    output_base: Option<&Path>,
    timeout: Duration,
) -> Result<VerificationOutcome, String> {
    let mut cmd_vec = vec![
        config.program.display().to_string(),
        source_path.display().to_string(),
    ];
    let mut cmd = Command::new(&config.program);
    cmd.arg(source_path)
        .current_dir(&config.tooling_root)
        .kill_on_drop(true);
    if let Some(base) = output_base {
        cmd.arg("--output").arg(base);
        cmd_vec.push("--output".to_string());
        cmd_vec.push(base.display().to_string());
    }

    let out = tokio::time::timeout(timeout, cmd.output()).await;
    let (ok, timed_out, returncode, stdout, stderr) = match out {
        Err(_) => (
            false,
            true,
            None,
            String::new(),
            format!("verifier timed out after {}s", timeout.as_secs()),
        ),
        Ok(Err(e)) => {
            return Err(format!(
                "failed to spawn verifier {}: {e}",
                config.program.display()
            ))
        }
        Ok(Ok(output)) => {
            let ok = output.status.success();
            let returncode = output.status.code();
            let stdout = String::from_utf8_lossy(&output.stdout).to_string();
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            (ok, false, returncode, stdout, stderr)
        }
    };

    tracing::debug!(ok, timeout = timed_out, ?returncode, "verifier finished");

    // Collect whatever the verifier managed to produce, pass or fail.
    let mut artifacts = BTreeMap::new();
    if let Some(base) = output_base {
        for ext in ARTIFACT_EXTS {
            let p = PathBuf::from(format!("{}.{}", base.display(), ext));
            if let Ok(text) = std::fs::read_to_string(&p) {
                artifacts.insert(ext.to_string(), text);
            }
        }
    }

    Ok(VerificationOutcome {
        ok,
        timeout: timed_out,
        returncode,
        stdout,
        stderr,
        cmd: cmd_vec,
        cwd: config.tooling_root.display().to_string(),
        artifacts,
    })
}
