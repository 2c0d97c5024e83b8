//! The one-shot compile+verify pipeline: sandbox in, formatted bundle out.
//!
//! This path never mutates anything outside its own sandbox and never talks
//! to the repair oracle; it is safe for unlimited concurrency.

use std::time::Duration;

use crate::report::{read_report, ReportState};
use crate::sandbox::Sandbox;
use crate::verifier::{run_verifier, VerificationOutcome, VerifierConfig};

/// One inbound compile request. Owned by a single pipeline invocation.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub source_code: String,
    pub output_name: String,
}

impl CompileRequest {
    pub fn new(source_code: String, output_name: Option<String>) -> Self {
        let output_name = output_name
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| crate::DEFAULT_OUTPUT_NAME.to_string());
        Self {
            source_code,
            output_name,
        }
    }
}

#[derive(Debug)]
pub struct OneShotResult {
    pub outcome: VerificationOutcome,
    pub report: ReportState,
}

/// Acquire a sandbox, persist the request source, run the verifier with the
/// output base inside the sandbox, and collect the outcome plus the report
/// (which the verifier writes next to the output base). The sandbox is
/// released when this returns, on every path.
pub async fn compile_in_sandbox(
    config: &VerifierConfig,
    request: &CompileRequest,
    timeout: Duration,
) -> Result<OneShotResult, String> {
    let sandbox = Sandbox::acquire()?;
    let source_path = sandbox.write_source(
        &format!("{}.mm", request.output_name),
        &request.source_code,
    )?;
    let output_base = sandbox.join(&request.output_name)?;
    let outcome = run_verifier(config, &source_path, Some(&output_base), timeout).await?;
    let report = read_report(&sandbox.join(crate::SANDBOX_REPORT_NAME)?);
    Ok(OneShotResult { outcome, report })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_name_defaults_to_katana() {
        let r = CompileRequest::new("src".into(), None);
        assert_eq!(r.output_name, "katana");
        let r = CompileRequest::new("src".into(), Some("  ".into()));
        assert_eq!(r.output_name, "katana");
        let r = CompileRequest::new("src".into(), Some("wakizashi".into()));
        assert_eq!(r.output_name, "wakizashi");
    }

    #[tokio::test]
    async fn escaping_output_name_is_rejected() {
        let config = VerifierConfig {
            program: "/bin/true".into(),
            tooling_root: std::env::temp_dir(),
        };
        let req = CompileRequest::new("src".into(), Some("../escape".into()));
        let err = compile_in_sandbox(&config, &req, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.contains("invalid sandbox file name"));
    }
}
