//! Reading and validating the verifier's counterexample report.
//!
//! A missing report is a named state, not a fault: the verifier only writes
//! one when it gets far enough to find a counterexample, so callers must treat
//! `NotFound` as "report unavailable", never as "verification passed".

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Success,
    Failed,
    Error,
}

/// The report schema the verifier writes. `input_a` / `input_b` are
/// verifier-defined counterexample values; we treat them as opaque JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub status: ReportStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atom: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_a: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_b: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl VerificationReport {
    /// Stand-in sent to the oracle when no readable report exists, so the
    /// repair request stays coherent.
    pub fn placeholder() -> Self {
        Self {
            status: ReportStatus::Error,
            atom: None,
            input_a: None,
            input_b: None,
            reason: Some("report unavailable".to_string()),
        }
    }

    /// Shape validation gated by the `status` discriminant:
    /// `failed` requires a full counterexample, `success` only the atom name.
    pub fn validate(&self) -> Result<(), String> {
        let has = |s: &Option<String>| s.as_deref().is_some_and(|v| !v.trim().is_empty());
        match self.status {
            ReportStatus::Failed => {
                if !has(&self.atom)
                    || self.input_a.is_none()
                    || self.input_b.is_none()
                    || !has(&self.reason)
                {
                    return Err(
                        "report with status=failed must carry atom, input_a, input_b and reason"
                            .to_string(),
                    );
                }
                Ok(())
            }
            ReportStatus::Success => {
                if !has(&self.atom) {
                    return Err("report with status=success must carry atom".to_string());
                }
                Ok(())
            }
            ReportStatus::Error => Ok(()),
        }
    }

    pub fn pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Outcome of a report read. `NotFound` and `Corrupt` degrade gracefully to a
/// placeholder on the healing path and are never escalated on their own.
#[derive(Debug, Clone)]
pub enum ReportState {
    Found(VerificationReport),
    NotFound,
    Corrupt(String),
}

impl ReportState {
    /// The report to embed in an oracle request: the real one when readable,
    /// otherwise the placeholder.
    pub fn for_oracle(&self) -> VerificationReport {
        match self {
            ReportState::Found(r) => r.clone(),
            ReportState::NotFound | ReportState::Corrupt(_) => VerificationReport::placeholder(),
        }
    }
}

pub fn read_report(path: &Path) -> ReportState {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return ReportState::NotFound,
        Err(e) => return ReportState::Corrupt(format!("failed to read {}: {e}", path.display())),
    };
    let report: VerificationReport = match serde_json::from_str(&text) {
        Ok(r) => r,
        Err(e) => {
            return ReportState::Corrupt(format!("malformed report {}: {e}", path.display()))
        }
    };
    if let Err(e) = report.validate() {
        return ReportState::Corrupt(format!("invalid report {}: {e}", path.display()));
    }
    ReportState::Found(report)
}
