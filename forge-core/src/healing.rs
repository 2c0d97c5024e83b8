//! The self-healing loop: verify → read counterexample → ask the oracle →
//! rewrite → retry, bounded by a retry budget and a session wall clock.
//!
//! A session owns exactly one source file. Callers must not run two sessions
//! against the same path concurrently; for parallel sessions, give each its
//! own source file (the path is a parameter, not a global).

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use crate::oracle::RepairOracle;
use crate::report::{read_report, ReportState};
use crate::verifier::{run_verifier, VerifierConfig};

pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_SESSION_TIMEOUT_S: u64 = 300;
/// Fixed pause between repair attempts, to avoid hammering the oracle.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct HealingConfig {
    pub verifier: VerifierConfig,
    /// The source file this session owns (single-writer discipline).
    pub source_path: PathBuf,
    pub report_path: PathBuf,
    pub max_retries: u32,
    pub verify_timeout: Duration,
    pub session_timeout: Duration,
    pub backoff: Duration,
}

impl HealingConfig {
    pub fn from_env() -> Self {
        let root = crate::tooling_root();
        let source = crate::env_nonempty("MUMEI_SOURCE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(crate::DEFAULT_SOURCE_FILE));
        let source_path = if source.is_absolute() {
            source
        } else {
            root.join(source)
        };
        Self {
            verifier: VerifierConfig::from_env(),
            source_path,
            report_path: crate::default_report_path(&root),
            max_retries: crate::env_u64("MUMEI_MAX_RETRIES", DEFAULT_MAX_RETRIES as u64) as u32,
            verify_timeout: Duration::from_secs(crate::env_u64("MUMEI_VERIFY_TIMEOUT_S", 120)),
            session_timeout: Duration::from_secs(crate::env_u64(
                "MUMEI_HEAL_TIMEOUT_S",
                DEFAULT_SESSION_TIMEOUT_S,
            )),
            backoff: RETRY_BACKOFF,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based verifier invocation index.
    pub attempt: u32,
    pub verified: bool,
    pub verifier_timeout: bool,
    pub report_available: bool,
    pub provider: Option<String>,
    pub model: Option<String>,
}

/// Terminal state of one healing session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealStatus {
    /// Verification passed; `attempts` counts verifier invocations consumed.
    Succeeded { attempts: u32 },
    /// Retry budget consumed without a passing verification.
    Exhausted { attempts: u32 },
    /// The oracle failed; the aborted call did not consume a retry.
    Fatal { error: String },
    /// The session wall clock expired. Distinct from exhaustion.
    TimedOut,
}

impl HealStatus {
    /// Fixed banner per terminal state, so callers can branch on outcome
    /// class without parsing free text.
    pub fn banner(&self) -> String {
        match self {
            HealStatus::Succeeded { attempts } => {
                format!("✅ Healing complete. Blade verified after {attempts} attempt(s).")
            }
            HealStatus::Exhausted { .. } => {
                "💀 Healing failed. The blade remains broken.".to_string()
            }
            HealStatus::Fatal { error } => format!("❌ Healing aborted: {error}"),
            HealStatus::TimedOut => "⏱ Healing session timed out.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealReport {
    pub status: HealStatus,
    pub attempts: Vec<AttemptRecord>,
}

pub struct HealingSession<'a> {
    config: HealingConfig,
    oracle: &'a dyn RepairOracle,
}

impl<'a> HealingSession<'a> {
    pub fn new(config: HealingConfig, oracle: &'a dyn RepairOracle) -> Self {
        Self { config, oracle }
    }

    /// Drive the loop to a terminal state. `Err` is reserved for local faults
    /// (unreadable source, unspawnable verifier); every loop outcome,
    /// including timeout and exhaustion, is a regular `HealReport`.
    pub async fn run(&self) -> Result<HealReport, String> {
        let trace = Mutex::new(Vec::new());
        let driven =
            tokio::time::timeout(self.config.session_timeout, self.drive(&trace)).await;
        let attempts = trace.into_inner().unwrap_or_default();
        match driven {
            Ok(Ok(status)) => Ok(HealReport { status, attempts }),
            Ok(Err(e)) => Err(e),
            Err(_) => Ok(HealReport {
                status: HealStatus::TimedOut,
                attempts,
            }),
        }
    }

    async fn drive(&self, trace: &Mutex<Vec<AttemptRecord>>) -> Result<HealStatus, String> {
        let cfg = &self.config;
        // A zero budget allows no verifier invocations at all; bail out before
        // the first verify so the bound holds even at the degenerate config.
        if cfg.max_retries == 0 {
            return Ok(HealStatus::Exhausted { attempts: 0 });
        }
        let mut attempt: u32 = 0;
        loop {
            let outcome = run_verifier(
                &cfg.verifier,
                &cfg.source_path,
                None,
                cfg.verify_timeout,
            )
            .await?;

            let mut rec = AttemptRecord {
                attempt: attempt + 1,
                verified: outcome.ok,
                verifier_timeout: outcome.timeout,
                report_available: false,
                provider: None,
                model: None,
            };

            if outcome.ok {
                trace.lock().map_err(|_| "trace lock poisoned")?.push(rec);
                return Ok(HealStatus::Succeeded {
                    attempts: attempt + 1,
                });
            }

            tracing::info!(
                attempt = attempt + 1,
                max_retries = cfg.max_retries,
                "verification failed, consulting repair oracle"
            );

            // Best-effort report read; on NotFound/Corrupt the oracle still
            // gets a coherent request via the placeholder.
            let state = read_report(&cfg.report_path);
            rec.report_available = matches!(state, ReportState::Found(_));
            let report = state.for_oracle();

            let source = std::fs::read_to_string(&cfg.source_path)
                .map_err(|e| format!("failed to read {}: {e}", cfg.source_path.display()))?;
            let transcript = outcome.transcript();

            let fix = match self.oracle.propose_fix(&source, &transcript, &report).await {
                Ok(f) => f,
                Err(e) => {
                    trace.lock().map_err(|_| "trace lock poisoned")?.push(rec);
                    return Ok(HealStatus::Fatal {
                        error: e.to_string(),
                    });
                }
            };
            rec.provider = Some(fix.provider.clone());
            rec.model = Some(fix.model.clone());
            trace.lock().map_err(|_| "trace lock poisoned")?.push(rec);

            // Wholesale replacement, atomic: the next run sees either the old
            // source or the complete fix, never a torn write.
            crate::write_atomic(&cfg.source_path, &fix.source)?;

            attempt += 1;
            if attempt >= cfg.max_retries {
                return Ok(HealStatus::Exhausted { attempts: attempt });
            }
            tokio::time::sleep(cfg.backoff).await;
        }
    }
}
