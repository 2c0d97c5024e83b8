//! Mumei forge MCP server (stdio via rmcp).
//!
//! Exposes `forge-core` as three MCP tools:
//! - `forge_blade`    - one-shot sandboxed compile + verify
//! - `inspect_flaws`  - read the most recent verification report
//! - `self_heal_loop` - bounded verify -> oracle-fix -> retry session
//!
//! Run:
//! ```bash
//! cargo run --quiet -p mumei-forge-mcp
//! ```
//!
//! Configuration (env, `.env` in the tooling root is honored):
//! - `MUMEI_BIN`              verifier executable (default: `mumei` on PATH)
//! - `MUMEI_ROOT`             tooling root / spawn dir (default: cwd)
//! - `MUMEI_SOURCE`           healing target (default: `sword_test.mm`)
//! - `MUMEI_REPORT`           report path (default: `visualizer/report.json`)
//! - `MUMEI_MAX_RETRIES`      healing retry budget (default: 5)
//! - `MUMEI_HEAL_TIMEOUT_S`   healing session wall clock (default: 300)
//! - `MUMEI_VERIFY_TIMEOUT_S` per-invocation verifier timeout (default: 120)
//! - oracle credentials: `OPENAI_API_KEY` (or `GROQ_*` / `OPENROUTER_*`);
//!   absence is fatal at startup, not per request.

use forge_core as fc;

use fc::report::ReportState;
use rmcp::{
    handler::server::router::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{CallToolResult, Content, Implementation, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
    transport::stdio,
    ErrorData as McpError, ServiceExt,
};
use schemars::JsonSchema;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Deserialize, JsonSchema)]
struct ForgeBladeArgs {
    /// Mumei source to compile and verify.
    source_code: String,
    /// Base name for artifacts (default: "katana").
    #[serde(default)]
    output_name: Option<String>,
    #[serde(default)]
    timeout_s: Option<u64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct InspectFlawsArgs {
    /// Report path override; defaults to the tooling root's report location.
    #[serde(default)]
    report_path: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct SelfHealArgs {
    /// Healing target override, absolute or relative to the tooling root.
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    max_retries: Option<u32>,
    /// Session wall-clock budget in seconds (default: 300).
    #[serde(default)]
    timeout_s: Option<u64>,
}

fn format_forge_response(
    req: &fc::oneshot::CompileRequest,
    res: &fc::oneshot::OneShotResult,
) -> String {
    let mut out = String::new();

    if res.outcome.timeout {
        out.push_str("⏱ Forge timed out: the verifier was killed before finishing.\n");
    } else if res.outcome.ok {
        out.push_str(&format!(
            "✅ Forge success: `{}` verified flawless.\n",
            req.output_name
        ));
    } else {
        out.push_str("❌ Forge failure (logical flaw detected).\n");
    }

    let transcript = res.outcome.transcript();
    if !transcript.trim().is_empty() {
        out.push_str("\n--- verifier output ---\n");
        out.push_str(transcript.trim());
        out.push('\n');
    }

    match &res.report {
        ReportState::Found(r) => {
            out.push_str("\n--- verification report ---\n");
            out.push_str(&r.pretty());
            out.push('\n');
        }
        ReportState::NotFound => {}
        ReportState::Corrupt(e) => {
            out.push_str(&format!("\n(report present but unreadable: {e})\n"));
        }
    }

    if res.outcome.artifacts.is_empty() {
        out.push_str("\nNo artifacts were produced.\n");
    } else {
        for (ext, text) in &res.outcome.artifacts {
            out.push_str(&format!(
                "\n--- artifact {}.{} ({} bytes) ---\n{}\n",
                req.output_name,
                ext,
                text.len(),
                text.trim_end()
            ));
        }
    }
    out
}

fn format_heal_response(report: &fc::healing::HealReport) -> String {
    let mut out = report.status.banner();
    if !report.attempts.is_empty() {
        out.push_str("\n\nAttempt trace:\n");
        for a in &report.attempts {
            let verdict = if a.verified {
                "verified"
            } else if a.verifier_timeout {
                "verifier timeout"
            } else {
                "failed"
            };
            let oracle = match (&a.provider, &a.model) {
                (Some(p), Some(m)) => format!(", oracle {p}/{m}"),
                _ => String::new(),
            };
            let report_note = if a.verified {
                ""
            } else if a.report_available {
                ", counterexample report read"
            } else {
                ", no report (placeholder sent)"
            };
            out.push_str(&format!("  {}. {verdict}{report_note}{oracle}\n", a.attempt));
        }
    }
    out
}

#[derive(Clone)]
struct ForgeMcp {
    tool_router: ToolRouter<Self>,
}

impl ForgeMcp {
    fn new() -> Self {
        Self {
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl ForgeMcp {
    #[tool(
        description = "Compile and formally verify Mumei source in a private sandbox; returns a success/failure banner plus the counterexample report and any generated artifacts."
    )]
    async fn forge_blade(
        &self,
        params: Parameters<ForgeBladeArgs>,
    ) -> Result<CallToolResult, McpError> {
        let req = fc::oneshot::CompileRequest::new(params.0.source_code, params.0.output_name);
        let timeout = Duration::from_secs(params.0.timeout_s.unwrap_or(120));
        let config = fc::verifier::VerifierConfig::from_env();

        // Expected failure classes come back as text banners, not protocol
        // errors, so callers can branch on the outcome class.
        let text = match fc::oneshot::compile_in_sandbox(&config, &req, timeout).await {
            Ok(res) => format_forge_response(&req, &res),
            Err(e) => format!("🔥 Forge error: {e}"),
        };
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    #[tool(
        description = "Read the most recent verification report (the logical counterexample) as pretty-printed JSON."
    )]
    async fn inspect_flaws(
        &self,
        params: Parameters<InspectFlawsArgs>,
    ) -> Result<CallToolResult, McpError> {
        let root = fc::tooling_root();
        let path = match params.0.report_path {
            Some(p) => {
                let p = PathBuf::from(p);
                if p.is_absolute() {
                    p
                } else {
                    root.join(p)
                }
            }
            None => fc::default_report_path(&root),
        };
        let text = match fc::report::read_report(&path) {
            ReportState::Found(r) => r.pretty(),
            ReportState::NotFound => format!("No report found at {}.", path.display()),
            ReportState::Corrupt(e) => format!("Report is unreadable: {e}"),
        };
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    #[tool(
        description = "Run the bounded self-healing loop against the project source file: verify, read the counterexample, ask the repair oracle for a fix, rewrite, retry."
    )]
    async fn self_heal_loop(
        &self,
        params: Parameters<SelfHealArgs>,
    ) -> Result<CallToolResult, McpError> {
        let mut config = fc::healing::HealingConfig::from_env();
        if let Some(s) = params.0.source.filter(|s| !s.trim().is_empty()) {
            let p = PathBuf::from(s);
            config.source_path = if p.is_absolute() {
                p
            } else {
                fc::tooling_root().join(p)
            };
        }
        if let Some(n) = params.0.max_retries.filter(|n| *n > 0) {
            config.max_retries = n;
        }
        if let Some(t) = params.0.timeout_s.filter(|t| *t > 0) {
            config.session_timeout = Duration::from_secs(t);
        }

        if !config.source_path.exists() {
            return Ok(CallToolResult::success(vec![Content::text(format!(
                "🔥 Healing error: source file not found: {}",
                config.source_path.display()
            ))]));
        }

        let oracle = fc::oracle::LlmOracle::from_env();
        let session = fc::healing::HealingSession::new(config, &oracle);
        let text = match session.run().await {
            Ok(report) => format_heal_response(&report),
            Err(e) => format!("🔥 Healing error: {e}"),
        };
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }
}

#[tool_handler]
impl rmcp::ServerHandler for ForgeMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: Implementation {
                name: "mumei-forge-mcp".to_string(),
                title: Some("mumei-forge-mcp".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Sandboxed Mumei compile/verify plus the self-healing repair loop. \
Stdout is reserved for MCP frames; logs go to stderr."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Never log to stdout: it carries the MCP frames.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let arg1 = std::env::args().nth(1);
    if matches!(arg1.as_deref(), Some("-h" | "--help" | "help")) {
        println!("mumei-forge-mcp - stdio MCP server for the Mumei forge tools");
        println!();
        println!("Usage:");
        println!("  mumei-forge-mcp   # serve MCP over stdio");
        println!();
        println!("Env:");
        println!("  MUMEI_BIN, MUMEI_ROOT, MUMEI_SOURCE, MUMEI_REPORT");
        println!("  MUMEI_MAX_RETRIES=5  MUMEI_HEAL_TIMEOUT_S=300  MUMEI_VERIFY_TIMEOUT_S=120");
        println!("  OPENAI_API_KEY (or GROQ_API_KEY+GROQ_MODEL / OPENROUTER_API_KEY+OPENROUTER_MODEL)");
        return Ok(());
    }
    if matches!(arg1.as_deref(), Some("-V" | "--version" | "version")) {
        println!("mumei-forge-mcp {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let root = fc::tooling_root();
    fc::load_dotenv_if_present(&root);

    // A missing oracle credential is a startup failure, not a per-request one.
    let (provider, model) =
        fc::llm::require_provider().map_err(|e| format!("refusing to start: {e}"))?;
    tracing::info!(%provider, %model, root = %root.display(), "mumei-forge-mcp starting");

    let service = ForgeMcp::new();
    let running = service
        .serve(stdio())
        .await
        .map_err(|e| format!("failed to start stdio MCP server: {e:?}"))?;
    running
        .waiting()
        .await
        .map_err(|e| format!("stdio MCP server task join failed: {e:?}"))?;
    Ok(())
}
