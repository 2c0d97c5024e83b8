//! The repair oracle: turn a failing source + transcript + counterexample into
//! a proposed replacement source.
//!
//! The trait seam exists so the healing loop can be driven by a scripted
//! oracle in tests; production uses [`LlmOracle`] on top of the provider
//! router in [`crate::llm`].

use async_trait::async_trait;
use std::time::Duration;

use crate::llm::{self, OracleError};
use crate::report::VerificationReport;

/// Fence tag for the rewrite target language in oracle replies.
pub const FENCE_TAG: &str = "rust";

#[derive(Debug, Clone)]
pub struct ProposedFix {
    /// Complete replacement source; the loop persists it wholesale.
    pub source: String,
    pub provider: String,
    pub model: String,
}

#[async_trait]
pub trait RepairOracle: Send + Sync {
    async fn propose_fix(
        &self,
        source: &str,
        transcript: &str,
        report: &VerificationReport,
    ) -> Result<ProposedFix, OracleError>;
}

pub fn repair_system_prompt() -> String {
    [
        "You are a Mumei language expert.",
        "The code you are given failed formal verification.",
        "Fix the source so the verifier's counterexample no longer applies; in particular, adjust `requires` preconditions that create mathematical contradictions.",
        "Return the complete fixed source in a single ```rust fenced block, with no commentary.",
    ]
    .join("\n")
}

pub fn repair_user_prompt(source: &str, transcript: &str, report_json: &str) -> String {
    format!(
        "The following Mumei code failed formal verification.\n\n\
# Source code:\n{source}\n\n\
# Error log:\n{transcript}\n\n\
# Verification report (counterexample):\n{report_json}\n\n\
Task: output only the corrected source, in a ```rust fenced block."
    )
}

/// Extract the contents of the first fenced block opened with ```` ```<tag> ````,
/// trimmed. `None` when no such block closes.
pub fn extract_fenced_block(content: &str, tag: &str) -> Option<String> {
    let open = format!("```{tag}");
    let i = content.find(&open)?;
    let rest = &content[i + open.len()..];
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    let j = rest.find("```")?;
    Some(rest[..j].trim().to_string())
}

/// The fix text to take from an oracle reply.
///
/// Deliberately lenient: when no tagged fence is present the whole reply is
/// used verbatim, so formatting variance from the oracle never stalls the
/// loop. An empty extraction is fatal instead of being written through.
pub fn fix_from_reply(content: &str) -> Result<String, OracleError> {
    let fix = match extract_fenced_block(content, FENCE_TAG) {
        Some(block) => block,
        None => content.trim().to_string(),
    };
    if fix.is_empty() {
        return Err(OracleError::EmptyFix);
    }
    Ok(fix)
}

pub struct LlmOracle {
    pub timeout: Duration,
}

impl LlmOracle {
    pub fn from_env() -> Self {
        Self {
            timeout: Duration::from_secs(crate::env_u64("MUMEI_ORACLE_TIMEOUT_S", 120)),
        }
    }
}

#[async_trait]
impl RepairOracle for LlmOracle {
    async fn propose_fix(
        &self,
        source: &str,
        transcript: &str,
        report: &VerificationReport,
    ) -> Result<ProposedFix, OracleError> {
        let system = repair_system_prompt();
        let user = repair_user_prompt(source, transcript, &report.pretty());
        let res = llm::chat_completion(&system, &user, self.timeout).await?;
        let fix = fix_from_reply(&res.content)?;
        Ok(ProposedFix {
            source: fix,
            provider: res.provider,
            model: res.model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_tagged_fence() {
        let reply = "Here is the fix:\n```rust\natom cut(a, b) requires a >= b {}\n```\nGood luck!";
        assert_eq!(
            extract_fenced_block(reply, "rust").as_deref(),
            Some("atom cut(a, b) requires a >= b {}")
        );
    }

    #[test]
    fn ignores_later_fences_after_the_first() {
        let reply = "```rust\nfirst\n```\n```rust\nsecond\n```";
        assert_eq!(extract_fenced_block(reply, "rust").as_deref(), Some("first"));
    }

    #[test]
    fn unclosed_fence_yields_none() {
        assert_eq!(extract_fenced_block("```rust\nnope", "rust"), None);
    }

    #[test]
    fn untagged_reply_falls_back_to_whole_text() {
        let reply = "  atom cut(a, b) {}\n";
        assert_eq!(fix_from_reply(reply).unwrap(), "atom cut(a, b) {}");
    }

    #[test]
    fn empty_fenced_block_is_fatal_not_written_through() {
        assert_eq!(fix_from_reply("```rust\n```"), Err(OracleError::EmptyFix));
        assert_eq!(fix_from_reply("   \n"), Err(OracleError::EmptyFix));
    }

    #[test]
    fn user_prompt_embeds_all_three_sections() {
        let report = crate::report::VerificationReport::placeholder();
        let p = repair_user_prompt("SRC", "LOG", &report.pretty());
        assert!(p.contains("SRC"));
        assert!(p.contains("LOG"));
        assert!(p.contains("report unavailable"));
    }
}
