//! OpenAI-compatible chat completions for the repair oracle.
//!
//! Provider selection is env-driven: the first provider in the configured
//! order that has both a key and a model wins. The original healing loop
//! hardcoded OpenAI; the router keeps that the default while allowing groq
//! and openrouter without code changes.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Oracle failures, classified for the healing loop.
///
/// `Unavailable` covers network/auth/quota problems: the source cannot be
/// repaired without the oracle, so the session aborts instead of burning
/// retries. `EmptyFix` is the resolved edge case of an oracle reply whose
/// extracted code is empty; writing it through would silently empty the
/// source file, so it is fatal too.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    Unavailable(String),
    EmptyFix,
}

impl std::fmt::Display for OracleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OracleError::Unavailable(msg) => write!(f, "repair oracle unavailable: {msg}"),
            OracleError::EmptyFix => write!(f, "repair oracle returned an empty fix"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResult {
    pub provider: String,
    pub model: String,
    pub content: String,
    pub raw: Value,
}

#[derive(Debug, Clone)]
struct Provider {
    name: &'static str,
    base_url: String,
    api_key_env: &'static str,
    model_env: &'static str,
    default_model: Option<&'static str>,
}

fn providers_from_env() -> Vec<Provider> {
    vec![
        Provider {
            name: "openai",
            base_url: crate::env_nonempty("OPENAI_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key_env: "OPENAI_API_KEY",
            model_env: "OPENAI_MODEL",
            // The legacy healing loop pinned gpt-4o.
            default_model: Some("gpt-4o"),
        },
        Provider {
            name: "groq",
            base_url: "https://api.groq.com/openai/v1".to_string(),
            api_key_env: "GROQ_API_KEY",
            model_env: "GROQ_MODEL",
            default_model: None,
        },
        Provider {
            name: "openrouter",
            base_url: crate::env_nonempty("OPENROUTER_BASE_URL")
                .unwrap_or_else(|| "https://openrouter.ai/api/v1".to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key_env: "OPENROUTER_API_KEY",
            model_env: "OPENROUTER_MODEL",
            default_model: None,
        },
    ]
}

fn provider_order() -> Vec<String> {
    if let Some(v) = crate::env_nonempty("MUMEI_PROVIDER_ORDER") {
        return v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    vec!["openai".into(), "groq".into(), "openrouter".into()]
}

fn select_provider() -> Result<(Provider, String), OracleError> {
    let provs = providers_from_env();
    for name in provider_order() {
        let Some(p) = provs.iter().find(|pp| pp.name == name).cloned() else {
            continue;
        };
        if crate::env_nonempty(p.api_key_env).is_none() {
            continue;
        }
        let model = crate::env_nonempty(p.model_env)
            .or_else(|| p.default_model.map(str::to_string));
        let Some(model) = model else {
            continue;
        };
        return Ok((p, model));
    }
    Err(OracleError::Unavailable(
        "no usable provider configured; set one of:\n\
- OPENAI_API_KEY (+ optional OPENAI_MODEL, default gpt-4o)\n\
- GROQ_API_KEY and GROQ_MODEL\n\
- OPENROUTER_API_KEY and OPENROUTER_MODEL\n\
Optionally set MUMEI_PROVIDER_ORDER."
            .to_string(),
    ))
}

/// Startup gate: the server refuses to come up without a usable oracle
/// credential, rather than failing per-request.
pub fn require_provider() -> Result<(String, String), String> {
    select_provider()
        .map(|(p, model)| (p.name.to_string(), model))
        .map_err(|e| e.to_string())
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChoice {
    message: Value,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatCompletionChoice>,
}

/// Single chat-style exchange against the selected provider.
///
/// Invariants (should not change lightly):
/// - request path is `POST <base_url>/chat/completions`
/// - `Authorization: Bearer <key>`
/// - OpenRouter adds `HTTP-Referer` and `X-Title` when configured
/// - temperature is 0.2
pub async fn chat_completion(
    system: &str,
    user: &str,
    timeout: Duration,
) -> Result<ChatCompletionResult, OracleError> {
    let (provider, model) = select_provider()?;

    let mut headers = reqwest::header::HeaderMap::new();
    headers.insert(
        reqwest::header::CONTENT_TYPE,
        reqwest::header::HeaderValue::from_static("application/json"),
    );
    let key = crate::env_nonempty(provider.api_key_env)
        .ok_or_else(|| OracleError::Unavailable(format!("missing {}", provider.api_key_env)))?;
    let hv = reqwest::header::HeaderValue::from_str(&format!("Bearer {key}"))
        .map_err(|e| OracleError::Unavailable(format!("invalid Authorization header: {e}")))?;
    headers.insert(reqwest::header::AUTHORIZATION, hv);
    if provider.name == "openrouter" {
        if let Some(site) = crate::env_nonempty("OPENROUTER_SITE_URL") {
            if let Ok(hv) = reqwest::header::HeaderValue::from_str(&site) {
                headers.insert("HTTP-Referer", hv);
            }
        }
        if let Some(app) = crate::env_nonempty("OPENROUTER_APP_NAME") {
            if let Ok(hv) = reqwest::header::HeaderValue::from_str(&app) {
                headers.insert("X-Title", hv);
            }
        }
    }

    let payload = serde_json::json!({
        "model": model,
        "messages": [
            { "role": "system", "content": system },
            { "role": "user", "content": user }
        ],
        "temperature": 0.2
    });

    let url = format!("{}/chat/completions", provider.base_url);
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .build()
        .map_err(|e| OracleError::Unavailable(format!("http client build: {e}")))?;
    let resp = client
        .post(url)
        .json(&payload)
        .send()
        .await
        .map_err(|e| OracleError::Unavailable(format!("http request failed: {e}")))?;

    let status = resp.status();
    let raw: Value = resp
        .json()
        .await
        .map_err(|e| OracleError::Unavailable(format!("http json decode: {e}")))?;
    if !status.is_success() {
        return Err(OracleError::Unavailable(format!(
            "provider {} returned {}: {}",
            provider.name,
            status.as_u16(),
            raw
        )));
    }

    let parsed: ChatCompletionResponse = serde_json::from_value(raw.clone())
        .map_err(|e| OracleError::Unavailable(format!("invalid chat response: {e}")))?;
    let msg = parsed
        .choices
        .first()
        .and_then(|c| c.message.as_object())
        .cloned()
        .ok_or_else(|| OracleError::Unavailable("missing choices[0].message".to_string()))?;
    let content = msg
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    Ok(ChatCompletionResult {
        provider: provider.name.to_string(),
        model,
        content,
        raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    pub(crate) struct EnvGuard {
        saved: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(keys: &[&str]) -> Self {
            let mut saved = Vec::new();
            for k in keys {
                saved.push((k.to_string(), std::env::var(k).ok()));
                std::env::remove_var(k);
            }
            Self { saved }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (k, v) in self.saved.drain(..) {
                match v {
                    Some(val) => std::env::set_var(k, val),
                    None => std::env::remove_var(k),
                }
            }
        }
    }

    fn env_lock() -> &'static std::sync::Mutex<()> {
        static LOCK: OnceLock<std::sync::Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| std::sync::Mutex::new(()))
    }

    const ALL_KEYS: [&str; 8] = [
        "MUMEI_PROVIDER_ORDER",
        "OPENAI_API_KEY",
        "OPENAI_MODEL",
        "GROQ_API_KEY",
        "GROQ_MODEL",
        "OPENROUTER_API_KEY",
        "OPENROUTER_MODEL",
        "OPENAI_BASE_URL",
    ];

    #[test]
    fn provider_order_default_is_openai_first() {
        let _lock = env_lock().lock().unwrap();
        let _g = EnvGuard::new(&ALL_KEYS);
        assert_eq!(
            provider_order(),
            vec![
                "openai".to_string(),
                "groq".to_string(),
                "openrouter".to_string()
            ]
        );
    }

    #[test]
    fn openai_key_alone_selects_default_model() {
        let _lock = env_lock().lock().unwrap();
        let _g = EnvGuard::new(&ALL_KEYS);
        std::env::set_var("OPENAI_API_KEY", "test_key");

        let (p, model) = select_provider().expect("expected provider");
        assert_eq!(p.name, "openai");
        assert_eq!(model, "gpt-4o");
    }

    #[test]
    fn explicit_order_selects_openrouter() {
        let _lock = env_lock().lock().unwrap();
        let _g = EnvGuard::new(&ALL_KEYS);
        std::env::set_var("MUMEI_PROVIDER_ORDER", "openrouter");
        std::env::set_var("OPENROUTER_API_KEY", "test_key");
        std::env::set_var("OPENROUTER_MODEL", "openai/gpt-4o-mini");

        let (p, model) = select_provider().expect("expected provider");
        assert_eq!(p.name, "openrouter");
        assert_eq!(model, "openai/gpt-4o-mini");
    }

    #[test]
    fn groq_requires_an_explicit_model() {
        let _lock = env_lock().lock().unwrap();
        let _g = EnvGuard::new(&ALL_KEYS);
        std::env::set_var("MUMEI_PROVIDER_ORDER", "groq");
        std::env::set_var("GROQ_API_KEY", "test_key");

        let err = select_provider().unwrap_err();
        assert!(matches!(err, OracleError::Unavailable(_)));
    }

    #[test]
    fn unconfigured_env_is_unavailable_at_startup() {
        let _lock = env_lock().lock().unwrap();
        let _g = EnvGuard::new(&ALL_KEYS);

        let err = require_provider().unwrap_err();
        assert!(err.contains("no usable provider configured"));
    }
}
