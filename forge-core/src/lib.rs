//! forge-core: the engine behind the Mumei forge tools.
//!
//! The Mumei verifier itself is an external executable; this crate only knows
//! its process contract (`<verifier> <source> [--output <base>]`, exit 0 on a
//! verified blade, a JSON counterexample report on failure). What lives here
//! is everything around that contract:
//!
//! - per-request [`sandbox::Sandbox`] directories with guaranteed cleanup
//! - the [`verifier`] invocation wrapper (absolute paths, explicit timeout)
//! - the counterexample [`report`] reader
//! - the repair [`oracle`] (LLM router) and the bounded [`healing`] loop
//! - the one-shot compile+verify pipeline ([`oneshot`])

use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub mod healing;
pub mod llm;
pub mod oneshot;
pub mod oracle;
pub mod report;
pub mod sandbox;
pub mod verifier;

/// Default artifact base name for the one-shot path.
pub const DEFAULT_OUTPUT_NAME: &str = "katana";
/// Default healing target, relative to the tooling root.
pub const DEFAULT_SOURCE_FILE: &str = "sword_test.mm";
/// Where the verifier drops its report when not running inside a sandbox,
/// relative to the tooling root.
pub const DEFAULT_REPORT_FILE: &str = "visualizer/report.json";
/// Fixed report file name next to the output base inside a sandbox.
pub const SANDBOX_REPORT_NAME: &str = "report.json";

pub fn parse_dotenv(path: &Path) -> HashMap<String, String> {
    let mut out = HashMap::new();
    let Ok(text) = std::fs::read_to_string(path) else {
        return out;
    };
    for raw in text.lines() {
        let mut line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("export ") {
            line = rest.trim_start();
        }
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        let k = k.trim();
        if k.is_empty() {
            continue;
        }
        let mut v = v.trim().to_string();
        if v.len() >= 2 {
            let bytes = v.as_bytes();
            let first = bytes[0];
            let last = bytes[bytes.len() - 1];
            if first == last && (first == b'"' || first == b'\'') {
                v = v[1..v.len() - 1].to_string();
            }
        }
        out.insert(k.to_string(), v);
    }
    out
}

/// Load `<root>/.env` into the process env. Never overrides existing vars.
pub fn load_dotenv_if_present(root: &Path) {
    let p = root.join(".env");
    for (k, v) in parse_dotenv(&p) {
        if std::env::var(&k).ok().as_deref().unwrap_or("").is_empty() {
            std::env::set_var(k, v);
        }
    }
}

pub(crate) fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub(crate) fn env_u64(key: &str, default: u64) -> u64 {
    env_nonempty(key)
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default)
}

/// Resolve the Mumei verifier executable.
///
/// Order: `MUMEI_BIN`, then `~/.cargo/bin/mumei` if it exists, then bare
/// `mumei` (PATH lookup at spawn time).
pub fn resolve_verifier() -> PathBuf {
    if let Some(v) = env_nonempty("MUMEI_BIN") {
        return PathBuf::from(v);
    }
    if let Some(home) = dirs::home_dir() {
        let cand = home.join(".cargo").join("bin").join("mumei");
        if cand.exists() {
            return cand;
        }
    }
    PathBuf::from("mumei")
}

/// The directory the verifier is spawned in, so it can locate its own
/// toolchain. File arguments are always absolute; nothing here depends on the
/// caller's process-wide working directory.
pub fn tooling_root() -> PathBuf {
    if let Some(v) = env_nonempty("MUMEI_ROOT") {
        return PathBuf::from(v);
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

/// Default report path for the non-sandboxed paths (`inspect_flaws`, healing).
pub fn default_report_path(root: &Path) -> PathBuf {
    match env_nonempty("MUMEI_REPORT") {
        Some(v) => {
            let p = PathBuf::from(v);
            if p.is_absolute() {
                p
            } else {
                root.join(p)
            }
        }
        None => root.join(DEFAULT_REPORT_FILE),
    }
}

/// Atomic replace-on-success write: the destination only ever holds either its
/// previous contents or the complete new text, never a partial write.
pub fn write_atomic(path: &Path, text: &str) -> Result<(), String> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let mut tmp = tempfile::NamedTempFile::new_in(&parent)
        .map_err(|e| format!("failed to create temp file in {}: {e}", parent.display()))?;
    std::io::Write::write_all(&mut tmp, text.as_bytes())
        .map_err(|e| format!("failed to write temp file: {e}"))?;
    tmp.persist(path)
        .map_err(|e| format!("failed to replace {}: {e}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_dotenv_strips_quotes_and_export() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join(".env");
        std::fs::write(
            &p,
            "# comment\nexport FOO=\"bar\"\nBAZ='qux'\nEMPTY=\nnoeq\n",
        )
        .unwrap();
        let m = parse_dotenv(&p);
        assert_eq!(m.get("FOO").map(String::as_str), Some("bar"));
        assert_eq!(m.get("BAZ").map(String::as_str), Some("qux"));
        assert_eq!(m.get("EMPTY").map(String::as_str), Some(""));
        assert!(!m.contains_key("noeq"));
    }

    #[test]
    fn parse_dotenv_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(parse_dotenv(&dir.path().join(".env")).is_empty());
    }

    #[test]
    fn write_atomic_replaces_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("blade.mm");
        write_atomic(&p, "v1").unwrap();
        assert_eq!(std::fs::read_to_string(&p).unwrap(), "v1");
        write_atomic(&p, "v2 longer contents").unwrap();
        assert_eq!(std::fs::read_to_string(&p).unwrap(), "v2 longer contents");
    }

    #[test]
    fn default_report_path_joins_root() {
        let root = Path::new("/proj");
        // Only exercise the no-env default here; env-sensitive cases live in
        // the llm tests where the env mutex already exists.
        if std::env::var("MUMEI_REPORT").is_err() {
            assert_eq!(
                default_report_path(root),
                PathBuf::from("/proj/visualizer/report.json")
            );
        }
    }
}
