//! Chat-log persistence
//!
//! Every LLM exchange is appended to the chat-log directory under a
//! deterministic, per-call-unique filename:
//! `{model}_{sha256(src)[..8]}_{unix_micros}.log`. Unique names make
//! concurrent appends from multiple backends safe without locking.

use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

/// Default directory when `CHATLOG_DIR` is not set
const DEFAULT_DIR: &str = "chatlogs";

/// Writes one exchange. Best-effort: failures are logged and swallowed.
pub fn append(model: &str, src_code: &str, query: &str, response: &str) {
    let dir = std::env::var("CHATLOG_DIR").unwrap_or_else(|_| DEFAULT_DIR.to_string());
    match write_log(Path::new(&dir), model, src_code, query, response) {
        Ok(path) => debug!("logged llm response to {}", path.display()),
        Err(err) => debug!("failed to write chat log: {}", err),
    }
}

/// Writes the log file and returns its path
pub fn write_log(
    dir: &Path,
    model: &str,
    src_code: &str,
    query: &str,
    response: &str,
) -> std::io::Result<PathBuf> {
    fs::create_dir_all(dir)?;

    let digest = Sha256::digest(src_code.as_bytes());
    let hash: String = digest.iter().map(|byte| format!("{byte:02x}")).collect();
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros();

    let path = dir.join(format!("{}_{}_{}.log", model, &hash[..8], micros));
    let body = format!("# Query\n\n{query}\n\n# Response\n\n```\n{response}\n```\n");
    fs::write(&path, body)?;
    Ok(path)
}
