// ── Proxy Atoms: Error Types ────────────────────────────────────────────────
// Single canonical error enum for the engine, built with `thiserror`.
//
// Design rules:
//   • Variants are coarse-grained by domain (I/O, TLS, Upstream, Policy…).
//   • The `#[from]` attribute wires std/external error conversions automatically.
//   • `ProxyError` → `String` conversion is provided via `Display` so that
//     Tauri command boundaries (`Result<T, String>`) can call `.map_err(|e|
//     e.to_string())` without boilerplate.
//   • No variant carries request/response body content in its message.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProxyError {
    /// Filesystem or OS-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Malformed regular expression supplied at a scope/rule/match-replace boundary.
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// HTTP / network failure talking to an upstream origin (reqwest layer).
    #[error("Upstream error: {0}")]
    Upstream(#[from] reqwest::Error),

    /// SQLite / rusqlite storage sink failure.
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// TLS handshake failure, client- or upstream-side.
    #[error("TLS error ({host}): {message}")]
    Tls { host: String, message: String },

    /// CA / certificate minting failure.
    #[error("Certificate mint error: {0}")]
    CertMint(String),

    /// Malformed request from the client (bad request line, oversized headers, …).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Engine or policy configuration is invalid or missing.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A policy decision terminated the transaction (drop by user, drop by timeout).
    #[error("Policy error: {0}")]
    Policy(String),

    /// Catch-all for errors that do not yet have a dedicated variant.
    /// Prefer adding a specific variant over using this in new code.
    #[error("{0}")]
    Other(String),
}

impl ProxyError {
    pub fn tls(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Tls { host: host.into(), message: message.into() }
    }
}

// ── Migration bridge: String → ProxyError ──────────────────────────────────
// Allows `?` on functions still returning `Result<T, String>` inside functions
// that return `ProxyResult<T>`.

impl From<String> for ProxyError {
    fn from(s: String) -> Self {
        ProxyError::Other(s)
    }
}

impl From<&str> for ProxyError {
    fn from(s: &str) -> Self {
        ProxyError::Other(s.to_string())
    }
}

/// All engine operations should return this type.
/// At Tauri command boundaries, convert with `.map_err(|e| e.to_string())`.
pub type ProxyResult<T> = Result<T, ProxyError>;

// ── Conversion: ProxyError → String ────────────────────────────────────────
// Lets Tauri command functions call `.map_err(ProxyError::into)` directly.

impl From<ProxyError> for String {
    fn from(e: ProxyError) -> Self {
        e.to_string()
    }
}
