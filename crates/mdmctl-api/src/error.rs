use thiserror::Error;

/// Top-level error type for the `mdmctl-api` crate.
///
/// Covers every failure mode of the remote management API surface:
/// transport, TLS, rate limiting, structured API errors, and payload
/// decoding. `mdmctl-core` classifies these into a stable taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// The configured bearer token cannot be used as a header value.
    #[error("Invalid bearer token: {0}")]
    InvalidToken(String),

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Throttled by the remote API. Includes retry-after in seconds.
    #[error("Rate limited -- retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    // ── Remote API ──────────────────────────────────────────────────
    /// Structured error returned by the remote API.
    #[error("Remote API error (HTTP {status}): {message}")]
    Api {
        status: u16,
        /// Vendor-specific error code (e.g. `"ResourceNotFound"`).
        code: Option<String>,
        message: String,
    },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::RateLimited { .. } => Some(429),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Extract the vendor error code, if available.
    pub fn vendor_code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Returns `true` if the request never produced a usable HTTP response
    /// because of a connection-level failure (TLS handshake included) or a
    /// timeout.
    pub fn is_transport_failure(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Timeout { .. } | Self::Tls(_) => true,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}
