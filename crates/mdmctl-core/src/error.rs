// ── Core error types ──
//
// User-facing errors from mdmctl-core. Consumers never see raw HTTP
// plumbing: the `From<mdmctl_api::Error>` impl translates transport-layer
// errors into domain variants while keeping status and vendor code so the
// classifier still sees them.

use thiserror::Error;

use crate::classify::{Classify, ErrorCategory, ErrorSignal};
use crate::deadline::DoneReason;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach management endpoint at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("{operation}: deadline exceeded")]
    DeadlineExceeded { operation: String },

    #[error("{operation}: cancelled")]
    Cancelled { operation: String },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Object not found: {collection}/{identifier}")]
    NotFound {
        collection: String,
        identifier: String,
    },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("Target validation aborted at {target}: {message}")]
    ValidationAborted { target: String, message: String },

    // ── Operation errors ─────────────────────────────────────────────
    #[error("{target}: change accepted but not confirmed after {attempts} read(s) ({reason})")]
    NotConfirmed {
        target: String,
        attempts: u32,
        reason: String,
    },

    #[error("{failed} of {total} target(s) failed")]
    BatchFailed {
        failed: usize,
        total: usize,
        /// One `category:id: message` line per failed target.
        failures: Vec<String>,
    },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// Vendor error code (e.g. `"ResourceNotFound"`).
        code: Option<String>,
        /// HTTP status code (if applicable).
        status: Option<u16>,
        /// The request failed below HTTP.
        transport_failure: bool,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<mdmctl_api::Error> for CoreError {
    fn from(err: mdmctl_api::Error) -> Self {
        let transport_failure = err.is_transport_failure();
        match err {
            mdmctl_api::Error::InvalidToken(message) => CoreError::AuthenticationFailed { message },
            mdmctl_api::Error::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        code: None,
                        status: e.status().map(|s| s.as_u16()),
                        transport_failure,
                    }
                }
            }
            mdmctl_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            mdmctl_api::Error::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            mdmctl_api::Error::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            mdmctl_api::Error::RateLimited { retry_after_secs } => CoreError::Api {
                message: format!("Rate limited -- retry after {retry_after_secs}s"),
                code: Some("rate_limited".into()),
                status: Some(429),
                transport_failure,
            },
            mdmctl_api::Error::Api {
                status: 401,
                message,
                ..
            } => CoreError::AuthenticationFailed { message },
            mdmctl_api::Error::Api {
                status,
                code,
                message,
            } => CoreError::Api {
                message,
                code,
                status: Some(status),
                transport_failure,
            },
            mdmctl_api::Error::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}

// ── Classification ───────────────────────────────────────────────────

impl Classify for CoreError {
    fn signal(&self) -> ErrorSignal<'_> {
        match self {
            Self::ConnectionFailed { .. } | Self::Timeout { .. } => ErrorSignal {
                transport_failure: true,
                ..ErrorSignal::default()
            },
            Self::AuthenticationFailed { .. } => ErrorSignal {
                status: Some(401),
                ..ErrorSignal::default()
            },
            Self::NotFound { .. } => ErrorSignal {
                status: Some(404),
                ..ErrorSignal::default()
            },
            Self::Api {
                status,
                code,
                transport_failure,
                ..
            } => ErrorSignal {
                status: *status,
                vendor_code: code.as_deref(),
                transport_failure: *transport_failure,
            },
            _ => ErrorSignal::default(),
        }
    }
}

impl CoreError {
    /// Lifecycle error for an `operation` stopped by its context.
    pub fn from_done(reason: DoneReason, operation: impl Into<String>) -> Self {
        let operation = operation.into();
        match reason {
            DoneReason::Cancelled => Self::Cancelled { operation },
            DoneReason::DeadlineExceeded => Self::DeadlineExceeded { operation },
        }
    }

    /// Shorthand for [`Classify::category`].
    pub fn error_category(&self) -> ErrorCategory {
        self.category()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::classify::classify;

    #[test]
    fn api_errors_keep_classification_inputs() {
        let core: CoreError = mdmctl_api::Error::Api {
            status: 409,
            code: Some("ResourceAlreadyExists".into()),
            message: "exists".into(),
        }
        .into();
        assert_eq!(core.error_category(), ErrorCategory::Conflict);
    }

    #[test]
    fn unauthorized_maps_to_authentication() {
        let core: CoreError = mdmctl_api::Error::Api {
            status: 401,
            code: None,
            message: "token expired".into(),
        }
        .into();
        assert!(matches!(core, CoreError::AuthenticationFailed { .. }));
        assert_eq!(core.error_category(), ErrorCategory::PermissionDenied);
    }

    #[test]
    fn rate_limit_stays_transient() {
        let core: CoreError = mdmctl_api::Error::RateLimited {
            retry_after_secs: 2,
        }
        .into();
        assert_eq!(core.error_category(), ErrorCategory::Transient);
    }

    #[test]
    fn conversion_preserves_category() {
        let malformed = reqwest::Client::new()
            .get("not a url")
            .build()
            .unwrap_err();
        let cases = vec![
            mdmctl_api::Error::Transport(malformed),
            mdmctl_api::Error::Tls("handshake failure".into()),
            mdmctl_api::Error::Timeout { timeout_secs: 5 },
            mdmctl_api::Error::InvalidToken("bad header".into()),
            mdmctl_api::Error::RateLimited {
                retry_after_secs: 1,
            },
            mdmctl_api::Error::InvalidUrl(url::Url::parse("::").unwrap_err()),
            mdmctl_api::Error::Deserialization {
                message: "eof".into(),
                body: String::new(),
            },
            mdmctl_api::Error::Api {
                status: 401,
                code: None,
                message: "expired".into(),
            },
            mdmctl_api::Error::Api {
                status: 400,
                code: Some("InvalidArgument".into()),
                message: "bad".into(),
            },
            mdmctl_api::Error::Api {
                status: 503,
                code: None,
                message: "unavailable".into(),
            },
        ];
        for api in cases {
            let expected = classify(&api);
            let label = api.to_string();
            let core = CoreError::from(api);
            assert_eq!(core.error_category(), expected, "{label}");
        }
    }

    #[test]
    fn tls_failures_are_transient_on_both_layers() {
        let api = mdmctl_api::Error::Tls("handshake failure".into());
        assert_eq!(classify(&api), ErrorCategory::Transient);
        assert_eq!(CoreError::from(api).error_category(), ErrorCategory::Transient);
    }

    #[test]
    fn lifecycle_errors_are_unknown() {
        let core = CoreError::DeadlineExceeded {
            operation: "batch".into(),
        };
        assert_eq!(core.error_category(), ErrorCategory::Unknown);
    }
}
