//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and a stable exit code.

use miette::Diagnostic;
use thiserror::Error;

use mdmctl_config::ConfigError;
use mdmctl_core::{CoreError, ErrorCategory};

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const PERMISSION: i32 = 5;
    pub const CONFLICT: i32 = 6;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
    /// The batch ran but at least one target failed.
    pub const PARTIAL_FAILURE: i32 = 9;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the management endpoint at {url}")]
    #[diagnostic(
        code(mdmctl::connection_failed),
        help(
            "Check that the endpoint is up and reachable.\n\
             Reason: {reason}\n\
             For self-signed certificates, try --insecure or set ca_cert in your profile."
        )
    )]
    ConnectionFailed { url: String, reason: String },

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(mdmctl::auth_failed),
        help(
            "Check the bearer token for profile '{profile}'.\n\
             Pass --token, set MDMCTL_TOKEN, or configure token_env in the profile."
        )
    )]
    AuthFailed { profile: String, message: String },

    #[error("Permission denied: {message}")]
    #[diagnostic(
        code(mdmctl::permission_denied),
        help("The token is valid but lacks the rights for this operation.")
    )]
    PermissionDenied { message: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{collection} '{identifier}' not found")]
    #[diagnostic(
        code(mdmctl::not_found),
        help("Run: mdmctl validate --target {collection}:{identifier}")
    )]
    NotFound {
        collection: String,
        identifier: String,
    },

    #[error("Conflict: {message}")]
    #[diagnostic(code(mdmctl::conflict))]
    Conflict { message: String },

    // ── API ──────────────────────────────────────────────────────────
    #[error("API error ({code}): {message}")]
    #[diagnostic(code(mdmctl::api_error))]
    ApiError { code: String, message: String },

    // ── Batch ────────────────────────────────────────────────────────
    #[error("Batch blocked: {count} validation error(s)")]
    #[diagnostic(
        code(mdmctl::validation_blocked),
        help(
            "Fix or remove the flagged targets, or rerun with\n\
             --validation exclude (skip them) or --validation warn (run them anyway)."
        )
    )]
    ValidationBlocked { count: usize },

    #[error("Target validation aborted at {target}: {message}")]
    #[diagnostic(
        code(mdmctl::validation_aborted),
        help("The endpoint failed transiently. Retry later, or lower --concurrency.")
    )]
    ValidationAborted { target: String, message: String },

    #[error("{failed} of {total} target(s) failed")]
    #[diagnostic(
        code(mdmctl::partial_failure),
        help("Rerun with --ignore-partial-failures to treat partial success as success.")
    )]
    PartialFailure { failed: usize, total: usize },

    #[error("{target}: change accepted but not confirmed after {attempts} read(s)")]
    #[diagnostic(
        code(mdmctl::not_confirmed),
        help(
            "The endpoint accepted the change but never showed it: {reason}.\n\
             It may still apply. Check later with: mdmctl get"
        )
    )]
    NotConfirmed {
        target: String,
        attempts: u32,
        reason: String,
    },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(mdmctl::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(mdmctl::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: mdmctl --endpoint <URL> config init --name {name}"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No management endpoint configured")]
    #[diagnostic(
        code(mdmctl::no_config),
        help(
            "Pass --endpoint, set MDMCTL_ENDPOINT, or create a profile with:\n\
             mdmctl --endpoint <URL> config init\n\
             Expected config at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(mdmctl::config))]
    Config(#[from] ConfigError),

    // ── Interactive ──────────────────────────────────────────────────
    #[error("Operation '{action}' requires confirmation")]
    #[diagnostic(
        code(mdmctl::confirmation_required),
        help("Use --yes (-y) to skip confirmation in non-interactive contexts.")
    )]
    NonInteractiveRequiresYes { action: String },

    #[error("Aborted by user")]
    #[diagnostic(code(mdmctl::aborted))]
    Aborted,

    // ── Lifecycle ────────────────────────────────────────────────────
    #[error("Request timed out after {seconds}s")]
    #[diagnostic(
        code(mdmctl::timeout),
        help("Increase the per-request timeout with --timeout.")
    )]
    Timeout { seconds: u64 },

    #[error("{operation}: deadline exceeded")]
    #[diagnostic(
        code(mdmctl::deadline_exceeded),
        help("Raise the batch deadline with --batch-timeout or batch_timeout in the profile.")
    )]
    DeadlineExceeded { operation: String },

    #[error("{operation}: cancelled")]
    #[diagnostic(code(mdmctl::cancelled))]
    Cancelled { operation: String },

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(mdmctl::json), help("Check the JSON file contents and try again."))]
    Json(#[from] serde_json::Error),

    #[error("YAML rendering failed: {0}")]
    #[diagnostic(code(mdmctl::yaml))]
    Yaml(#[from] serde_yaml::Error),

    #[error("Internal error: {0}")]
    #[diagnostic(code(mdmctl::internal))]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::PermissionDenied { .. } => exit_code::PERMISSION,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Conflict { .. } => exit_code::CONFLICT,
            Self::Timeout { .. } | Self::DeadlineExceeded { .. } => exit_code::TIMEOUT,
            Self::PartialFailure { .. } | Self::NotConfirmed { .. } => exit_code::PARTIAL_FAILURE,
            Self::Validation { .. }
            | Self::ValidationBlocked { .. }
            | Self::NonInteractiveRequiresYes { .. }
            | Self::ProfileNotFound { .. }
            | Self::NoConfig { .. }
            | Self::Config(_) => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }

    /// Attach the active profile name to authentication failures.
    #[must_use]
    pub fn with_profile(self, profile: &str) -> Self {
        match self {
            Self::AuthFailed { message, .. } => Self::AuthFailed {
                profile: profile.into(),
                message,
            },
            other => other,
        }
    }
}

// ── Conversion from CoreError ────────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        let category = err.error_category();
        match err {
            CoreError::ConnectionFailed { url, reason } => Self::ConnectionFailed { url, reason },
            CoreError::AuthenticationFailed { message } => Self::AuthFailed {
                profile: "default".into(),
                message,
            },
            CoreError::Timeout { timeout_secs } => Self::Timeout {
                seconds: timeout_secs,
            },
            CoreError::DeadlineExceeded { operation } => Self::DeadlineExceeded { operation },
            CoreError::Cancelled { operation } => Self::Cancelled { operation },
            CoreError::NotFound {
                collection,
                identifier,
            } => Self::NotFound {
                collection,
                identifier,
            },
            CoreError::ValidationFailed { message } => Self::Validation {
                field: "input".into(),
                reason: message,
            },
            CoreError::ValidationAborted { target, message } => {
                Self::ValidationAborted { target, message }
            }
            CoreError::NotConfirmed {
                target,
                attempts,
                reason,
            } => Self::NotConfirmed {
                target,
                attempts,
                reason,
            },
            CoreError::BatchFailed { failed, total, .. } => Self::PartialFailure { failed, total },
            CoreError::Api { message, code, .. } => match category {
                ErrorCategory::PermissionDenied => Self::PermissionDenied { message },
                ErrorCategory::Conflict => Self::Conflict { message },
                ErrorCategory::NotFound => Self::NotFound {
                    collection: "object".into(),
                    identifier: code.unwrap_or_default(),
                },
                _ => Self::ApiError {
                    code: code.unwrap_or_else(|| category.to_string()),
                    message,
                },
            },
            CoreError::Config { message } => Self::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::Internal(message) => Self::Internal(message),
        }
    }
}
