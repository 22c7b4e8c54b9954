// ── Error classification ──
//
// Maps heterogeneous backend failures onto one fixed taxonomy. Every
// retry / abort / skip decision in the crate branches on `ErrorCategory`
// instead of re-parsing vendor payloads.

use serde::Serialize;
use strum::{Display, EnumIter};

/// Stable error taxonomy shared by validation, execution, and reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, EnumIter)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    #[strum(serialize = "not found")]
    NotFound,
    #[strum(serialize = "permission denied")]
    PermissionDenied,
    #[strum(serialize = "conflict")]
    Conflict,
    #[strum(serialize = "transient")]
    Transient,
    #[strum(serialize = "invalid request")]
    Validation,
    #[strum(serialize = "unknown")]
    Unknown,
}

impl ErrorCategory {
    /// `true` for failures that usually mean "the write is not visible yet"
    /// on an eventually consistent backend.
    pub fn is_consistency_delay(self) -> bool {
        matches!(self, Self::NotFound | Self::Transient)
    }
}

/// The raw facts a classifier looks at.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorSignal<'a> {
    /// HTTP-like status code.
    pub status: Option<u16>,
    /// Vendor-specific error code string.
    pub vendor_code: Option<&'a str>,
    /// The request failed below HTTP (connect refused, timed out).
    pub transport_failure: bool,
}

/// Anything that can describe itself as an [`ErrorSignal`].
pub trait Classify {
    fn signal(&self) -> ErrorSignal<'_>;

    fn category(&self) -> ErrorCategory {
        classify_signal(&self.signal())
    }
}

/// Classify an error. Total: unrecognized input is `Unknown`.
pub fn classify<E: Classify + ?Sized>(err: &E) -> ErrorCategory {
    err.category()
}

/// First matching rule wins.
pub fn classify_signal(signal: &ErrorSignal<'_>) -> ErrorCategory {
    let status = signal.status;
    let code = signal.vendor_code.map(normalize_code);
    let code = code.as_deref().filter(|c| !c.is_empty());

    if status == Some(404) || code.is_some_and(is_not_found_code) {
        ErrorCategory::NotFound
    } else if matches!(status, Some(401 | 403)) {
        ErrorCategory::PermissionDenied
    } else if status == Some(409) || code.is_some_and(is_conflict_code) {
        ErrorCategory::Conflict
    } else if status == Some(429)
        || status.is_some_and(|s| (500..600).contains(&s))
        || (status.is_none() && signal.transport_failure)
    {
        ErrorCategory::Transient
    } else if status == Some(400) && code.is_some_and(is_invalid_argument_code) {
        ErrorCategory::Validation
    } else {
        ErrorCategory::Unknown
    }
}

/// Lowercase and strip separators: `Request_ResourceNotFound` -> `requestresourcenotfound`.
fn normalize_code(code: &str) -> String {
    code.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn is_not_found_code(code: &str) -> bool {
    code.ends_with("notfound") || matches!(code, "resourcedoesnotexist" | "doesnotexist")
}

fn is_conflict_code(code: &str) -> bool {
    code.ends_with("alreadyexists")
        || code.ends_with("alreadyinrequestedstate")
        || matches!(code, "conflict" | "resourceconflict" | "requestconflict")
}

fn is_invalid_argument_code(code: &str) -> bool {
    code.starts_with("invalid")
        || matches!(
            code,
            "badrequest" | "validationerror" | "validationfailed" | "modelvalidationfailure"
        )
}

impl Classify for mdmctl_api::Error {
    fn signal(&self) -> ErrorSignal<'_> {
        // An unusable token never reaches the server; treat it like a 401.
        let status = match self {
            Self::InvalidToken(_) => Some(401),
            _ => self.status(),
        };
        ErrorSignal {
            status,
            vendor_code: self.vendor_code(),
            transport_failure: self.is_transport_failure(),
        }
    }
}
