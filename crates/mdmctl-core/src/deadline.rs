// ── Operation context and deadline management ──
//
// `OpContext` carries a cancellation token plus an optional absolute
// deadline. It never enforces anything on its own: consumers check
// `done_reason()` before starting work and race `done()` while blocking.

use std::fmt;
use std::ops::Deref;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::diagnostics::Diagnostics;

/// Why a context stopped accepting new work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoneReason {
    Cancelled,
    DeadlineExceeded,
}

impl fmt::Display for DoneReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "cancelled"),
            Self::DeadlineExceeded => write!(f, "deadline exceeded"),
        }
    }
}

/// Cancellation + deadline handle threaded through every long-running call.
///
/// Cheap to clone. Clones share the same token; [`child`](Self::child)
/// contexts get a child token so cancelling them never cancels the parent.
#[derive(Debug, Clone)]
pub struct OpContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Default for OpContext {
    fn default() -> Self {
        Self::background()
    }
}

impl OpContext {
    /// A context with no deadline that is only done when cancelled.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Wrap an existing token (e.g. one tripped by Ctrl-C).
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Derive a child context. Its deadline is the earlier of the parent's
    /// and `deadline`.
    pub fn child(&self, deadline: Option<Instant>) -> Self {
        let deadline = match (self.deadline, deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            token: self.token.child_token(),
            deadline,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Cancel this context and every child. Idempotent.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    pub fn is_done(&self) -> bool {
        self.done_reason().is_some()
    }

    /// Non-blocking check. Cancellation is reported ahead of expiry.
    pub fn done_reason(&self) -> Option<DoneReason> {
        if self.is_cancelled() {
            Some(DoneReason::Cancelled)
        } else if self.is_expired() {
            Some(DoneReason::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> DoneReason {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                () = self.token.cancelled() => DoneReason::Cancelled,
                () = tokio::time::sleep_until(deadline) => DoneReason::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                DoneReason::Cancelled
            }
        }
    }
}

// ── Scoped deadline ──────────────────────────────────────────────

/// A bounded-lifetime context that is cancelled when dropped.
///
/// Dereferences to [`OpContext`]. Calling [`cancel`](Self::cancel) early is
/// allowed and safe to repeat; drop cancels again as a no-op.
#[derive(Debug)]
pub struct DeadlineGuard {
    ctx: OpContext,
}

impl DeadlineGuard {
    pub fn context(&self) -> &OpContext {
        &self.ctx
    }

    pub fn cancel(&self) {
        self.ctx.cancel();
    }
}

impl Deref for DeadlineGuard {
    type Target = OpContext;

    fn deref(&self) -> &OpContext {
        &self.ctx
    }
}

impl Drop for DeadlineGuard {
    fn drop(&mut self) {
        self.ctx.cancel();
    }
}

/// Derive a deadline-bounded context from `parent`.
///
/// The deadline is `now + requested` when `requested` is set and non-zero,
/// otherwise `now + default`, and never later than the parent's deadline.
/// Returns `None` without creating anything when `diagnostics` already
/// carries an error.
pub fn with_deadline(
    parent: &OpContext,
    requested: Option<Duration>,
    default: Duration,
    diagnostics: &Diagnostics,
) -> Option<DeadlineGuard> {
    if diagnostics.has_error() {
        debug!("skipping deadline setup: diagnostics already carry an error");
        return None;
    }

    let lifetime = requested.filter(|d| !d.is_zero()).unwrap_or(default);
    let deadline = Instant::now().checked_add(lifetime);
    debug!(lifetime_ms = lifetime.as_millis(), "operation deadline set");

    Some(DeadlineGuard {
        ctx: parent.child(deadline),
    })
}
