// ── Reconciling reader ──
//
// Reads after a write until the remote side reflects it. `NotFound`,
// `Transient`, and "read fine but not ready yet" are treated as consistency
// lag and retried; every other error category aborts immediately.
//
//   Attempting ──ready──▶ Ready
//       │ ├──────budget / deadline──▶ Exhausted
//       │ └──non-lag error──────────▶ Aborted

use std::fmt;
use std::future::Future;
use std::time::Duration;

use strum::Display;
use thiserror::Error;
use tracing::{debug, warn};

use crate::classify::{Classify, ErrorCategory, classify};
use crate::deadline::{DoneReason, OpContext};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_DELAY: Duration = Duration::from_secs(2);

// ── Backoff policies ─────────────────────────────────────────────

/// Delay to wait after the `attempt`-th read (1-based) before the next one.
///
/// Policies need not be monotonic; [`reconcile`] clamps the sequence so a
/// later delay is never shorter than an earlier one.
pub trait Backoff {
    fn delay(&self, attempt: u32) -> Duration;
}

impl<F> Backoff for F
where
    F: Fn(u32) -> Duration,
{
    fn delay(&self, attempt: u32) -> Duration {
        self(attempt)
    }
}

/// Same delay after every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff(pub Duration);

impl Default for FixedBackoff {
    fn default() -> Self {
        Self(DEFAULT_DELAY)
    }
}

impl Backoff for FixedBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

/// `initial + step * (attempt - 1)`, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearBackoff {
    pub initial: Duration,
    pub step: Duration,
    pub max: Duration,
}

impl Backoff for LinearBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let grown = self
            .step
            .saturating_mul(attempt.saturating_sub(1))
            .saturating_add(self.initial);
        grown.min(self.max)
    }
}

// ── Errors ───────────────────────────────────────────────────────

/// Why the read loop gave up without the object becoming ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ExhaustReason {
    #[strum(to_string = "attempt budget spent")]
    MaxAttempts,
    #[strum(to_string = "deadline exceeded")]
    DeadlineExceeded,
    #[strum(to_string = "cancelled")]
    Cancelled,
}

impl From<DoneReason> for ExhaustReason {
    fn from(reason: DoneReason) -> Self {
        match reason {
            DoneReason::Cancelled => Self::Cancelled,
            DoneReason::DeadlineExceeded => Self::DeadlineExceeded,
        }
    }
}

/// Terminal failure of [`reconcile`].
///
/// `Exhausted` means the remote side never confirmed within budget (the
/// write may still land). `Aborted` means a read failed for a reason that
/// waiting will not fix.
#[derive(Debug, Error)]
pub enum ReconcileError<E: fmt::Debug + fmt::Display> {
    #[error("not ready after {attempts} read(s): {reason}{}", last_error_suffix(.last_error.as_deref()))]
    Exhausted {
        attempts: u32,
        reason: ExhaustReason,
        last_error: Option<String>,
    },

    #[error("read {attempt} failed ({category}): {error}")]
    Aborted {
        attempt: u32,
        category: ErrorCategory,
        error: E,
    },
}

fn last_error_suffix(last_error: Option<&str>) -> String {
    last_error.map_or_else(String::new, |e| format!(" (last: {e})"))
}

impl<E: fmt::Debug + fmt::Display> ReconcileError<E> {
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// Reads performed before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::Aborted { attempt, .. } => *attempt,
        }
    }
}

// ── Read loop ────────────────────────────────────────────────────

/// Book-keeping for one `reconcile` call.
#[derive(Debug)]
struct ReconciliationAttempt {
    attempt_number: u32,
    last_error: Option<String>,
}

impl ReconciliationAttempt {
    fn exhausted<E: fmt::Debug + fmt::Display>(&self, reason: ExhaustReason) -> ReconcileError<E> {
        warn!(
            attempts = self.attempt_number,
            %reason,
            last_error = self.last_error.as_deref().unwrap_or("-"),
            "reconciliation gave up"
        );
        ReconcileError::Exhausted {
            attempts: self.attempt_number,
            reason,
            last_error: self.last_error.clone(),
        }
    }
}

/// Call `read` until `is_ready` accepts its value.
///
/// At most `max_attempts` reads happen (a budget of `0` is treated as `1`).
/// No read starts once `ctx` is done, and both reads and sleeps are raced
/// against it. Delays come from `backoff`, clamped to be non-decreasing; a
/// delay that would carry the next read past the deadline ends the loop
/// right away.
pub async fn reconcile<T, E, R, Fut, P, B>(
    ctx: &OpContext,
    mut read: R,
    is_ready: P,
    max_attempts: u32,
    backoff: &B,
) -> Result<T, ReconcileError<E>>
where
    R: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Classify + fmt::Debug + fmt::Display,
    P: Fn(&T) -> bool,
    B: Backoff + ?Sized,
{
    let max_attempts = max_attempts.max(1);
    let mut state = ReconciliationAttempt {
        attempt_number: 0,
        last_error: None,
    };
    let mut floor = Duration::ZERO;

    loop {
        if let Some(reason) = ctx.done_reason() {
            return Err(state.exhausted(reason.into()));
        }

        state.attempt_number += 1;
        let attempt = state.attempt_number;
        let result = tokio::select! {
            biased;
            reason = ctx.done() => return Err(state.exhausted(reason.into())),
            result = read() => result,
        };

        match result {
            Ok(value) if is_ready(&value) => {
                debug!(attempt, "reconciliation settled");
                return Ok(value);
            }
            Ok(_) => {
                debug!(attempt, "object not ready yet");
                state.last_error = Some("object not yet in the expected state".into());
            }
            Err(error) => {
                let category = classify(&error);
                if !category.is_consistency_delay() {
                    debug!(attempt, %category, error = %error, "reconciliation aborted");
                    return Err(ReconcileError::Aborted {
                        attempt,
                        category,
                        error,
                    });
                }
                debug!(attempt, %category, error = %error, "read failed, treating as lag");
                state.last_error = Some(format!("{category}: {error}"));
            }
        }

        if attempt >= max_attempts {
            return Err(state.exhausted(ExhaustReason::MaxAttempts));
        }

        let delay = backoff.delay(attempt).max(floor);
        floor = delay;
        if ctx.remaining().is_some_and(|left| delay >= left) {
            debug!(attempt, delay_ms = delay.as_millis(), "next read would land past the deadline");
            return Err(state.exhausted(ExhaustReason::DeadlineExceeded));
        }

        tokio::select! {
            biased;
            reason = ctx.done() => return Err(state.exhausted(reason.into())),
            () = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use tokio::time::Instant;

    use super::*;

    fn api_error(status: u16) -> mdmctl_api::Error {
        mdmctl_api::Error::Api {
            status,
            code: None,
            message: format!("HTTP {status}"),
        }
    }

    /// 404 until the `visible_at`-th read, then the current count.
    fn eventually_visible(
        reads: &AtomicU32,
        visible_at: u32,
    ) -> impl FnMut() -> std::future::Ready<Result<u32, mdmctl_api::Error>> + '_ {
        move || {
            let n = reads.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(if n >= visible_at {
                Ok(n)
            } else {
                Err(api_error(404))
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn settles_on_third_read() {
        let reads = AtomicU32::new(0);
        let value = reconcile(
            &OpContext::background(),
            eventually_visible(&reads, 3),
            |_| true,
            5,
            &FixedBackoff::default(),
        )
        .await
        .unwrap();
        assert_eq!(value, 3);
        assert_eq!(reads.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_exactly_max_attempts() {
        let reads = AtomicU32::new(0);
        let err = reconcile(
            &OpContext::background(),
            eventually_visible(&reads, u32::MAX),
            |_| true,
            3,
            &FixedBackoff::default(),
        )
        .await
        .unwrap_err();

        assert_eq!(reads.load(Ordering::SeqCst), 3);
        match err {
            ReconcileError::Exhausted {
                attempts,
                reason,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(reason, ExhaustReason::MaxAttempts);
                assert!(last_error.unwrap().starts_with("not found"));
            }
            other @ ReconcileError::Aborted { .. } => panic!("expected Exhausted, got {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn not_ready_values_are_retried() {
        let reads = AtomicU32::new(0);
        let read = || {
            let n = reads.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok::<_, mdmctl_api::Error>(n) }
        };
        let value = reconcile(&OpContext::background(), read, |n| *n == 2, 5, &FixedBackoff::default())
            .await
            .unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn permission_error_aborts_without_retry() {
        let reads = AtomicU32::new(0);
        let read = || {
            reads.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Err::<u32, _>(api_error(403)))
        };
        let err = reconcile(&OpContext::background(), read, |_| true, 5, &FixedBackoff::default())
            .await
            .unwrap_err();

        assert_eq!(reads.load(Ordering::SeqCst), 1);
        assert!(!err.is_exhausted());
        assert!(matches!(
            err,
            ReconcileError::Aborted {
                attempt: 1,
                category: ErrorCategory::PermissionDenied,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let reads = AtomicU32::new(0);
        let read = || {
            let n = reads.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(if n == 1 { Err(api_error(503)) } else { Ok(n) })
        };
        let value = reconcile(&OpContext::background(), read, |_| true, 5, &FixedBackoff::default())
            .await
            .unwrap();
        assert_eq!(value, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_past_deadline_gives_up_without_sleeping() {
        let ctx = OpContext::background().child(Some(Instant::now() + Duration::from_secs(1)));
        let reads = AtomicU32::new(0);
        let started = Instant::now();
        let err = reconcile(
            &ctx,
            eventually_visible(&reads, u32::MAX),
            |_| true,
            10,
            &FixedBackoff(Duration::from_secs(30)),
        )
        .await
        .unwrap_err();

        assert_eq!(reads.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
        assert!(matches!(
            err,
            ReconcileError::Exhausted {
                attempts: 1,
                reason: ExhaustReason::DeadlineExceeded,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_backoff_under_deadline_does_not_overflow() {
        let ctx = OpContext::background().child(Some(Instant::now() + Duration::from_secs(10)));
        let reads = AtomicU32::new(0);
        let err = reconcile(
            &ctx,
            eventually_visible(&reads, u32::MAX),
            |_| true,
            3,
            &|_: u32| Duration::MAX,
        )
        .await
        .unwrap_err();

        assert_eq!(reads.load(Ordering::SeqCst), 1);
        assert!(matches!(
            err,
            ReconcileError::Exhausted {
                reason: ExhaustReason::DeadlineExceeded,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_backoff_sleep() {
        let ctx = OpContext::background().child(Some(Instant::now() + Duration::from_secs(5)));
        let reads = AtomicU32::new(0);
        let started = Instant::now();
        let slow_read = || {
            reads.fetch_add(1, Ordering::SeqCst);
            async {
                tokio::time::sleep(Duration::from_secs(3)).await;
                Err::<u32, _>(api_error(404))
            }
        };
        // 3s read + 1s backoff fits; the second read runs into the deadline
        let err = reconcile(&ctx, slow_read, |_| true, 10, &FixedBackoff(Duration::from_secs(1)))
            .await
            .unwrap_err();

        assert_eq!(reads.load(Ordering::SeqCst), 2);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        assert!(matches!(
            err,
            ReconcileError::Exhausted {
                reason: ExhaustReason::DeadlineExceeded,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn done_context_performs_no_reads() {
        let ctx = OpContext::background();
        ctx.cancel();
        let reads = AtomicU32::new(0);
        let err = reconcile(&ctx, eventually_visible(&reads, 1), |_| true, 5, &FixedBackoff::default())
            .await
            .unwrap_err();
        assert_eq!(reads.load(Ordering::SeqCst), 0);
        assert_eq!(err.attempts(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_budget_still_reads_once() {
        let reads = AtomicU32::new(0);
        let _ = reconcile(
            &OpContext::background(),
            eventually_visible(&reads, u32::MAX),
            |_| true,
            0,
            &FixedBackoff::default(),
        )
        .await;
        assert_eq!(reads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shrinking_policy_is_clamped() {
        let reads = AtomicU32::new(0);
        let read_times = Mutex::new(Vec::new());
        let read = || {
            read_times.lock().unwrap().push(Instant::now());
            let n = reads.fetch_add(1, Ordering::SeqCst) + 1;
            std::future::ready(if n >= 4 { Ok(n) } else { Err(api_error(404)) })
        };
        // 3s, 2s, 1s from the policy; 3s, 3s, 3s after clamping
        let shrinking = |attempt: u32| Duration::from_secs(u64::from(4 - attempt.min(3)));
        reconcile(&OpContext::background(), read, |_| true, 5, &shrinking)
            .await
            .unwrap();

        let times = read_times.into_inner().unwrap();
        let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
        assert_eq!(gaps, vec![Duration::from_secs(3); 3]);
    }

    #[test]
    fn linear_backoff_grows_and_caps() {
        let policy = LinearBackoff {
            initial: Duration::from_secs(1),
            step: Duration::from_secs(2),
            max: Duration::from_secs(4),
        };
        assert_eq!(policy.delay(1), Duration::from_secs(1));
        assert_eq!(policy.delay(2), Duration::from_secs(3));
        assert_eq!(policy.delay(3), Duration::from_secs(4));
        assert_eq!(policy.delay(50), Duration::from_secs(4));
    }
}
