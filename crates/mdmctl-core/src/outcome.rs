// ── Batch execution and outcome tracking ──
//
// `BatchRunner` fans a batch out over a bounded worker pool; every result
// flows back to a single aggregator loop that owns the `OutcomeTracker`,
// so actions never touch shared state.

use std::fmt;
use std::future::Future;

use chrono::Utc;
use futures_util::StreamExt;
use futures_util::stream;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classify::{Classify, ErrorCategory, classify};
use crate::deadline::OpContext;
use crate::model::{
    BatchEvent, BatchOutcome, BatchSummary, FinalStatus, OutcomeRecord, OutcomeStatus,
    ProgressEvent, Target,
};

pub const DEFAULT_CONCURRENCY: usize = 4;

// ── OutcomeTracker ───────────────────────────────────────────────

/// Owns one record per target and the running counters.
///
/// Records start `Pending` and move to `Succeeded` or `Failed` exactly once;
/// each move emits a [`BatchEvent::Progress`], and [`finish`](Self::finish)
/// emits the closing [`BatchEvent::Summary`].
#[derive(Debug)]
pub struct OutcomeTracker {
    batch_id: Uuid,
    records: Vec<OutcomeRecord>,
    success_count: usize,
    failure_count: usize,
    started_at: chrono::DateTime<Utc>,
    events: Option<UnboundedSender<BatchEvent>>,
}

impl OutcomeTracker {
    pub fn new(targets: impl IntoIterator<Item = Target>) -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            records: targets.into_iter().map(OutcomeRecord::pending).collect(),
            success_count: 0,
            failure_count: 0,
            started_at: Utc::now(),
            events: None,
        }
    }

    #[must_use]
    pub fn with_events(mut self, events: UnboundedSender<BatchEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    pub fn records(&self) -> &[OutcomeRecord] {
        &self.records
    }

    pub fn success_count(&self) -> usize {
        self.success_count
    }

    pub fn failure_count(&self) -> usize {
        self.failure_count
    }

    pub fn has_failures(&self) -> bool {
        self.failure_count > 0
    }

    pub fn pending_count(&self) -> usize {
        self.records.len() - self.success_count - self.failure_count
    }

    pub fn succeed(&mut self, index: usize, message: impl Into<String>) -> bool {
        self.settle(index, OutcomeStatus::Succeeded, message.into())
    }

    pub fn fail(&mut self, index: usize, message: impl Into<String>) -> bool {
        self.settle(index, OutcomeStatus::Failed, message.into())
    }

    /// Returns `false` when `index` is out of range or already terminal.
    fn settle(&mut self, index: usize, status: OutcomeStatus, message: String) -> bool {
        let Some(record) = self.records.get_mut(index) else {
            return false;
        };
        if !record.settle(status, message) {
            debug!(target = %record.target, "ignoring second settlement");
            return false;
        }

        match status {
            OutcomeStatus::Succeeded => self.success_count += 1,
            OutcomeStatus::Failed => self.failure_count += 1,
            OutcomeStatus::Pending => {}
        }
        debug!(target = %record.target, %status, message = %record.message, "target settled");

        let event = BatchEvent::Progress(ProgressEvent {
            batch_id: self.batch_id,
            target_id: record.target.id.clone(),
            category: record.target.category.clone(),
            status,
            message: record.message.clone(),
            timestamp: Utc::now(),
        });
        self.emit(event);
        true
    }

    fn emit(&self, event: BatchEvent) {
        if let Some(tx) = &self.events {
            // A dropped receiver only means nobody is watching.
            let _ = tx.send(event);
        }
    }

    /// Close the batch. Records still pending are failed as "not executed".
    pub fn finish(mut self, ignore_partial_failures: bool) -> BatchOutcome {
        for index in 0..self.records.len() {
            if self.records[index].status == OutcomeStatus::Pending {
                warn!(target = %self.records[index].target, "target never executed");
                self.fail(index, "not executed");
            }
        }

        let final_status = FinalStatus::compute(self.failure_count, ignore_partial_failures);
        self.emit(BatchEvent::Summary(BatchSummary {
            batch_id: self.batch_id,
            total: self.records.len(),
            success_count: self.success_count,
            failure_count: self.failure_count,
            final_status,
        }));
        info!(
            batch_id = %self.batch_id,
            succeeded = self.success_count,
            failed = self.failure_count,
            %final_status,
            "batch finished"
        );

        BatchOutcome {
            batch_id: self.batch_id,
            records: self.records,
            success_count: self.success_count,
            failure_count: self.failure_count,
            final_status,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

// ── BatchRunner ──────────────────────────────────────────────────

/// Runs one action per target with at most `concurrency` in flight.
///
/// `concurrency = 1` runs targets strictly in order.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    concurrency: usize,
    events: Option<UnboundedSender<BatchEvent>>,
}

impl Default for BatchRunner {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl BatchRunner {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
            events: None,
        }
    }

    #[must_use]
    pub fn with_events(mut self, events: UnboundedSender<BatchEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Execute `action` for every target.
    ///
    /// A failing action only fails its own record. Once `ctx` is done no
    /// further action starts: in-flight ones finish, the rest are failed
    /// with the done reason.
    pub async fn run<A, Fut, E>(
        &self,
        ctx: &OpContext,
        targets: Vec<Target>,
        action: A,
        ignore_partial_failures: bool,
    ) -> BatchOutcome
    where
        A: Fn(Target) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Classify + fmt::Display,
    {
        let mut tracker = OutcomeTracker::new(targets.iter().cloned());
        if let Some(tx) = &self.events {
            tracker = tracker.with_events(tx.clone());
        }
        info!(
            batch_id = %tracker.batch_id(),
            targets = targets.len(),
            concurrency = self.concurrency,
            "batch started"
        );

        let action = &action;
        let mut results = stream::iter(targets.into_iter().enumerate())
            .map(|(index, target)| async move {
                if let Some(reason) = ctx.done_reason() {
                    debug!(target = %target, %reason, "skipping target");
                    return (index, Err(reason.to_string()));
                }
                let label = target.to_string();
                match action(target).await {
                    Ok(()) => (index, Ok(())),
                    Err(e) => {
                        let category = classify(&e);
                        warn!(target = %label, %category, error = %e, "action failed");
                        (index, Err(failure_message(category, &e)))
                    }
                }
            })
            .buffer_unordered(self.concurrency);

        while let Some((index, result)) = results.next().await {
            match result {
                Ok(()) => tracker.succeed(index, ""),
                Err(message) => tracker.fail(index, message),
            };
        }

        tracker.finish(ignore_partial_failures)
    }
}

/// `"{category}: {error}"`, or just the error when it could not be classified.
fn failure_message(category: ErrorCategory, error: &impl fmt::Display) -> String {
    if category == ErrorCategory::Unknown {
        error.to_string()
    } else {
        format!("{category}: {error}")
    }
}

/// Run a batch with the default worker pool and no event stream.
pub async fn run_batch<A, Fut, E>(
    ctx: &OpContext,
    targets: Vec<Target>,
    action: A,
    ignore_partial_failures: bool,
) -> BatchOutcome
where
    A: Fn(Target) -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Classify + fmt::Display,
{
    BatchRunner::default()
        .run(ctx, targets, action, ignore_partial_failures)
        .await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::mpsc;
    use tokio::time::Instant;

    use super::*;

    fn targets(n: usize) -> Vec<Target> {
        (0..n)
            .map(|i| format!("managedDevices:d{i}").parse().unwrap())
            .collect()
    }

    fn conflict() -> mdmctl_api::Error {
        mdmctl_api::Error::Api {
            status: 409,
            code: None,
            message: "already restarting".into(),
        }
    }

    #[test]
    fn tracker_counts_each_transition_once() {
        let mut tracker = OutcomeTracker::new(targets(3));
        assert_eq!(tracker.pending_count(), 3);
        assert!(tracker.succeed(0, ""));
        assert!(tracker.fail(1, "boom"));
        assert!(!tracker.succeed(1, "late"));
        assert!(!tracker.fail(7, "out of range"));
        assert_eq!(tracker.success_count(), 1);
        assert_eq!(tracker.failure_count(), 1);
        assert!(tracker.has_failures());

        let outcome = tracker.finish(true);
        assert_eq!(outcome.records[2].status, OutcomeStatus::Failed);
        assert_eq!(outcome.records[2].message, "not executed");
        assert_eq!(outcome.failure_count, 2);
        assert_eq!(outcome.final_status, FinalStatus::SuccessWithIgnoredFailures);
    }

    #[test]
    fn events_follow_transitions() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tracker = OutcomeTracker::new(targets(2)).with_events(tx);
        tracker.succeed(0, "");
        tracker.succeed(0, "again");
        tracker.fail(1, "nope");
        let outcome = tracker.finish(false);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 3);
        assert!(matches!(&events[0], BatchEvent::Progress(p) if p.target_id == "d0"));
        assert!(matches!(&events[1], BatchEvent::Progress(p) if p.status == OutcomeStatus::Failed));
        match &events[2] {
            BatchEvent::Summary(summary) => {
                assert_eq!(summary.batch_id, outcome.batch_id);
                assert_eq!(summary.final_status, FinalStatus::Failed);
                assert_eq!(summary.total, 2);
            }
            BatchEvent::Progress(_) => panic!("expected summary last"),
        }
    }

    #[tokio::test]
    async fn failures_do_not_stop_siblings() {
        let action = |t: Target| async move {
            if t.id == "d1" { Err(conflict()) } else { Ok(()) }
        };
        let outcome = BatchRunner::new(1)
            .run(&OpContext::background(), targets(3), action, false)
            .await;

        assert_eq!(outcome.success_count, 2);
        assert_eq!(outcome.failure_count, 1);
        assert_eq!(outcome.final_status, FinalStatus::Failed);
        assert!(outcome.records[1].message.starts_with("conflict: "));
        assert!(outcome.records.iter().all(|r| r.status.is_terminal()));
    }

    #[tokio::test(start_paused = true)]
    async fn pool_bounds_in_flight_actions() {
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let action = |_t: Target| {
            let in_flight = &in_flight;
            let peak = &peak;
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<(), mdmctl_api::Error>(())
            }
        };
        let outcome = BatchRunner::new(3)
            .run(&OpContext::background(), targets(10), action, false)
            .await;

        assert_eq!(outcome.success_count, 10);
        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fails_targets_not_yet_started() {
        let ctx = OpContext::background().child(Some(Instant::now() + Duration::from_millis(2500)));
        let action = |_t: Target| async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<(), mdmctl_api::Error>(())
        };
        let outcome = BatchRunner::new(1).run(&ctx, targets(5), action, false).await;

        // d0..d2 start at 0s, 1s, 2s; d3 would start at 3s
        assert_eq!(outcome.success_count, 3);
        assert_eq!(outcome.failure_count, 2);
        assert_eq!(outcome.records[3].message, "deadline exceeded");
        assert_eq!(outcome.records[4].message, "deadline exceeded");
    }

    #[tokio::test]
    async fn empty_batch_succeeds() {
        let outcome = run_batch(
            &OpContext::background(),
            Vec::new(),
            |_t: Target| async { Ok::<(), mdmctl_api::Error>(()) },
            false,
        )
        .await;
        assert_eq!(outcome.final_status, FinalStatus::Success);
        assert!(outcome.records.is_empty());
    }
}
