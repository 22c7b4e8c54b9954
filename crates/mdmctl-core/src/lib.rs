//! Batch execution core between `mdmctl-api` and the CLI.
//!
//! Runs operator actions against many remote objects of an eventually
//! consistent management API, under a partial-failure policy:
//!
//! - **[`classify`](mod@classify)**: maps any transport or API failure onto a small
//!   [`ErrorCategory`] set (`NotFound`, `PermissionDenied`, `Conflict`,
//!   `Transient`, `Validation`, `Unknown`). Every retry and severity
//!   decision in the crate goes through it.
//!
//! - **[`deadline`]**: [`OpContext`] (cancellation token + optional
//!   deadline) and [`with_deadline`], which scopes a bounded lifetime to a
//!   [`DeadlineGuard`] that cancels on drop.
//!
//! - **[`validate`](mod@validate)**: pre-flight screening: one lookup per unique
//!   target, capability predicates, duplicate and cross-listing warnings.
//!   Produces a [`ValidationReport`] that callers render as
//!   [`Diagnostics`].
//!
//! - **[`reconcile`](mod@reconcile)**: read-after-write loop with a bounded attempt
//!   budget, non-decreasing backoff, and interruptible sleeps.
//!
//! - **[`outcome`]**: [`BatchRunner`] / [`OutcomeTracker`]: a bounded
//!   worker pool feeding one aggregator, per-target records, progress
//!   events, and the final partial-failure verdict.
//!
//! - **[`Operator`]**: facade wiring all of the above around one
//!   [`RemoteObjectClient`](mdmctl_api::RemoteObjectClient).

pub mod classify;
pub mod config;
pub mod deadline;
pub mod diagnostics;
pub mod error;
pub mod model;
pub mod operator;
pub mod outcome;
pub mod reconcile;
pub mod validate;

// ── Primary re-exports ──────────────────────────────────────────────
pub use classify::{Classify, ErrorCategory, ErrorSignal, classify};
pub use config::{BatchConfig, ClientConfig, ReconcileSettings, ValidationPolicy};
pub use deadline::{DeadlineGuard, DoneReason, OpContext, with_deadline};
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use error::CoreError;
pub use operator::{Action, BatchRun, Operator};
pub use outcome::{BatchRunner, OutcomeTracker, run_batch};
pub use reconcile::{
    Backoff, ExhaustReason, FixedBackoff, LinearBackoff, ReconcileError, reconcile,
};
pub use validate::{Capability, CapabilityRule, check_rules, validate};

pub use model::{
    BatchEvent, BatchOutcome, BatchSummary, Category, CategoryReport, FinalStatus, OutcomeRecord,
    OutcomeStatus, ProgressEvent, Target, UnsupportedTarget, ValidationReport,
};

// The transport layer is part of the public surface.
pub use mdmctl_api::{HttpRemoteClient, RemoteObject, RemoteObjectClient, TlsMode};
