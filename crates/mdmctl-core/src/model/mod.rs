// ── Domain model ──
//
// Batch-level types shared by validation, execution, and the CLI.

pub mod outcome;
pub mod report;
pub mod target;

pub use outcome::{
    BatchEvent, BatchOutcome, BatchSummary, FinalStatus, OutcomeRecord, OutcomeStatus,
    ProgressEvent,
};
pub use report::{CategoryReport, UnsupportedTarget, ValidationReport};
pub use target::{Category, Target};
