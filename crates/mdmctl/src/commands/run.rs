//! `mdmctl run <verb> --target category:id…`
//!
//! Validate, confirm, execute with a live progress bar, then print one
//! row per target and a summary line. Exit status follows the batch
//! verdict: a `failed` batch exits with `PARTIAL_FAILURE`.

use std::collections::HashSet;

use indicatif::ProgressBar;
use tabled::Tabled;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::debug;

use mdmctl_config::parse_duration;
use mdmctl_core::{
    Action, BatchConfig, BatchEvent, BatchOutcome, OpContext, Operator, OutcomeRecord,
    OutcomeStatus, Target, ValidationPolicy,
};

use crate::cli::{GlobalOpts, OutputFormat, RunArgs, ValidationMode};
use crate::commands::util;
use crate::error::CliError;
use crate::output;

#[derive(Debug, Tabled)]
struct RecordRow {
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Message")]
    message: String,
}

impl From<&OutcomeRecord> for RecordRow {
    fn from(r: &OutcomeRecord) -> Self {
        Self {
            target: r.target.to_string(),
            status: r.status.to_string(),
            message: r.message.clone(),
        }
    }
}

impl From<ValidationMode> for ValidationPolicy {
    fn from(mode: ValidationMode) -> Self {
        match mode {
            ValidationMode::Strict => Self::Strict,
            ValidationMode::Exclude => Self::Exclude,
            ValidationMode::Warn => Self::Warn,
        }
    }
}

pub async fn handle(
    args: RunArgs,
    operator: &Operator,
    ctx: &OpContext,
    batch: BatchConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let batch = batch_config(&args, batch)?;
    let action = build_action(&args)?;

    if batch.targets.is_empty() {
        return Err(CliError::Validation {
            field: "target".into(),
            reason: "at least one target is required".into(),
        });
    }
    let unique = batch
        .targets
        .iter()
        .map(Target::key)
        .collect::<HashSet<_>>()
        .len();

    util::confirm(
        &format!("Apply '{action}' to {unique} target(s)?"),
        &format!("run {action}"),
        global.yes,
    )?;

    let color = output::should_color(global.color);
    let (tx, rx) = mpsc::unbounded_channel();
    let bar = output::batch_progress(unique, &action.verb, global.quiet);
    let progress = tokio::spawn(track_progress(rx, bar, color));

    let run = operator.run(ctx, &batch, &action, Some(tx)).await;
    // The sender is gone once `run` returns, so the tracker drains and ends.
    let _ = progress.await;
    let run = run?;

    output::print_diagnostics(&run.diagnostics, global.quiet, color);
    let Some(ref outcome) = run.outcome else {
        return Err(CliError::ValidationBlocked {
            count: run.diagnostics.errors().count(),
        });
    };

    let rendered = match global.output {
        OutputFormat::Table | OutputFormat::Plain => output::render_list(
            global.output,
            &outcome.records,
            |r: &OutcomeRecord| RecordRow::from(r),
            |r| format!("{} {}", r.target, r.status),
        )?,
        OutputFormat::Json => output::render_json(&run, false)?,
        OutputFormat::JsonCompact => output::render_json(&run, true)?,
        OutputFormat::Yaml => output::render_yaml(&run)?,
    };
    output::print_output(&rendered, global.quiet);
    if !global.quiet {
        eprintln!("{}", summary_line(outcome, color));
    }

    if outcome.is_failed() {
        return Err(CliError::PartialFailure {
            failed: outcome.failure_count,
            total: outcome.records.len(),
        });
    }
    Ok(())
}

/// Layer the per-invocation flags on the profile's batch settings.
fn batch_config(args: &RunArgs, mut batch: BatchConfig) -> Result<BatchConfig, CliError> {
    batch.targets = util::collect_targets(&args.targets)?;
    batch.ignore_partial_failures = args.ignore_partial_failures;
    batch.validate_targets = !args.no_validate;
    if args.strict_validation {
        batch.validation_policy = ValidationPolicy::Strict;
    } else if let Some(mode) = args.validation {
        batch.validation_policy = mode.into();
    }
    if let Some(ref timeout) = args.batch_timeout {
        batch.timeout = Some(parse_duration("batch-timeout", timeout)?);
    }
    Ok(batch)
}

fn build_action(args: &RunArgs) -> Result<Action, CliError> {
    let mut action = Action::new(args.verb.trim());
    if let Some(ref path) = args.body {
        action = action.with_body(util::read_json_file(path)?);
    }
    for (property, value) in util::parse_expectations(&args.expect)? {
        action = action.expecting(property, value);
    }
    Ok(action)
}

async fn track_progress(mut rx: UnboundedReceiver<BatchEvent>, bar: ProgressBar, color: bool) {
    while let Some(event) = rx.recv().await {
        match event {
            BatchEvent::Progress(p) => {
                bar.inc(1);
                if p.status == OutcomeStatus::Failed {
                    bar.println(format!(
                        "{} {}:{}: {}",
                        output::paint_status(p.status, color),
                        p.category,
                        p.target_id,
                        p.message
                    ));
                }
            }
            BatchEvent::Summary(s) => {
                debug!(batch_id = %s.batch_id, status = %s.final_status, "batch summary received");
            }
        }
    }
    bar.finish_and_clear();
}

fn summary_line(outcome: &BatchOutcome, color: bool) -> String {
    let elapsed = outcome.finished_at - outcome.started_at;
    format!(
        "{}: {} succeeded, {} failed in {}ms",
        output::paint_final(outcome.final_status, color),
        outcome.success_count,
        outcome.failure_count,
        elapsed.num_milliseconds()
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::cli::{Cli, Command};

    fn run_args(argv: &[&str]) -> RunArgs {
        let mut full = vec!["mdmctl", "run"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Command::Run(args) => args,
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn flags_override_profile_policy() {
        let args = run_args(&[
            "retire",
            "-t",
            "managedDevices:a,managedDevices:b",
            "--validation",
            "exclude",
            "--batch-timeout",
            "90s",
            "--ignore-partial-failures",
        ]);
        let batch = batch_config(&args, BatchConfig::default()).unwrap();
        assert_eq!(batch.targets.len(), 2);
        assert_eq!(batch.validation_policy, ValidationPolicy::Exclude);
        assert_eq!(batch.timeout, Some(std::time::Duration::from_secs(90)));
        assert!(batch.ignore_partial_failures);
        assert!(batch.validate_targets);
    }

    #[test]
    fn strict_shorthand_and_no_validate() {
        let strict = run_args(&["retire", "-t", "d:1", "--strict-validation"]);
        let profile = BatchConfig {
            validation_policy: ValidationPolicy::Warn,
            ..BatchConfig::default()
        };
        let batch = batch_config(&strict, profile).unwrap();
        assert_eq!(batch.validation_policy, ValidationPolicy::Strict);

        let skip = run_args(&["retire", "-t", "d:1", "--no-validate"]);
        assert!(!batch_config(&skip, BatchConfig::default()).unwrap().validate_targets);
    }

    #[test]
    fn conflicting_validation_flags_are_rejected() {
        let argv = [
            "mdmctl",
            "run",
            "retire",
            "-t",
            "d:1",
            "--no-validate",
            "--validation",
            "warn",
        ];
        assert!(Cli::try_parse_from(argv).is_err());
    }

    #[test]
    fn action_carries_expectations() {
        let args = run_args(&["update", "-t", "d:1", "--expect", "enabled=false"]);
        let action = build_action(&args).unwrap();
        assert_eq!(action.verb, "update");
        assert_eq!(action.expect, vec![("enabled".into(), "false".into())]);
        assert!(action.body.is_none());
    }
}
