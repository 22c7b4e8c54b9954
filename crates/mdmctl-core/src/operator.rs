// ── Operator facade ──
//
// Wires the validator, deadline manager, batch runner, and reconciling
// reader around one `RemoteObjectClient`. Single invocations only: there
// is no background task and no cached state.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use mdmctl_api::{HttpRemoteClient, RemoteObject, RemoteObjectClient};

use crate::config::{BatchConfig, ClientConfig, ReconcileSettings, ValidationPolicy};
use crate::deadline::{OpContext, with_deadline};
use crate::diagnostics::Diagnostics;
use crate::error::CoreError;
use crate::model::{BatchEvent, BatchOutcome, Category, Target, ValidationReport};
use crate::outcome::BatchRunner;
use crate::reconcile::{ReconcileError, reconcile};
use crate::validate::{check_rules, validate};

// ── Action ───────────────────────────────────────────────────────

/// A remote verb applied to every target of a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Action {
    pub verb: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// `(property, value)` pairs that must read back before the target
    /// counts as done. Empty means the write reply is enough.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub expect: Vec<(String, String)>,
}

impl Action {
    pub fn new(verb: impl Into<String>) -> Self {
        Self {
            verb: verb.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn expecting(mut self, property: impl Into<String>, value: impl Into<String>) -> Self {
        self.expect.push((property.into(), value.into()));
        self
    }

    /// `true` when `object` shows every expected property value.
    pub fn is_reflected_by(&self, object: &RemoteObject) -> bool {
        self.expect
            .iter()
            .all(|(property, value)| object.property_text(property).as_deref() == Some(value))
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.verb)
    }
}

// ── BatchRun ─────────────────────────────────────────────────────

/// Everything a batch invocation produced.
///
/// `outcome` is `None` when the batch never started: empty input, blocking
/// validation findings, or a strict policy.
#[derive(Debug, Clone, Serialize)]
pub struct BatchRun {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ValidationReport>,
    pub diagnostics: Diagnostics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<BatchOutcome>,
}

impl BatchRun {
    pub fn was_executed(&self) -> bool {
        self.outcome.is_some()
    }
}

// ── Operator ─────────────────────────────────────────────────────

/// Entry point for consumers. Cheaply cloneable.
pub struct Operator<C = HttpRemoteClient> {
    client: Arc<C>,
}

impl<C> Clone for Operator<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
        }
    }
}

impl Operator<HttpRemoteClient> {
    /// Build an operator talking HTTP to `config.endpoint`.
    pub fn from_config(config: &ClientConfig) -> Result<Self, CoreError> {
        let client = HttpRemoteClient::new(
            config.endpoint.as_str(),
            config.token.as_ref(),
            &config.transport(),
        )?;
        debug!(endpoint = %config.endpoint, "http client ready");
        Ok(Self::new(client))
    }
}

impl<C: RemoteObjectClient> Operator<C> {
    pub fn new(client: C) -> Self {
        Self {
            client: Arc::new(client),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Fetch one object.
    pub async fn get(
        &self,
        ctx: &OpContext,
        category: &Category,
        id: &str,
    ) -> Result<RemoteObject, CoreError> {
        let object = until_done(ctx, "get", self.client.get(category.as_str(), id)).await?;
        object.map_err(|e| match e {
            e if e.is_not_found() => CoreError::NotFound {
                collection: category.to_string(),
                identifier: id.to_owned(),
            },
            e => e.into(),
        })
    }

    /// Validate `config.targets` against the remote side using the
    /// configured capability rules.
    pub async fn validate(
        &self,
        ctx: &OpContext,
        config: &BatchConfig,
    ) -> Result<ValidationReport, CoreError> {
        let lookup = |target: Target| async move {
            self.client
                .get(target.category.as_str(), &target.id)
                .await
        };
        let capability_check =
            |target: &Target, object: &RemoteObject| check_rules(config.rules_for(&target.category), object);
        validate(ctx, &config.targets, lookup, capability_check, config.concurrency).await
    }

    /// Validate, then run `action` against every executable target.
    ///
    /// The whole call lives under one deadline derived from `ctx` and
    /// `config.timeout`. Per-target failures end up in the outcome; only
    /// infrastructure problems (validation aborted, deadline hit during
    /// validation) return `Err`.
    pub async fn run(
        &self,
        ctx: &OpContext,
        config: &BatchConfig,
        action: &Action,
        events: Option<UnboundedSender<BatchEvent>>,
    ) -> Result<BatchRun, CoreError> {
        let mut diagnostics = Diagnostics::new();
        if config.targets.is_empty() {
            diagnostics.add_error("no targets", "a batch needs at least one target");
        }
        if action.verb.trim().is_empty() {
            diagnostics.add_error("no action", "a batch needs a verb to apply");
        }

        let Some(guard) = with_deadline(ctx, config.timeout, config.default_timeout, &diagnostics)
        else {
            return Ok(BatchRun {
                report: None,
                diagnostics,
                outcome: None,
            });
        };
        let ctx = guard.context();

        let report = if config.validate_targets {
            let report = self.validate(ctx, config).await?;
            diagnostics.extend(report.diagnostics(config.validation_policy.problems_are_errors()));
            Some(report)
        } else {
            debug!("target validation disabled");
            None
        };

        if diagnostics.has_error() {
            info!(errors = diagnostics.errors().count(), "batch blocked by validation");
            return Ok(BatchRun {
                report,
                diagnostics,
                outcome: None,
            });
        }

        let mut targets = unique_targets(&config.targets);
        if let (Some(report), ValidationPolicy::Exclude) = (&report, config.validation_policy) {
            let before = targets.len();
            targets = report.retain_executable(targets);
            info!(excluded = before - targets.len(), "dropped targets that failed validation");
        }

        let mut runner = BatchRunner::new(config.concurrency);
        if let Some(tx) = events {
            runner = runner.with_events(tx);
        }
        let outcome = runner
            .run(
                ctx,
                targets,
                |target: Target| async move {
                    self.apply(ctx, &target, action, &config.reconcile)
                        .await
                        .map(|_| ())
                },
                config.ignore_partial_failures,
            )
            .await;

        Ok(BatchRun {
            report,
            diagnostics,
            outcome: Some(outcome),
        })
    }

    /// Apply `action` to one target, confirming it through reads when it
    /// carries expectations.
    ///
    /// A write the remote side accepted but never reflected within budget
    /// fails with [`CoreError::NotConfirmed`].
    pub async fn apply(
        &self,
        ctx: &OpContext,
        target: &Target,
        action: &Action,
        settings: &ReconcileSettings,
    ) -> Result<RemoteObject, CoreError> {
        if let Some(reason) = ctx.done_reason() {
            return Err(CoreError::from_done(reason, action.verb.as_str()));
        }

        // Writes are not raced against `ctx`: once sent, a write runs to
        // completion under the per-request timeout.
        let reply = self
            .client
            .invoke(
                target.category.as_str(),
                &target.id,
                &action.verb,
                action.body.as_ref(),
            )
            .await?;
        debug!(target = %target, verb = %action, "action accepted");

        if action.expect.is_empty() {
            return Ok(reply);
        }

        let backoff = settings.backoff();
        reconcile(
            ctx,
            || self.client.get(target.category.as_str(), &target.id),
            |object: &RemoteObject| action.is_reflected_by(object),
            settings.max_attempts,
            &*backoff,
        )
        .await
        .map_err(|e| match e {
            ReconcileError::Exhausted {
                attempts,
                reason,
                last_error,
            } => CoreError::NotConfirmed {
                target: target.to_string(),
                attempts,
                reason: match last_error {
                    Some(last) => format!("{reason}; last read: {last}"),
                    None => reason.to_string(),
                },
            },
            ReconcileError::Aborted { error, .. } => error.into(),
        })
    }
}

/// Race `fut` against `ctx`.
async fn until_done<F: Future>(
    ctx: &OpContext,
    operation: &str,
    fut: F,
) -> Result<F::Output, CoreError> {
    tokio::select! {
        biased;
        reason = ctx.done() => Err(CoreError::from_done(reason, operation)),
        out = fut => Ok(out),
    }
}

/// First occurrence of each `(category, id)`, in input order.
fn unique_targets(targets: &[Target]) -> Vec<Target> {
    let mut seen = HashSet::new();
    targets
        .iter()
        .filter(|t| seen.insert(t.key()))
        .cloned()
        .collect()
}
