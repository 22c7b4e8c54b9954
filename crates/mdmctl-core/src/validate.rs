// ── Target validation ──
//
// Screens a batch before anything is mutated: one remote lookup per unique
// (category, id), an optional capability predicate on what came back, plus
// duplicate / cross-listing warnings. The validator only classifies;
// callers decide whether findings block execution.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::future::Future;

use futures_util::StreamExt;
use futures_util::stream;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use mdmctl_api::RemoteObject;

use crate::classify::{Classify, ErrorCategory, classify};
use crate::deadline::OpContext;
use crate::error::CoreError;
use crate::model::{Category, CategoryReport, Target, UnsupportedTarget, ValidationReport};

const OPERATION: &str = "target validation";

/// Result of a capability predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Capability {
    Supported,
    Unsupported(String),
}

/// Declarative capability predicate: `property` must equal one of `allowed`
/// (ASCII case-insensitive).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityRule {
    pub property: String,
    pub allowed: Vec<String>,
}

impl CapabilityRule {
    pub fn new(property: impl Into<String>, allowed: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            property: property.into(),
            allowed: allowed.into_iter().map(Into::into).collect(),
        }
    }

    pub fn check(&self, object: &RemoteObject) -> Capability {
        match object.property_text(&self.property) {
            Some(value) if self.allowed.iter().any(|a| a.eq_ignore_ascii_case(&value)) => {
                Capability::Supported
            }
            Some(value) => Capability::Unsupported(format!(
                "{} is '{value}', expected one of: {}",
                self.property,
                self.allowed.join(", ")
            )),
            None => Capability::Unsupported(format!("{} is not reported", self.property)),
        }
    }
}

/// Apply every rule; the first failing rule decides the reason.
pub fn check_rules(rules: &[CapabilityRule], object: &RemoteObject) -> Capability {
    rules
        .iter()
        .map(|rule| rule.check(object))
        .find(|c| matches!(c, Capability::Unsupported(_)))
        .unwrap_or(Capability::Supported)
}

#[derive(Debug, Clone)]
enum Verdict {
    Clean,
    Nonexistent,
    Unsupported(String),
}

/// Validate `targets` against the remote system.
///
/// `lookup` runs once per unique `(category, id)`, at most `concurrency`
/// at a time. A `Transient` lookup failure aborts the whole validation;
/// `NotFound` marks the target nonexistent; any other failure marks it
/// unsupported with the classified reason. Successful lookups go through
/// `capability_check`.
pub async fn validate<O, L, LFut, E, C>(
    ctx: &OpContext,
    targets: &[Target],
    lookup: L,
    capability_check: C,
    concurrency: usize,
) -> Result<ValidationReport, CoreError>
where
    L: Fn(Target) -> LFut,
    LFut: Future<Output = Result<O, E>>,
    E: Classify + fmt::Display,
    C: Fn(&Target, &O) -> Capability,
{
    let (mut categories, unique) = scan_batch(targets);

    let lookup = &lookup;
    let capability_check = &capability_check;
    let mut checks = stream::iter(unique.iter().cloned().enumerate())
        .map(|(index, target)| async move {
            (index, check_target(target, lookup, capability_check).await)
        })
        .buffer_unordered(concurrency.max(1));

    let mut verdicts: Vec<Option<Verdict>> = vec![None; unique.len()];
    loop {
        tokio::select! {
            biased;
            reason = ctx.done() => return Err(CoreError::from_done(reason, OPERATION)),
            next = checks.next() => match next {
                Some((index, verdict)) => {
                    if let Some(slot) = verdicts.get_mut(index) {
                        *slot = Some(verdict?);
                    }
                }
                None => break,
            },
        }
    }

    for (target, verdict) in unique.iter().zip(verdicts) {
        let report = categories.entry(target.category.clone()).or_default();
        match verdict {
            Some(Verdict::Clean) => report.clean.push(target.id.clone()),
            Some(Verdict::Nonexistent) => report.nonexistent.push(target.id.clone()),
            Some(Verdict::Unsupported(reason)) => report.unsupported.push(UnsupportedTarget {
                id: target.id.clone(),
                reason,
            }),
            None => {
                return Err(CoreError::Internal(format!(
                    "no validation verdict recorded for {target}"
                )));
            }
        }
    }

    let report = ValidationReport::from_categories(categories);
    info!(
        targets = targets.len(),
        unique = unique.len(),
        problems = report.has_problems(),
        warnings = report.has_warnings(),
        "target validation complete"
    );
    Ok(report)
}

/// Seed per-category reports with duplicate and cross-listing warnings and
/// return the de-duplicated targets in first-seen order.
fn scan_batch(targets: &[Target]) -> (BTreeMap<Category, CategoryReport>, Vec<Target>) {
    let mut categories: BTreeMap<Category, CategoryReport> = BTreeMap::new();
    let mut seen: HashSet<(&Category, &str)> = HashSet::new();
    let mut id_categories: HashMap<&str, HashSet<&Category>> = HashMap::new();
    let mut unique = Vec::new();

    for target in targets {
        let report = categories.entry(target.category.clone()).or_default();
        if seen.insert(target.key()) {
            unique.push(target.clone());
        } else if !report.duplicates.contains(&target.id) {
            debug!(target = %target, "duplicate target in batch");
            report.duplicates.push(target.id.clone());
        }
        id_categories
            .entry(target.id.as_str())
            .or_default()
            .insert(&target.category);
    }

    for target in &unique {
        let listed_in = id_categories.get(target.id.as_str()).map_or(0, HashSet::len);
        if listed_in > 1 {
            debug!(target = %target, listed_in, "target listed under several categories");
            if let Some(report) = categories.get_mut(&target.category) {
                report.cross_listed.push(target.id.clone());
            }
        }
    }

    (categories, unique)
}

async fn check_target<O, L, LFut, E, C>(
    target: Target,
    lookup: &L,
    capability_check: &C,
) -> Result<Verdict, CoreError>
where
    L: Fn(Target) -> LFut,
    LFut: Future<Output = Result<O, E>>,
    E: Classify + fmt::Display,
    C: Fn(&Target, &O) -> Capability,
{
    match lookup(target.clone()).await {
        Ok(object) => match capability_check(&target, &object) {
            Capability::Supported => Ok(Verdict::Clean),
            Capability::Unsupported(reason) => {
                debug!(target = %target, %reason, "target unsupported");
                Ok(Verdict::Unsupported(reason))
            }
        },
        Err(e) => match classify(&e) {
            ErrorCategory::NotFound => {
                debug!(target = %target, "target not found");
                Ok(Verdict::Nonexistent)
            }
            ErrorCategory::Transient => Err(CoreError::ValidationAborted {
                target: target.to_string(),
                message: e.to_string(),
            }),
            category => Ok(Verdict::Unsupported(format!("{category}: {e}"))),
        },
    }
}
