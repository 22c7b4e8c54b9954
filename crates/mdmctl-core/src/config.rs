// ── Runtime configuration ──
//
// These types describe *how* to reach the management endpoint and *how* to
// run a batch. They never touch disk: the CLI resolves profiles and flags
// into them and hands them in.

use std::collections::BTreeMap;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use url::Url;

use mdmctl_api::{TlsMode, TransportConfig};

use crate::model::{Category, Target};
use crate::outcome::DEFAULT_CONCURRENCY;
use crate::reconcile::{Backoff, DEFAULT_DELAY, DEFAULT_MAX_ATTEMPTS, FixedBackoff, LinearBackoff};
use crate::validate::CapabilityRule;

/// Batch lifetime when no explicit timeout is given.
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(5 * 60);

// ── Connection ───────────────────────────────────────────────────

/// Connection settings for one management endpoint.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API root, e.g. `https://mdm.example.com/api/v1/`.
    pub endpoint: Url,
    /// Bearer token. `None` sends unauthenticated requests.
    pub token: Option<SecretString>,
    pub tls: TlsMode,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            token: None,
            tls: TlsMode::default(),
            timeout: TransportConfig::default().timeout,
        }
    }

    pub fn transport(&self) -> TransportConfig {
        TransportConfig {
            tls: self.tls.clone(),
            timeout: self.timeout,
        }
    }
}

// ── Batch ────────────────────────────────────────────────────────

/// What happens to targets the validator flags as missing or unsupported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationPolicy {
    /// Findings are errors; nothing runs.
    #[default]
    Strict,
    /// Findings are warnings; flagged targets are dropped from the batch.
    Exclude,
    /// Findings are warnings; every target runs anyway.
    Warn,
}

impl ValidationPolicy {
    pub fn problems_are_errors(self) -> bool {
        matches!(self, Self::Strict)
    }
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub targets: Vec<Target>,
    /// Report `SuccessWithIgnoredFailures` instead of `Failed` when some
    /// targets fail.
    pub ignore_partial_failures: bool,
    pub validate_targets: bool,
    pub validation_policy: ValidationPolicy,
    /// Whole-batch lifetime. `None` or zero falls back to `default_timeout`.
    pub timeout: Option<Duration>,
    pub default_timeout: Duration,
    /// Worker pool size for lookups and actions.
    pub concurrency: usize,
    /// Capability rules per category; categories without rules accept any
    /// object that exists.
    pub capabilities: BTreeMap<Category, Vec<CapabilityRule>>,
    /// Read-after-write budget for actions that carry expectations.
    pub reconcile: ReconcileSettings,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            targets: Vec::new(),
            ignore_partial_failures: false,
            validate_targets: true,
            validation_policy: ValidationPolicy::default(),
            timeout: None,
            default_timeout: DEFAULT_BATCH_TIMEOUT,
            concurrency: DEFAULT_CONCURRENCY,
            capabilities: BTreeMap::new(),
            reconcile: ReconcileSettings::default(),
        }
    }
}

impl BatchConfig {
    pub fn new(targets: Vec<Target>) -> Self {
        Self {
            targets,
            ..Self::default()
        }
    }

    pub fn rules_for(&self, category: &Category) -> &[CapabilityRule] {
        self.capabilities.get(category).map(Vec::as_slice).unwrap_or(&[])
    }
}

// ── Reconciliation ───────────────────────────────────────────────

/// Read-after-write budget.
///
/// With `max_delay` unset the delay is fixed; otherwise it grows by `delay`
/// per attempt up to `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSettings {
    pub max_attempts: u32,
    pub delay: Duration,
    pub max_delay: Option<Duration>,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_DELAY,
            max_delay: None,
        }
    }
}

impl ReconcileSettings {
    pub fn backoff(&self) -> Box<dyn Backoff + Send + Sync> {
        match self.max_delay {
            Some(max) if max > self.delay => Box::new(LinearBackoff {
                initial: self.delay,
                step: self.delay,
                max,
            }),
            _ => Box::new(FixedBackoff(self.delay)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn batch_defaults() {
        let config = BatchConfig::default();
        assert!(config.validate_targets);
        assert!(!config.ignore_partial_failures);
        assert_eq!(config.validation_policy, ValidationPolicy::Strict);
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.default_timeout, Duration::from_secs(300));
        assert!(config.rules_for(&"users".parse().unwrap()).is_empty());
    }

    #[test]
    fn reconcile_backoff_shape() {
        let fixed = ReconcileSettings::default().backoff();
        assert_eq!(fixed.delay(1), Duration::from_secs(2));
        assert_eq!(fixed.delay(4), Duration::from_secs(2));

        let growing = ReconcileSettings {
            max_delay: Some(Duration::from_secs(5)),
            ..ReconcileSettings::default()
        }
        .backoff();
        assert_eq!(growing.delay(1), Duration::from_secs(2));
        assert_eq!(growing.delay(2), Duration::from_secs(4));
        assert_eq!(growing.delay(3), Duration::from_secs(5));
    }

    #[test]
    fn only_strict_policy_blocks() {
        assert!(ValidationPolicy::Strict.problems_are_errors());
        assert!(!ValidationPolicy::Exclude.problems_are_errors());
        assert!(!ValidationPolicy::Warn.problems_are_errors());
    }
}
