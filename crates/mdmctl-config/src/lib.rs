//! Shared configuration for mdmctl.
//!
//! TOML profiles, token resolution (env + plaintext), and translation to
//! `mdmctl_core::ClientConfig` / `BatchConfig`. The CLI layers its global
//! flags on top of what this crate resolves.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use mdmctl_core::{
    BatchConfig, CapabilityRule, Category, ClientConfig, ReconcileSettings, TlsMode,
    ValidationPolicy,
};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{0}' not found")]
    UnknownProfile(String),

    #[error("token for profile '{profile}' should come from ${env}, which is not set")]
    MissingTokenEnv { profile: String, env: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named endpoint profiles.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Pick `name`, falling back to `default_profile`.
    pub fn profile(&self, name: Option<&str>) -> Result<(&str, &Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get_key_value(name)
            .map(|(k, p)| (k.as_str(), p))
            .ok_or_else(|| ConfigError::UnknownProfile(name.into()))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default)]
    pub insecure: bool,

    /// Per-request timeout, e.g. `"30s"`.
    #[serde(default = "default_timeout")]
    pub timeout: String,

    /// Whole-batch lifetime, e.g. `"5m"`.
    #[serde(default = "default_batch_timeout")]
    pub batch_timeout: String,

    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default = "default_reconcile_attempts")]
    pub reconcile_attempts: u32,

    #[serde(default = "default_reconcile_backoff")]
    pub reconcile_backoff: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            insecure: false,
            timeout: default_timeout(),
            batch_timeout: default_batch_timeout(),
            concurrency: default_concurrency(),
            reconcile_attempts: default_reconcile_attempts(),
            reconcile_backoff: default_reconcile_backoff(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> String {
    "30s".into()
}
fn default_batch_timeout() -> String {
    "5m".into()
}
fn default_concurrency() -> usize {
    4
}
fn default_reconcile_attempts() -> u32 {
    5
}
fn default_reconcile_backoff() -> String {
    "2s".into()
}

/// A named endpoint profile. Unset fields inherit from [`Defaults`].
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// API root (e.g. "https://mdm.example.com/api/v1").
    pub endpoint: String,

    /// Bearer token (plaintext; prefer `token_env`).
    pub token: Option<String>,

    /// Environment variable holding the bearer token.
    pub token_env: Option<String>,

    /// Path to custom CA certificate.
    pub ca_cert: Option<PathBuf>,

    pub insecure: Option<bool>,
    pub timeout: Option<String>,
    pub batch_timeout: Option<String>,
    pub concurrency: Option<usize>,
    pub reconcile_attempts: Option<u32>,
    pub reconcile_backoff: Option<String>,

    /// Cap for a growing reconcile backoff; unset keeps it fixed.
    pub reconcile_max_backoff: Option<String>,

    /// `strict`, `exclude`, or `warn`.
    pub validation: Option<ValidationPolicy>,

    /// category → property → allowed values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub capabilities: BTreeMap<String, BTreeMap<String, Vec<String>>>,
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "mdmctl", "mdmctl").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("mdmctl");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields the defaults.
///
/// Environment keys nest with `__`, e.g. `MDMCTL_DEFAULTS__CONCURRENCY=8`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("MDMCTL_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Value parsing ───────────────────────────────────────────────────

/// Parse a human duration (`"90s"`, `"5m"`, `"1h 30m"`).
pub fn parse_duration(field: &str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value.trim()).map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("'{value}': {e}"),
    })
}

// ── Token resolution (without CLI flags) ────────────────────────────

/// Resolve the bearer token from the profile.
///
/// `token_env` wins over a plaintext `token`; a profile with neither talks
/// to the endpoint unauthenticated.
pub fn resolve_token(
    profile: &Profile,
    profile_name: &str,
) -> Result<Option<SecretString>, ConfigError> {
    if let Some(ref env_name) = profile.token_env {
        return match std::env::var(env_name) {
            Ok(val) if !val.is_empty() => Ok(Some(SecretString::from(val))),
            _ => Err(ConfigError::MissingTokenEnv {
                profile: profile_name.into(),
                env: env_name.clone(),
            }),
        };
    }

    Ok(profile.token.clone().map(SecretString::from))
}

// ── Translation to core config ──────────────────────────────────────

/// Build a `ClientConfig` from a profile, without CLI flag overrides.
pub fn profile_to_client_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<ClientConfig, ConfigError> {
    let endpoint: url::Url = profile
        .endpoint
        .parse()
        .map_err(|_| ConfigError::Validation {
            field: "endpoint".into(),
            reason: format!("invalid URL: {}", profile.endpoint),
        })?;

    let tls = if profile.insecure.unwrap_or(defaults.insecure) {
        TlsMode::DangerAcceptInvalid
    } else if let Some(ref ca_path) = profile.ca_cert {
        TlsMode::CustomCa(ca_path.clone())
    } else {
        TlsMode::System
    };

    let timeout = parse_duration(
        "timeout",
        profile.timeout.as_deref().unwrap_or(&defaults.timeout),
    )?;

    Ok(ClientConfig {
        endpoint,
        token: resolve_token(profile, profile_name)?,
        tls,
        timeout,
    })
}

/// Batch settings from a profile. Targets and per-invocation flags are
/// left for the caller.
pub fn profile_to_batch_config(
    profile: &Profile,
    defaults: &Defaults,
) -> Result<BatchConfig, ConfigError> {
    let default_timeout = parse_duration(
        "batch_timeout",
        profile
            .batch_timeout
            .as_deref()
            .unwrap_or(&defaults.batch_timeout),
    )?;
    let delay = parse_duration(
        "reconcile_backoff",
        profile
            .reconcile_backoff
            .as_deref()
            .unwrap_or(&defaults.reconcile_backoff),
    )?;
    let max_delay = profile
        .reconcile_max_backoff
        .as_deref()
        .map(|v| parse_duration("reconcile_max_backoff", v))
        .transpose()?;

    Ok(BatchConfig {
        validation_policy: profile.validation.unwrap_or_default(),
        default_timeout,
        concurrency: profile
            .concurrency
            .unwrap_or(defaults.concurrency)
            .max(1),
        capabilities: capability_rules(profile)?,
        reconcile: ReconcileSettings {
            max_attempts: profile
                .reconcile_attempts
                .unwrap_or(defaults.reconcile_attempts),
            delay,
            max_delay,
        },
        ..BatchConfig::default()
    })
}

/// Turn the `capabilities` table into typed rules.
pub fn capability_rules(
    profile: &Profile,
) -> Result<BTreeMap<Category, Vec<CapabilityRule>>, ConfigError> {
    let mut rules = BTreeMap::new();
    for (category, properties) in &profile.capabilities {
        let category = Category::new(category.as_str()).map_err(|e| ConfigError::Validation {
            field: "capabilities".into(),
            reason: e.to_string(),
        })?;
        let list: Vec<CapabilityRule> = properties
            .iter()
            .map(|(property, allowed)| CapabilityRule::new(property.as_str(), allowed.iter().cloned()))
            .collect();
        rules.insert(category, list);
    }
    Ok(rules)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    const SAMPLE: &str = r#"
default_profile = "lab"

[defaults]
concurrency = 2

[profiles.lab]
endpoint = "https://mdm.lab.example/api/v1"
token = "plain-token"
timeout = "45s"
reconcile_attempts = 3
reconcile_backoff = "500ms"
reconcile_max_backoff = "4s"
validation = "exclude"

[profiles.lab.capabilities.managedDevices]
operatingSystem = ["Windows"]
managementState = ["managed"]

[profiles.prod]
endpoint = "https://mdm.example.com/api/v1"
token_env = "MDMCTL_TEST_TOKEN_THAT_IS_NOT_SET"
"#;

    fn write_sample() -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        file
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.default_profile.as_deref(), Some("default"));
        assert_eq!(config.defaults.concurrency, 4);
        assert!(config.profiles.is_empty());
    }

    #[test]
    fn loads_profiles_and_translates() {
        let file = write_sample();
        let config = load_config_from(file.path()).unwrap();
        let (name, profile) = config.profile(None).unwrap();
        assert_eq!(name, "lab");

        let client = profile_to_client_config(profile, name, &config.defaults).unwrap();
        assert_eq!(client.endpoint.as_str(), "https://mdm.lab.example/api/v1");
        assert_eq!(client.timeout, Duration::from_secs(45));
        assert_eq!(client.token.unwrap().expose_secret(), "plain-token");
        assert!(matches!(client.tls, TlsMode::System));

        let batch = profile_to_batch_config(profile, &config.defaults).unwrap();
        assert_eq!(batch.concurrency, 2);
        assert_eq!(batch.validation_policy, ValidationPolicy::Exclude);
        assert_eq!(batch.default_timeout, Duration::from_secs(300));
        assert_eq!(batch.reconcile.max_attempts, 3);
        assert_eq!(batch.reconcile.delay, Duration::from_millis(500));
        assert_eq!(batch.reconcile.max_delay, Some(Duration::from_secs(4)));

        let rules = batch.rules_for(&Category::new("managedDevices").unwrap());
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].property, "managementState");
    }

    #[test]
    fn unset_token_env_is_an_error() {
        let file = write_sample();
        let config = load_config_from(file.path()).unwrap();
        let (name, profile) = config.profile(Some("prod")).unwrap();
        let err = resolve_token(profile, name).unwrap_err();
        assert!(matches!(err, ConfigError::MissingTokenEnv { .. }));
    }

    #[test]
    fn unknown_profile_is_reported() {
        let config = Config::default();
        assert!(matches!(
            config.profile(Some("nope")),
            Err(ConfigError::UnknownProfile(name)) if name == "nope"
        ));
    }

    #[test]
    fn bad_values_name_their_field() {
        let err = parse_duration("timeout", "soon").unwrap_err();
        assert!(err.to_string().starts_with("invalid timeout"));

        let profile = Profile {
            endpoint: "not a url".into(),
            ..Profile::default()
        };
        let err = profile_to_client_config(&profile, "x", &Defaults::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "endpoint"));

        let mut profile = Profile::default();
        profile
            .capabilities
            .insert("bad category".into(), BTreeMap::new());
        assert!(capability_rules(&profile).is_err());
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.profiles.insert(
            "default".into(),
            Profile {
                endpoint: "https://mdm.example.com".into(),
                insecure: Some(true),
                ..Profile::default()
            },
        );
        save_config_to(&config, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        let (_, profile) = loaded.profile(None).unwrap();
        assert_eq!(profile.insecure, Some(true));
        let client = profile_to_client_config(profile, "default", &loaded.defaults).unwrap();
        assert!(matches!(client.tls, TlsMode::DangerAcceptInvalid));
    }
}
