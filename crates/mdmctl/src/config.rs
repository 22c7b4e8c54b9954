//! CLI configuration: profile selection and flag overrides.
//!
//! Loading and translation live in `mdmctl-config`; this module layers the
//! global flags (which clap already merged with `MDMCTL_*` env vars) on top.

use secrecy::SecretString;

use mdmctl_config::{Config, Profile, profile_to_batch_config, profile_to_client_config};
use mdmctl_core::{BatchConfig, ClientConfig};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use mdmctl_config::{config_path, load_config_or_default};

/// Connection and batch settings for one invocation.
#[derive(Debug)]
pub struct Resolved {
    pub profile_name: String,
    pub client: ClientConfig,
    pub batch: BatchConfig,
}

/// Profile named by `--profile`, then the config's default, then `"default"`.
pub fn active_profile_name(global: &GlobalOpts, cfg: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| cfg.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Resolve the active profile with CLI overrides applied.
///
/// Without a matching profile the endpoint must come from `--endpoint`;
/// asking for a missing profile by name is always an error.
pub fn resolve(global: &GlobalOpts, cfg: &Config) -> Result<Resolved, CliError> {
    let profile_name = active_profile_name(global, cfg);

    let mut profile = match cfg.profiles.get(&profile_name) {
        Some(profile) => profile.clone(),
        None if global.profile.is_some() => {
            return Err(CliError::ProfileNotFound {
                name: profile_name,
                available: available_profiles(cfg),
            });
        }
        None => {
            let endpoint = global.endpoint.clone().ok_or_else(|| CliError::NoConfig {
                path: config_path().display().to_string(),
            })?;
            Profile {
                endpoint,
                ..Profile::default()
            }
        }
    };
    apply_overrides(&mut profile, global);

    let mut client = profile_to_client_config(&profile, &profile_name, &cfg.defaults)?;
    if let Some(ref token) = global.token {
        client.token = Some(SecretString::from(token.clone()));
    }
    let batch = profile_to_batch_config(&profile, &cfg.defaults)?;

    Ok(Resolved {
        profile_name,
        client,
        batch,
    })
}

fn apply_overrides(profile: &mut Profile, global: &GlobalOpts) {
    if let Some(ref endpoint) = global.endpoint {
        profile.endpoint.clone_from(endpoint);
    }
    if global.token.is_some() {
        // The flag wins; an unset token_env must not fail resolution.
        profile.token = None;
        profile.token_env = None;
    }
    if global.insecure {
        profile.insecure = Some(true);
    }
    if let Some(ref timeout) = global.timeout {
        profile.timeout = Some(timeout.clone());
    }
    if let Some(concurrency) = global.concurrency {
        profile.concurrency = Some(concurrency);
    }
}

fn available_profiles(cfg: &Config) -> String {
    if cfg.profiles.is_empty() {
        return "(none)".into();
    }
    cfg.profiles.keys().cloned().collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use clap::Parser;
    use secrecy::ExposeSecret;

    use super::*;
    use crate::cli::Cli;

    fn global(args: &[&str]) -> GlobalOpts {
        let mut argv = vec!["mdmctl"];
        argv.extend_from_slice(args);
        argv.extend_from_slice(&["config", "path"]);
        Cli::try_parse_from(argv).unwrap().global
    }

    fn config_with_lab() -> Config {
        let mut cfg = Config::default();
        cfg.profiles.insert(
            "lab".into(),
            Profile {
                endpoint: "https://mdm.lab.example/api".into(),
                token_env: Some("MDMCTL_CONFIG_TEST_UNSET_VAR".into()),
                concurrency: Some(8),
                ..Profile::default()
            },
        );
        cfg
    }

    #[test]
    fn endpoint_flag_works_without_a_profile() {
        let resolved = resolve(
            &global(&["--endpoint", "http://localhost:9000", "--timeout", "3s"]),
            &Config::default(),
        )
        .unwrap();
        assert_eq!(resolved.profile_name, "default");
        assert_eq!(resolved.client.endpoint.as_str(), "http://localhost:9000/");
        assert_eq!(resolved.client.timeout, Duration::from_secs(3));
        assert!(resolved.client.token.is_none());
    }

    #[test]
    fn missing_endpoint_is_reported() {
        let err = resolve(&global(&[]), &Config::default()).unwrap_err();
        assert!(matches!(err, CliError::NoConfig { .. }));
    }

    #[test]
    fn named_profile_must_exist() {
        let err = resolve(&global(&["--profile", "prod"]), &config_with_lab()).unwrap_err();
        assert!(
            matches!(err, CliError::ProfileNotFound { ref available, .. } if available == "lab")
        );
    }

    #[test]
    fn token_flag_overrides_profile_token_env() {
        let resolved = resolve(
            &global(&["--profile", "lab", "--token", "t0k", "--concurrency", "2"]),
            &config_with_lab(),
        )
        .unwrap();
        assert_eq!(resolved.client.token.unwrap().expose_secret(), "t0k");
        assert_eq!(resolved.batch.concurrency, 2);
    }
}
