//! Config subcommand handlers. None of these touch the network.

use mdmctl_config::{Config, Profile, save_config};

use crate::cli::{ConfigArgs, ConfigCommand, ConfigInitArgs, GlobalOpts, OutputFormat};
use crate::commands::util;
use crate::config::{config_path, load_config_or_default};
use crate::error::CliError;
use crate::output;

const REDACTED: &str = "****";

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&config_path().display().to_string(), global.quiet);
            Ok(())
        }
        ConfigCommand::Show => {
            let cfg = redacted(load_config_or_default());
            let rendered = match global.output {
                OutputFormat::Json => output::render_json(&cfg, false)?,
                OutputFormat::JsonCompact => output::render_json(&cfg, true)?,
                OutputFormat::Yaml => output::render_yaml(&cfg)?,
                OutputFormat::Table | OutputFormat::Plain => toml::to_string_pretty(&cfg)
                    .map_err(|e| CliError::Internal(format!("config rendering failed: {e}")))?,
            };
            output::print_output(rendered.trim_end(), global.quiet);
            Ok(())
        }
        ConfigCommand::Init(init) => init_profile(&init, global),
    }
}

/// Mask plaintext tokens.
fn redacted(mut cfg: Config) -> Config {
    for profile in cfg.profiles.values_mut() {
        if profile.token.is_some() {
            profile.token = Some(REDACTED.into());
        }
    }
    cfg
}

fn init_profile(args: &ConfigInitArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let endpoint = global.endpoint.clone().ok_or_else(|| CliError::Validation {
        field: "endpoint".into(),
        reason: "pass --endpoint <URL> to create a profile".into(),
    })?;
    if url::Url::parse(&endpoint).is_err() {
        return Err(CliError::Validation {
            field: "endpoint".into(),
            reason: format!("invalid URL: {endpoint}"),
        });
    }

    let mut cfg = load_config_or_default();
    if cfg.profiles.contains_key(&args.name) {
        util::confirm(
            &format!("Replace existing profile '{}'?", args.name),
            "config init",
            global.yes,
        )?;
    }

    let profile = Profile {
        endpoint,
        token_env: args.token_env.clone(),
        insecure: global.insecure.then_some(true),
        ..Profile::default()
    };
    cfg.profiles.insert(args.name.clone(), profile);
    let missing_default = cfg
        .default_profile
        .as_ref()
        .is_none_or(|name| !cfg.profiles.contains_key(name));
    if args.set_default || missing_default {
        cfg.default_profile = Some(args.name.clone());
    }

    save_config(&cfg)?;
    if !global.quiet {
        eprintln!("Profile '{}' written to {}", args.name, config_path().display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_masked() {
        let mut cfg = Config::default();
        cfg.profiles.insert(
            "lab".into(),
            Profile {
                endpoint: "https://mdm.lab.example".into(),
                token: Some("s3cret".into()),
                token_env: Some("LAB_TOKEN".into()),
                ..Profile::default()
            },
        );
        let shown = redacted(cfg);
        let lab = &shown.profiles["lab"];
        assert_eq!(lab.token.as_deref(), Some(REDACTED));
        assert_eq!(lab.token_env.as_deref(), Some("LAB_TOKEN"));
    }
}
