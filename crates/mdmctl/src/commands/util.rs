//! Shared helpers for command handlers.

use std::io::IsTerminal;
use std::path::Path;

use mdmctl_core::{Category, Target};

use crate::cli::TargetArgs;
use crate::error::CliError;

/// Prompt for confirmation, auto-approving if `--yes` was passed.
///
/// Without a terminal there is nobody to ask, so `--yes` becomes mandatory.
pub fn confirm(message: &str, action: &str, yes_flag: bool) -> Result<(), CliError> {
    if yes_flag {
        return Ok(());
    }
    if !std::io::stdin().is_terminal() {
        return Err(CliError::NonInteractiveRequiresYes {
            action: action.into(),
        });
    }
    let confirmed = dialoguer::Confirm::new()
        .with_prompt(message)
        .default(false)
        .interact()
        .map_err(|e| CliError::Io(std::io::Error::other(e)))?;
    if confirmed { Ok(()) } else { Err(CliError::Aborted) }
}

/// Read and parse a JSON file for `--body` flags.
pub fn read_json_file(path: &Path) -> Result<serde_json::Value, CliError> {
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(|e| CliError::Validation {
        field: "body".into(),
        reason: format!("{}: invalid JSON: {e}", path.display()),
    })
}

/// Parse repeated `property=value` flags.
pub fn parse_expectations(raw: &[String]) -> Result<Vec<(String, String)>, CliError> {
    raw.iter()
        .map(|item| {
            let (property, value) = item.split_once('=').ok_or_else(|| CliError::Validation {
                field: "expect".into(),
                reason: format!("expected 'property=value', got '{item}'"),
            })?;
            let property = property.trim();
            if property.is_empty() {
                return Err(CliError::Validation {
                    field: "expect".into(),
                    reason: format!("'{item}' has an empty property name"),
                });
            }
            Ok((property.to_owned(), value.to_owned()))
        })
        .collect()
}

/// Gather targets from `--target` flags and `--targets-file`, in that order.
///
/// Duplicates are kept: the validator reports them.
pub fn collect_targets(args: &TargetArgs) -> Result<Vec<Target>, CliError> {
    let default_category = args
        .category
        .as_deref()
        .map(Category::new)
        .transpose()?;

    let mut raw: Vec<String> = args.targets.clone();
    if let Some(ref path) = args.targets_file {
        let contents = std::fs::read_to_string(path)?;
        raw.extend(targets_from_lines(&contents));
    }

    raw.iter()
        .map(|item| parse_target(item, default_category.as_ref()))
        .collect()
}

fn targets_from_lines(contents: &str) -> impl Iterator<Item = String> + '_ {
    contents
        .lines()
        .map(|line| line.split('#').next().unwrap_or_default().trim())
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
}

fn parse_target(raw: &str, default_category: Option<&Category>) -> Result<Target, CliError> {
    let raw = raw.trim();
    match default_category {
        Some(category) if !raw.contains(':') => Ok(Target::new(category.clone(), raw)),
        _ => Ok(raw.parse()?),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn expectations_split_on_first_equals() {
        let parsed = parse_expectations(&["owner=ops=team".into(), "enabled=false".into()]).unwrap();
        assert_eq!(
            parsed,
            vec![
                ("owner".into(), "ops=team".into()),
                ("enabled".into(), "false".into())
            ]
        );
        assert!(parse_expectations(&["novalue".into()]).is_err());
        assert!(parse_expectations(&["=x".into()]).is_err());
    }

    #[test]
    fn targets_merge_flags_and_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# fleet\nmanagedDevices:d2\n\nd3  # bare id\n").unwrap();

        let args = TargetArgs {
            targets: vec!["managedDevices:d1".into(), "users:u1".into()],
            targets_file: Some(file.path().to_path_buf()),
            category: Some("managedDevices".into()),
        };
        let targets: Vec<String> = collect_targets(&args)
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(
            targets,
            vec![
                "managedDevices:d1",
                "users:u1",
                "managedDevices:d2",
                "managedDevices:d3"
            ]
        );
    }

    #[test]
    fn bare_ids_need_a_category() {
        let args = TargetArgs {
            targets: vec!["d1".into()],
            targets_file: None,
            category: None,
        };
        assert!(matches!(
            collect_targets(&args),
            Err(CliError::Validation { .. })
        ));
    }
}
