//! Output formatting: table, JSON, YAML, plain.
//!
//! Renders data in the format selected by `--output`. Table uses `tabled`,
//! structured formats use serde, plain emits one identifier per line.
//! Diagnostics and progress go to stderr so stdout stays machine-readable.

use std::io::{self, IsTerminal, Write};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use mdmctl_core::{Diagnostics, FinalStatus, OutcomeStatus, Severity};

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

// ── Color helpers ────────────────────────────────────────────────────

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

pub fn paint_status(status: OutcomeStatus, color: bool) -> String {
    let text = status.to_string();
    if !color {
        return text;
    }
    match status {
        OutcomeStatus::Succeeded => text.green().to_string(),
        OutcomeStatus::Failed => text.red().bold().to_string(),
        OutcomeStatus::Pending => text.dimmed().to_string(),
    }
}

pub fn paint_final(status: FinalStatus, color: bool) -> String {
    let text = status.to_string();
    if !color {
        return text;
    }
    match status {
        FinalStatus::Success => text.green().bold().to_string(),
        FinalStatus::SuccessWithIgnoredFailures => text.yellow().bold().to_string(),
        FinalStatus::Failed => text.red().bold().to_string(),
    }
}

// ── Render dispatchers ───────────────────────────────────────────────

/// Render a list of serde-serializable + tabled items in the chosen format.
///
/// - `table`: uses the `Tabled` derive to build a pretty table
/// - `json` / `json-compact`: serializes the original data via serde
/// - `yaml`: serializes via serde_yaml
/// - `plain`: calls `id_fn` on each item to emit one identifier per line
pub fn render_list<T, R>(
    format: OutputFormat,
    data: &[T],
    to_row: impl Fn(&T) -> R,
    id_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: serde::Serialize,
    R: Tabled,
{
    match format {
        OutputFormat::Table => {
            let rows: Vec<R> = data.iter().map(to_row).collect();
            Ok(render_table(&rows))
        }
        OutputFormat::Json => render_json(data, false),
        OutputFormat::JsonCompact => render_json(data, true),
        OutputFormat::Yaml => render_yaml(data),
        OutputFormat::Plain => Ok(data.iter().map(&id_fn).collect::<Vec<_>>().join("\n")),
    }
}

/// Render a single serde-serializable item in the chosen format.
///
/// Table rendering uses `detail_fn`, since single-item detail views don't
/// use the `Tabled` derive.
pub fn render_single<T>(
    format: OutputFormat,
    data: &T,
    detail_fn: impl Fn(&T) -> String,
    id_fn: impl Fn(&T) -> String,
) -> Result<String, CliError>
where
    T: serde::Serialize,
{
    match format {
        OutputFormat::Table => Ok(detail_fn(data)),
        OutputFormat::Json => render_json(data, false),
        OutputFormat::JsonCompact => render_json(data, true),
        OutputFormat::Yaml => render_yaml(data),
        OutputFormat::Plain => Ok(id_fn(data)),
    }
}

/// Print the rendered output to stdout, respecting quiet mode.
pub fn print_output(output: &str, quiet: bool) {
    if quiet || output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

/// Print diagnostics to stderr, errors first. Warnings are hidden in
/// quiet mode; errors never are.
pub fn print_diagnostics(diagnostics: &Diagnostics, quiet: bool, color: bool) {
    let mut stderr = io::stderr().lock();
    for diag in diagnostics.errors().chain(diagnostics.warnings()) {
        if quiet && diag.severity == Severity::Warning {
            continue;
        }
        let label = match (diag.severity, color) {
            (Severity::Error, true) => "error".red().bold().to_string(),
            (Severity::Warning, true) => "warning".yellow().bold().to_string(),
            (severity, false) => severity.to_string(),
        };
        let _ = writeln!(stderr, "{label}: {}: {}", diag.summary, diag.detail);
    }
}

// ── Progress ─────────────────────────────────────────────────────────

/// A batch progress bar on stderr, or a hidden one when stderr is not a
/// terminal or output is quiet.
pub fn batch_progress(total: usize, verb: &str, quiet: bool) -> ProgressBar {
    if quiet || !io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total as u64);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} {msg} [{bar:40.cyan/blue}] {pos}/{len}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓▒░");
    bar.set_style(style);
    bar.set_message(verb.to_owned());
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

// ── Format-specific renderers ────────────────────────────────────────

fn render_table<R: Tabled>(rows: &[R]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

pub(crate) fn render_json<T: serde::Serialize + ?Sized>(
    data: &T,
    compact: bool,
) -> Result<String, CliError> {
    let rendered = if compact {
        serde_json::to_string(data)?
    } else {
        serde_json::to_string_pretty(data)?
    };
    Ok(rendered)
}

pub(crate) fn render_yaml<T: serde::Serialize + ?Sized>(data: &T) -> Result<String, CliError> {
    Ok(serde_yaml::to_string(data)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde::Serialize;

    use super::*;

    #[derive(Serialize, Tabled)]
    struct Row {
        id: String,
        status: String,
    }

    fn rows() -> Vec<Row> {
        vec![
            Row {
                id: "a".into(),
                status: "succeeded".into(),
            },
            Row {
                id: "b".into(),
                status: "failed".into(),
            },
        ]
    }

    #[test]
    fn plain_emits_one_id_per_line() {
        let out = render_list(
            OutputFormat::Plain,
            &rows(),
            |r| Row {
                id: r.id.clone(),
                status: r.status.clone(),
            },
            |r| r.id.clone(),
        )
        .unwrap();
        assert_eq!(out, "a\nb");
    }

    #[test]
    fn compact_json_is_one_line() {
        let out = render_json(&rows(), true).unwrap();
        assert!(!out.contains('\n'));
        assert!(out.starts_with("[{\"id\":\"a\""));
    }

    #[test]
    fn uncolored_status_is_plain_text() {
        assert_eq!(paint_status(OutcomeStatus::Failed, false), "failed");
        assert_eq!(
            paint_final(FinalStatus::SuccessWithIgnoredFailures, false),
            "success_with_ignored_failures"
        );
    }
}
