//! `mdmctl validate --target category:id…`

use serde::Serialize;
use tabled::Tabled;

use mdmctl_core::{
    BatchConfig, Diagnostics, OpContext, Operator, ValidationReport, with_deadline,
};

use crate::cli::{GlobalOpts, OutputFormat, ValidateArgs};
use crate::commands::util;
use crate::error::CliError;
use crate::output;

/// One line of the flattened report.
#[derive(Debug, Clone, Serialize, Tabled)]
struct Finding {
    #[tabled(rename = "Category")]
    category: String,
    #[tabled(rename = "Id")]
    id: String,
    #[tabled(rename = "Status")]
    status: &'static str,
    #[tabled(rename = "Detail")]
    detail: String,
}

pub async fn handle(
    args: ValidateArgs,
    operator: &Operator,
    ctx: &OpContext,
    mut batch: BatchConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    batch.targets = util::collect_targets(&args.targets)?;
    if batch.targets.is_empty() {
        return Err(CliError::Validation {
            field: "target".into(),
            reason: "at least one target is required".into(),
        });
    }

    let guard = with_deadline(ctx, batch.timeout, batch.default_timeout, &Diagnostics::new())
        .ok_or_else(|| CliError::Internal("no deadline for validation".into()))?;
    let report = operator.validate(guard.context(), &batch).await?;

    let rendered = match global.output {
        OutputFormat::Table | OutputFormat::Plain => output::render_list(
            global.output,
            &findings(&report),
            Finding::clone,
            |f| format!("{}:{} {}", f.category, f.id, f.status),
        )?,
        OutputFormat::Json => output::render_json(&report, false)?,
        OutputFormat::JsonCompact => output::render_json(&report, true)?,
        OutputFormat::Yaml => output::render_yaml(&report)?,
    };
    output::print_output(&rendered, global.quiet);

    let diagnostics = report.diagnostics(batch.validation_policy.problems_are_errors());
    output::print_diagnostics(&diagnostics, global.quiet, output::should_color(global.color));
    match diagnostics.errors().count() {
        0 => Ok(()),
        count => Err(CliError::ValidationBlocked { count }),
    }
}

fn findings(report: &ValidationReport) -> Vec<Finding> {
    let mut rows = Vec::new();
    for (category, cat) in report.categories() {
        let mut push = |id: &str, status: &'static str, detail: String| {
            rows.push(Finding {
                category: category.to_string(),
                id: id.to_owned(),
                status,
                detail,
            });
        };
        for id in &cat.clean {
            push(id.as_str(), "ok", String::new());
        }
        for id in &cat.nonexistent {
            push(id.as_str(), "missing", "object does not exist".into());
        }
        for u in &cat.unsupported {
            push(u.id.as_str(), "unsupported", u.reason.clone());
        }
        for id in &cat.duplicates {
            push(id.as_str(), "duplicate", "listed more than once".into());
        }
        for id in &cat.cross_listed {
            push(id.as_str(), "cross-listed", "also listed under another category".into());
        }
    }
    rows
}
