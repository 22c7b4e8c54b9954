//! `mdmctl update <category> <id> --body FILE --expect key=value`

use mdmctl_config::parse_duration;
use mdmctl_core::{
    Action, BatchConfig, Category, Diagnostics, OpContext, Operator, Target, with_deadline,
};
use tracing::info;

use crate::cli::{GlobalOpts, UpdateArgs};
use crate::commands::get::print_object;
use crate::commands::util;
use crate::error::CliError;

pub async fn handle(
    args: UpdateArgs,
    operator: &Operator,
    ctx: &OpContext,
    batch: &BatchConfig,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let target = Target::new(Category::new(args.category.as_str())?, args.id.as_str());

    let mut action = Action::new(args.verb.as_str()).with_body(util::read_json_file(&args.body)?);
    for (property, value) in util::parse_expectations(&args.expect)? {
        action = action.expecting(property, value);
    }

    let mut settings = batch.reconcile;
    if let Some(attempts) = args.attempts {
        settings.max_attempts = attempts.max(1);
    }
    if let Some(ref backoff) = args.backoff {
        settings.delay = parse_duration("backoff", backoff)?;
    }

    let guard = with_deadline(ctx, None, batch.default_timeout, &Diagnostics::new())
        .ok_or_else(|| CliError::Internal("no deadline for update".into()))?;

    info!(target = %target, verb = %action, expectations = action.expect.len(), "applying");
    let object = operator
        .apply(guard.context(), &target, &action, &settings)
        .await?;
    print_object(&object, global)
}
