//! Command handlers, one module per subcommand.

pub mod config_cmd;
pub mod get;
pub mod run;
pub mod update;
pub mod util;
pub mod validate;

use mdmctl_core::{OpContext, Operator};

use crate::cli::{Command, GlobalOpts};
use crate::config::Resolved;
use crate::error::CliError;

/// Dispatch a command that talks to the management endpoint.
pub async fn dispatch(
    cmd: Command,
    operator: &Operator,
    ctx: &OpContext,
    resolved: Resolved,
    global: &GlobalOpts,
) -> Result<(), CliError> {
    let profile = resolved.profile_name.clone();
    let result = match cmd {
        Command::Run(args) => run::handle(args, operator, ctx, resolved.batch, global).await,
        Command::Validate(args) => {
            validate::handle(args, operator, ctx, resolved.batch, global).await
        }
        Command::Get(args) => get::handle(args, operator, ctx, global).await,
        Command::Update(args) => {
            update::handle(args, operator, ctx, &resolved.batch, global).await
        }
        Command::Config(_) | Command::Completions(_) => Err(CliError::Internal(
            "local command routed to the endpoint dispatcher".into(),
        )),
    };
    result.map_err(|e| e.with_profile(&profile))
}
