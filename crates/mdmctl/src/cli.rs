//! Clap derive structures for the `mdmctl` CLI.
//!
//! Defines the command tree, global flags, and shared value enums. Kept free
//! of workspace types so `build.rs` can include it for man page generation.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// mdmctl -- batch operations for device-management APIs
#[derive(Debug, Parser)]
#[command(
    name = "mdmctl",
    version,
    about = "Run batch operations against device-management APIs",
    long_about = "Validate a list of remote objects, apply one action to all of them \
        under a bounded deadline, and confirm each change by reading it back.\n\n\
        Built for eventually consistent management endpoints where a write \
        that was accepted may take a while to become visible.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Endpoint profile to use
    #[arg(long, short = 'p', env = "MDMCTL_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Management API root URL (overrides profile)
    #[arg(long, short = 'e', env = "MDMCTL_ENDPOINT", global = true)]
    pub endpoint: Option<String>,

    /// Bearer token (overrides profile)
    #[arg(long, env = "MDMCTL_TOKEN", global = true, hide_env_values = true)]
    pub token: Option<String>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "MDMCTL_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Skip confirmation prompts
    #[arg(long, short = 'y', global = true)]
    pub yes: bool,

    /// Accept invalid TLS certificates
    #[arg(long, short = 'k', env = "MDMCTL_INSECURE", global = true)]
    pub insecure: bool,

    /// Per-request timeout, e.g. "30s"
    #[arg(long, env = "MDMCTL_TIMEOUT", global = true)]
    pub timeout: Option<String>,

    /// Maximum concurrent requests during a batch
    #[arg(long, env = "MDMCTL_CONCURRENCY", global = true)]
    pub concurrency: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
    JsonCompact,
    Yaml,
    Plain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ColorMode {
    Auto,
    Always,
    Never,
}

/// What to do with targets that fail validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ValidationMode {
    /// Refuse to run the batch
    Strict,
    /// Drop flagged targets and run the rest
    Exclude,
    /// Report and run every target anyway
    Warn,
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Validate targets, then apply one action to all of them
    Run(RunArgs),

    /// Check that targets exist and support the configured capabilities
    Validate(ValidateArgs),

    /// Fetch one object
    Get(GetArgs),

    /// Change one object and wait until the change is visible
    Update(UpdateArgs),

    /// Inspect and manage the configuration file
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ── Target selection ─────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct TargetArgs {
    /// Target as `category:id` (repeatable, comma-separated)
    #[arg(long = "target", short = 't', value_delimiter = ',')]
    pub targets: Vec<String>,

    /// Read targets from a file, one per line (`#` starts a comment)
    #[arg(long, value_name = "FILE")]
    pub targets_file: Option<PathBuf>,

    /// Category for targets given as bare ids
    #[arg(long, short = 'c')]
    pub category: Option<String>,
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Remote verb to apply (e.g. "update", "retire", "syncDevice")
    pub verb: String,

    #[command(flatten)]
    pub targets: TargetArgs,

    /// JSON request body sent with every action
    #[arg(long, value_name = "FILE")]
    pub body: Option<PathBuf>,

    /// Confirm each target by reading back `property=value` (repeatable)
    #[arg(long, value_name = "PROPERTY=VALUE")]
    pub expect: Vec<String>,

    /// Report success when only some targets fail
    #[arg(long)]
    pub ignore_partial_failures: bool,

    /// Skip pre-flight validation
    #[arg(long, conflicts_with_all = ["validation", "strict_validation"])]
    pub no_validate: bool,

    /// Validation policy (defaults to the profile's, then strict)
    #[arg(long, value_name = "MODE")]
    pub validation: Option<ValidationMode>,

    /// Shorthand for `--validation strict`
    #[arg(long, conflicts_with = "validation")]
    pub strict_validation: bool,

    /// Whole-batch deadline, e.g. "10m"
    #[arg(long, value_name = "DURATION")]
    pub batch_timeout: Option<String>,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub targets: TargetArgs,
}

#[derive(Debug, Args)]
pub struct GetArgs {
    /// Object collection (e.g. "managedDevices")
    pub category: String,

    /// Object identifier
    pub id: String,
}

#[derive(Debug, Args)]
pub struct UpdateArgs {
    /// Object collection (e.g. "managedDevices")
    pub category: String,

    /// Object identifier
    pub id: String,

    /// JSON request body
    #[arg(long, value_name = "FILE")]
    pub body: PathBuf,

    /// Remote verb to send the body with
    #[arg(long, default_value = "update")]
    pub verb: String,

    /// Property that must read back with this value (repeatable)
    #[arg(long, value_name = "PROPERTY=VALUE")]
    pub expect: Vec<String>,

    /// Read-back attempts before giving up
    #[arg(long)]
    pub attempts: Option<u32>,

    /// Delay between read-back attempts, e.g. "2s"
    #[arg(long, value_name = "DURATION")]
    pub backoff: Option<String>,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show the resolved configuration (tokens redacted)
    Show,

    /// Print the config file path
    Path,

    /// Create or replace a profile
    Init(ConfigInitArgs),
}

#[derive(Debug, Args)]
pub struct ConfigInitArgs {
    /// Profile name
    #[arg(long, default_value = "default")]
    pub name: String,

    /// Environment variable holding the bearer token
    #[arg(long)]
    pub token_env: Option<String>,

    /// Make this the default profile
    #[arg(long)]
    pub set_default: bool,
}

// ── Completions ──────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
