use clap::{Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use converge::FailurePolicy;
use std::path::PathBuf;

use crate::config::parse_key_value;

#[derive(Parser)]
#[command(name = "provision")]
#[command(version)]
#[command(about = "Idempotent single-host provisioner", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file (default: /etc/provision/config.toml, then ~/.config/provision/config.toml)
    #[arg(short, long, global = true, env = "PROVISION_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Converge this host to the recipe
    Apply(ApplyArgs),

    /// Show the actions a run would take, without querying the host
    Plan(PlanArgs),

    /// Show the resolved host facts
    Facts(FactsArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

// ============================================================================
// Shared
// ============================================================================

#[derive(Parser, Clone, Default)]
pub struct FactArgs {
    /// Override a fact (repeatable), e.g. --fact platform_family=rhel
    #[arg(long = "fact", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub facts: Vec<(String, String)>,
}

#[derive(Parser, Clone, Default)]
pub struct RecipeArgs {
    /// Recipe file (TOML, or JSON with a .json extension) instead of the dpaste recipe
    #[arg(short, long)]
    pub recipe: Option<PathBuf>,

    /// Only act on a resource type or a single resource, e.g. "package" or "command.migrate"
    #[arg(short, long)]
    pub only: Option<String>,

    #[command(flatten)]
    pub facts: FactArgs,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum PolicyArg {
    /// Any failed action fails the run
    Strict,
    /// Only a failed critical action fails the run
    CriticalOnly,
}

impl From<PolicyArg> for FailurePolicy {
    fn from(policy: PolicyArg) -> Self {
        match policy {
            PolicyArg::Strict => Self::Strict,
            PolicyArg::CriticalOnly => Self::CriticalOnly,
        }
    }
}

// ============================================================================
// Apply
// ============================================================================

#[derive(Parser)]
pub struct ApplyArgs {
    #[command(flatten)]
    pub recipe: RecipeArgs,

    /// Dry run - report what would change without changing it
    #[arg(short = 'n', long)]
    pub dry_run: bool,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,

    /// Treat a resource id as critical (repeatable)
    #[arg(long, value_name = "ID")]
    pub critical: Vec<String>,

    /// How failures decide the exit status (default: from config, else strict)
    #[arg(long, value_enum)]
    pub policy: Option<PolicyArg>,

    /// Per-action timeout in seconds for resources that do not set one
    #[arg(long, value_name = "SECS", value_parser = clap::value_parser!(u64).range(1..))]
    pub timeout: Option<u64>,
}

// ============================================================================
// Plan / Facts
// ============================================================================

#[derive(Parser)]
pub struct PlanArgs {
    #[command(flatten)]
    pub recipe: RecipeArgs,

    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser)]
pub struct FactsArgs {
    #[command(flatten)]
    pub facts: FactArgs,

    /// Print facts as JSON
    #[arg(long)]
    pub json: bool,
}
