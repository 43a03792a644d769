use anyhow::{Context as AnyhowContext, Result};
use colored::Colorize;
use converge::{Host, RunOptions, engine};
use std::time::Duration;

use crate::Context;
use crate::cli::{ApplyArgs, RecipeArgs};
use crate::commands::resolve;
use crate::config::Config;
use crate::progress::RunProgress;
use crate::ui;

/// Merge config and command-line run settings; the command line wins.
pub fn run_options(config: &Config, recipe: &RecipeArgs, args: Option<&ApplyArgs>) -> RunOptions {
    let mut options = RunOptions {
        dry_run: false,
        critical: config.run.critical.clone(),
        policy: config.run.policy,
        default_timeout: config.run.timeout(),
        target: recipe.only.clone(),
    };

    if let Some(args) = args {
        options.critical.extend(args.critical.iter().cloned());
        options.dry_run = args.dry_run;
        if let Some(policy) = args.policy {
            options.policy = policy.into();
        }
        if let Some(secs) = args.timeout {
            options.default_timeout = Some(Duration::from_secs(secs));
        }
    }

    options
}

pub fn run(ctx: &Context, config: &Config, args: &ApplyArgs) -> Result<u8> {
    let (facts, specs) = resolve(config, &args.recipe)?;
    let options = run_options(config, &args.recipe, Some(args));
    let plan = engine::plan_for(&specs, &options, &facts)?;

    if !args.json && !ctx.quiet {
        if ctx.verbose > 0 {
            ui::facts(&facts);
        }
        ui::plan(&plan);
        println!();
        if plan.is_empty() {
            ui::success("Nothing to converge");
        } else if args.dry_run {
            ui::info("Dry run - the host will not be changed");
        }
    }

    let interactive = console::Term::stdout().is_term();
    if !plan.is_empty() && !args.yes && !args.dry_run && !args.json && interactive {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt("Converge this host?")
            .default(true)
            .interact()
            .context("Failed to read confirmation")?;

        if !confirmed {
            println!("  {} Aborted", "✗".red());
            return Ok(1);
        }
    }

    let host = Host::for_facts(&facts, config.run.state_path())?;
    let mut progress = RunProgress::new(ctx.quiet || args.json);
    let summary = engine::apply(&plan, &host, &options, &mut progress);
    log::info!(
        "Run finished: {} changed, {} unchanged, {} failed, {} not run",
        summary.changed,
        summary.unchanged,
        summary.failed,
        summary.not_run
    );

    if args.json {
        let report = serde_json::json!({ "facts": facts, "summary": summary });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        ui::summary(&summary);
    }

    Ok(summary.exit_code())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Command};
    use clap::Parser;
    use converge::FailurePolicy;

    fn apply_args(argv: &[&str]) -> ApplyArgs {
        let argv = ["provision", "apply"].iter().chain(argv).copied();
        match Cli::try_parse_from(argv).unwrap().command {
            Command::Apply(args) => args,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_config_run_settings_apply_by_default() {
        let mut config = Config::default();
        config.run.critical.insert("app".into());
        config.run.policy = FailurePolicy::CriticalOnly;

        let args = apply_args(&[]);
        let options = run_options(&config, &args.recipe, Some(&args));
        assert!(options.critical.contains("app"));
        assert_eq!(options.policy, FailurePolicy::CriticalOnly);
        assert_eq!(options.default_timeout, Some(Duration::from_secs(1800)));
        assert!(!options.dry_run);
    }

    #[test]
    fn test_command_line_overrides_config() {
        let mut config = Config::default();
        config.run.critical.insert("app".into());

        let args = apply_args(&[
            "--critical",
            "migrate",
            "--policy",
            "critical-only",
            "--timeout",
            "30",
            "--dry-run",
            "--only",
            "command",
        ]);
        let options = run_options(&config, &args.recipe, Some(&args));
        assert_eq!(
            options.critical.iter().collect::<Vec<_>>(),
            vec!["app", "migrate"]
        );
        assert_eq!(options.policy, FailurePolicy::CriticalOnly);
        assert_eq!(options.default_timeout, Some(Duration::from_secs(30)));
        assert!(options.dry_run);
        assert_eq!(options.target.as_deref(), Some("command"));
    }
}
