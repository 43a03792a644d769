mod cli;
mod commands;
mod config;
mod progress;
mod recipe;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use config::{Config, InvalidInput};
use std::io;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    match run(&ctx, cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            ui::error(&format!("{err:#}"));
            ExitCode::from(exit_code(&err))
        }
    }
}

fn run(ctx: &Context, cli: Cli) -> Result<u8> {
    if let Command::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "provision", &mut io::stdout());
        return Ok(0);
    }

    let (config, path) = Config::load(cli.config.as_deref())?;
    if let Some(path) = &path {
        log::info!("Using config {}", path.display());
    }

    match &cli.command {
        Command::Apply(args) => commands::apply::run(ctx, &config, args),
        Command::Plan(args) => commands::plan::run(ctx, &config, args),
        Command::Facts(args) => commands::facts::run(ctx, &config, args),
        Command::Completions { .. } => Ok(0),
    }
}

/// Exit status for an error: 2 for input the operator must fix, else 1.
fn exit_code(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(err) = cause.downcast_ref::<converge::Error>() {
            return err.exit_code();
        }
        if cause.downcast_ref::<InvalidInput>().is_some() {
            return 2;
        }
    }
    1
}
