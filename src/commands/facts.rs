use anyhow::Result;
use converge::FactSource;
use converge::facts::keys;

use crate::Context;
use crate::cli::FactsArgs;
use crate::commands::fact_source;
use crate::config::Config;
use crate::ui;

/// Print everything known about the host.
///
/// Unlike a run, a missing platform family is reported, not fatal.
pub fn run(ctx: &Context, config: &Config, args: &FactsArgs) -> Result<u8> {
    let facts = fact_source(config, &args.facts).gather();

    if args.json {
        println!("{}", serde_json::to_string_pretty(&facts)?);
    } else {
        ui::facts(&facts);
    }

    if facts.platform_family().is_none() {
        if !ctx.quiet {
            ui::warn(&format!(
                "'{}' is unknown; runs will fail until it is supplied with --fact",
                keys::PLATFORM_FAMILY
            ));
        }
        return Ok(1);
    }
    Ok(0)
}
