use anyhow::Result;
use converge::engine;

use crate::Context;
use crate::cli::PlanArgs;
use crate::commands::{apply, resolve};
use crate::config::Config;
use crate::ui;

/// Show what a run would do. Nothing on the host is queried beyond facts.
pub fn run(ctx: &Context, config: &Config, args: &PlanArgs) -> Result<u8> {
    let (facts, specs) = resolve(config, &args.recipe)?;
    let options = apply::run_options(config, &args.recipe, None);
    let plan = engine::plan_for(&specs, &options, &facts)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(plan.actions())?);
        return Ok(0);
    }

    if ctx.verbose > 0 {
        ui::facts(&facts);
    }
    ui::plan(&plan);
    Ok(0)
}
