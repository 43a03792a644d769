//! Subcommand implementations.
//!
//! Each command returns the process exit status; errors carry their own
//! status through `main`.

pub mod apply;
pub mod facts;
pub mod plan;

use anyhow::Result;
use converge::{FactSource, Facts, HostFacts, ResourceSpec, WithOverrides};
use std::collections::BTreeMap;

use crate::cli::{FactArgs, RecipeArgs};
use crate::config::Config;
use crate::recipe;

/// Host facts with config overrides, then command-line overrides, on top.
pub fn fact_source(config: &Config, args: &FactArgs) -> WithOverrides<HostFacts> {
    let mut overrides: BTreeMap<String, String> = config.facts.clone();
    overrides.extend(args.facts.iter().cloned());
    let host = HostFacts::new().with_metadata_url(config.run.metadata_endpoint());
    WithOverrides::new(host, overrides)
}

/// Resolve facts and the resources to converge.
pub fn resolve(config: &Config, args: &RecipeArgs) -> Result<(Facts, Vec<ResourceSpec>)> {
    let facts = fact_source(config, &args.facts).resolve()?;
    log::debug!("Resolved {} facts", facts.len());
    let specs = recipe::resources(config, &facts, args.recipe.as_deref())?;
    log::debug!("Loaded {} resources", specs.len());
    Ok((facts, specs))
}
