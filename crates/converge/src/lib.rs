//! # Converge
//!
//! A single-host idempotent provisioning engine.
//!
//! A run resolves facts about the host, expands an ordered list of resource
//! specs into a plan, applies each action query-before-mutate and summarizes
//! the outcome.
//!
//! ## Core Concepts
//!
//! - **Facts**: immutable key-value description of the host
//! - **ResourceSpec**: declared desired state (package, file, repository,
//!   service, guarded command)
//! - **RuleTable**: ordered predicate/value pairs for fact-dependent choices
//! - **Plan**: one action per spec, in declared order
//! - **Host**: the package manager, version control and service manager
//!   backends an executor drives
//! - **RunSummary**: per-action outcomes and the overall result
//!
//! ## Example
//!
//! ```ignore
//! use converge::{
//!     converge, rules, Host, HostFacts, NoProgress, ResourceSpec, RunOptions,
//! };
//!
//! let specs = vec![
//!     ResourceSpec::package_select("db-client", rules::database_client_package()),
//!     ResourceSpec::package("git", "git").critical(),
//! ];
//!
//! let outcome = converge(
//!     &specs,
//!     &RunOptions::default(),
//!     &HostFacts::new(),
//!     |facts| Host::for_facts(facts, "/var/lib/provision"),
//!     &mut NoProgress,
//! )?;
//! println!("{} changed", outcome.summary.changed);
//! ```

pub mod backend;
pub mod context;
pub mod engine;
pub mod error;
pub mod executor;
pub mod facts;
pub mod planner;
pub mod reporter;
pub mod rules;
pub mod spec;
pub mod stamp;
pub mod template;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::Host;
pub use context::{NoProgress, ProgressCallback};
pub use engine::{RunOptions, RunOutcome, RunStatus, apply, converge, plan_for, prepare};
pub use error::{ActionError, Error, ErrorCategory, Result};
pub use executor::{execute, execute_plan};
pub use facts::{FactSource, Facts, HostFacts, StaticFacts, WithOverrides};
pub use planner::{Plan, plan};
pub use reporter::{FailurePolicy, RunSummary, summarize};
pub use rules::{Predicate, Rule, RuleError, RuleTable};
pub use spec::{
    CommandSpec, FileSpec, PackageName, PackageSpec, Recipe, RepositorySpec, ResourceKind,
    ResourceSpec, ServiceSpec,
};
pub use types::{Action, ActionKind, ActionResult, ActionStatus, ExecuteOptions};
