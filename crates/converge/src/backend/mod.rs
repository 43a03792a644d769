//! Host boundary.
//!
//! Everything the executor does to the host goes through one of these
//! traits, so the engine never shells out directly:
//!
//! - [`PackageManager`]: apt, yum, dnf
//! - [`VersionControl`]: git
//! - [`ServiceManager`]: systemd
//! - [`CommandRunner`]: arbitrary guarded commands and the tools above

pub mod git;
pub mod package;
pub mod process;
pub mod systemd;

pub use git::{Git, VersionControl};
pub use package::{Apt, PackageManager, Yum};
pub use process::{CommandLine, CommandOutput, CommandRunner, SystemRunner};
pub use systemd::{ServiceManager, Systemd};

use crate::error::{Error, Result};
use crate::facts::Facts;
use crate::stamp::StampStore;
use std::path::PathBuf;
use std::sync::Arc;

/// The collaborators an executor needs to converge one host.
pub struct Host {
    pub packages: Box<dyn PackageManager>,
    pub vcs: Box<dyn VersionControl>,
    pub services: Box<dyn ServiceManager>,
    pub runner: Arc<dyn CommandRunner>,
    pub stamps: StampStore,
}

impl Host {
    /// Real backends for the platform described by `facts`.
    ///
    /// Fails with [`Error::UnsupportedPlatform`] when no package manager is
    /// known for the platform family.
    pub fn for_facts(facts: &Facts, state_dir: impl Into<PathBuf>) -> Result<Self> {
        let family = facts.require(crate::facts::keys::PLATFORM_FAMILY)?;
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);

        let packages = package::for_family(family, runner.clone()).ok_or_else(|| {
            Error::unsupported(
                "<host>",
                format!("no package manager known for platform family '{family}'"),
            )
        })?;
        log::debug!("Using {} for platform family {}", packages.name(), family);

        Ok(Self {
            packages,
            vcs: Box::new(Git::new(runner.clone())),
            services: Box::new(Systemd::new(runner.clone())),
            runner,
            stamps: StampStore::new(state_dir.into().join("stamps")),
        })
    }
}
