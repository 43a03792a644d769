//! Run orchestration: facts, plan, execute, summarize

use crate::backend::Host;
use crate::context::ProgressCallback;
use crate::error::Result;
use crate::executor;
use crate::facts::{FactSource, Facts};
use crate::planner::{self, Plan};
use crate::reporter::{self, FailurePolicy, RunSummary};
use crate::spec::ResourceSpec;
use crate::types::ExecuteOptions;
use chrono::Utc;
use std::collections::BTreeSet;
use std::time::Duration;

/// Options for one run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Query only; report what would change
    pub dry_run: bool,
    /// Spec ids to treat as critical in addition to those declared so
    pub critical: BTreeSet<String>,
    pub policy: FailurePolicy,
    /// Timeout for actions that do not declare one
    pub default_timeout: Option<Duration>,
    /// Restrict the run to "type" or "type.id"
    pub target: Option<String>,
}

/// Overall run result, mapped to a process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failed,
}

impl RunStatus {
    pub fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Failed => 1,
        }
    }
}

/// Everything a caller needs to report a run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub facts: Facts,
    pub summary: RunSummary,
    pub status: RunStatus,
}

/// Resolve facts and build the plan, without touching the host.
pub fn prepare(
    specs: &[ResourceSpec],
    options: &RunOptions,
    source: &dyn FactSource,
) -> Result<(Facts, Plan)> {
    let facts = source.resolve()?;
    log::debug!("Resolved {} facts", facts.len());

    let plan = plan_for(specs, options, &facts)?;
    Ok((facts, plan))
}

/// Build the plan for already-resolved facts.
pub fn plan_for(specs: &[ResourceSpec], options: &RunOptions, facts: &Facts) -> Result<Plan> {
    let mut plan = planner::plan(specs, facts)?;
    plan.mark_critical(&options.critical)?;
    Ok(plan
        .with_default_timeout(options.default_timeout)
        .filter_by_target(options.target.as_deref()))
}

/// Execute a prepared plan and summarize it.
pub fn apply<P: ProgressCallback + ?Sized>(
    plan: &Plan,
    host: &Host,
    options: &RunOptions,
    progress: &mut P,
) -> RunSummary {
    let started = Utc::now();
    let opts = ExecuteOptions {
        dry_run: options.dry_run,
    };
    let results = executor::execute_plan(plan, host, &opts, progress);
    reporter::summarize(plan.len(), results, options.policy)
        .with_dry_run(options.dry_run)
        .with_times(started, Utc::now())
}

/// Converge the host to `specs`.
///
/// Fact and planning errors are returned before any action runs. Action
/// failures never surface as errors; they are in the summary.
pub fn converge<P: ProgressCallback + ?Sized>(
    specs: &[ResourceSpec],
    options: &RunOptions,
    source: &dyn FactSource,
    host: impl FnOnce(&Facts) -> Result<Host>,
    progress: &mut P,
) -> Result<RunOutcome> {
    let (facts, plan) = prepare(specs, options, source)?;
    let host = host(&facts)?;

    let summary = apply(&plan, &host, options, progress);
    let status = if summary.is_success() {
        RunStatus::Success
    } else {
        RunStatus::Failed
    };
    log::info!(
        "Run finished: {} changed, {} unchanged, {} failed, {} not run",
        summary.changed,
        summary.unchanged,
        summary.failed,
        summary.not_run
    );

    Ok(RunOutcome {
        facts,
        summary,
        status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NoProgress;
    use crate::error::{ActionError, Error, ErrorCategory};
    use crate::facts::StaticFacts;
    use crate::rules;
    use crate::spec::{CommandSpec, ServiceSpec};
    use crate::testing::FakeHost;
    use crate::types::ActionStatus;
    use std::collections::BTreeMap;
    use std::path::Path;

    const URL: &str = "https://github.com/bartTC/dpaste.git";

    fn facts(family: &str, platform: &str, version: &str) -> StaticFacts {
        StaticFacts(
            [
                ("platform_family", family),
                ("platform", platform),
                ("platform_version", version),
                ("fqdn", "web1.example.com"),
            ]
            .into_iter()
            .collect(),
        )
    }

    fn ubuntu() -> StaticFacts {
        facts("debian", "ubuntu", "22.04")
    }

    fn specs(root: &Path) -> Vec<ResourceSpec> {
        let app = root.join("srv/dpaste");
        let mut venv = CommandSpec::new(["mkdir", "-p", ".venv/bin"]);
        venv.cwd = Some(app.clone());
        venv.creates = Some(app.join(".venv/bin"));

        vec![
            ResourceSpec::package_select("db-client", rules::database_client_package()),
            ResourceSpec::package("git", "git"),
            ResourceSpec::repository("app", URL, &app).critical(),
            ResourceSpec::command("virtualenv", venv),
            ResourceSpec::file(
                "settings",
                app.join("dpaste/settings/deploy.py"),
                "from dpaste.settings.base import *\nfrom dpaste.settings.database import *\n",
            ),
            ResourceSpec::service(
                "gunicorn",
                ServiceSpec {
                    name: "dpaste".into(),
                    command: vec![".venv/bin/gunicorn".into(), "dpaste.wsgi".into()],
                    working_dir: Some(app),
                    environment: BTreeMap::new(),
                    user: None,
                    enabled: true,
                    restart_on: vec!["app".into(), "settings".into()],
                },
            ),
        ]
    }

    fn fake(root: &Path) -> FakeHost {
        let fake = FakeHost::new(&root.join("state"));
        fake.vcs.push(URL, "HEAD", "0123456789abcdef");
        fake
    }

    #[cfg(unix)]
    #[test]
    fn test_second_run_is_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let fake = fake(dir.path());
        let specs = specs(dir.path());
        let options = RunOptions::default();

        let first = converge(&specs, &options, &ubuntu(), |_| Ok(fake.host()), &mut NoProgress)
            .unwrap();
        assert_eq!(first.status, RunStatus::Success);
        assert_eq!(first.summary.changed, 6);

        let second = converge(&specs, &options, &ubuntu(), |_| Ok(fake.host()), &mut NoProgress)
            .unwrap();
        assert_eq!(second.status, RunStatus::Success);
        assert_eq!(second.summary.unchanged, 6);
        assert_eq!(second.summary.changed, 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_new_commit_restarts_service() {
        let dir = tempfile::tempdir().unwrap();
        let fake = fake(dir.path());
        let specs = specs(dir.path());
        let options = RunOptions::default();

        converge(&specs, &options, &ubuntu(), |_| Ok(fake.host()), &mut NoProgress).unwrap();
        assert_eq!(fake.services.restarts(), 0);

        fake.vcs.push(URL, "HEAD", "fedcba9876543210");
        let outcome =
            converge(&specs, &options, &ubuntu(), |_| Ok(fake.host()), &mut NoProgress)
                .unwrap();

        let status = |id: &str| {
            outcome
                .summary
                .results
                .iter()
                .find(|r| r.spec_id == id)
                .map(|r| r.status)
        };
        assert_eq!(status("app"), Some(ActionStatus::Changed));
        assert_eq!(status("settings"), Some(ActionStatus::Unchanged));
        assert_eq!(status("gunicorn"), Some(ActionStatus::Changed));
        assert_eq!(fake.services.restarts(), 1);
    }

    #[test]
    fn test_dry_run_leaves_host_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let fake = fake(dir.path());
        let options = RunOptions {
            dry_run: true,
            ..RunOptions::default()
        };

        let outcome = converge(
            &specs(dir.path()),
            &options,
            &ubuntu(),
            |_| Ok(fake.host()),
            &mut NoProgress,
        )
        .unwrap();
        assert!(outcome.summary.dry_run);
        assert_eq!(outcome.summary.changed, 6);
        assert!(fake.packages.installs().is_empty());
        assert_eq!(fake.vcs.clones(), 0);
        assert!(!dir.path().join("srv").exists());
    }

    #[test]
    fn test_critical_failure_stops_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let fake = fake(dir.path());
        fake.vcs.set_unreachable(true);

        let outcome = converge(
            &specs(dir.path()),
            &RunOptions::default(),
            &ubuntu(),
            |_| Ok(fake.host()),
            &mut NoProgress,
        )
        .unwrap();

        let summary = &outcome.summary;
        assert_eq!(outcome.status, RunStatus::Failed);
        assert!(summary.halted);
        assert_eq!(summary.results.len(), 3);
        assert_eq!(summary.not_run, 3);
        assert_eq!(summary.first_failure.as_ref().unwrap().spec_id, "app");
        assert_eq!(
            summary.first_failure.as_ref().unwrap().error.as_ref().unwrap().category,
            ErrorCategory::Network
        );
        assert!(!dir.path().join("srv/dpaste/dpaste").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_non_critical_failure_continues() {
        let dir = tempfile::tempdir().unwrap();
        let fake = fake(dir.path());
        fake.packages.clone().failing(
            "libmysqlclient-dev",
            ActionError::new(ErrorCategory::Lock, "Could not get lock"),
        );

        let strict = converge(
            &specs(dir.path()),
            &RunOptions::default(),
            &ubuntu(),
            |_| Ok(fake.host()),
            &mut NoProgress,
        )
        .unwrap();
        assert_eq!(strict.status, RunStatus::Failed);
        assert_eq!(strict.summary.results.len(), 6);
        assert_eq!(strict.summary.failed, 1);
        assert!(!strict.summary.halted);

        let lenient = converge(
            &specs(dir.path()),
            &RunOptions {
                policy: FailurePolicy::CriticalOnly,
                ..RunOptions::default()
            },
            &ubuntu(),
            |_| Ok(fake.host()),
            &mut NoProgress,
        )
        .unwrap();
        assert_eq!(lenient.status, RunStatus::Success);
        assert_eq!(lenient.summary.results[0].status, ActionStatus::Failed);
    }

    #[test]
    fn test_critical_ids_from_options() {
        let dir = tempfile::tempdir().unwrap();
        let fake = fake(dir.path());
        fake.packages.clone().failing(
            "libmysqlclient-dev",
            ActionError::new(ErrorCategory::NotFound, "package not found"),
        );

        let outcome = converge(
            &specs(dir.path()),
            &RunOptions {
                critical: BTreeSet::from(["db-client".to_string()]),
                ..RunOptions::default()
            },
            &ubuntu(),
            |_| Ok(fake.host()),
            &mut NoProgress,
        )
        .unwrap();
        assert_eq!(outcome.summary.results.len(), 1);
        assert_eq!(outcome.summary.not_run, 5);
    }

    #[test]
    fn test_unknown_critical_id_is_invalid_input() {
        let dir = tempfile::tempdir().unwrap();
        let err = converge(
            &specs(dir.path()),
            &RunOptions {
                critical: BTreeSet::from(["nope".to_string()]),
                ..RunOptions::default()
            },
            &ubuntu(),
            |_| Ok(fake(dir.path()).host()),
            &mut NoProgress,
        )
        .unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_unsupported_platform_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let fake = fake(dir.path());
        let mut host_built = false;

        let err = converge(
            &specs(dir.path()),
            &RunOptions::default(),
            &facts("suse", "opensuse-leap", "15.5"),
            |_| {
                host_built = true;
                Ok(fake.host())
            },
            &mut NoProgress,
        )
        .unwrap_err();

        assert!(matches!(err, Error::UnsupportedPlatform { ref spec, .. } if spec == "db-client"));
        assert_eq!(err.exit_code(), 1);
        assert!(!host_built);
        assert!(fake.packages.installs().is_empty());
    }

    #[test]
    fn test_missing_family_is_fact_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let source = StaticFacts([("platform", "ubuntu")].into_iter().collect());
        let err = converge(
            &specs(dir.path()),
            &RunOptions::default(),
            &source,
            |_| Ok(fake(dir.path()).host()),
            &mut NoProgress,
        )
        .unwrap_err();
        assert!(matches!(err, Error::FactUnavailable { ref fact } if fact == "platform_family"));
    }

    #[test]
    fn test_rhel_selects_mariadb() {
        let dir = tempfile::tempdir().unwrap();
        let fake = fake(dir.path());
        let options = RunOptions {
            target: Some("package.db-client".into()),
            ..RunOptions::default()
        };

        let outcome = converge(
            &specs(dir.path()),
            &options,
            &facts("rhel", "centos", "7.9.2009"),
            |_| Ok(fake.host()),
            &mut NoProgress,
        )
        .unwrap();
        assert_eq!(outcome.summary.results.len(), 1);
        assert_eq!(fake.packages.installs()[0].0, "mariadb-devel");
    }

    #[test]
    fn test_prepare_applies_default_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mut specs = specs(dir.path());
        specs[0] = specs[0].clone().with_timeout(5);

        let (_, plan) = prepare(
            &specs,
            &RunOptions {
                default_timeout: Some(Duration::from_secs(60)),
                ..RunOptions::default()
            },
            &ubuntu(),
        )
        .unwrap();
        assert_eq!(plan.actions()[0].timeout, Some(Duration::from_secs(5)));
        assert_eq!(plan.actions()[1].timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_plan_for_resolved_facts() {
        let dir = tempfile::tempdir().unwrap();
        let facts = ubuntu().0;
        let plan = plan_for(
            &specs(dir.path()),
            &RunOptions {
                critical: BTreeSet::from(["git".to_string()]),
                target: Some("package".into()),
                ..RunOptions::default()
            },
            &facts,
        )
        .unwrap();

        let ids: Vec<_> = plan.actions().iter().map(|a| a.spec_id.as_str()).collect();
        assert_eq!(ids, vec!["db-client", "git"]);
        assert!(plan.actions()[1].critical);
    }
}
