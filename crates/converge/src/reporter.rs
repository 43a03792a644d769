//! Convergence reporter - aggregates action results into a run summary

use crate::types::{ActionResult, ActionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How failures decide the overall result
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Any failed action fails the run
    #[default]
    Strict,
    /// Only a failed critical action fails the run
    CriticalOnly,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Strict => "strict",
            Self::CriticalOnly => "critical-only",
        })
    }
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strict" => Ok(Self::Strict),
            "critical-only" => Ok(Self::CriticalOnly),
            other => Err(format!(
                "unknown failure policy '{other}' (expected strict or critical-only)"
            )),
        }
    }
}

/// Summary of one run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub changed: usize,
    pub unchanged: usize,
    pub failed: usize,
    /// Planned actions never executed because the run halted
    pub not_run: usize,
    /// A critical action failed
    pub halted: bool,
    pub policy: FailurePolicy,
    pub dry_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_failure: Option<ActionResult>,
    pub results: Vec<ActionResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunSummary {
    /// Whether the run succeeded under its failure policy
    pub fn is_success(&self) -> bool {
        match self.policy {
            FailurePolicy::Strict => self.failed == 0,
            FailurePolicy::CriticalOnly => !self.halted,
        }
    }

    /// Number of planned actions, executed or not
    pub fn total(&self) -> usize {
        self.results.len() + self.not_run
    }

    /// Failed actions, in plan order
    pub fn failures(&self) -> impl Iterator<Item = &ActionResult> {
        self.results.iter().filter(|r| r.is_failure())
    }

    /// Process exit code for this summary
    pub fn exit_code(&self) -> u8 {
        u8::from(!self.is_success())
    }

    pub fn with_times(mut self, started: DateTime<Utc>, finished: DateTime<Utc>) -> Self {
        self.started_at = Some(started);
        self.finished_at = Some(finished);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Wall-clock duration, when both timestamps are known
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.finished_at? - self.started_at?)
    }
}

/// Aggregate the results of a run.
///
/// `planned` is the plan length; results beyond those executed are counted
/// as not run.
pub fn summarize(planned: usize, results: Vec<ActionResult>, policy: FailurePolicy) -> RunSummary {
    let mut summary = RunSummary {
        policy,
        not_run: planned.saturating_sub(results.len()),
        ..RunSummary::default()
    };

    for result in &results {
        match result.status {
            ActionStatus::Changed => summary.changed += 1,
            ActionStatus::Unchanged => summary.unchanged += 1,
            ActionStatus::Failed => {
                summary.failed += 1;
                if result.critical {
                    summary.halted = true;
                }
                if summary.first_failure.is_none() {
                    summary.first_failure = Some(result.clone());
                }
            }
        }
    }

    summary.results = results;
    summary
}
