//! Fact-driven selection rules.
//!
//! A [`RuleTable`] is an ordered list of `(predicate, value)` pairs with a
//! terminal fallback. The first rule whose predicate holds wins. Selection
//! is a pure function of the facts it reads, so every rule can be tested on
//! its own.
//!
//! Predicates short-circuit: `all` stops at the first false member, `any`
//! at the first true one. A predicate that has to read a fact which is
//! absent fails the whole selection instead of guessing.

use crate::facts::{Facts, keys, major_version};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a rule table could not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("fact '{0}' is required by a selection rule but unavailable")]
    MissingFact(String),

    #[error("no rule matches platform family '{family}'")]
    NoMatch { family: String },
}

/// A condition over resolved facts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    /// Always holds
    Always,
    /// `platform_family` equals the value
    Family(String),
    /// `platform` equals the value
    Platform(String),
    /// `platform` differs from the value
    PlatformNot(String),
    /// `platform_version` equals the value exactly
    Version(String),
    /// Major `platform_version` is at least the value
    VersionAtLeast(u64),
    /// Major `platform_version` is below the value
    VersionBelow(u64),
    /// Every member holds
    All(Vec<Predicate>),
    /// At least one member holds
    Any(Vec<Predicate>),
    /// The member does not hold
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn family(value: &str) -> Self {
        Self::Family(value.to_string())
    }

    pub fn platform(value: &str) -> Self {
        Self::Platform(value.to_string())
    }

    pub fn platform_not(value: &str) -> Self {
        Self::PlatformNot(value.to_string())
    }

    pub fn version(value: &str) -> Self {
        Self::Version(value.to_string())
    }

    pub fn evaluate(&self, facts: &Facts) -> Result<bool, RuleError> {
        match self {
            Self::Always => Ok(true),
            Self::Family(family) => Ok(fact(facts, keys::PLATFORM_FAMILY)? == family.as_str()),
            Self::Platform(platform) => Ok(fact(facts, keys::PLATFORM)? == platform.as_str()),
            Self::PlatformNot(platform) => Ok(fact(facts, keys::PLATFORM)? != platform.as_str()),
            Self::Version(version) => Ok(fact(facts, keys::PLATFORM_VERSION)? == version.as_str()),
            Self::VersionAtLeast(min) => {
                Ok(major_version(fact(facts, keys::PLATFORM_VERSION)?) >= *min)
            }
            Self::VersionBelow(max) => {
                Ok(major_version(fact(facts, keys::PLATFORM_VERSION)?) < *max)
            }
            Self::All(members) => {
                for member in members {
                    if !member.evaluate(facts)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            Self::Any(members) => {
                for member in members {
                    if member.evaluate(facts)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Self::Not(member) => Ok(!member.evaluate(facts)?),
        }
    }
}

fn fact<'a>(facts: &'a Facts, key: &str) -> Result<&'a str, RuleError> {
    facts
        .get(key)
        .ok_or_else(|| RuleError::MissingFact(key.to_string()))
}

/// One `(predicate, value)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub when: Predicate,
    pub value: String,
}

/// Ordered rules with a terminal fallback.
///
/// Without a fallback value, an unmatched table is an unsupported platform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleTable {
    pub rules: Vec<Rule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rule(mut self, when: Predicate, value: &str) -> Self {
        self.rules.push(Rule {
            when,
            value: value.to_string(),
        });
        self
    }

    pub fn or_else(mut self, value: &str) -> Self {
        self.fallback = Some(value.to_string());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.fallback.is_none()
    }

    /// Select the value for the given facts.
    pub fn select(&self, facts: &Facts) -> Result<&str, RuleError> {
        for rule in &self.rules {
            if rule.when.evaluate(facts)? {
                return Ok(&rule.value);
            }
        }

        match &self.fallback {
            Some(value) => Ok(value),
            None => Err(RuleError::NoMatch {
                family: facts
                    .platform_family()
                    .unwrap_or("<unknown>")
                    .to_string(),
            }),
        }
    }
}

/// MySQL/MariaDB client development headers by platform.
///
/// RHEL 7+ ships MariaDB; Amazon Linux and older RHEL releases still carry
/// the MySQL package name.
pub fn database_client_package() -> RuleTable {
    RuleTable::new()
        .rule(
            Predicate::All(vec![
                Predicate::family("rhel"),
                Predicate::VersionAtLeast(7),
                Predicate::platform_not("amazon"),
            ]),
            "mariadb-devel",
        )
        .rule(Predicate::family("rhel"), "mysql-devel")
        .rule(Predicate::family("debian"), "libmysqlclient-dev")
}
