//! Fact resolution.
//!
//! Facts are resolved once at the start of a run and passed explicitly to
//! every component that needs them. Nothing downstream mutates them.

use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

/// Well-known fact keys.
pub mod keys {
    pub const PLATFORM_FAMILY: &str = "platform_family";
    pub const PLATFORM: &str = "platform";
    pub const PLATFORM_VERSION: &str = "platform_version";
    pub const HOSTNAME: &str = "hostname";
    pub const FQDN: &str = "fqdn";
    pub const CLOUD_PUBLIC_IPV4: &str = "cloud.public_ipv4";
    pub const OS: &str = "os";
    pub const KERNEL: &str = "kernel";
    pub const ARCH: &str = "arch";
}

/// Default EC2-style instance metadata endpoint for the public address.
pub const DEFAULT_METADATA_URL: &str = "http://169.254.169.254/latest/meta-data/public-ipv4";

/// Immutable key-value view of the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Facts {
    values: BTreeMap<String, String>,
}

impl Facts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Look up a fact that must be present.
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key).ok_or_else(|| Error::FactUnavailable {
            fact: key.to_string(),
        })
    }

    pub fn platform_family(&self) -> Option<&str> {
        self.get(keys::PLATFORM_FAMILY)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Return a copy with `overrides` layered on top.
    pub fn with_overrides(&self, overrides: &BTreeMap<String, String>) -> Self {
        let mut values = self.values.clone();
        for (key, value) in overrides {
            values.insert(key.clone(), value.clone());
        }
        Self { values }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Facts {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// A source of host facts.
pub trait FactSource {
    /// Collect whatever can be determined, without judging completeness.
    fn gather(&self) -> Facts;

    /// Resolve facts for a run.
    ///
    /// Fails with [`Error::FactUnavailable`] when the platform family is
    /// unknown; conditional planning cannot safely default it.
    fn resolve(&self) -> Result<Facts> {
        let facts = self.gather();
        facts.require(keys::PLATFORM_FAMILY)?;
        Ok(facts)
    }
}

/// A fixed set of facts.
#[derive(Debug, Clone, Default)]
pub struct StaticFacts(pub Facts);

impl FactSource for StaticFacts {
    fn gather(&self) -> Facts {
        self.0.clone()
    }
}

/// Layers explicit overrides on top of another source.
///
/// Overrides are applied before the mandatory-fact check, so an operator can
/// supply a platform family the host does not advertise.
pub struct WithOverrides<S> {
    source: S,
    overrides: BTreeMap<String, String>,
}

impl<S: FactSource> WithOverrides<S> {
    pub fn new(source: S, overrides: BTreeMap<String, String>) -> Self {
        Self { source, overrides }
    }
}

impl<S: FactSource> FactSource for WithOverrides<S> {
    fn gather(&self) -> Facts {
        self.source.gather().with_overrides(&self.overrides)
    }
}

/// Facts read from the running host.
#[derive(Debug, Clone)]
pub struct HostFacts {
    os_release: PathBuf,
    metadata_url: Option<String>,
    metadata_timeout: Duration,
}

impl Default for HostFacts {
    fn default() -> Self {
        Self::new()
    }
}

impl HostFacts {
    pub fn new() -> Self {
        Self {
            os_release: PathBuf::from("/etc/os-release"),
            metadata_url: Some(DEFAULT_METADATA_URL.to_string()),
            metadata_timeout: Duration::from_millis(800),
        }
    }

    pub fn with_os_release(mut self, path: impl Into<PathBuf>) -> Self {
        self.os_release = path.into();
        self
    }

    pub fn with_metadata_url(mut self, url: Option<String>) -> Self {
        self.metadata_url = url;
        self
    }

    fn platform_facts(&self, values: &mut BTreeMap<String, String>) {
        let content = match fs::read_to_string(&self.os_release) {
            Ok(content) => content,
            Err(e) => {
                log::warn!("Could not read {}: {}", self.os_release.display(), e);
                return;
            }
        };

        let release = parse_os_release(&content);
        let Some(id) = release.get("ID") else {
            log::warn!("{} has no ID field", self.os_release.display());
            return;
        };

        let id_like: Vec<&str> = release
            .get("ID_LIKE")
            .map(|s| s.split_whitespace().collect())
            .unwrap_or_default();

        values.insert(keys::PLATFORM.into(), platform_name(id).to_string());
        if let Some(family) = family_for(id, &id_like) {
            values.insert(keys::PLATFORM_FAMILY.into(), family.to_string());
        }
        if let Some(version) = release.get("VERSION_ID") {
            values.insert(keys::PLATFORM_VERSION.into(), version.clone());
        }
    }

    fn host_names(values: &mut BTreeMap<String, String>) {
        let hostname = fs::read_to_string("/etc/hostname")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .or_else(|| capture("hostname", &[]));

        if let Some(hostname) = hostname {
            let fqdn = capture("hostname", &["-f"]).unwrap_or_else(|| hostname.clone());
            values.insert(keys::HOSTNAME.into(), hostname);
            values.insert(keys::FQDN.into(), fqdn);
        }
    }

    fn cloud_facts(&self, values: &mut BTreeMap<String, String>) {
        let Some(url) = &self.metadata_url else {
            return;
        };

        let config = ureq::Agent::config_builder()
            .timeout_global(Some(self.metadata_timeout))
            .build();
        let agent = ureq::Agent::new_with_config(config);

        match agent.get(url).call() {
            Ok(mut response) => match response.body_mut().read_to_string() {
                Ok(body) if !body.trim().is_empty() => {
                    values.insert(keys::CLOUD_PUBLIC_IPV4.into(), body.trim().to_string());
                }
                Ok(_) => {}
                Err(e) => log::debug!("Instance metadata body unreadable: {}", e),
            },
            Err(e) => log::debug!("No instance metadata at {}: {}", url, e),
        }
    }
}

impl FactSource for HostFacts {
    fn gather(&self) -> Facts {
        let mut values = BTreeMap::new();
        values.insert(keys::OS.into(), std::env::consts::OS.to_string());
        values.insert(keys::ARCH.into(), std::env::consts::ARCH.to_string());
        if let Some(kernel) = capture("uname", &["-r"]) {
            values.insert(keys::KERNEL.into(), kernel);
        }

        self.platform_facts(&mut values);
        Self::host_names(&mut values);
        self.cloud_facts(&mut values);

        Facts { values }
    }
}

fn capture(cmd: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(cmd).args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// Parse `/etc/os-release` style `KEY=value` lines.
pub fn parse_os_release(content: &str) -> BTreeMap<String, String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            (key.trim().to_string(), value.to_string())
        })
        .collect()
}

/// Conventional platform name for an os-release ID.
pub fn platform_name(id: &str) -> &str {
    match id {
        "amzn" => "amazon",
        "rhel" => "redhat",
        "ol" => "oracle",
        "sles" => "suse",
        other => other,
    }
}

/// Map an os-release ID (falling back to ID_LIKE) to a platform family.
pub fn family_for(id: &str, id_like: &[&str]) -> Option<&'static str> {
    std::iter::once(id)
        .chain(id_like.iter().copied())
        .find_map(family_of)
}

fn family_of(id: &str) -> Option<&'static str> {
    match id {
        "debian" | "ubuntu" | "linuxmint" | "raspbian" => Some("debian"),
        "rhel" | "redhat" | "centos" | "amzn" | "amazon" | "ol" | "oracle" | "rocky"
        | "almalinux" | "scientific" => Some("rhel"),
        "fedora" => Some("fedora"),
        "opensuse" | "opensuse-leap" | "sles" | "suse" => Some("suse"),
        "arch" => Some("arch"),
        "alpine" => Some("alpine"),
        _ => None,
    }
}

/// Major version number the way version rules compare it.
///
/// Leading digits are parsed; a version without them counts as 0.
pub fn major_version(version: &str) -> u64 {
    let digits: String = version
        .trim()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const UBUNTU: &str = r#"NAME="Ubuntu"
VERSION="14.04.6 LTS, Trusty Tahr"
ID=ubuntu
ID_LIKE=debian
PRETTY_NAME="Ubuntu 14.04.6 LTS"
VERSION_ID="14.04"
"#;

    const AMAZON: &str = r#"NAME="Amazon Linux AMI"
VERSION="2018.03"
ID="amzn"
ID_LIKE="rhel fedora"
VERSION_ID="2018.03"
"#;

    #[test]
    fn test_parse_os_release() {
        let release = parse_os_release(UBUNTU);
        assert_eq!(release.get("ID").map(String::as_str), Some("ubuntu"));
        assert_eq!(release.get("VERSION_ID").map(String::as_str), Some("14.04"));
        assert_eq!(
            release.get("PRETTY_NAME").map(String::as_str),
            Some("Ubuntu 14.04.6 LTS")
        );
    }

    #[test]
    fn test_family_for_direct_and_like() {
        assert_eq!(family_for("ubuntu", &["debian"]), Some("debian"));
        assert_eq!(family_for("centos", &[]), Some("rhel"));
        assert_eq!(family_for("amzn", &["rhel", "fedora"]), Some("rhel"));
        assert_eq!(family_for("pop", &["ubuntu", "debian"]), Some("debian"));
        assert_eq!(family_for("plan9", &[]), None);
    }

    #[test]
    fn test_major_version() {
        assert_eq!(major_version("7"), 7);
        assert_eq!(major_version("7.9.2009"), 7);
        assert_eq!(major_version("2018.03"), 2018);
        assert_eq!(major_version("rolling"), 0);
    }

    #[test]
    fn test_host_facts_from_os_release_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(AMAZON.as_bytes()).unwrap();

        let facts = HostFacts::new()
            .with_os_release(file.path())
            .with_metadata_url(None)
            .resolve()
            .unwrap();

        assert_eq!(facts.get(keys::PLATFORM_FAMILY), Some("rhel"));
        assert_eq!(facts.get(keys::PLATFORM), Some("amazon"));
        assert_eq!(facts.get(keys::PLATFORM_VERSION), Some("2018.03"));
        assert!(facts.contains(keys::ARCH));
        assert!(!facts.contains(keys::CLOUD_PUBLIC_IPV4));
    }

    #[test]
    fn test_missing_family_is_fatal() {
        let source = HostFacts::new()
            .with_os_release("/nonexistent/os-release")
            .with_metadata_url(None);

        let err = source.resolve().unwrap_err();
        assert_eq!(
            err,
            Error::FactUnavailable {
                fact: keys::PLATFORM_FAMILY.into()
            }
        );
    }

    #[test]
    fn test_overrides_rescue_missing_family() {
        let source = WithOverrides::new(
            StaticFacts(Facts::from_iter([(keys::PLATFORM, "plan9")])),
            BTreeMap::from([(keys::PLATFORM_FAMILY.to_string(), "debian".to_string())]),
        );

        let facts = source.resolve().unwrap();
        assert_eq!(facts.platform_family(), Some("debian"));
        assert_eq!(facts.get(keys::PLATFORM), Some("plan9"));
    }

    #[test]
    fn test_with_overrides_does_not_mutate_original() {
        let facts = Facts::from_iter([(keys::FQDN, "a.example")]);
        let layered =
            facts.with_overrides(&BTreeMap::from([(keys::FQDN.to_string(), "b.example".to_string())]));
        assert_eq!(facts.get(keys::FQDN), Some("a.example"));
        assert_eq!(layered.get(keys::FQDN), Some("b.example"));
    }
}
