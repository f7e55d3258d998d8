//! Core value types shared across the cluster engine.
//!
//! Mirrors the teacher crate's approach to Docker concepts: thin, validated
//! newtypes instead of bare `String`s, so a `MachineName` or `RealName` can't
//! be confused with arbitrary text at the call site.

use crate::errors::Error;
use std::fmt;

/// A machine's logical name as written in the descriptor (e.g. `db`).
///
/// Hidden templates (`.base`, `x-common`) are valid `MachineName`s too; it is
/// [`MachineName::is_hidden`] that decides whether one is ever materialised.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct MachineName(String);

impl MachineName {
    /// Validate and wrap a logical machine name.
    pub fn new(name: impl Into<String>) -> crate::errors::Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::config("machine name", "name cannot be empty"));
        }
        if name.contains(char::is_whitespace) {
            return Err(Error::config(
                "machine name",
                format!("'{name}' must not contain whitespace"),
            ));
        }
        Ok(Self(name))
    }

    /// `true` for entries starting with `.` or `x-`: never materialised,
    /// usable only as an `extends` source (§3).
    #[must_use]
    pub fn is_hidden(&self) -> bool {
        self.0.starts_with('.') || self.0.starts_with("x-")
    }

    /// Borrow the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MachineName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The provider-visible name for a machine: the cluster's canonical name
/// prepended with `-`, unless the descriptor is exactly `cluster.yml` (§3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct RealName(String);

impl RealName {
    /// Compute the real name of `machine` within `cluster_name`.
    ///
    /// `realName(P, N) = stem(P) + "-" + N` when the cluster has a name;
    /// otherwise `N` (Testable Properties §8).
    #[must_use]
    pub fn compute(cluster_name: &str, machine: &MachineName) -> Self {
        Self::compute_str(cluster_name, machine.as_str())
    }

    /// Same as [`Self::compute`], taking an already-validated logical name
    /// directly (used where the name came from a successfully parsed YAML
    /// map key and re-validating would be redundant).
    #[must_use]
    pub fn compute_str(cluster_name: &str, machine: &str) -> Self {
        if cluster_name.is_empty() {
            Self(machine.to_string())
        } else {
            Self(format!("{cluster_name}-{machine}"))
        }
    }

    /// Borrow the underlying string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The uppercase, `-`-to-`_` form used as a discovery-cache key prefix
    /// (§4.4): `MACHINERY_<CLUSTER>_<MACHINE>_`.
    #[must_use]
    pub fn env_fragment(&self) -> String {
        self.0.to_uppercase().replace('-', "_")
    }
}

impl fmt::Display for RealName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The canonical name of a cluster derived from its descriptor path (§3):
/// the filename stem, or empty when the stem is exactly `cluster`.
#[must_use]
pub fn cluster_name(descriptor: &std::path::Path) -> String {
    let stem = descriptor
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    if stem == "cluster" {
        String::new()
    } else {
        stem.to_string()
    }
}

/// Transport protocol for a port forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP.
    Tcp,
    /// UDP.
    Udp,
}

impl Default for Protocol {
    fn default() -> Self {
        Self::Tcp
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

/// A host-port-to-guest-port forward (virtualbox-only per §4.10).
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PortForward {
    /// Port opened on the host.
    #[serde(rename = "hostPort")]
    pub host_port: u16,
    /// Port inside the guest.
    #[serde(rename = "guestPort")]
    pub guest_port: u16,
    /// Protocol, defaults to tcp.
    #[serde(default)]
    pub protocol: Protocol,
}

impl PortForward {
    /// The merge-identity key for `extends` list de-duplication (§4.1):
    /// port entries are keyed by `hostPort` + `protocol`.
    #[must_use]
    pub fn merge_key(&self) -> (u16, Protocol) {
        (self.host_port, self.protocol)
    }
}

/// Share backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShareType {
    /// VirtualBox shared folder.
    Vboxsf,
    /// rsync-backed mirrored directory.
    Rsync,
}

/// Check a glob `pattern` against `candidates`, returning `true` on any
/// match. Used by the orchestrator to select the victim machine set (§4.11).
#[must_use]
pub fn glob_matches_any(pattern: &str, candidates: &[&str]) -> bool {
    let Ok(compiled) = glob::Pattern::new(pattern) else {
        return candidates.iter().any(|c| *c == pattern);
    };
    candidates.iter().any(|c| compiled.matches(c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn real_name_canonicalisation() {
        let m = MachineName::new("db").unwrap();
        assert_eq!(RealName::compute("mycluster", &m).as_str(), "mycluster-db");
        assert_eq!(RealName::compute("", &m).as_str(), "db");
    }

    #[test]
    fn cluster_name_from_descriptor() {
        assert_eq!(
            cluster_name(std::path::Path::new("mycluster.yml")),
            "mycluster"
        );
        assert_eq!(cluster_name(std::path::Path::new("cluster.yml")), "");
    }

    #[test]
    fn hidden_machine_detection() {
        assert!(MachineName::new(".base").unwrap().is_hidden());
        assert!(MachineName::new("x-common").unwrap().is_hidden());
        assert!(!MachineName::new("db").unwrap().is_hidden());
    }

    #[test]
    fn env_fragment_uppercases_and_replaces_dashes() {
        let m = MachineName::new("test").unwrap();
        let real = RealName::compute("test", &m);
        assert_eq!(real.as_str(), "test-test");
        assert_eq!(real.env_fragment(), "TEST_TEST");
    }

    #[test]
    fn port_forward_merge_key() {
        let a = PortForward {
            host_port: 8080,
            guest_port: 80,
            protocol: Protocol::Tcp,
        };
        let b = PortForward {
            host_port: 8080,
            guest_port: 81,
            protocol: Protocol::Tcp,
        };
        assert_eq!(a.merge_key(), b.merge_key());
    }

    #[test]
    fn glob_pattern_matching() {
        assert!(glob_matches_any("db*", &["db-1", "web-1"]));
        assert!(!glob_matches_any("cache*", &["db-1", "web-1"]));
        assert!(glob_matches_any("*", &["anything"]));
    }
}
