//! Discovery Cache: the `.<R>.env` sidecar mapping machines to networking
//! info (§4.4), rewritten whole-file and atomically whenever a machine
//! reaches `running`.

use crate::errors::{Error, Result};
use crate::types::RealName;
use std::collections::BTreeMap;
use std::path::Path;

/// One network interface's addressing on a machine.
#[derive(Debug, Clone, Default)]
pub struct InterfaceRecord {
    /// IPv4 address, if any.
    pub inet4: Option<String>,
    /// IPv6 address, if any.
    pub inet6: Option<String>,
}

/// A machine's full discovery record: its main IPv4 plus per-interface
/// addressing (§3).
#[derive(Debug, Clone, Default)]
pub struct DiscoveryRecord {
    /// The machine's primary IPv4 address.
    pub main_ipv4: Option<String>,
    /// Interfaces keyed by name (e.g. `eth1`).
    pub interfaces: BTreeMap<String, InterfaceRecord>,
}

/// Render a `DiscoveryRecord` for `real_name` as `KEY=VALUE` lines, per the
/// pattern `MACHINERY_<CLUSTER>_<MACHINE>_<IFACE>_(INET|INET6)` and the
/// `..._IP` main-address scalar (Testable Properties §8).
#[must_use]
pub fn render_keys(real_name: &RealName, record: &DiscoveryRecord) -> BTreeMap<String, String> {
    let prefix = format!("MACHINERY_{}", real_name.env_fragment());
    let mut keys = BTreeMap::new();

    if let Some(ip) = &record.main_ipv4 {
        keys.insert(format!("{prefix}_IP"), ip.clone());
    }
    for (iface, info) in &record.interfaces {
        let iface_fragment = iface.to_uppercase().replace('-', "_");
        if let Some(v4) = &info.inet4 {
            keys.insert(format!("{prefix}_{iface_fragment}_INET"), v4.clone());
        }
        if let Some(v6) = &info.inet6 {
            keys.insert(format!("{prefix}_{iface_fragment}_INET6"), v6.clone());
        }
    }
    keys
}

/// The whole discovery cache for a cluster: one entry per machine, each
/// expanded into its `KEY=VALUE` lines on write.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryCache {
    entries: BTreeMap<String, String>,
}

impl DiscoveryCache {
    /// Load an existing cache from `path`, or start empty if it doesn't
    /// exist yet.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(format!("read {}", path.display()), e))?;
        let mut entries = BTreeMap::new();
        for line in text.lines() {
            if let Some((key, value)) = line.split_once('=') {
                entries.insert(key.to_string(), value.to_string());
            }
        }
        Ok(Self { entries })
    }

    /// Replace every key belonging to `real_name` with a fresh set derived
    /// from `record`; keys for other machines are left untouched.
    pub fn update_machine(&mut self, real_name: &RealName, record: &DiscoveryRecord) {
        let prefix = format!("MACHINERY_{}_", real_name.env_fragment());
        self.entries.retain(|k, _| !k.starts_with(&prefix));
        self.entries.extend(render_keys(real_name, record));
    }

    /// Look up a single key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// All entries, for handing to the Environment Substitutor as scope.
    #[must_use]
    pub fn as_map(&self) -> &BTreeMap<String, String> {
        &self.entries
    }

    /// Atomically rewrite the whole cache file at `path`: write to a temp
    /// file in the same directory, then rename over the target, so readers
    /// never observe a partial write (§5 Shared resources).
    pub fn write(&self, path: &Path) -> Result<()> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let tmp_name = format!(".{}.tmp", path.file_name().and_then(|n| n.to_str()).unwrap_or("env"));
        let tmp_path = dir.join(tmp_name);

        let mut contents = String::new();
        for (key, value) in &self.entries {
            contents.push_str(key);
            contents.push('=');
            contents.push_str(value);
            contents.push('\n');
        }

        std::fs::write(&tmp_path, contents).map_err(|e| Error::io(format!("write {}", tmp_path.display()), e))?;
        std::fs::rename(&tmp_path, path).map_err(|e| Error::io(format!("rename {}", tmp_path.display()), e))?;
        Ok(())
    }
}
