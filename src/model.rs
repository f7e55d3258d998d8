//! The cluster YAML model: descriptor parsing, `include`/`extends`
//! resolution, and the typed `Cluster`/`Machine`/`Network` view over it.
//!
//! Merging operates on a `serde_yaml_ng::Value` tree before any typed
//! deserialization happens, mirroring the two-pass parse-then-validate shape
//! the pack's Compose-file readers use: resolve structure first, then let
//! `serde` validate the result.

use crate::errors::{Error, Result};
use crate::types::{PortForward, RealName, ShareType};
use serde::{Deserialize, Serialize};
use serde_yaml_ng::{Mapping, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const MAX_RECURSION_DEPTH: usize = 10;

/// Parse a size string with optional SI (`K`/`M`/`G`/`T`, powers of 1000) or
/// IEC (`Ki`/`Mi`/`Gi`/`Ti`, optional trailing `B`, powers of 1024) suffix,
/// case-insensitive. A bare number is interpreted in `default_unit`.
pub fn parse_size(input: &str, default_unit: SizeDefault) -> Result<u64> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(Error::config("size", "empty value"));
    }

    let digit_end = trimmed
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(trimmed.len());
    let (number_part, suffix) = trimmed.split_at(digit_end);
    let number: f64 = number_part
        .parse()
        .map_err(|_| Error::config("size", format!("invalid number in '{input}'")))?;

    let suffix_norm = suffix.trim();
    let multiplier = if suffix_norm.is_empty() {
        default_unit.bytes_per_unit()
    } else {
        size_multiplier(suffix_norm)
            .ok_or_else(|| Error::config("size", format!("unknown size suffix '{suffix}' in '{input}'")))?
    };

    Ok((number * multiplier as f64).round() as u64)
}

/// Default unit applied to a bare (suffix-less) number (§4.1: memory
/// defaults to MiB, disk size defaults to MB).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeDefault {
    /// Bare numbers mean mebibytes.
    MebibytesDefault,
    /// Bare numbers mean megabytes.
    MegabytesDefault,
    /// Bare numbers mean bytes.
    BytesDefault,
}

impl SizeDefault {
    fn bytes_per_unit(self) -> u64 {
        match self {
            Self::MebibytesDefault => 1024 * 1024,
            Self::MegabytesDefault => 1_000_000,
            Self::BytesDefault => 1,
        }
    }
}

fn size_multiplier(suffix: &str) -> Option<u64> {
    let lower = suffix.to_ascii_lowercase();
    let lower = lower.strip_suffix('b').unwrap_or(&lower);
    Some(match lower {
        "k" => 1_000,
        "m" => 1_000_000,
        "g" => 1_000_000_000,
        "t" => 1_000_000_000_000,
        "ki" => 1024,
        "mi" => 1024 * 1024,
        "gi" => 1024 * 1024 * 1024,
        "ti" => 1024 * 1024 * 1024 * 1024,
        _ => return None,
    })
}

/// Coerce `yes/no/on/off/true/false/1/0` (case-insensitive) into a `bool`.
pub fn parse_bool(input: &str) -> Result<bool> {
    match input.trim().to_ascii_lowercase().as_str() {
        "yes" | "on" | "true" | "1" => Ok(true),
        "no" | "off" | "false" | "0" => Ok(false),
        other => Err(Error::config("bool", format!("not a boolean: '{other}'"))),
    }
}

/// Merge `overlay` over `base`: recursive for mappings, replace for
/// scalars, append-unique-by-key for sequences when `key` names the
/// sequence's semantic identity field (§4.1). `key` is looked up by the
/// mapping key under which this value sits; pass `None` at the root.
pub(crate) fn merge_values(base: &Value, overlay: &Value, key: Option<&str>) -> Value {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            let mut result = Mapping::new();
            for (k, v) in base_map {
                result.insert(k.clone(), v.clone());
            }
            for (k, overlay_v) in overlay_map {
                let key_str = k.as_str();
                let merged = match result.get(k) {
                    Some(base_v) => merge_values(base_v, overlay_v, key_str),
                    None => overlay_v.clone(),
                };
                result.insert(k.clone(), merged);
            }
            Value::Mapping(result)
        }
        (Value::Sequence(base_seq), Value::Sequence(overlay_seq)) => {
            Value::Sequence(merge_sequences(base_seq, overlay_seq, key))
        }
        // Scalars, and any mismatched-shape pair: overlay replaces base.
        (_, overlay) => overlay.clone(),
    }
}

/// The field name inside a *mapping* list entry that forms its merge
/// identity, per the field this list sits under (§4.1, §4.2). Compose's
/// `environment`/`volumes` lists are usually plain strings rather than
/// mappings; those are keyed by [`scalar_identity`] instead.
fn identity_field(list_key: Option<&str>) -> Option<(&'static str, Option<&'static str>)> {
    match list_key {
        Some("ports") => Some(("hostPort", Some("protocol"))),
        Some("shares") => Some(("guestPath", None)),
        Some("files") => Some(("destination", None)),
        Some("images") => Some(("image", None)),
        Some("compose") => Some(("file", None)),
        Some("prelude") | Some("addendum") => Some(("exec", Some("args"))),
        // Compose long-syntax volume entries are mappings with `target`.
        Some("volumes") => Some(("target", None)),
        _ => None,
    }
}

/// `true` if this list is merged by identity even when its entries are
/// plain scalars rather than mappings (Compose's `environment`/`volumes`,
/// §4.2).
fn has_scalar_identity(list_key: Option<&str>) -> bool {
    matches!(list_key, Some("environment") | Some("volumes"))
}

/// Identity key for a scalar (string) list entry: the variable name for
/// `KEY=VALUE` environment entries, the container-side path for bind-mount
/// strings (`host:container[:mode]` or a bare `container_path`).
fn scalar_identity(list_key: Option<&str>, entry: &str) -> Option<String> {
    match list_key {
        Some("environment") => Some(entry.split('=').next().unwrap_or(entry).to_string()),
        Some("volumes") => {
            let parts: Vec<&str> = entry.split(':').collect();
            Some(match parts.as_slice() {
                [] => String::new(),
                [only] => (*only).to_string(),
                [_, container, ..] => (*container).to_string(),
            })
        }
        _ => None,
    }
}

fn sequence_identity(entry: &Value, field: &str, secondary: Option<&str>) -> Option<String> {
    let Value::Mapping(map) = entry else {
        return Some(format!("{entry:?}"));
    };
    let primary = map.get(field)?;
    let mut key = format!("{primary:?}");
    if let Some(secondary_field) = secondary {
        if let Some(secondary_value) = map.get(secondary_field) {
            key.push('\u{0}');
            key.push_str(&format!("{secondary_value:?}"));
        }
    }
    Some(key)
}

/// The merge-identity key for any list entry, dispatching on its shape:
/// scalars use [`scalar_identity`], mappings use the field named by
/// [`identity_field`].
fn entry_identity(
    entry: &Value,
    list_key: Option<&str>,
    field_identity: Option<(&'static str, Option<&'static str>)>,
) -> Option<String> {
    match entry {
        Value::String(s) => scalar_identity(list_key, s),
        Value::Mapping(_) => {
            let (field, secondary) = field_identity?;
            sequence_identity(entry, field, secondary)
        }
        _ => None,
    }
}

fn merge_sequences(base: &[Value], overlay: &[Value], list_key: Option<&str>) -> Vec<Value> {
    let field_identity = identity_field(list_key);
    if field_identity.is_none() && !has_scalar_identity(list_key) {
        // No known identity key for this list: overlay fully replaces base,
        // matching "replace for scalars" when no structural key applies.
        return overlay.to_vec();
    }

    let mut result: Vec<Value> = base.to_vec();
    let mut index_by_key: HashMap<String, usize> = HashMap::new();
    for (i, entry) in result.iter().enumerate() {
        if let Some(key) = entry_identity(entry, list_key, field_identity) {
            index_by_key.insert(key, i);
        }
    }

    for entry in overlay {
        match entry_identity(entry, list_key, field_identity) {
            Some(key) => {
                if let Some(&i) = index_by_key.get(&key) {
                    result[i] = merge_values(&result[i], entry, None);
                } else {
                    index_by_key.insert(key, result.len());
                    result.push(entry.clone());
                }
            }
            None => result.push(entry.clone()),
        }
    }
    result
}

/// Load a YAML document from `path`.
fn load_yaml(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(format!("read {}", path.display()), e))?;
    serde_yaml_ng::from_str(&text).map_err(|e| Error::yaml(path.display().to_string(), e))
}

/// Resolve `include:` directives in `doc` (loaded from `base_dir`),
/// depth-bounded at 10 with a visited-path cycle guard (§4.1).
fn resolve_includes(doc: Value, base_dir: &Path, visited: &mut Vec<PathBuf>, depth: usize) -> Result<Value> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(Error::config("include", "maximum include depth (10) exceeded"));
    }

    let Value::Mapping(mut map) = doc else {
        return Ok(doc);
    };

    let includes = map.remove("include");
    let mut merged = Value::Mapping(Mapping::new());

    if let Some(Value::Sequence(paths)) = includes {
        for entry in paths {
            let Value::String(rel) = entry else {
                return Err(Error::config("include", "include entries must be strings"));
            };
            let resolved = base_dir.join(&rel);
            let canonical = resolved.canonicalize().unwrap_or(resolved.clone());
            if visited.contains(&canonical) {
                return Err(Error::config("include", format!("cycle including '{rel}'")));
            }
            visited.push(canonical.clone());
            let included_doc = load_yaml(&resolved)?;
            let included_dir = resolved.parent().unwrap_or(base_dir).to_path_buf();
            let included = resolve_includes(included_doc, &included_dir, visited, depth + 1)?;
            merged = merge_values(&merged, &included, None);
            visited.pop();
        }
    }

    merged = merge_values(&merged, &Value::Mapping(map), None);
    Ok(merged)
}

/// Resolve `extends:` for a single machine entry named `name` within the
/// fully-included document `all_machines`, recursively merging parents
/// before layering the machine's own keys on top (§4.1).
fn resolve_extends(
    name: &str,
    all_machines: &Mapping,
    visited: &mut Vec<String>,
    depth: usize,
) -> Result<Value> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(Error::config("extends", format!("maximum extends depth (10) exceeded at '{name}'")));
    }
    if visited.contains(&name.to_string()) {
        return Err(Error::config("extends", format!("extends cycle at '{name}'")));
    }

    let own = all_machines
        .get(Value::String(name.to_string()))
        .cloned()
        .ok_or_else(|| Error::config("extends", format!("unknown machine '{name}'")))?;

    let Value::Mapping(mut own_map) = own else {
        return Ok(Value::Mapping(Mapping::new()));
    };

    let parents = own_map.remove("extends");
    let parent_names: Vec<String> = match parents {
        Some(Value::String(s)) => vec![s],
        Some(Value::Sequence(seq)) => seq
            .into_iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        None => Vec::new(),
        Some(_) => {
            return Err(Error::config("extends", format!("'{name}' has a malformed extends value")));
        }
    };

    visited.push(name.to_string());
    let mut resolved = Value::Mapping(Mapping::new());
    for parent in &parent_names {
        let parent_resolved = resolve_extends(parent, all_machines, visited, depth + 1)?;
        resolved = merge_values(&resolved, &parent_resolved, None);
    }
    visited.pop();

    resolved = merge_values(&resolved, &Value::Mapping(own_map), None);
    Ok(resolved)
}

/// Resolve `memory`/`size` to bare byte counts before typed deserialization
/// (§4.1 suffix grammar): `memory` defaults bare numbers to MiB, `size` to
/// MB. String values (`"2GiB"`, `"40G"`) and bare numbers are both accepted;
/// a `Number` memory/size value is left untouched.
fn normalise_sizes(value: Value, machine_name: &str) -> Result<Value> {
    let Value::Mapping(mut map) = value else {
        return Ok(value);
    };
    for (field, default_unit) in [
        ("memory", SizeDefault::MebibytesDefault),
        ("size", SizeDefault::MegabytesDefault),
    ] {
        if let Some(Value::String(raw)) = map.get(field).cloned() {
            let bytes = parse_size(&raw, default_unit)
                .map_err(|e| Error::config(format!("machine '{machine_name}'"), format!("{field}: {e}")))?;
            map.insert(Value::String(field.to_string()), Value::Number(bytes.into()));
        }
    }
    Ok(Value::Mapping(map))
}

/// A host-to-guest directory share (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Share {
    /// Path on the host.
    #[serde(rename = "hostPath")]
    pub host_path: String,
    /// Absolute path inside the guest.
    #[serde(rename = "guestPath")]
    pub guest_path: String,
    /// Backend.
    #[serde(rename = "type", default = "default_share_type")]
    pub share_type: ShareType,
}

fn default_share_type() -> ShareType {
    ShareType::Vboxsf
}

/// A file-copy entry (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileCopy {
    /// Source path on the host.
    pub source: String,
    /// Absolute destination path on the guest.
    pub destination: String,
    /// Optional octal mode string, e.g. `"0644"`.
    #[serde(default)]
    pub mode: Option<String>,
    /// Optional owner.
    #[serde(default)]
    pub owner: Option<String>,
    /// Optional group.
    #[serde(default)]
    pub group: Option<String>,
}

/// A registry login entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registry {
    /// Registry server host.
    pub server: String,
    /// Login username.
    pub username: String,
    /// Login password.
    pub password: String,
    /// Account email, if required by the registry.
    #[serde(default)]
    pub email: Option<String>,
}

/// A prelude/addendum script entry (§4.9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    /// Path to the script, local or already-remote.
    pub exec: String,
    /// Arguments passed to the script.
    #[serde(default)]
    pub args: Vec<String>,
    /// Run via `sudo` on the guest.
    #[serde(default)]
    pub sudo: bool,
    /// `true` if the script runs on the guest rather than the host.
    #[serde(default = "default_true")]
    pub remote: bool,
    /// `true` if `exec` must be copied to the guest before running.
    #[serde(default = "default_true")]
    pub copy: bool,
    /// Environment substitution scope name (`text`, `args`, `both`, `none`).
    #[serde(default = "default_substitution_scope")]
    pub substitution: String,
}

fn default_substitution_scope() -> String {
    "both".to_string()
}

/// A machine entry as declared in the descriptor (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    /// Logical name (not serialized; carried alongside the map key).
    #[serde(skip)]
    pub name: String,
    /// Extra names this machine answers to for pattern matching.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Provisioner driver, e.g. `virtualbox`.
    #[serde(default)]
    pub driver: Option<String>,
    /// Swarm manager flag.
    #[serde(default)]
    pub master: bool,
    /// Whether this machine participates in swarm at all.
    #[serde(default = "default_true")]
    pub swarm: bool,
    /// CPU count.
    #[serde(default)]
    pub cpu: Option<u32>,
    /// Memory size, already resolved to bytes by [`parse_size`].
    #[serde(default)]
    pub memory: Option<u64>,
    /// Disk size, already resolved to bytes by [`parse_size`].
    #[serde(default)]
    pub size: Option<u64>,
    /// Arbitrary string labels.
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Driver-specific options.
    #[serde(default)]
    pub options: HashMap<String, Value>,
    /// Port forwards (virtualbox-only).
    #[serde(default)]
    pub ports: Vec<PortForward>,
    /// Host/guest directory shares.
    #[serde(default)]
    pub shares: Vec<Share>,
    /// Images to pre-seed before compose-up.
    #[serde(default)]
    pub images: Vec<String>,
    /// Registry logins to perform before file copies.
    #[serde(default)]
    pub registries: Vec<Registry>,
    /// Compose files to run on this machine.
    #[serde(default)]
    pub compose: Vec<String>,
    /// Scripts run before compose.
    #[serde(default)]
    pub prelude: Vec<Script>,
    /// Scripts run after compose.
    #[serde(default)]
    pub addendum: Vec<Script>,
    /// File copies to perform before prelude.
    #[serde(default)]
    pub files: Vec<FileCopy>,
    /// Name(s) this entry extends.
    #[serde(default)]
    pub extends: Option<Value>,
}

fn default_true() -> bool {
    true
}

impl Machine {
    /// `true` for entries starting with `.` or `x-`: templates, never
    /// materialised.
    #[must_use]
    pub fn is_hidden(&self) -> bool {
        self.name.starts_with('.') || self.name.starts_with("x-")
    }
}

/// A v2 network declaration (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    /// Network name.
    #[serde(skip)]
    pub name: String,
    /// Network driver.
    #[serde(default)]
    pub driver: Option<String>,
    /// Driver options.
    #[serde(default)]
    pub options: HashMap<String, String>,
    /// Whether containers outside the stack may attach.
    #[serde(default)]
    pub attachable: bool,
    /// `true` if this network already exists and should not be created.
    #[serde(default)]
    pub external: bool,
}

/// The fully parsed, `include`/`extends`-resolved cluster (§3).
#[derive(Debug, Clone)]
pub struct Cluster {
    /// Canonical name derived from the descriptor path.
    pub name: String,
    /// YAML schema version: 1 (flat) or 2 (`machines:`/`networks:`).
    pub version: u8,
    /// Non-hidden machines, keyed by logical name.
    pub machines: HashMap<String, Machine>,
    /// Declared networks (v2 only).
    pub networks: HashMap<String, Network>,
}

impl Cluster {
    /// Parse, include-resolve, and extends-resolve the descriptor at
    /// `path`, producing a typed, validated cluster.
    pub fn load(path: &Path) -> Result<Self> {
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let raw = load_yaml(path)?;
        let mut visited = vec![path.canonicalize().unwrap_or_else(|_| path.to_path_buf())];
        let included = resolve_includes(raw, base_dir, &mut visited, 0)?;

        let Value::Mapping(doc) = included else {
            return Err(Error::config(path.display().to_string(), "descriptor root must be a mapping"));
        };

        let version = match doc.get("version") {
            Some(Value::Number(n)) => n.as_u64().unwrap_or(1) as u8,
            Some(Value::String(s)) => s.parse().unwrap_or(1),
            _ => 1,
        };

        let machines_map = if version >= 2 {
            match doc.get("machines") {
                Some(Value::Mapping(m)) => m.clone(),
                Some(_) => return Err(Error::config(path.display().to_string(), "'machines' must be a mapping")),
                None => Mapping::new(),
            }
        } else {
            let mut m = doc.clone();
            m.remove("version");
            m.remove("networks");
            m
        };

        let mut machines = HashMap::new();
        let mut master_count = 0usize;
        for key in machines_map.keys() {
            let Value::String(name) = key else { continue };
            if name.starts_with('.') || name.starts_with("x-") {
                continue; // hidden: retained only as an extends source
            }
            let mut visited_extends = Vec::new();
            let resolved = resolve_extends(name, &machines_map, &mut visited_extends, 0)?;
            let resolved = normalise_sizes(resolved, name)?;
            let mut machine: Machine = serde_yaml_ng::from_value(resolved)
                .map_err(|e| Error::yaml(format!("machine '{name}'"), e))?;
            machine.name = name.clone();
            if machine.master {
                master_count += 1;
            }
            machines.insert(name.clone(), machine);
        }

        if version < 2 && master_count > 1 {
            return Err(Error::config(
                path.display().to_string(),
                "multiple masters declared under v1 (Docker Swarm classic) are not allowed",
            ));
        }

        let mut networks = HashMap::new();
        if version >= 2 {
            if let Some(Value::Mapping(nets)) = doc.get("networks") {
                for (key, value) in nets {
                    let Value::String(name) = key else { continue };
                    let mut network: Network = serde_yaml_ng::from_value(value.clone())
                        .map_err(|e| Error::yaml(format!("network '{name}'"), e))?;
                    network.name = name.clone();
                    networks.insert(name.clone(), network);
                }
            }
        }

        let name = crate::types::cluster_name(path);
        Ok(Self {
            name,
            version,
            machines,
            networks,
        })
    }

    /// The real (provider-visible) name for a machine declared in this
    /// cluster.
    #[must_use]
    pub fn real_name(&self, machine: &str) -> RealName {
        RealName::compute_str(&self.name, machine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn si_and_iec_suffixes_parse_correctly() {
        assert_eq!(
            parse_size("2GiB", SizeDefault::MebibytesDefault).unwrap(),
            2 * 1024 * 1024 * 1024
        );
        assert_eq!(
            parse_size("40G", SizeDefault::MegabytesDefault).unwrap(),
            40_000_000_000
        );
    }

    #[test]
    fn bare_number_uses_default_unit() {
        assert_eq!(
            parse_size("512", SizeDefault::MebibytesDefault).unwrap(),
            512 * 1024 * 1024
        );
    }

    #[test]
    fn bool_coercion_accepts_all_documented_spellings() {
        for v in ["yes", "on", "true", "1"] {
            assert!(parse_bool(v).unwrap());
        }
        for v in ["no", "off", "false", "0"] {
            assert!(!parse_bool(v).unwrap());
        }
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn merge_replaces_scalars_and_unions_mappings() {
        let base: Value = serde_yaml_ng::from_str("a: 1\nb: 2\n").unwrap();
        let overlay: Value = serde_yaml_ng::from_str("b: 3\nc: 4\n").unwrap();
        let merged = merge_values(&base, &overlay, None);
        let expected: Value = serde_yaml_ng::from_str("a: 1\nb: 3\nc: 4\n").unwrap();
        assert_eq!(merged, expected);
    }

    #[test]
    fn merge_is_idempotent() {
        let base: Value = serde_yaml_ng::from_str("a: 1\nlist: [1, 2]\n").unwrap();
        let overlay: Value = serde_yaml_ng::from_str("a: 2\nlist: [3]\n").unwrap();
        let once = merge_values(&base, &overlay, None);
        let twice = merge_values(&once, &overlay, None);
        assert_eq!(once, twice);
    }

    #[test]
    fn environment_list_merges_by_variable_name_not_full_replace() {
        let base: Value = serde_yaml_ng::from_str("environment:\n  - FOO=1\n  - BAR=2\n").unwrap();
        let overlay: Value = serde_yaml_ng::from_str("environment:\n  - FOO=9\n").unwrap();
        let merged = merge_values(&base, &overlay, None);
        let Value::Sequence(env) = merged.get("environment").unwrap() else {
            panic!("expected sequence")
        };
        let values: Vec<&str> = env.iter().map(|v| v.as_str().unwrap()).collect();
        assert_eq!(values, vec!["FOO=9", "BAR=2"]);
    }

    #[test]
    fn volumes_list_merges_by_container_path() {
        let base: Value = serde_yaml_ng::from_str("volumes:\n  - /data\n").unwrap();
        let overlay: Value = serde_yaml_ng::from_str("volumes:\n  - /data:/data:ro\n  - /logs:/logs\n").unwrap();
        let merged = merge_values(&base, &overlay, None);
        let Value::Sequence(volumes) = merged.get("volumes").unwrap() else {
            panic!("expected sequence")
        };
        assert_eq!(volumes.len(), 2);
        assert_eq!(volumes[0].as_str(), Some("/data:/data:ro"));
    }

    #[test]
    fn machine_memory_accepts_suffixed_size_strings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cluster.yml");
        std::fs::write(
            &path,
            "version: '2'\nmachines:\n  db:\n    memory: 2GiB\n    size: 40G\n",
        )
        .unwrap();
        let cluster = Cluster::load(&path).unwrap();
        let db = &cluster.machines["db"];
        assert_eq!(db.memory, Some(2 * 1024 * 1024 * 1024));
        assert_eq!(db.size, Some(40_000_000_000));
    }

    #[test]
    fn ports_merge_by_host_port_and_protocol() {
        let base: Value = serde_yaml_ng::from_str(
            "ports:\n  - hostPort: 8080\n    guestPort: 80\n    protocol: tcp\n",
        )
        .unwrap();
        let overlay: Value = serde_yaml_ng::from_str(
            "ports:\n  - hostPort: 8080\n    guestPort: 8080\n    protocol: tcp\n  - hostPort: 53\n    guestPort: 53\n    protocol: udp\n",
        )
        .unwrap();
        let merged = merge_values(&base, &overlay, None);
        let Value::Sequence(ports) = merged.get("ports").unwrap() else {
            panic!("expected sequence")
        };
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].get("guestPort").unwrap().as_u64(), Some(8080));
    }
}
