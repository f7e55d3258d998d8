//! Compose Linearizer: recursively expands `extends` across v2/v3 Compose
//! files into one self-contained document (§4.2).
//!
//! Reuses the YAML model's merge primitive so list-identity rules stay a
//! single source of truth (Design Note §9), but Compose's `extends` is
//! per-service and cross-file, unlike the cluster descriptor's per-machine,
//! same-file `extends`.

use crate::errors::{Error, Result};
use crate::model;
use serde_yaml_ng::{Mapping, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const MAX_RECURSION_DEPTH: usize = 10;

/// Keys a Compose service does **not** inherit from an `extends` parent
/// (§4.2): `links`, `volumes_from`, `depends_on`, `net` describe
/// relationships to sibling services, which don't carry across files, and
/// `extends` itself is consumed during linearisation.
const NON_INHERITED_KEYS: &[&str] = &["extends", "links", "volumes_from", "depends_on", "net"];

fn load_yaml(path: &Path) -> Result<Value> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(format!("read {}", path.display()), e))?;
    serde_yaml_ng::from_str(&text).map_err(|e| Error::yaml(path.display().to_string(), e))
}

struct ServiceRef {
    file: PathBuf,
    service: String,
}

fn parse_extends(value: &Value, current_file: &Path) -> Result<Option<ServiceRef>> {
    let Some(Value::Mapping(extends)) = value.get("extends") else {
        return Ok(None);
    };
    let service = extends
        .get("service")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::config("compose extends", "missing 'service'"))?
        .to_string();
    let file = match extends.get("file").and_then(Value::as_str) {
        Some(rel) => current_file
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(rel),
        None => current_file.to_path_buf(),
    };
    Ok(Some(ServiceRef { file, service }))
}

fn resolve_service(
    file: &Path,
    service_name: &str,
    visited: &mut Vec<(PathBuf, String)>,
    depth: usize,
) -> Result<Value> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(Error::config(
            "compose extends",
            format!("maximum extends depth (10) exceeded at '{service_name}'"),
        ));
    }
    let canonical = (file.canonicalize().unwrap_or_else(|_| file.to_path_buf()), service_name.to_string());
    if visited.contains(&canonical) {
        return Err(Error::config(
            "compose extends",
            format!("extends cycle at '{service_name}' in {}", file.display()),
        ));
    }

    let doc = load_yaml(file)?;
    let services = doc
        .get("services")
        .and_then(Value::as_mapping)
        .cloned()
        .unwrap_or_default();
    let own = services
        .get(Value::String(service_name.to_string()))
        .cloned()
        .ok_or_else(|| {
            Error::config(
                "compose extends",
                format!("unknown service '{service_name}' in {}", file.display()),
            )
        })?;

    let parent_ref = parse_extends(&own, file)?;

    visited.push(canonical);
    let resolved = match parent_ref {
        Some(parent) => {
            let parent_resolved = resolve_service(&parent.file, &parent.service, visited, depth + 1)?;
            let parent_filtered = strip_non_inherited(&parent_resolved);
            model::merge_values(&parent_filtered, &own, None)
        }
        None => own,
    };
    visited.pop();

    Ok(resolved)
}

fn strip_non_inherited(value: &Value) -> Value {
    let Value::Mapping(map) = value else {
        return value.clone();
    };
    let mut filtered = Mapping::new();
    for (k, v) in map {
        if let Some(key_str) = k.as_str() {
            if NON_INHERITED_KEYS.contains(&key_str) {
                continue;
            }
        }
        filtered.insert(k.clone(), v.clone());
    }
    Value::Mapping(filtered)
}

/// Expand all `extends` under `services` in the Compose document at `path`,
/// returning a self-contained document with the same `version`, services in
/// source order, and no `extends` key anywhere.
pub fn linearise(path: &Path) -> Result<Value> {
    let doc = load_yaml(path)?;
    let Value::Mapping(root) = &doc else {
        return Err(Error::config(path.display().to_string(), "compose root must be a mapping"));
    };

    let mut output = Mapping::new();
    if let Some(version) = root.get("version") {
        output.insert(Value::String("version".to_string()), version.clone());
    }

    let mut resolved_services = Mapping::new();
    if let Some(Value::Mapping(services)) = root.get("services") {
        for key in services.keys() {
            let Value::String(name) = key else { continue };
            let mut visited = Vec::new();
            let resolved = resolve_service(path, name, &mut visited, 0)?;
            let resolved = strip_non_inherited(&resolved);
            resolved_services.insert(Value::String(name.clone()), resolved);
        }
    }
    output.insert(Value::String("services".to_string()), Value::Mapping(resolved_services));

    for (key, value) in root {
        if let Some(key_str) = key.as_str() {
            if key_str == "version" || key_str == "services" {
                continue;
            }
            output.insert(key.clone(), value.clone());
        }
    }

    Ok(Value::Mapping(output))
}

/// `true` iff `path`, when relinearised from its own output, produces the
/// byte-identical document (Testable Properties §8: linearizer fixpoint).
pub fn is_fixpoint(path: &Path, tmp_dir: &Path) -> Result<bool> {
    let once = linearise(path)?;
    let once_path = tmp_dir.join("linearised-once.yml");
    std::fs::write(&once_path, serde_yaml_ng::to_string(&once).map_err(|e| Error::yaml("fixpoint", e))?)
        .map_err(|e| Error::io("write fixpoint intermediate", e))?;
    let twice = linearise(&once_path)?;
    Ok(once == twice)
}

/// Collect the set of service names that still reference `extends`
/// (used by tests and callers who want to assert the output contract).
#[must_use]
pub fn services_with_extends(doc: &Value) -> HashSet<String> {
    let mut out = HashSet::new();
    if let Some(Value::Mapping(services)) = doc.get("services") {
        for (name, svc) in services {
            if svc.get("extends").is_some() {
                if let Some(n) = name.as_str() {
                    out.insert(n.to_string());
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn linearises_cross_file_extends_and_drops_non_inherited_keys() {
        let dir = tempfile::tempdir().unwrap();
        write_temp(
            dir.path(),
            "common.yml",
            "version: '2'\nservices:\n  common:\n    labels:\n      se.sics.copyright: Emmanuel Frecon\n      se.sics.organisation: RISE SICS\n    cpu_shares: 5\n  webapp:\n    extends:\n      service: common\n    labels:\n      se.sics.application: Web\n    image: nginx\n    ports: [\"8000:8000\"]\n    volumes: [\"/data\"]\n    environment: [\"TEST=34\"]\n",
        );
        let main = write_temp(
            dir.path(),
            "main.yml",
            "version: '3'\nservices:\n  web:\n    extends:\n      file: common.yml\n      service: webapp\n    environment: [\"TEST=34\", \"DEBUG=1\"]\n  important_web:\n    extends:\n      file: common.yml\n      service: webapp\n    cpu_shares: 10\n    environment: [\"TEST=34\", \"DEBUG=1\"]\n",
        );

        let output = linearise(&main).unwrap();
        assert!(services_with_extends(&output).is_empty());

        let web = output.get("services").unwrap().get("web").unwrap();
        assert_eq!(web.get("image").unwrap().as_str(), Some("nginx"));
        assert_eq!(web.get("cpu_shares").unwrap().as_u64(), Some(5));
        assert_eq!(
            web.get("labels").unwrap().get("se.sics.application").unwrap().as_str(),
            Some("Web")
        );

        let important = output.get("services").unwrap().get("important_web").unwrap();
        assert_eq!(important.get("cpu_shares").unwrap().as_u64(), Some(10));
    }

    #[test]
    fn linearise_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write_temp(
            dir.path(),
            "base.yml",
            "version: '2'\nservices:\n  base:\n    image: alpine\n",
        );
        let main = write_temp(
            dir.path(),
            "main.yml",
            "version: '2'\nservices:\n  app:\n    extends:\n      file: base.yml\n      service: base\n",
        );
        assert!(is_fixpoint(&main, dir.path()).unwrap());
    }
}
