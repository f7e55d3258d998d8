//! The `ClusterContext`: the one value threaded through every component,
//! replacing the source's global "cluster" namespace (Design Note §9).

use crate::errors::{Error, Result};
use crate::executor::{Tool, ToolAdapter};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// CLI-level configuration, the Rust-native analogue of the teacher's
/// `ClientConfig`: tool path overrides, cache policy, ssh template, and
/// default timeouts. Loaded from an optional `-config` file, overridden by
/// environment variables, and finally by explicit CLI flags, in that order
/// (Design Note §9, lowest to highest precedence).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineryConfig {
    /// Override for the `docker` binary.
    pub docker_path: Option<PathBuf>,
    /// Override for the `docker-machine` binary.
    pub machine_path: Option<PathBuf>,
    /// Override for the `docker-compose` binary.
    pub compose_path: Option<PathBuf>,
    /// `ssh` connection template with `%user%`/`%host%`/`%identity%`/`%port%`
    /// placeholders.
    pub ssh_template: Option<String>,
    /// Image cache policy: `None` (off), `Some("-")` (localhost), or a named
    /// cache machine (§4.7).
    pub cache: Option<String>,
    /// Fixed cluster join token, bypassing the Token Store when set.
    pub token: Option<String>,
    /// Default driver name for `docker-machine create`.
    pub driver: Option<String>,
    /// `docker-machine --storage-path` override.
    pub storage_path: Option<PathBuf>,
    /// Per-tool command timeout, in seconds in the config file.
    #[serde(with = "timeout_secs")]
    pub timeout: Duration,
    /// Concurrency cap for per-machine fan-out (§5).
    pub max_concurrency: usize,
}

impl Default for MachineryConfig {
    fn default() -> Self {
        Self {
            docker_path: None,
            machine_path: None,
            compose_path: None,
            ssh_template: None,
            cache: None,
            token: None,
            driver: None,
            storage_path: None,
            timeout: Duration::from_secs(30),
            max_concurrency: 8,
        }
    }
}

mod timeout_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

impl MachineryConfig {
    /// Load a config file at `path` (YAML or JSON, both accepted since
    /// `serde_yaml_ng` parses strict JSON as a YAML subset), then overlay
    /// any `MACHINERY_*` environment variables found in `env` (§4.3
    /// ambient configuration note).
    pub fn load(path: Option<&Path>, env: &HashMap<String, String>) -> Result<Self> {
        let mut config = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|e| Error::io(format!("read {}", p.display()), e))?;
                serde_yaml_ng::from_str(&text).map_err(|e| Error::yaml(p.display().to_string(), e))?
            }
            None => Self::default(),
        };

        if let Some(driver) = env.get("MACHINERY_DRIVER") {
            config.driver = Some(driver.clone());
        }
        if let Some(cache) = env.get("MACHINERY_CACHE") {
            config.cache = Some(cache.clone());
        }
        if let Some(token) = env.get("MACHINERY_TOKEN") {
            config.token = Some(token.clone());
        }
        if let Some(ssh_template) = env.get("MACHINERY_SSH_TEMPLATE") {
            config.ssh_template = Some(ssh_template.clone());
        }
        if let Some(timeout) = env.get("MACHINERY_TIMEOUT_SECS") {
            if let Ok(secs) = timeout.parse() {
                config.timeout = Duration::from_secs(secs);
            }
        }

        Ok(config)
    }
}

/// Locations of a cluster's persisted state relative to its descriptor
/// directory (§6): `<R>.yml`, `.<R>.env`, `.<R>.tkn`, `.<R>.mch/`,
/// `.<R>.init/`.
#[derive(Debug, Clone)]
pub struct ClusterPaths {
    /// Directory containing the descriptor.
    pub root_dir: PathBuf,
    /// Descriptor root name `<R>` (filename without extension).
    pub root_name: String,
}

impl ClusterPaths {
    /// Derive paths from a descriptor file path.
    #[must_use]
    pub fn from_descriptor(descriptor: &Path) -> Self {
        let root_dir = descriptor
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let root_name = descriptor
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("cluster")
            .to_string();
        Self { root_dir, root_name }
    }

    /// The descriptor itself, `<R>.yml`.
    #[must_use]
    pub fn descriptor(&self) -> PathBuf {
        self.root_dir.join(format!("{}.yml", self.root_name))
    }

    /// The discovery cache sidecar, `.<R>.env`.
    #[must_use]
    pub fn discovery_cache(&self) -> PathBuf {
        self.root_dir.join(format!(".{}.env", self.root_name))
    }

    /// The token file, `.<R>.tkn`.
    #[must_use]
    pub fn token_file(&self) -> PathBuf {
        self.root_dir.join(format!(".{}.tkn", self.root_name))
    }

    /// The docker-machine storage path, `.<R>.mch/`.
    #[must_use]
    pub fn machine_storage(&self) -> PathBuf {
        self.root_dir.join(format!(".{}.mch", self.root_name))
    }

    /// The per-machine initialisation marker directory, `.<R>.init/`.
    #[must_use]
    pub fn init_dir(&self) -> PathBuf {
        self.root_dir.join(format!(".{}.init", self.root_name))
    }

    /// The initialisation marker for a specific machine: presence means
    /// initialised (§4.10, Design Note open question).
    #[must_use]
    pub fn init_marker(&self, real_name: &str) -> PathBuf {
        self.init_dir().join(real_name)
    }
}

/// The value threaded through every component instead of process-wide
/// singletons: resolved tool adapters, config, and persisted-state paths
/// for one cluster invocation.
#[derive(Debug, Clone)]
pub struct ClusterContext {
    /// CLI-level configuration.
    pub config: MachineryConfig,
    /// Persisted state paths for this cluster.
    pub paths: ClusterPaths,
    adapters: HashMap<&'static str, ToolAdapter>,
}

impl ClusterContext {
    /// Resolve tool adapters per `config` and build a context rooted at
    /// `descriptor`.
    pub fn new(descriptor: &Path, config: MachineryConfig) -> Result<Self> {
        let paths = ClusterPaths::from_descriptor(descriptor);

        let mut adapters = HashMap::new();
        adapters.insert(
            "docker",
            ToolAdapter::resolve(Tool::Docker, config.docker_path.as_deref())?
                .with_timeout(config.timeout),
        );
        adapters.insert(
            "docker-machine",
            ToolAdapter::resolve(Tool::DockerMachine, config.machine_path.as_deref())?
                .with_timeout(config.timeout),
        );
        adapters.insert(
            "docker-compose",
            ToolAdapter::resolve(Tool::DockerCompose, config.compose_path.as_deref())?
                .with_timeout(config.timeout),
        );
        adapters.insert(
            "VBoxManage",
            ToolAdapter::resolve(Tool::VBoxManage, None)?.with_timeout(config.timeout),
        );
        adapters.insert(
            "ssh",
            ToolAdapter::resolve(Tool::Ssh, None)?.with_timeout(config.timeout),
        );
        adapters.insert(
            "scp",
            ToolAdapter::resolve(Tool::Scp, None)?.with_timeout(config.timeout),
        );
        adapters.insert(
            "rsync",
            ToolAdapter::resolve(Tool::Rsync, None)?.with_timeout(config.timeout),
        );

        Ok(Self {
            config,
            paths,
            adapters,
        })
    }

    /// Build a context without resolving any tool binaries, for unit tests
    /// that never shell out.
    #[must_use]
    pub fn test_context(descriptor: &Path, config: MachineryConfig) -> Self {
        Self {
            config,
            paths: ClusterPaths::from_descriptor(descriptor),
            adapters: HashMap::new(),
        }
    }

    /// Fetch the adapter for `tool`, or inject one (used by `test_context`
    /// callers that need a specific adapter without a real binary).
    #[must_use]
    pub fn adapter(&self, name: &str) -> Option<&ToolAdapter> {
        self.adapters.get(name)
    }

    /// Fetch the adapter for `tool`, failing with an internal error if it
    /// was never resolved.
    pub fn require_adapter(&self, name: &'static str) -> Result<&ToolAdapter> {
        self.adapters
            .get(name)
            .ok_or_else(|| Error::Internal(format!("tool adapter '{name}' not resolved")))
    }

    /// Insert or replace an adapter, used by tests to substitute a stub.
    pub fn set_adapter(&mut self, name: &'static str, adapter: ToolAdapter) {
        self.adapters.insert(name, adapter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_paths_derive_from_descriptor_stem() {
        let paths = ClusterPaths::from_descriptor(Path::new("/srv/clusters/demo.yml"));
        assert_eq!(paths.root_name, "demo");
        assert_eq!(paths.descriptor(), PathBuf::from("/srv/clusters/demo.yml"));
        assert_eq!(
            paths.discovery_cache(),
            PathBuf::from("/srv/clusters/.demo.env")
        );
        assert_eq!(paths.token_file(), PathBuf::from("/srv/clusters/.demo.tkn"));
        assert_eq!(
            paths.init_marker("demo-db"),
            PathBuf::from("/srv/clusters/.demo.init/demo-db")
        );
    }

    #[test]
    fn cluster_named_cluster_yml_still_derives_paths() {
        let paths = ClusterPaths::from_descriptor(Path::new("cluster.yml"));
        assert_eq!(paths.root_name, "cluster");
        assert_eq!(paths.discovery_cache(), PathBuf::from(".cluster.env"));
    }

    #[test]
    fn config_loads_from_file_and_overlays_environment() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("machinery.yml");
        std::fs::write(&config_path, "driver: amazonec2\ncache: \"-\"\ntimeout: 45\n").unwrap();

        let env: HashMap<String, String> = [("MACHINERY_DRIVER".to_string(), "virtualbox".to_string())]
            .into_iter()
            .collect();

        let config = MachineryConfig::load(Some(&config_path), &env).unwrap();
        assert_eq!(config.driver, Some("virtualbox".to_string()));
        assert_eq!(config.cache, Some("-".to_string()));
        assert_eq!(config.timeout, Duration::from_secs(45));
    }

    #[test]
    fn config_defaults_when_no_file_or_environment_given() {
        let config = MachineryConfig::load(None, &HashMap::new()).unwrap();
        assert_eq!(config.max_concurrency, MachineryConfig::default().max_concurrency);
    }

    #[test]
    fn test_context_has_no_resolved_adapters() {
        let ctx = ClusterContext::test_context(Path::new("cluster.yml"), MachineryConfig::default());
        assert!(ctx.adapter("docker").is_none());
        assert!(ctx.require_adapter("docker").is_err());
    }
}
