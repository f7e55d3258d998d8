//! Machine Lifecycle: the per-machine state machine and its transitions
//! (§4.10).

use crate::context::ClusterContext;
use crate::discovery::{DiscoveryCache, DiscoveryRecord};
use crate::errors::{Error, Result};
use crate::image::{self, CachePolicy};
use crate::model::Machine as MachineSpec;
use crate::script;
use crate::transfer;
use crate::types::{RealName, ShareType};
use crate::utils::{backoff_delay, MAX_RETRY_ATTEMPTS};
use crate::{compose, share, version};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use uuid::Uuid;

/// A machine's position in its lifecycle (§3, §4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineState {
    /// Declared in YAML, not yet provisioned.
    Absent,
    /// Provisioner reports the machine exists and ssh is reachable.
    Created,
    /// Labels applied (often a create-time no-op verification).
    Tagged,
    /// Port forwards and share declarations registered.
    Configured,
    /// Registry logins, files, prelude, images, compose, addendum all done
    /// at least once.
    Initialised,
    /// Running and reachable.
    Running,
    /// Stopped; shares rsynced back if applicable.
    Stopped,
    /// Terminal: removed by the provisioner.
    Destroyed,
}

impl MachineState {
    /// `true` if moving to `next` from `self` is a legal transition per the
    /// state machine in §4.10 (forward progression, plus the
    /// running⇄stopped cycle and any→destroyed).
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use MachineState::{Absent, Configured, Created, Destroyed, Initialised, Running, Stopped, Tagged};
        matches!(
            (self, next),
            (Absent, Created)
                | (Created, Tagged)
                | (Tagged, Configured)
                | (Configured, Initialised)
                | (Initialised, Running)
                | (Running, Stopped)
                | (Stopped, Running)
                | (_, Destroyed)
        )
    }
}

/// Outcome of driving a machine's lifecycle forward.
#[derive(Debug, Clone)]
pub struct MachineOutcome {
    /// Final state reached.
    pub state: MachineState,
    /// Error that stopped progress, if the machine did not reach the
    /// requested target state.
    pub error: Option<String>,
}

/// Run `step` with retry-with-backoff on recoverable errors, up to
/// [`MAX_RETRY_ATTEMPTS`] (§4.10, §5).
pub async fn with_retry<F, Fut>(step: F) -> Result<()>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let mut last_err = None;
    for attempt in 1..=MAX_RETRY_ATTEMPTS {
        match step().await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_recoverable() => {
                last_err = Some(e);
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| Error::Internal("retry loop exited without a result".to_string())))
}

/// Translate `spec`'s `cpu`/`memory`/`size`/`labels` into the
/// driver-specific flags `docker-machine create` expects (§4.10 step 1):
/// `--{driver}-cpu-count`, `--{driver}-memory` (MiB), `--{driver}-disk-size`
/// (MB), and one `--engine-label k=v` per label. Falls back to forwarding
/// `spec.options` verbatim when no driver is named, since the flag prefix
/// is driver-specific.
#[must_use]
fn build_create_args(real_name: &RealName, spec: &MachineSpec) -> Vec<String> {
    let mut args = vec!["create".to_string()];

    if let Some(driver) = &spec.driver {
        args.extend(["--driver".to_string(), driver.clone()]);
        if let Some(cpu) = spec.cpu {
            args.push(format!("--{driver}-cpu-count"));
            args.push(cpu.to_string());
        }
        if let Some(memory) = spec.memory {
            args.push(format!("--{driver}-memory"));
            args.push((memory / (1024 * 1024)).to_string());
        }
        if let Some(size) = spec.size {
            args.push(format!("--{driver}-disk-size"));
            args.push((size / 1_000_000).to_string());
        }
    }

    for (key, value) in &spec.options {
        args.push(format!("--{key}"));
        if let Some(s) = value.as_str() {
            args.push(s.to_string());
        }
    }

    for (key, value) in &spec.labels {
        args.push("--engine-label".to_string());
        args.push(format!("{key}={value}"));
    }

    args.push(real_name.as_str().to_string());
    args
}

/// `absent → created`: provision via `docker-machine create`, upgrading
/// boot2docker when the reported host docker version is strictly lower
/// than the current machine's (§4.10 step 1).
pub async fn create(
    ctx: &ClusterContext,
    real_name: &RealName,
    spec: &MachineSpec,
    host_docker_version: &str,
    machine_docker_version: &str,
) -> Result<()> {
    let docker_machine = ctx.require_adapter("docker-machine")?;

    with_retry(|| async {
        let args = build_create_args(real_name, spec);
        docker_machine.run(&args).await.map(|_| ())
    })
    .await?;

    if version::is_strictly_lower(machine_docker_version, host_docker_version) {
        docker_machine
            .run(&["upgrade".to_string(), real_name.as_str().to_string()])
            .await?;
    }

    Ok(())
}

/// `created → tagged`: verify the engine labels applied at create time took
/// effect. `docker-machine` has no separate tagging command, so this is the
/// create-time no-op verification the state's doc comment describes.
pub async fn tag(ctx: &ClusterContext, real_name: &RealName, spec: &MachineSpec) -> Result<()> {
    if spec.labels.is_empty() {
        return Ok(());
    }
    let docker_machine = ctx.require_adapter("docker-machine")?;
    docker_machine
        .run(&["inspect".to_string(), real_name.as_str().to_string()])
        .await
        .map(|_| ())
}

/// `tagged → configured`: register port forwards (virtualbox only) and
/// vboxsf share declarations (§4.6, §4.10 step 3).
pub async fn configure(ctx: &ClusterContext, real_name: &RealName, spec: &MachineSpec) -> Result<()> {
    if spec.driver.as_deref() == Some("virtualbox") && !spec.ports.is_empty() {
        let vboxmanage = ctx.require_adapter("VBoxManage")?;
        for port in &spec.ports {
            let rule_name = format!("machinery-{}-{}", port.protocol, port.host_port);
            vboxmanage
                .run(&[
                    "controlvm".to_string(),
                    real_name.as_str().to_string(),
                    "natpf1".to_string(),
                    format!(
                        "{rule_name},{},,{},,{}",
                        port.protocol, port.host_port, port.guest_port
                    ),
                ])
                .await?;
        }
    }

    for sh in &spec.shares {
        if sh.share_type == ShareType::Vboxsf {
            share::register_vboxsf(ctx, real_name.as_str(), &spec.name, sh).await?;
        }
    }

    Ok(())
}

/// `configured → initialised`: registry logins, file copies, prelude
/// scripts, image pre-seeding, compose-up, and addendum scripts, in that
/// order (§4.10 step 4). Aborts on the first failing step.
pub async fn initialise(
    ctx: &ClusterContext,
    real_name: &RealName,
    spec: &MachineSpec,
    descriptor_dir: &Path,
    cache_policy: &CachePolicy,
    env: &HashMap<String, String>,
) -> Result<()> {
    let ip = machine_ip(ctx, real_name).await?;
    let docker_host = format!("tcp://{ip}:2376");

    for registry in &spec.registries {
        image::registry_login(ctx, Some(&docker_host), registry).await?;
    }

    let transfers = transfer::transfer_all(ctx, &ip, descriptor_dir, &spec.files, false).await;
    if let Some(failed) = transfers.iter().find(|t| !t.success) {
        return Err(Error::state(
            real_name.as_str().to_string(),
            format!(
                "file transfer to '{}' failed: {}",
                failed.destination,
                failed.error.clone().unwrap_or_default()
            ),
        ));
    }

    script::run_all(ctx, &ip, descriptor_dir, &spec.prelude, env).await?;

    for image_name in &spec.images {
        image::preseed(ctx, cache_policy, &docker_host, &spec.registries, image_name).await?;
    }

    for compose_file in &spec.compose {
        run_compose(ctx, real_name, descriptor_dir, compose_file, &docker_host).await?;
    }

    script::run_all(ctx, &ip, descriptor_dir, &spec.addendum, env).await?;

    mark_initialised(ctx, real_name)
}

/// Linearise `compose_file` (resolving any cross-file `extends`) and run
/// `docker-compose up -d` against it, targeting `docker_host` via the
/// `DOCKER_HOST` environment variable docker-compose itself honours.
async fn run_compose(
    ctx: &ClusterContext,
    real_name: &RealName,
    descriptor_dir: &Path,
    compose_file: &str,
    docker_host: &str,
) -> Result<()> {
    let source = descriptor_dir.join(compose_file);
    let linearised = compose::linearise(&source)?;
    let rendered = serde_yaml_ng::to_string(&linearised).map_err(|e| Error::yaml(compose_file.to_string(), e))?;

    let staged = std::env::temp_dir().join(format!("machinery-{}-{}.yml", real_name.as_str(), Uuid::new_v4()));
    std::fs::write(&staged, rendered).map_err(|e| Error::io(format!("write {}", staged.display()), e))?;

    let compose_adapter = ctx.require_adapter("docker-compose")?;
    let config = crate::executor::ExecutionConfig {
        environment: HashMap::from([("DOCKER_HOST".to_string(), docker_host.to_string())]),
        ..crate::executor::ExecutionConfig::default()
    };
    let result = compose_adapter
        .run_with(
            &[
                "-f".to_string(),
                staged.display().to_string(),
                "up".to_string(),
                "-d".to_string(),
            ],
            config,
        )
        .await;

    let _ = std::fs::remove_file(&staged);
    result.map(|_| ())
}

/// `initialised → running`: ensure the machine is started (idempotent),
/// then refresh its discovery-cache entry (§4.4, §4.10 step 5).
pub async fn ensure_started(ctx: &ClusterContext, real_name: &RealName) -> Result<()> {
    let docker_machine = ctx.require_adapter("docker-machine")?;
    with_retry(|| async {
        docker_machine
            .run(&["start".to_string(), real_name.as_str().to_string()])
            .await
            .map(|_| ())
    })
    .await?;

    record_discovery(ctx, real_name, &ctx.paths.discovery_cache()).await
}

/// Query `real_name`'s IP via `docker-machine ip` (§4.4, §4.10).
async fn machine_ip(ctx: &ClusterContext, real_name: &RealName) -> Result<String> {
    let docker_machine = ctx.require_adapter("docker-machine")?;
    let output = docker_machine
        .run(&["ip".to_string(), real_name.as_str().to_string()])
        .await?;
    Ok(output.stdout.trim().to_string())
}

/// Refresh `real_name`'s entry in the `.{root}.env` discovery cache with its
/// current main IPv4 address (§4.4: "rewritten whole-file and atomically
/// whenever a machine reaches running"). Per-interface addressing is left
/// empty; only the main address is queryable through `docker-machine ip`.
async fn record_discovery(ctx: &ClusterContext, real_name: &RealName, cache_path: &Path) -> Result<()> {
    let ip = machine_ip(ctx, real_name).await?;
    let mut cache = DiscoveryCache::load(cache_path)?;
    cache.update_machine(
        real_name,
        &DiscoveryRecord {
            main_ipv4: Some(ip),
            interfaces: BTreeMap::new(),
        },
    );
    cache.write(cache_path)
}

/// `running → stopped`.
pub async fn stop(ctx: &ClusterContext, real_name: &RealName) -> Result<()> {
    let docker_machine = ctx.require_adapter("docker-machine")?;
    docker_machine
        .run(&["stop".to_string(), real_name.as_str().to_string()])
        .await
        .map(|_| ())
}

/// any → `destroyed`.
pub async fn destroy(ctx: &ClusterContext, real_name: &RealName) -> Result<()> {
    let docker_machine = ctx.require_adapter("docker-machine")?;
    docker_machine
        .run(&["rm".to_string(), "-f".to_string(), real_name.as_str().to_string()])
        .await
        .map(|_| ())
}

/// `true` if `real_name`'s init marker is present, meaning initialisation
/// already ran to completion at least once (§4.10 step 4, §9 open
/// question: the marker file is the sole source of truth here).
#[must_use]
pub fn is_initialised(ctx: &ClusterContext, real_name: &RealName) -> bool {
    ctx.paths.init_marker(real_name.as_str()).exists()
}

/// Record that `real_name` has completed initialisation.
pub fn mark_initialised(ctx: &ClusterContext, real_name: &RealName) -> Result<()> {
    let dir = ctx.paths.init_dir();
    std::fs::create_dir_all(&dir).map_err(|e| Error::io(format!("create {}", dir.display()), e))?;
    std::fs::write(ctx.paths.init_marker(real_name.as_str()), b"").map_err(|e| Error::io("write init marker", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MachineryConfig;
    use crate::types::MachineName;

    fn real(name: &str) -> RealName {
        RealName::compute("demo", &MachineName::new(name).unwrap())
    }

    #[test]
    fn forward_transitions_are_legal() {
        use MachineState::{Absent, Configured, Created, Initialised, Running, Tagged};
        assert!(Absent.can_transition_to(Created));
        assert!(Created.can_transition_to(Tagged));
        assert!(Tagged.can_transition_to(Configured));
        assert!(Configured.can_transition_to(Initialised));
        assert!(Initialised.can_transition_to(Running));
    }

    #[test]
    fn running_and_stopped_cycle_both_ways() {
        assert!(MachineState::Running.can_transition_to(MachineState::Stopped));
        assert!(MachineState::Stopped.can_transition_to(MachineState::Running));
    }

    #[test]
    fn any_state_can_reach_destroyed() {
        assert!(MachineState::Absent.can_transition_to(MachineState::Destroyed));
        assert!(MachineState::Running.can_transition_to(MachineState::Destroyed));
    }

    #[test]
    fn backward_skips_are_illegal() {
        assert!(!MachineState::Running.can_transition_to(MachineState::Absent));
        assert!(!MachineState::Absent.can_transition_to(MachineState::Initialised));
    }

    #[tokio::test]
    async fn retry_gives_up_on_permanent_errors_immediately() {
        let result = with_retry(|| async { Err(Error::config("x", "bad")) }).await;
        assert!(result.is_err());
    }

    #[test]
    fn init_marker_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = dir.path().join("demo.yml");
        std::fs::write(&descriptor, b"version: '2'\n").unwrap();
        let ctx = ClusterContext::test_context(&descriptor, MachineryConfig::default());
        let db = real("db");

        assert!(!is_initialised(&ctx, &db));
        mark_initialised(&ctx, &db).unwrap();
        assert!(is_initialised(&ctx, &db));
    }

    #[test]
    fn create_args_translate_cpu_memory_size_and_labels() {
        let mut spec = MachineSpec {
            name: "db".to_string(),
            aliases: Vec::new(),
            driver: Some("virtualbox".to_string()),
            master: false,
            swarm: true,
            cpu: Some(2),
            memory: Some(2 * 1024 * 1024 * 1024),
            size: Some(40_000_000_000),
            labels: HashMap::new(),
            options: HashMap::new(),
            ports: Vec::new(),
            shares: Vec::new(),
            images: Vec::new(),
            registries: Vec::new(),
            compose: Vec::new(),
            prelude: Vec::new(),
            addendum: Vec::new(),
            files: Vec::new(),
            extends: None,
        };
        spec.labels.insert("role".to_string(), "db".to_string());

        let args = build_create_args(&real("db"), &spec);
        assert!(args.contains(&"--virtualbox-cpu-count".to_string()));
        assert!(args.contains(&"2".to_string()));
        assert!(args.contains(&"--virtualbox-memory".to_string()));
        assert!(args.contains(&"2048".to_string()));
        assert!(args.contains(&"--virtualbox-disk-size".to_string()));
        assert!(args.contains(&"40000".to_string()));
        assert!(args.contains(&"--engine-label".to_string()));
        assert!(args.contains(&"role=db".to_string()));
        assert_eq!(args.last(), Some(&"demo-db".to_string()));
    }

    #[test]
    fn create_args_without_driver_only_forward_options() {
        let mut spec = MachineSpec {
            name: "db".to_string(),
            aliases: Vec::new(),
            driver: None,
            master: false,
            swarm: true,
            cpu: Some(2),
            memory: None,
            size: None,
            labels: HashMap::new(),
            options: HashMap::new(),
            ports: Vec::new(),
            shares: Vec::new(),
            images: Vec::new(),
            registries: Vec::new(),
            compose: Vec::new(),
            prelude: Vec::new(),
            addendum: Vec::new(),
            files: Vec::new(),
            extends: None,
        };
        spec.options.insert(
            "amazonec2-region".to_string(),
            serde_yaml_ng::Value::String("us-east-1".to_string()),
        );

        let args = build_create_args(&real("db"), &spec);
        assert!(!args.iter().any(|a| a.contains("cpu-count")));
        assert!(args.contains(&"--amazonec2-region".to_string()));
        assert!(args.contains(&"us-east-1".to_string()));
    }
}
