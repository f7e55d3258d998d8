//! Cluster Orchestrator: verb dispatch and pattern-based machine targeting
//! (§4.11).

use crate::context::ClusterContext;
use crate::discovery::DiscoveryCache;
use crate::errors::{Error, Result};
use crate::image::CachePolicy;
use crate::machine;
use crate::model::Cluster;
use crate::token::{self, TokenStore};
use crate::types::glob_matches_any;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// A cluster-orchestrator verb (§4.11, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    /// Bring matched machines up.
    Up,
    /// Stop matched machines.
    Halt,
    /// Destroy matched machines.
    Destroy,
    /// Sync rsync shares.
    Sync,
    /// Print or regenerate the cluster token.
    Token,
    /// Swarm subcommands.
    Swarm,
    /// Stack subcommands.
    Stack,
    /// Node subcommands.
    Node,
    /// Print discovery-cache environment.
    Env,
    /// Open an ssh session.
    Ssh,
    /// List containers on matched machines.
    Ps,
    /// List matched machines.
    Ls,
    /// Search containers by name pattern.
    Search,
    /// Forward a docker subcommand to matched machines.
    Forall,
    /// Print version information.
    Version,
}

impl Verb {
    /// Parse a verb from its CLI spelling, rejecting unknown verbs at parse
    /// time (Design Note §9).
    pub fn parse(input: &str) -> Result<Self> {
        Ok(match input {
            "up" => Self::Up,
            "halt" => Self::Halt,
            "destroy" => Self::Destroy,
            "sync" => Self::Sync,
            "token" => Self::Token,
            "swarm" => Self::Swarm,
            "stack" => Self::Stack,
            "node" => Self::Node,
            "env" => Self::Env,
            "ssh" => Self::Ssh,
            "ps" => Self::Ps,
            "ls" => Self::Ls,
            "search" => Self::Search,
            "forall" => Self::Forall,
            "version" => Self::Version,
            other => return Err(Error::config("verb", format!("unknown verb '{other}'"))),
        })
    }
}

/// The outcome of a per-machine task within a cluster-wide operation.
#[derive(Debug, Clone)]
pub struct MachineResult {
    /// Logical machine name.
    pub machine: String,
    /// `true` on success.
    pub success: bool,
    /// Error category (§7), if the task failed.
    pub error_category: Option<&'static str>,
    /// Human-readable error detail, if the task failed.
    pub error_detail: Option<String>,
}

/// Aggregate outcome of a cluster-wide operation (§6: exit code mapping).
#[derive(Debug, Clone)]
pub struct ClusterResult {
    /// Per-machine outcomes.
    pub machines: Vec<MachineResult>,
}

impl ClusterResult {
    /// Process exit code per §6: 0 success, 2 if any machine failed.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        if self.machines.iter().all(|m| m.success) {
            0
        } else {
            2
        }
    }
}

/// Select the non-hidden machines in `cluster` whose logical name, real
/// name, or any alias matches any of `patterns`. An empty pattern list
/// selects every non-hidden machine (§4.11).
#[must_use]
pub fn select_machines<'a>(cluster: &'a Cluster, patterns: &[String]) -> Vec<&'a str> {
    let mut selected: Vec<&str> = Vec::new();
    for (name, machine) in &cluster.machines {
        if machine.is_hidden() {
            continue;
        }
        if patterns.is_empty() {
            selected.push(name.as_str());
            continue;
        }
        let real_name = cluster.real_name(name);
        let mut candidates: Vec<&str> = vec![name.as_str(), real_name.as_str()];
        for alias in &machine.aliases {
            candidates.push(alias.as_str());
        }
        if patterns.iter().any(|p| glob_matches_any(p, &candidates)) {
            selected.push(name.as_str());
        }
    }
    selected.sort_unstable();
    selected
}

/// Order `machines` master-first, the ordering guarantee required before
/// any worker attempts a swarm join (§5, §4.11).
#[must_use]
pub fn master_first_order<'a>(cluster: &'a Cluster, machines: &[&'a str]) -> Vec<&'a str> {
    let mut masters: Vec<&str> = Vec::new();
    let mut workers: Vec<&str> = Vec::new();
    for &name in machines {
        match cluster.machines.get(name) {
            Some(m) if m.master => masters.push(name),
            _ => workers.push(name),
        }
    }
    masters.sort_unstable();
    workers.sort_unstable();
    masters.extend(workers);
    masters
}

/// Run `task` for each of `machines` concurrently, bounded by
/// `max_concurrency` (default `min(machine_count, 8)`, §5).
pub async fn run_bounded<F, Fut>(machines: Vec<String>, max_concurrency: usize, task: F) -> ClusterResult
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send,
{
    let cap = max_concurrency.min(machines.len().max(1));
    let semaphore = Arc::new(Semaphore::new(cap));
    let task = Arc::new(task);

    let futures = machines.into_iter().map(|machine| {
        let semaphore = semaphore.clone();
        let task = task.clone();
        async move {
            let _permit = semaphore.acquire().await.expect("semaphore not closed");
            match task(machine.clone()).await {
                Ok(()) => MachineResult {
                    machine,
                    success: true,
                    error_category: None,
                    error_detail: None,
                },
                Err(e) => MachineResult {
                    machine,
                    success: false,
                    error_category: Some(e.category()),
                    error_detail: Some(e.to_string()),
                },
            }
        }
    });

    ClusterResult {
        machines: join_all(futures).await,
    }
}

/// Default concurrency cap: `min(machine_count, 8)` (§5).
#[must_use]
pub fn default_concurrency(machine_count: usize) -> usize {
    machine_count.min(8).max(1)
}

/// Forbid use of a [`ClusterContext`] before its adapters are ready; a
/// placeholder hook for verbs that need a resolved context before
/// dispatch (kept small and explicit, per Design Note §9's registry-style
/// dispatch rather than dynamic lookup).
#[must_use]
pub fn requires_resolved_context(verb: Verb) -> bool {
    !matches!(verb, Verb::Version)
}

/// Drive `machine_name` through its full lifecycle up to `running`
/// (§4.10): create→tag→configure→initialise are skipped once the init
/// marker is present, so `up` is idempotent on an already-provisioned
/// machine.
async fn provision_machine(
    ctx: &ClusterContext,
    cluster: &Cluster,
    machine_name: &str,
    cache_policy: &CachePolicy,
) -> Result<()> {
    let spec = cluster
        .machines
        .get(machine_name)
        .ok_or_else(|| Error::config("machine", format!("unknown machine '{machine_name}'")))?;
    let real_name = cluster.real_name(machine_name);

    if !machine::is_initialised(ctx, &real_name) {
        machine::create(ctx, &real_name, spec, crate::MIN_DOCKER_VERSION, crate::MIN_DOCKER_VERSION).await?;
        machine::tag(ctx, &real_name, spec).await?;
        machine::configure(ctx, &real_name, spec).await?;
        machine::initialise(ctx, &real_name, spec, &ctx.paths.root_dir, cache_policy, &HashMap::new()).await?;
    }

    machine::ensure_started(ctx, &real_name).await
}

/// Bring `machines` up, master-first, bounded by `max_concurrency` (§4.11,
/// §5). Workers are brought up only after every master has been started,
/// since a worker's swarm join depends on a reachable manager.
pub async fn up(
    ctx: Arc<ClusterContext>,
    cluster: Arc<Cluster>,
    machines: Vec<String>,
    cache_policy: CachePolicy,
    max_concurrency: usize,
) -> ClusterResult {
    let machine_refs: Vec<&str> = machines.iter().map(String::as_str).collect();
    let ordered = master_first_order(&cluster, &machine_refs);
    let (masters, workers): (Vec<String>, Vec<String>) = ordered
        .into_iter()
        .map(str::to_string)
        .partition(|name| cluster.machines.get(name).is_some_and(|m| m.master));

    let cache_policy = Arc::new(cache_policy);
    let mut result = run_provision_batch(ctx.clone(), cluster.clone(), masters, cache_policy.clone(), max_concurrency).await;
    let mut worker_result = run_provision_batch(ctx, cluster, workers, cache_policy, max_concurrency).await;
    result.machines.append(&mut worker_result.machines);
    result
}

async fn run_provision_batch(
    ctx: Arc<ClusterContext>,
    cluster: Arc<Cluster>,
    machines: Vec<String>,
    cache_policy: Arc<CachePolicy>,
    max_concurrency: usize,
) -> ClusterResult {
    run_bounded(machines, max_concurrency, move |name| {
        let ctx = ctx.clone();
        let cluster = cluster.clone();
        let cache_policy = cache_policy.clone();
        async move { provision_machine(&ctx, &cluster, &name, &cache_policy).await }
    })
    .await
}

/// Stop `machines` (§4.11: `halt` verb).
pub async fn halt(ctx: Arc<ClusterContext>, cluster: Arc<Cluster>, machines: Vec<String>, max_concurrency: usize) -> ClusterResult {
    run_bounded(machines, max_concurrency, move |name| {
        let ctx = ctx.clone();
        let cluster = cluster.clone();
        async move {
            let real_name = cluster.real_name(&name);
            machine::stop(&ctx, &real_name).await
        }
    })
    .await
}

/// Destroy `machines` (§4.11: `destroy` verb).
pub async fn destroy(ctx: Arc<ClusterContext>, cluster: Arc<Cluster>, machines: Vec<String>, max_concurrency: usize) -> ClusterResult {
    run_bounded(machines, max_concurrency, move |name| {
        let ctx = ctx.clone();
        let cluster = cluster.clone();
        async move {
            let real_name = cluster.real_name(&name);
            machine::destroy(&ctx, &real_name).await
        }
    })
    .await
}

/// Fetch (creating if absent) the cluster's swarm-join token (§4.5: `token`
/// verb). `fixed_token` is the `-token` CLI override, bypassing generation
/// entirely when set.
pub async fn fetch_token(ctx: &ClusterContext, force: bool, fixed_token: Option<&str>) -> Result<String> {
    if let Some(fixed) = fixed_token {
        return Ok(fixed.to_string());
    }
    let store = TokenStore::new(ctx.paths.token_file());
    let generate = token::docker_generator(ctx)?;
    store.create(force, &generate).await
}

/// Render the discovery cache as `KEY=VALUE` lines (§4.11: `env` verb).
pub fn env(ctx: &ClusterContext) -> Result<std::collections::BTreeMap<String, String>> {
    let cache = DiscoveryCache::load(&ctx.paths.discovery_cache())?;
    Ok(cache.as_map().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Machine;
    use std::collections::HashMap;

    fn machine(name: &str, master: bool) -> Machine {
        Machine {
            name: name.to_string(),
            aliases: Vec::new(),
            driver: None,
            master,
            swarm: true,
            cpu: None,
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
        }
    }

    fn cluster(machines: Vec<Machine>) -> Cluster {
        Cluster {
            name: "demo".to_string(),
            version: 2,
            machines: machines.into_iter().map(|m| (m.name.clone(), m)).collect(),
            networks: HashMap::new(),
        }
    }

    #[test]
    fn unknown_verb_rejected_at_parse_time() {
        assert!(Verb::parse("frobnicate").is_err());
        assert_eq!(Verb::parse("up").unwrap(), Verb::Up);
    }

    #[test]
    fn empty_pattern_list_selects_all_non_hidden() {
        let c = cluster(vec![machine("db", false), machine("web", true)]);
        let selected = select_machines(&c, &[]);
        assert_eq!(selected, vec!["db", "web"]);
    }

    #[test]
    fn glob_pattern_narrows_selection() {
        let c = cluster(vec![machine("db", false), machine("web", true)]);
        let selected = select_machines(&c, &["w*".to_string()]);
        assert_eq!(selected, vec!["web"]);
    }

    #[test]
    fn master_first_ordering_puts_masters_before_workers() {
        let c = cluster(vec![machine("worker1", false), machine("master1", true)]);
        let ordered = master_first_order(&c, &["worker1", "master1"]);
        assert_eq!(ordered, vec!["master1", "worker1"]);
    }

    #[test]
    fn exit_code_reflects_partial_failure() {
        let result = ClusterResult {
            machines: vec![
                MachineResult { machine: "a".to_string(), success: true, error_category: None, error_detail: None },
                MachineResult { machine: "b".to_string(), success: false, error_category: Some("NetworkError"), error_detail: Some("timeout".to_string()) },
            ],
        };
        assert_eq!(result.exit_code(), 2);
    }

    #[tokio::test]
    async fn run_bounded_reports_individual_failures_without_aborting_others() {
        let machines = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let result = run_bounded(machines, 2, |name| async move {
            if name == "b" {
                Err(Error::network("b", "connection refused"))
            } else {
                Ok(())
            }
        })
        .await;

        assert_eq!(result.exit_code(), 2);
        let b = result.machines.iter().find(|m| m.machine == "b").unwrap();
        assert!(!b.success);
        assert_eq!(b.error_category, Some("NetworkError"));
    }
}
