//! CLI front end exercising the `machinery` library end to end (§6).
//!
//! Thin by design: flag parsing, descriptor discovery, and verb dispatch
//! only. All real work lives in the library.

use machinery::context::{ClusterContext, MachineryConfig};
use machinery::image::CachePolicy;
use machinery::model::Cluster;
use machinery::{cluster, Verb};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

struct Args {
    verb: Verb,
    patterns: Vec<String>,
    cluster_path: Option<PathBuf>,
    config_path: Option<PathBuf>,
    driver: Option<String>,
    cache: Option<String>,
    force: bool,
    verbose: String,
}

fn parse_args(raw: &[String]) -> Result<Args, String> {
    let mut cluster_path = None;
    let mut config_path = None;
    let mut driver = None;
    let mut cache = None;
    let mut force = false;
    let mut verbose = "info".to_string();
    let mut positional = Vec::new();

    let mut iter = raw.iter().peekable();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-cluster" => cluster_path = iter.next().map(PathBuf::from),
            "-config" => config_path = iter.next().map(PathBuf::from),
            "-driver" => driver = iter.next().cloned(),
            "-cache" => cache = iter.next().cloned(),
            "-force" => force = true,
            "-verbose" => verbose = iter.next().cloned().unwrap_or_else(|| "info".to_string()),
            "-help" => return Err("usage: machinery [-cluster PATH] [-config PATH] [-driver NAME] [-cache POLICY] VERB [PATTERN...]".to_string()),
            other => positional.push(other.to_string()),
        }
    }

    let verb_str = positional.first().ok_or("missing verb")?;
    let verb = Verb::parse(verb_str).map_err(|e| e.to_string())?;
    let patterns = positional[1..].to_vec();

    Ok(Args { verb, patterns, cluster_path, config_path, driver, cache, force, verbose })
}

/// Collect the `MACHINERY_*` environment variables the ambient config layer
/// overlays onto a loaded `-config` file (§4.3).
fn machinery_environment() -> HashMap<String, String> {
    std::env::vars().filter(|(k, _)| k.starts_with("MACHINERY_")).collect()
}

/// Find the cluster descriptor per the discovery rule in §6: explicit
/// `-cluster`, else `cluster.yml` in cwd, else the unique `*.yml` tagged
/// `#docker-machinery` on its first non-empty line.
fn discover_descriptor(explicit: Option<PathBuf>) -> Result<PathBuf, String> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    let default = Path::new("cluster.yml");
    if default.exists() {
        return Ok(default.to_path_buf());
    }

    let mut candidates = Vec::new();
    let entries = std::fs::read_dir(".").map_err(|e| e.to_string())?;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("yml") {
            continue;
        }
        if let Ok(text) = std::fs::read_to_string(&path) {
            if text.lines().find(|l| !l.trim().is_empty()) == Some("#docker-machinery") {
                candidates.push(path);
            }
        }
    }

    match candidates.len() {
        1 => Ok(candidates.remove(0)),
        0 => Err("no cluster descriptor found".to_string()),
        _ => Err(format!("ambiguous descriptor: {} candidates found", candidates.len())),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let parsed = match parse_args(&args) {
        Ok(p) => p,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::from(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&parsed.verbose))
        .init();

    let descriptor = match discover_descriptor(parsed.cluster_path.clone()) {
        Ok(p) => p,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::from(1);
        }
    };

    if parsed.verb == Verb::Version {
        println!("machinery {}", machinery::VERSION);
        return ExitCode::SUCCESS;
    }

    let cluster = match Cluster::load(&descriptor) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("config error: {e}");
            return ExitCode::from(1);
        }
    };

    let mut config = match MachineryConfig::load(parsed.config_path.as_deref(), &machinery_environment()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("config error: {e}");
            return ExitCode::from(1);
        }
    };
    if parsed.driver.is_some() {
        config.driver = parsed.driver.clone();
    }
    if parsed.cache.is_some() {
        config.cache = parsed.cache.clone();
    }

    let ctx = match ClusterContext::new(&descriptor, config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("fatal: {e}");
            return ExitCode::from(3);
        }
    };

    let selected: Vec<String> = cluster::select_machines(&cluster, &parsed.patterns)
        .into_iter()
        .map(str::to_string)
        .collect();
    let max_concurrency = cluster::default_concurrency(selected.len());
    let cache_policy = CachePolicy::from_flag(ctx.config.cache.as_deref());
    let fixed_token = ctx.config.token.clone();

    let ctx = Arc::new(ctx);
    let cluster = Arc::new(cluster);

    match parsed.verb {
        Verb::Up => {
            let result = cluster::up(ctx, cluster, selected, cache_policy, max_concurrency).await;
            report(&result);
            return exit_code(&result);
        }
        Verb::Halt => {
            let result = cluster::halt(ctx, cluster, selected, max_concurrency).await;
            report(&result);
            return exit_code(&result);
        }
        Verb::Destroy => {
            let result = cluster::destroy(ctx, cluster, selected, max_concurrency).await;
            report(&result);
            return exit_code(&result);
        }
        Verb::Token => match cluster::fetch_token(&ctx, parsed.force, fixed_token.as_deref()).await {
            Ok(token) => println!("{token}"),
            Err(e) => {
                eprintln!("fatal: {e}");
                return ExitCode::from(3);
            }
        },
        Verb::Env => match cluster::env(&ctx) {
            Ok(vars) => {
                for (key, value) in vars {
                    println!("{key}={value}");
                }
            }
            Err(e) => {
                eprintln!("fatal: {e}");
                return ExitCode::from(3);
            }
        },
        Verb::Ls => {
            for name in &selected {
                println!("{name}");
            }
        }
        Verb::Sync | Verb::Swarm | Verb::Stack | Verb::Node | Verb::Ssh | Verb::Ps | Verb::Search | Verb::Forall => {
            println!("selected {} machine(s) for verb {:?} (not yet implemented)", selected.len(), parsed.verb);
        }
        Verb::Version => unreachable!("handled above"),
    }

    ExitCode::SUCCESS
}

fn report(result: &cluster::ClusterResult) {
    for machine in &result.machines {
        if machine.success {
            println!("{}: ok", machine.machine);
        } else {
            eprintln!(
                "{}: failed ({}) {}",
                machine.machine,
                machine.error_category.unwrap_or("Unknown"),
                machine.error_detail.clone().unwrap_or_default()
            );
        }
    }
}

fn exit_code(result: &cluster::ClusterResult) -> ExitCode {
    ExitCode::from(result.exit_code() as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_verb_and_patterns() {
        let args = parse_args(&["up".to_string(), "db*".to_string()]).unwrap();
        assert_eq!(args.verb, Verb::Up);
        assert_eq!(args.patterns, vec!["db*".to_string()]);
    }

    #[test]
    fn parses_cluster_flag() {
        let args = parse_args(&["-cluster".to_string(), "foo.yml".to_string(), "ls".to_string()]).unwrap();
        assert_eq!(args.cluster_path, Some(PathBuf::from("foo.yml")));
        assert_eq!(args.verb, Verb::Ls);
    }

    #[test]
    fn rejects_unknown_verb() {
        assert!(parse_args(&["frobnicate".to_string()]).is_err());
    }
}
