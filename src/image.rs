//! Image Pre-seeder: gets declared images onto a machine's daemon before
//! compose-up, via one of three cache policies (§4.7).

use crate::context::ClusterContext;
use crate::errors::{Error, Result};
use crate::executor::ExecutionConfig;
use crate::model::Registry;

/// Where an image pull is actually performed before reaching the target
/// machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachePolicy {
    /// Pull on the local host daemon, then `save`/`load` to the target.
    LocalHost,
    /// Pull on a named cache machine's daemon, then `save`/`load` to the
    /// target.
    NamedCacheMachine(String),
    /// Pull directly on the target daemon.
    Off,
}

impl CachePolicy {
    /// Parse the `-cache` flag value (§6): a machine name, `-` (localhost),
    /// or empty (off).
    #[must_use]
    pub fn from_flag(value: Option<&str>) -> Self {
        match value {
            None | Some("") => Self::Off,
            Some("-") => Self::LocalHost,
            Some(name) => Self::NamedCacheMachine(name.to_string()),
        }
    }
}

/// Log in to `registry` before any pull that needs its credentials.
/// Credentials are passed on stdin rather than argv whenever the tool
/// supports it (§4.7: "must never appear in process argv when another path
/// exists").
pub async fn registry_login(ctx: &ClusterContext, daemon_host: Option<&str>, registry: &Registry) -> Result<()> {
    let docker = ctx.require_adapter("docker")?;

    let mut args = vec!["login".to_string(), "--username".to_string(), registry.username.clone(), "--password-stdin".to_string()];
    if let Some(host) = daemon_host {
        args.splice(0..0, ["-H".to_string(), host.to_string()]);
    }
    args.push(registry.server.clone());

    let config = ExecutionConfig {
        stdin_data: Some(registry.password.clone().into_bytes()),
        ..ExecutionConfig::default()
    };

    docker.run_with(&args, config).await.map_err(|e| match e {
        Error::Adapter { tool, message, stdout, stderr } => {
            Error::auth(registry.server.clone(), format!("{tool} login failed: {message} ({stdout}{stderr})"))
        }
        other => other,
    })?;
    Ok(())
}

/// Pull `image` on the daemon at `daemon_host` (`None` = local daemon).
pub async fn pull(ctx: &ClusterContext, daemon_host: Option<&str>, image: &str) -> Result<()> {
    let docker = ctx.require_adapter("docker")?;
    let mut args = Vec::new();
    if let Some(host) = daemon_host {
        args.extend(["-H".to_string(), host.to_string()]);
    }
    args.extend(["pull".to_string(), image.to_string()]);
    docker.run(&args).await?;
    Ok(())
}

/// Stream `docker save <image>` from `source_host` into `docker load` on
/// `target_host`, without ever materialising the tarball on disk.
///
/// Modeled as two adapter calls joined by the caller rather than a literal
/// shell pipe, since the Tool Adapter contract (§6) owns all argv
/// construction and neither host is necessarily local.
pub async fn save_and_load(ctx: &ClusterContext, source_host: Option<&str>, target_host: &str, image: &str) -> Result<()> {
    let docker = ctx.require_adapter("docker")?;

    let mut save_args = Vec::new();
    if let Some(host) = source_host {
        save_args.extend(["-H".to_string(), host.to_string()]);
    }
    save_args.extend(["save".to_string(), image.to_string()]);
    let saved = docker.run(&save_args).await?;

    let load_args = vec!["-H".to_string(), target_host.to_string(), "load".to_string()];
    let load_config = ExecutionConfig {
        stdin_data: Some(saved.stdout.into_bytes()),
        ..ExecutionConfig::default()
    };
    docker.run_with(&load_args, load_config).await?;
    Ok(())
}

/// Pre-seed `image` onto `target_host` per `policy`, performing any
/// necessary registry logins first (§4.7).
pub async fn preseed(
    ctx: &ClusterContext,
    policy: &CachePolicy,
    target_host: &str,
    registries: &[Registry],
    image: &str,
) -> Result<()> {
    match policy {
        CachePolicy::LocalHost => {
            match pull(ctx, None, image).await {
                Ok(()) => save_and_load(ctx, None, target_host, image).await,
                Err(Error::Auth { .. }) => {
                    for registry in registries {
                        registry_login(ctx, Some(target_host), registry).await?;
                    }
                    pull(ctx, Some(target_host), image).await
                }
                Err(other) => Err(other),
            }
        }
        CachePolicy::NamedCacheMachine(cache_host) => {
            pull(ctx, Some(cache_host), image).await?;
            save_and_load(ctx, Some(cache_host), target_host, image).await
        }
        CachePolicy::Off => {
            for registry in registries {
                registry_login(ctx, Some(target_host), registry).await?;
            }
            pull(ctx, Some(target_host), image).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_flag_parses_to_expected_policy() {
        assert_eq!(CachePolicy::from_flag(None), CachePolicy::Off);
        assert_eq!(CachePolicy::from_flag(Some("")), CachePolicy::Off);
        assert_eq!(CachePolicy::from_flag(Some("-")), CachePolicy::LocalHost);
        assert_eq!(
            CachePolicy::from_flag(Some("cache-node")),
            CachePolicy::NamedCacheMachine("cache-node".to_string())
        );
    }
}
