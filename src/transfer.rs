//! File Transfer: places host files onto a machine, with sudo staging,
//! directory recursion, and an rsync/scp backend choice (§4.8).

use crate::context::ClusterContext;
use crate::errors::Result;
use crate::model::FileCopy;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Result of transferring a single file entry.
#[derive(Debug, Clone)]
pub struct TransferResult {
    /// The destination path that was targeted.
    pub destination: String,
    /// `true` if the file was placed (and any chmod/chown/chgrp applied)
    /// successfully.
    pub success: bool,
    /// Failure detail, if any.
    pub error: Option<String>,
}

/// Resolve `source` (from a [`FileCopy`] entry) relative to the
/// descriptor's directory.
#[must_use]
pub fn resolve_source(entry: &FileCopy, descriptor_dir: &Path) -> PathBuf {
    let source_path = Path::new(&entry.source);
    if source_path.is_absolute() {
        source_path.to_path_buf()
    } else {
        descriptor_dir.join(source_path)
    }
}

/// `true` if placing this entry requires elevated privileges on the guest:
/// any destination under a root-owned system path.
#[must_use]
pub fn needs_sudo(destination: &str) -> bool {
    const SUDO_PREFIXES: &[&str] = &["/etc", "/var", "/usr", "/opt", "/root"];
    SUDO_PREFIXES.iter().any(|p| destination.starts_with(p))
}

/// A random staging path under `/tmp` used when sudo semantics apply: copy
/// there unprivileged first, then `mv` into place over ssh with elevation
/// (§4.8).
#[must_use]
pub fn staging_path() -> String {
    format!("/tmp/machinery-{}", Uuid::new_v4())
}

/// Whether to recurse into `source` as a directory: `recurse = "auto"`
/// treats directories recursively and files as single items (§4.8).
#[must_use]
pub fn should_recurse(source: &Path, recurse: &str) -> bool {
    match recurse {
        "auto" => source.is_dir(),
        "true" | "yes" => true,
        _ => false,
    }
}

/// Transfer one [`FileCopy`] entry to `target_host`, preferring rsync when
/// `prefer_delta` is set and the adapter is available, else falling back to
/// scp (§4.8: "delta=true uses rsync when the adapter provides it").
pub async fn transfer_entry(
    ctx: &ClusterContext,
    target_host: &str,
    descriptor_dir: &Path,
    entry: &FileCopy,
    prefer_delta: bool,
) -> TransferResult {
    let source = resolve_source(entry, descriptor_dir);
    let sudo = needs_sudo(&entry.destination);
    let placement_path = if sudo {
        staging_path()
    } else {
        entry.destination.clone()
    };

    let copy_result = copy_file(ctx, target_host, &source, &placement_path, prefer_delta).await;

    let copy_result = match copy_result {
        Ok(()) if sudo => {
            move_with_sudo(ctx, target_host, &placement_path, &entry.destination).await
        }
        other => other,
    };

    let copy_result = match copy_result {
        Ok(()) => apply_permissions(ctx, target_host, entry).await,
        other => other,
    };

    match copy_result {
        Ok(()) => TransferResult {
            destination: entry.destination.clone(),
            success: true,
            error: None,
        },
        Err(e) => TransferResult {
            destination: entry.destination.clone(),
            success: false,
            error: Some(e.to_string()),
        },
    }
}

async fn copy_file(
    ctx: &ClusterContext,
    target_host: &str,
    source: &Path,
    destination: &str,
    prefer_delta: bool,
) -> Result<()> {
    let remote_spec = format!("{target_host}:{destination}");
    if prefer_delta {
        if let Some(rsync) = ctx.adapter("rsync") {
            rsync
                .run(&["-a".to_string(), source.display().to_string(), remote_spec])
                .await?;
            return Ok(());
        }
    }
    let scp = ctx.require_adapter("scp")?;
    scp.run(&["-q".to_string(), source.display().to_string(), remote_spec]).await?;
    Ok(())
}

async fn move_with_sudo(ctx: &ClusterContext, target_host: &str, staged: &str, destination: &str) -> Result<()> {
    let ssh = ctx.require_adapter("ssh")?;
    ssh.run(&[
        target_host.to_string(),
        format!("sudo mv {staged} {destination}"),
    ])
    .await?;
    Ok(())
}

async fn apply_permissions(ctx: &ClusterContext, target_host: &str, entry: &FileCopy) -> Result<()> {
    let ssh = ctx.require_adapter("ssh")?;
    if let Some(mode) = &entry.mode {
        ssh.run(&[target_host.to_string(), format!("sudo chmod {mode} {}", entry.destination)]).await?;
    }
    if let Some(owner) = &entry.owner {
        ssh.run(&[target_host.to_string(), format!("sudo chown {owner} {}", entry.destination)]).await?;
    }
    if let Some(group) = &entry.group {
        ssh.run(&[target_host.to_string(), format!("sudo chgrp {group} {}", entry.destination)]).await?;
    }
    Ok(())
}

/// Transfer every entry in `entries`, aborting the machine's
/// initialisation on the first failure (§4.8: "a failed file aborts the
/// machine's initialisation").
pub async fn transfer_all(
    ctx: &ClusterContext,
    target_host: &str,
    descriptor_dir: &Path,
    entries: &[FileCopy],
    prefer_delta: bool,
) -> Vec<TransferResult> {
    let mut results = Vec::new();
    for entry in entries {
        let result = transfer_entry(ctx, target_host, descriptor_dir, entry, prefer_delta).await;
        let failed = !result.success;
        results.push(result);
        if failed {
            break;
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_source_against_descriptor_dir() {
        let entry = FileCopy {
            source: "config/app.conf".to_string(),
            destination: "/etc/app.conf".to_string(),
            mode: None,
            owner: None,
            group: None,
        };
        let resolved = resolve_source(&entry, Path::new("/srv/cluster"));
        assert_eq!(resolved, PathBuf::from("/srv/cluster/config/app.conf"));
    }

    #[test]
    fn absolute_source_is_used_unchanged() {
        let entry = FileCopy {
            source: "/abs/path/file".to_string(),
            destination: "/home/user/file".to_string(),
            mode: None,
            owner: None,
            group: None,
        };
        let resolved = resolve_source(&entry, Path::new("/srv/cluster"));
        assert_eq!(resolved, PathBuf::from("/abs/path/file"));
    }

    #[test]
    fn sudo_required_for_system_paths_only() {
        assert!(needs_sudo("/etc/app.conf"));
        assert!(needs_sudo("/var/lib/app"));
        assert!(!needs_sudo("/home/user/app.conf"));
    }

    #[test]
    fn staging_paths_are_unique() {
        let a = staging_path();
        let b = staging_path();
        assert_ne!(a, b);
        assert!(a.starts_with("/tmp/machinery-"));
    }

    #[test]
    fn auto_recurse_follows_directory_status() {
        let dir = tempfile::tempdir().unwrap();
        assert!(should_recurse(dir.path(), "auto"));
        let file_path = dir.path().join("f");
        std::fs::write(&file_path, b"x").unwrap();
        assert!(!should_recurse(&file_path, "auto"));
        assert!(should_recurse(&file_path, "true"));
    }
}
