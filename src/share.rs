//! Share Manager: host-to-guest directory sharing via two backends,
//! vboxsf and rsync (§4.6).

use crate::context::ClusterContext;
use crate::errors::{Error, Result};
use crate::model::Share;
use crate::types::ShareType;
use crate::utils::{backoff_delay, MAX_RETRY_ATTEMPTS};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Compute the deterministic short share name for a host/guest pairing on a
/// given machine: `sha256(hostPath\0machineName)`, hex-truncated to 16
/// characters (§4.6, §4.1 grounding note: digest-based identifiers).
#[must_use]
pub fn share_name(host_path: &str, machine_name: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(host_path.as_bytes());
    hasher.update(b"\0");
    hasher.update(machine_name.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..16].to_string()
}

const BOOTLOCAL_MARKER_PREFIX: &str = "# machinery-share:";

/// Build the idempotent bootlocal.sh mount line for `share`, tagged with a
/// marker comment so re-running registration doesn't duplicate it.
#[must_use]
pub fn bootlocal_mount_line(share_name: &str, guest_path: &str) -> String {
    format!(
        "{BOOTLOCAL_MARKER_PREFIX}{share_name}\nmkdir -p {guest_path} && mount -t vboxsf {share_name} {guest_path}\n"
    )
}

/// Append `line` to `existing` bootlocal.sh content unless a line tagged
/// with the same share name is already present.
#[must_use]
pub fn append_bootlocal_idempotent(existing: &str, share_name: &str, guest_path: &str) -> String {
    let marker = format!("{BOOTLOCAL_MARKER_PREFIX}{share_name}");
    if existing.contains(&marker) {
        return existing.to_string();
    }
    let mut out = existing.to_string();
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(&bootlocal_mount_line(share_name, guest_path));
    out
}

/// Register a vboxsf share on `vm_name` and append its mount line to the
/// guest's bootlocal.sh (§4.6: first-use registration path).
///
/// `read_bootlocal`/`write_bootlocal` abstract the ssh round-trip so this
/// function stays testable without a live machine.
pub async fn register_vboxsf(
    ctx: &ClusterContext,
    vm_name: &str,
    machine_name: &str,
    share: &Share,
) -> Result<String> {
    let name = share_name(&share.host_path, machine_name);
    let vboxmanage = ctx.require_adapter("VBoxManage")?;

    vboxmanage
        .run(&[
            "sharedfolder".to_string(),
            "add".to_string(),
            vm_name.to_string(),
            "--name".to_string(),
            name.clone(),
            "--hostpath".to_string(),
            share.host_path.clone(),
        ])
        .await?;

    Ok(name)
}

/// Mount a previously-registered vboxsf share over ssh, retrying transient
/// failures with the shared backoff policy (§4.6, §4.10).
pub async fn mount_vboxsf_with_retry<F, Fut>(mount: F) -> Result<()>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let mut last_err = None;
    for attempt in 1..=MAX_RETRY_ATTEMPTS {
        match mount().await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_recoverable() => {
                last_err = Some(e);
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| Error::Internal("mount retry loop exited without result".to_string())))
}

/// Expand `$NAME`/`${NAME}` references in an rsync path against `env`
/// before any transfer runs (§4.6: "environment variables in paths are
/// expanded against the caller's environment").
#[must_use]
pub fn expand_rsync_path(path: &str, env: &HashMap<String, String>) -> String {
    crate::substitute::substitute(path, env)
}

/// Build the rsync argument vector for a host→guest or guest→host copy.
/// `to_guest` selects direction; `remote` is an `user@host:` style prefix.
#[must_use]
pub fn rsync_args(share: &Share, remote: &str, to_guest: bool) -> Vec<String> {
    let guest = format!("{remote}{}", share.guest_path);
    let (source, dest) = if to_guest {
        (share.host_path.clone(), guest)
    } else {
        (guest, share.host_path.clone())
    };
    vec!["-a".to_string(), "--delete".to_string(), source, dest]
}

/// The backend a share uses, resolved by driver when the descriptor leaves
/// `type` unspecified: vboxsf on the virtualbox driver, rsync otherwise
/// (§4.6).
#[must_use]
pub fn default_share_type(driver: Option<&str>) -> ShareType {
    match driver {
        Some("virtualbox") => ShareType::Vboxsf,
        _ => ShareType::Rsync,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_name_is_deterministic_and_stable() {
        let a = share_name("/host/data", "db");
        let b = share_name("/host/data", "db");
        let c = share_name("/host/data", "web");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn bootlocal_append_is_idempotent() {
        let first = append_bootlocal_idempotent("", "abc123", "/data");
        let second = append_bootlocal_idempotent(&first, "abc123", "/data");
        assert_eq!(first, second);
        assert_eq!(first.matches("mount -t vboxsf").count(), 1);
    }

    #[test]
    fn bootlocal_append_adds_distinct_shares_separately() {
        let first = append_bootlocal_idempotent("", "abc123", "/data");
        let second = append_bootlocal_idempotent(&first, "def456", "/other");
        assert_eq!(second.matches("mount -t vboxsf").count(), 2);
    }

    #[test]
    fn default_share_type_follows_driver() {
        assert_eq!(default_share_type(Some("virtualbox")), ShareType::Vboxsf);
        assert_eq!(default_share_type(Some("amazonec2")), ShareType::Rsync);
        assert_eq!(default_share_type(None), ShareType::Rsync);
    }

    #[test]
    fn rsync_args_pick_direction() {
        let share = Share {
            host_path: "/host/data".to_string(),
            guest_path: "/data".to_string(),
            share_type: ShareType::Rsync,
        };
        let to_guest = rsync_args(&share, "user@1.2.3.4:", true);
        assert_eq!(to_guest[2], "/host/data");
        assert_eq!(to_guest[3], "user@1.2.3.4:/data");

        let to_host = rsync_args(&share, "user@1.2.3.4:", false);
        assert_eq!(to_host[2], "user@1.2.3.4:/data");
        assert_eq!(to_host[3], "/host/data");
    }

    #[tokio::test]
    async fn mount_retry_succeeds_after_transient_failures() {
        use std::sync::atomic::{AtomicU32, Ordering};
        let attempts = AtomicU32::new(0);
        let result = mount_vboxsf_with_retry(|| {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::network("vm", "connection refused"))
                } else {
                    Ok(())
                }
            }
        })
        .await;
        assert!(result.is_ok());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn mount_retry_gives_up_on_permanent_failure() {
        let result = mount_vboxsf_with_retry(|| async { Err(Error::config("share", "bad path")) }).await;
        assert!(result.is_err());
    }
}
