//! Script Runner: prelude (run right after file copy) and addendum (run
//! last in the init sequence) scripts (§4.9).

use crate::context::ClusterContext;
use crate::errors::{Error, Result};
use crate::model::{FileCopy, Script};
use crate::substitute::{self, Scope};
use std::collections::HashMap;
use std::path::Path;

/// Resolve a [`Script`]'s `substitution` field into a [`Scope`].
#[must_use]
pub fn scope_of(script: &Script) -> Scope {
    match script.substitution.as_str() {
        "text" => Scope::Text,
        "args" => Scope::Args,
        "none" => Scope::None,
        _ => Scope::Both,
    }
}

/// Apply `script`'s substitution scope to its arguments before invocation.
#[must_use]
pub fn substituted_args(script: &Script, env: &HashMap<String, String>) -> Vec<String> {
    match scope_of(script) {
        Scope::Args | Scope::Both => script
            .args
            .iter()
            .map(|a| substitute::substitute(a, env))
            .collect(),
        _ => script.args.clone(),
    }
}

/// Stage `script` onto the guest if `remote && copy`, returning the path it
/// should be invoked from.
async fn stage(
    ctx: &ClusterContext,
    target_host: &str,
    descriptor_dir: &Path,
    script: &Script,
) -> Result<String> {
    if script.remote && script.copy {
        let staged_path = crate::transfer::staging_path();
        let entry = FileCopy {
            source: script.exec.clone(),
            destination: staged_path.clone(),
            mode: Some("0755".to_string()),
            owner: None,
            group: None,
        };
        let result = crate::transfer::transfer_entry(ctx, target_host, descriptor_dir, &entry, true).await;
        if !result.success {
            return Err(Error::state(
                target_host.to_string(),
                format!("failed to stage script '{}': {}", script.exec, result.error.unwrap_or_default()),
            ));
        }
        Ok(staged_path)
    } else {
        Ok(script.exec.clone())
    }
}

/// Run `script` on `target_host`, staging it first when needed, and
/// returning an error on non-zero exit (§4.9: "non-zero exit aborts the
/// machine's initialisation").
pub async fn run_script(
    ctx: &ClusterContext,
    target_host: &str,
    descriptor_dir: &Path,
    script: &Script,
    env: &HashMap<String, String>,
) -> Result<()> {
    let exec_path = stage(ctx, target_host, descriptor_dir, script).await?;
    let args = substituted_args(script, env);

    let mut command = if script.sudo {
        format!("sudo {exec_path}")
    } else {
        exec_path
    };
    for arg in &args {
        command.push(' ');
        command.push_str(arg);
    }

    if script.remote {
        let ssh = ctx.require_adapter("ssh")?;
        ssh.run(&[target_host.to_string(), command]).await?;
    } else {
        let mut parts = command.split_whitespace();
        let program = parts.next().unwrap_or_default().to_string();
        let rest: Vec<String> = parts.map(str::to_string).collect();
        let executor = crate::executor::ProcessExecutor::new(
            crate::executor::Tool::Docker,
            std::path::PathBuf::from(program),
        );
        executor.execute(&rest, None).await?;
    }
    Ok(())
}

/// Run every script in `scripts` in order, aborting on the first failure.
pub async fn run_all(
    ctx: &ClusterContext,
    target_host: &str,
    descriptor_dir: &Path,
    scripts: &[Script],
    env: &HashMap<String, String>,
) -> Result<()> {
    for script in scripts {
        run_script(ctx, target_host, descriptor_dir, script, env).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn script(substitution: &str, args: Vec<&str>) -> Script {
        Script {
            exec: "/usr/local/bin/setup.sh".to_string(),
            args: args.into_iter().map(str::to_string).collect(),
            sudo: false,
            remote: true,
            copy: true,
            substitution: substitution.to_string(),
        }
    }

    #[test]
    fn scope_resolves_from_field() {
        assert_eq!(scope_of(&script("text", vec![])), Scope::Text);
        assert_eq!(scope_of(&script("args", vec![])), Scope::Args);
        assert_eq!(scope_of(&script("none", vec![])), Scope::None);
        assert_eq!(scope_of(&script("both", vec![])), Scope::Both);
    }

    #[test]
    fn args_substituted_only_in_args_or_both_scope() {
        let env: HashMap<String, String> = [("HOST".to_string(), "db".to_string())].into_iter().collect();
        let s = script("args", vec!["--host=$HOST"]);
        assert_eq!(substituted_args(&s, &env), vec!["--host=db".to_string()]);

        let none_scope = script("none", vec!["--host=$HOST"]);
        assert_eq!(substituted_args(&none_scope, &env), vec!["--host=$HOST".to_string()]);
    }
}
