//! Environment Substitutor: `${NAME}`, `${NAME:-default}`, and `$NAME`
//! token replacement over text, scoped by an allow/deny glob list (§4.3).

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Which parts of a compose invocation substitution applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Only the document text.
    Text,
    /// Only command-line arguments.
    Args,
    /// Both text and arguments.
    Both,
    /// Substitution disabled entirely.
    None,
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}|\$([A-Za-z_][A-Za-z0-9_]*)").unwrap()
    })
}

/// `true` if `name` has no entry in `env`, or its entry is the empty
/// string: both count as "missing" for `:-default` fallback purposes.
fn is_missing_or_empty(env: &HashMap<String, String>, name: &str) -> bool {
    env.get(name).is_none_or(String::is_empty)
}

/// Replace every `${NAME}`, `${NAME:-default}`, or `$NAME` token in `input`
/// using `env`. A name that is missing or bound to the empty string falls
/// back to its `:-default` clause if present, else an empty string; a
/// missing name with no default logs a warning (§4.3).
#[must_use]
pub fn substitute(input: &str, env: &HashMap<String, String>) -> String {
    token_pattern()
        .replace_all(input, |caps: &regex::Captures| {
            if let Some(braced_name) = caps.get(1) {
                let name = braced_name.as_str();
                if is_missing_or_empty(env, name) {
                    match caps.get(3) {
                        Some(d) => d.as_str().to_string(),
                        None => {
                            if env.get(name).is_none() {
                                tracing::warn!(variable = name, "substitution variable not set, no default given");
                            }
                            String::new()
                        }
                    }
                } else {
                    env.get(name).cloned().unwrap_or_default()
                }
            } else if let Some(bare_name) = caps.get(4) {
                let name = bare_name.as_str();
                match env.get(name) {
                    Some(value) => value.clone(),
                    None => {
                        tracing::warn!(variable = name, "substitution variable not set, no default given");
                        String::new()
                    }
                }
            } else {
                caps.get(0).unwrap().as_str().to_string()
            }
        })
        .into_owned()
}

/// `true` if `input` contains no `$`-token at all (Testable Properties §8:
/// substitution round-trip for token-free documents).
#[must_use]
pub fn has_no_tokens(input: &str) -> bool {
    !token_pattern().is_match(input)
}

/// Decide whether a given name is in scope for substitution under an
/// allow/deny glob list: denies take precedence over allows, and an empty
/// allow list means "everything is allowed unless denied".
#[must_use]
pub fn is_in_scope(name: &str, allow: &[String], deny: &[String]) -> bool {
    let name_matches = |patterns: &[String]| {
        patterns.iter().any(|p| {
            glob::Pattern::new(p)
                .map(|pat| pat.matches(name))
                .unwrap_or(false)
        })
    };
    if name_matches(deny) {
        return false;
    }
    allow.is_empty() || name_matches(allow)
}
