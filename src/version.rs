//! Dotted numeric version comparison.
//!
//! Used to decide whether a machine's boot2docker ISO needs upgrading to
//! match the host's docker version (§4.10: "upgraded when strictly lower"),
//! and anywhere else a tool's reported version must be compared against a
//! minimum. Grounded in the teacher's `version_meets_requirement`: split on
//! `.`, compare up to three ordinal components, short components pad with 0.

use std::cmp::Ordering;

/// Parse up to three dot-separated numeric components from a version
/// string, ignoring anything after the first non-numeric component
/// (`"20.10.21-ce"` parses as `[20, 10, 21]` since `21-ce` still starts with
/// digits; fully non-numeric trailing labels are dropped).
fn components(version: &str) -> [u64; 3] {
    let mut parts = [0u64; 3];
    for (i, part) in version.trim().split('.').take(3).enumerate() {
        let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
        parts[i] = digits.parse().unwrap_or(0);
    }
    parts
}

/// Compare two dotted version strings component-wise, padding missing
/// trailing components with zero (so `"2"` equals `"2.0.0"`).
#[must_use]
pub fn compare(a: &str, b: &str) -> Ordering {
    components(a).cmp(&components(b))
}

/// `true` if `version` is greater than or equal to `minimum`.
#[must_use]
pub fn meets_requirement(version: &str, minimum: &str) -> bool {
    compare(version, minimum) != Ordering::Less
}

/// `true` if `version` is strictly lower than `reference`, the condition
/// under which the boot2docker ISO gets upgraded (§4.10).
#[must_use]
pub fn is_strictly_lower(version: &str, reference: &str) -> bool {
    compare(version, reference) == Ordering::Less
}
