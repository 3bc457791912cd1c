//! Cache key generation.
//!
//! Keys look like `{prefix}{table}:{fingerprint}` where the fingerprint is the
//! first 128 bits of a SHA-256 digest over the canonical JSON form of the
//! query text and its bound parameters, rendered as 32 lowercase hex chars.

use crate::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Table segment used when the statement carries no model.
pub const UNKNOWN_TABLE: &str = "unknown";

const FINGERPRINT_BYTES: usize = 16;

#[derive(Serialize)]
struct Canonical<'a> {
    sql: &'a str,
    vars: &'a [serde_json::Value],
}

/// Stable fingerprint of a query's text and parameters.
pub fn fingerprint(sql: &str, vars: &[serde_json::Value]) -> Result<String> {
    let canonical = serde_json::to_vec(&Canonical { sql, vars })?;
    let digest = Sha256::digest(&canonical);
    Ok(digest[..FINGERPRINT_BYTES]
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect())
}

pub fn compose_key(prefix: &str, table: Option<&str>, fingerprint: &str) -> String {
    format!(
        "{}{}:{}",
        prefix,
        table.unwrap_or(UNKNOWN_TABLE),
        fingerprint
    )
}

/// Pattern covering every key of one table, or the whole prefix when the
/// table is unknown.
pub fn model_pattern(prefix: &str, table: Option<&str>) -> String {
    match table {
        Some(table) => format!("{}{}:*", prefix, table),
        None => format!("{}*", prefix),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fingerprint_is_stable_and_sized() {
        let a = fingerprint("SELECT * FROM users WHERE id = ?", &[json!(1)]).unwrap();
        let b = fingerprint("SELECT * FROM users WHERE id = ?", &[json!(1)]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_fingerprint_depends_on_text_and_vars() {
        let base = fingerprint("SELECT * FROM users WHERE id = ?", &[json!(1)]).unwrap();
        let other_var = fingerprint("SELECT * FROM users WHERE id = ?", &[json!(2)]).unwrap();
        let other_type = fingerprint("SELECT * FROM users WHERE id = ?", &[json!("1")]).unwrap();
        let other_sql = fingerprint("SELECT id FROM users WHERE id = ?", &[json!(1)]).unwrap();
        assert_ne!(base, other_var);
        assert_ne!(base, other_type);
        assert_ne!(base, other_sql);
    }

    #[test]
    fn test_compose_and_pattern() {
        assert_eq!(compose_key("qcache:", Some("users"), "ab"), "qcache:users:ab");
        assert_eq!(compose_key("qcache:", None, "ab"), "qcache:unknown:ab");
        assert_eq!(model_pattern("qcache:", Some("users")), "qcache:users:*");
        assert_eq!(model_pattern("qcache:", None), "qcache:*");
    }
}
