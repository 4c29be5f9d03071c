//! Optional YAML tuning file.
//!
//! Only the keys in [`CONSUMED_POINTERS`] are read. Any other leaf is
//! rejected with `CONFIG_UNUSED_KEYS` so a typo never silently falls back to
//! a default.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;

/// JSON-pointer prefixes read from the file. A leaf is consumed when it sits
/// at or under one of these.
pub const CONSUMED_POINTERS: &[&str] = &[
    "/database/max_connections",
    "/worker/concurrency",
    "/worker/resync_interval_secs",
    "/worker/query_timeout_ms",
    "/worker/retry/max_attempts",
    "/worker/retry/retry_delay_ms",
    "/worker/retry/rate_limit_cooldown_ms",
    "/worker/retry/max_rate_limit_cooldown_ms",
    "/worker/retry/honor_retry_after",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub worker: WorkerSection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DatabaseSection {
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct WorkerSection {
    pub concurrency: Option<usize>,
    pub resync_interval_secs: Option<u64>,
    pub query_timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry: RetrySection,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RetrySection {
    pub max_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub rate_limit_cooldown_ms: Option<u64>,
    pub max_rate_limit_cooldown_ms: Option<u64>,
    pub honor_retry_after: Option<bool>,
}

pub fn load_file(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("CONFIG_FILE_UNREADABLE: failed to read yaml path: {}", path.display()))?;
    parse_file_str(&raw)
}

pub fn parse_file_str(raw: &str) -> Result<FileConfig> {
    let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("CONFIG_FILE_INVALID: invalid yaml")?;
    if v_yaml.is_null() {
        // Empty file.
        return Ok(FileConfig::default());
    }
    let v_json = serde_json::to_value(v_yaml).context("yaml->json conversion failed")?;

    let unused = unused_leaf_pointers(&v_json);
    if !unused.is_empty() {
        bail!(
            "CONFIG_UNUSED_KEYS: {} unknown config leaf key(s): {:?}",
            unused.len(),
            unused
        );
    }

    serde_json::from_value(v_json).context("CONFIG_FILE_INVALID: wrong value type")
}

/// Sorted leaves of `v` not covered by [`CONSUMED_POINTERS`].
fn unused_leaf_pointers(v: &Value) -> Vec<String> {
    let mut leaves = Vec::new();
    collect_leaf_pointers(v, "", &mut leaves);

    let unused: BTreeSet<String> = leaves
        .into_iter()
        .filter(|leaf| !CONSUMED_POINTERS.iter().any(|p| is_prefix_pointer(p, leaf)))
        .collect();
    unused.into_iter().collect()
}

/// "/a/b" covers "/a/b" and "/a/b/c" but not "/a/bc".
fn is_prefix_pointer(prefix: &str, leaf: &str) -> bool {
    if leaf == prefix {
        return true;
    }
    leaf.strip_prefix(prefix)
        .map(|rest| rest.starts_with('/'))
        .unwrap_or(false)
}

fn collect_leaf_pointers(v: &Value, prefix: &str, out: &mut Vec<String>) {
    match v {
        Value::Object(map) if !map.is_empty() => {
            for (k, vv) in map.iter() {
                let next = format!("{}/{}", prefix, k.replace('~', "~0").replace('/', "~1"));
                collect_leaf_pointers(vv, &next, out);
            }
        }
        Value::Array(arr) if !arr.is_empty() => {
            for (i, vv) in arr.iter().enumerate() {
                collect_leaf_pointers(vv, &format!("{prefix}/{i}"), out);
            }
        }
        _ => out.push(if prefix.is_empty() {
            "/".to_string()
        } else {
            prefix.to_string()
        }),
    }
}
