// SPDX-License-Identifier: MIT

//! Version / Client Detection (spec §4.8): an npm-registry poll that never
//! blocks a tool call, a 12-hour on-disk cache, client fingerprinting from
//! `clientInfo.name`, and the update-notice text appended to tool
//! descriptions.
//!
//! Grounded on the simple `reqwest::get` call in
//! `oddurs-prime-hunter/src/project/records.rs::fetch_t5k_record` — the
//! teacher carries no HTTP client dependency at all for this concern.

use chrono::{DateTime, Duration, Utc};
use corral_storage::{atomic_write_json, read_json_tolerant, Layout, StorageError};
use serde::{Deserialize, Serialize};
use std::time::Duration as StdDuration;
use tracing::{debug, warn};

const REGISTRY_TIMEOUT: StdDuration = StdDuration::from_secs(3);
const CACHE_TTL_HOURS: i64 = 12;

/// On-disk shape of `cache.json` (spec §6): `{"version": {"latest", "checkedAt"}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheFile {
    version: VersionCacheEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionCacheEntry {
    pub latest: String,
    #[serde(rename = "checkedAt")]
    pub checked_at: DateTime<Utc>,
}

/// Who called in on `initialize`, classified by substring match on
/// `clientInfo.name` (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    Claude,
    Codex,
    Gemini,
    Unknown,
}

impl ClientKind {
    /// Classifies `claude|codex|gemini|unknown` by case-insensitive
    /// substring match (spec §4.8).
    pub fn classify(client_name: &str) -> Self {
        let lower = client_name.to_lowercase();
        if lower.contains("claude") {
            ClientKind::Claude
        } else if lower.contains("codex") {
            ClientKind::Codex
        } else if lower.contains("gemini") {
            ClientKind::Gemini
        } else {
            ClientKind::Unknown
        }
    }

    /// The shell command a caller of this kind should run to pick up a new
    /// version, referenced in the update notice.
    pub fn update_command(&self, package_name: &str) -> String {
        match self {
            ClientKind::Claude => format!("claude mcp update {package_name}"),
            ClientKind::Codex => format!("codex mcp update {package_name}"),
            ClientKind::Gemini => format!("gemini mcp update {package_name}"),
            ClientKind::Unknown => format!("npm install -g {package_name}@latest"),
        }
    }
}

/// Reads the cached `{latest, checkedAt}` pair, tolerating a missing or
/// malformed file (spec §4.6 `load_from_disk`-style tolerance).
pub fn load_cache(layout: &Layout) -> Option<VersionCacheEntry> {
    read_json_tolerant::<CacheFile>(&layout.cache_path()).map(|f| f.version)
}

/// Writes the cache atomically, reusing the same temp-file/rename helper as
/// `meta.json` and `config.json` (spec §4.8).
pub fn save_cache(layout: &Layout, entry: &VersionCacheEntry) -> Result<(), StorageError> {
    atomic_write_json(&layout.cache_path(), &CacheFile { version: entry.clone() })
}

fn is_fresh(entry: &VersionCacheEntry, now: DateTime<Utc>) -> bool {
    now - entry.checked_at < Duration::hours(CACHE_TTL_HOURS)
}

/// Fetches `{package_name}`'s latest published version from the npm
/// registry with a 3-second timeout. Returns `None` on any network, status,
/// or parse failure rather than propagating an error — a version-check
/// failure must never affect a tool call (spec §7).
async fn fetch_latest_version(package_name: &str) -> Option<String> {
    let client = reqwest::Client::builder().timeout(REGISTRY_TIMEOUT).build().ok()?;
    let url = format!("https://registry.npmjs.org/{package_name}/latest");

    let response = match client.get(&url).send().await {
        Ok(r) => r,
        Err(err) => {
            debug!(error = %err, "version registry request failed");
            return None;
        }
    };
    if !response.status().is_success() {
        debug!(status = %response.status(), "version registry returned non-success status");
        return None;
    }

    let body: serde_json::Value = match response.json().await {
        Ok(v) => v,
        Err(err) => {
            debug!(error = %err, "version registry response was not valid JSON");
            return None;
        }
    };
    body.get("version").and_then(|v| v.as_str()).map(str::to_string)
}

/// Returns the freshest known `{latest, checkedAt}`, refreshing from the
/// registry if the cache is stale or absent. Intended to run once at
/// startup as a detached task — never awaited by a tool call (spec §4.8:
/// "non-blocking").
pub async fn check_for_update(
    layout: &Layout,
    package_name: &str,
    now: DateTime<Utc>,
) -> Option<VersionCacheEntry> {
    if let Some(cached) = load_cache(layout) {
        if is_fresh(&cached, now) {
            return Some(cached);
        }
    }

    let latest = fetch_latest_version(package_name).await?;
    let entry = VersionCacheEntry { latest, checked_at: now };
    if let Err(err) = save_cache(layout, &entry) {
        warn!(error = %err, "failed to persist version cache");
    }
    Some(entry)
}

/// Lexicographic triple comparison of integer components (spec §4.8).
/// Missing trailing components compare as `0` (`"1.2"` == `"1.2.0"`).
pub fn compare_versions(a: &str, b: &str) -> std::cmp::Ordering {
    let parse = |v: &str| -> Vec<u64> {
        v.split('.').map(|part| part.parse::<u64>().unwrap_or(0)).collect()
    };
    let (pa, pb) = (parse(a), parse(b));
    let len = pa.len().max(pb.len());
    for i in 0..len {
        let (x, y) = (pa.get(i).copied().unwrap_or(0), pb.get(i).copied().unwrap_or(0));
        match x.cmp(&y) {
            std::cmp::Ordering::Equal => continue,
            other => return other,
        }
    }
    std::cmp::Ordering::Equal
}

pub fn is_outdated(current: &str, latest: &str) -> bool {
    compare_versions(current, latest) == std::cmp::Ordering::Less
}

/// The text appended to every tool description when a newer version is
/// available, or `None` when the caller is current (spec §4.8, §4.7).
pub fn update_notice(
    current_version: &str,
    latest: &str,
    client: ClientKind,
    package_name: &str,
) -> Option<String> {
    if !is_outdated(current_version, latest) {
        return None;
    }
    Some(format!(
        "Update available: {current_version} -> {latest}. Run `{}` to update.",
        client.update_command(package_name)
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;
    use tempfile::TempDir;

    #[test]
    fn classify_matches_substrings_case_insensitively() {
        assert_eq!(ClientKind::classify("Claude Desktop"), ClientKind::Claude);
        assert_eq!(ClientKind::classify("codex-cli"), ClientKind::Codex);
        assert_eq!(ClientKind::classify("GEMINI-code"), ClientKind::Gemini);
        assert_eq!(ClientKind::classify("some-other-host"), ClientKind::Unknown);
    }

    #[test]
    fn compare_versions_orders_by_triple() {
        assert_eq!(compare_versions("1.2.3", "1.2.4"), Ordering::Less);
        assert_eq!(compare_versions("2.0.0", "1.9.9"), Ordering::Greater);
        assert_eq!(compare_versions("1.2.0", "1.2"), Ordering::Equal);
    }

    #[test]
    fn outdated_iff_current_less_than_latest() {
        assert!(is_outdated("1.0.0", "1.0.1"));
        assert!(!is_outdated("1.0.1", "1.0.1"));
        assert!(!is_outdated("1.1.0", "1.0.9"));
    }

    #[test]
    fn update_notice_is_none_when_current() {
        assert_eq!(update_notice("1.0.0", "1.0.0", ClientKind::Claude, "corral"), None);
    }

    #[test]
    fn update_notice_names_client_specific_command() {
        let notice = update_notice("1.0.0", "1.1.0", ClientKind::Codex, "corral").expect("notice");
        assert!(notice.contains("codex mcp update corral"));
    }

    #[test]
    fn cache_roundtrips_through_disk() {
        let tmp = TempDir::new().expect("tempdir");
        let layout = Layout::new(tmp.path().to_path_buf());
        let entry = VersionCacheEntry {
            latest: "9.9.9".to_string(),
            checked_at: "2026-01-01T00:00:00Z".parse().expect("ts"),
        };
        save_cache(&layout, &entry).expect("save");
        assert_eq!(load_cache(&layout), Some(entry));
    }

    #[test]
    fn stale_cache_is_not_fresh() {
        let entry = VersionCacheEntry {
            latest: "1.0.0".to_string(),
            checked_at: "2026-01-01T00:00:00Z".parse().expect("ts"),
        };
        let now: DateTime<Utc> = "2026-01-02T01:00:00Z".parse().expect("ts");
        assert!(!is_fresh(&entry, now));
    }

    #[test]
    fn fresh_cache_within_ttl() {
        let entry = VersionCacheEntry {
            latest: "1.0.0".to_string(),
            checked_at: "2026-01-01T00:00:00Z".parse().expect("ts"),
        };
        let now: DateTime<Utc> = "2026-01-01T06:00:00Z".parse().expect("ts");
        assert!(is_fresh(&entry, now));
    }
}
