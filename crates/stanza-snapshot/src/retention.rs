//! Snapshot retention
//!
//! Complete manifests are walked newest first. A manifest survives if it is
//! among the `keep_latest` newest, or if it is the newest one in an hourly,
//! daily, weekly, monthly or annual bucket that is still within its count.
//! Incomplete manifests older than the newest complete one are expired.

use chrono::{DateTime, Utc};
use stanza_repo::{Manifest, ManifestId, RepoResult, Repository, RetentionPolicy, SourceInfo};
use std::collections::HashSet;
use tracing::info;

const BUCKET_FORMATS: [&str; 5] = ["%Y-%m-%d %H", "%Y-%m-%d", "%G-W%V", "%Y-%m", "%Y"];

fn bucket_limits(policy: &RetentionPolicy) -> [u32; 5] {
    [
        policy.keep_hourly.unwrap_or(0),
        policy.keep_daily.unwrap_or(0),
        policy.keep_weekly.unwrap_or(0),
        policy.keep_monthly.unwrap_or(0),
        policy.keep_annual.unwrap_or(0),
    ]
}

fn bucket_key(time: &DateTime<Utc>, format: &str) -> String {
    time.format(format).to_string()
}

/// Manifests the policy expires, newest first
///
/// `protect` is never returned.
#[must_use]
pub fn expired_manifests(
    manifests: &[Manifest],
    policy: &RetentionPolicy,
    protect: Option<&ManifestId>,
) -> Vec<ManifestId> {
    let mut newest_first: Vec<&Manifest> = manifests.iter().collect();
    newest_first.sort_by(|a, b| b.start_time.cmp(&a.start_time));

    let newest_complete = newest_first
        .iter()
        .find(|m| m.is_complete())
        .map(|m| m.start_time);
    let keep_latest = policy.keep_latest.unwrap_or(0) as usize;
    let limits = bucket_limits(policy);
    let mut seen: [HashSet<String>; 5] = Default::default();
    let mut complete_index = 0usize;
    let mut expired = Vec::new();

    for manifest in newest_first {
        let keep = if manifest.is_complete() {
            let mut keep = complete_index < keep_latest;
            complete_index += 1;
            for ((format, limit), seen) in BUCKET_FORMATS.iter().zip(limits).zip(seen.iter_mut()) {
                let key = bucket_key(&manifest.start_time, format);
                if !seen.contains(&key) && seen.len() < limit as usize {
                    seen.insert(key);
                    keep = true;
                }
            }
            keep
        } else {
            newest_complete.map_or(true, |newest| manifest.start_time >= newest)
        };

        if !keep && protect != Some(&manifest.id) {
            expired.push(manifest.id.clone());
        }
    }
    expired
}

/// Delete the manifests of `source` that its retention policy expires
///
/// Returns the deleted ids.
///
/// # Errors
/// Repository errors listing or deleting manifests
pub async fn apply_retention_policy(
    repo: &dyn Repository,
    source: &SourceInfo,
    protect: Option<&ManifestId>,
) -> RepoResult<Vec<ManifestId>> {
    let policy = repo.effective_policy(source).await?;
    let manifests = repo.list_manifests(source).await?;
    let expired = expired_manifests(&manifests, &policy.retention, protect);
    for id in &expired {
        info!(%source, manifest = %id, "Deleting expired snapshot");
        repo.delete_manifest(id).await?;
    }
    Ok(expired)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use stanza_repo::{ContentId, ObjectId, SnapshotStats};

    fn manifest(id: &str, start: DateTime<Utc>, incomplete: &str) -> Manifest {
        Manifest {
            id: ManifestId::from_string(id),
            source: SourceInfo::new("u", "h", "/p"),
            description: String::new(),
            start_time: start,
            end_time: start,
            root_object_id: ObjectId::new(ContentId::compute(id.as_bytes())),
            incomplete_reason: incomplete.to_string(),
            stats: SnapshotStats::default(),
        }
    }

    fn only_latest(n: u32) -> RetentionPolicy {
        RetentionPolicy {
            keep_latest: Some(n),
            ..RetentionPolicy::default()
        }
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn keep_latest_only() {
        let manifests: Vec<_> = (0..5)
            .map(|i| manifest(&format!("m{i}"), base() + Duration::minutes(i), ""))
            .collect();
        let expired = expired_manifests(&manifests, &only_latest(2), None);
        assert_eq!(
            expired,
            vec![
                ManifestId::from_string("m2"),
                ManifestId::from_string("m1"),
                ManifestId::from_string("m0")
            ]
        );
    }

    #[test]
    fn daily_buckets_keep_newest_of_each_day() {
        let manifests = vec![
            manifest("d1-early", base(), ""),
            manifest("d1-late", base() + Duration::hours(2), ""),
            manifest("d2", base() + Duration::days(1), ""),
        ];
        let policy = RetentionPolicy {
            keep_daily: Some(2),
            ..RetentionPolicy::default()
        };
        let expired = expired_manifests(&manifests, &policy, None);
        assert_eq!(expired, vec![ManifestId::from_string("d1-early")]);
    }

    #[test]
    fn stale_incomplete_manifests_expire() {
        let manifests = vec![
            manifest("old-partial", base(), "cancelled"),
            manifest("done", base() + Duration::minutes(1), ""),
            manifest("new-partial", base() + Duration::minutes(2), "cancelled"),
        ];
        let expired = expired_manifests(&manifests, &only_latest(5), None);
        assert_eq!(expired, vec![ManifestId::from_string("old-partial")]);
    }

    #[test]
    fn protected_manifest_survives() {
        let manifests = vec![
            manifest("a", base(), ""),
            manifest("b", base() + Duration::minutes(1), ""),
        ];
        let protect = ManifestId::from_string("a");
        let expired = expired_manifests(&manifests, &only_latest(0), Some(&protect));
        assert_eq!(expired, vec![ManifestId::from_string("b")]);
    }

    #[test]
    fn defaults_keep_recent_history() {
        let manifests: Vec<_> = (0..12)
            .map(|i| manifest(&format!("m{i:02}"), base() + Duration::minutes(i), ""))
            .collect();
        let expired = expired_manifests(&manifests, &RetentionPolicy::defaults(), None);
        // 12 snapshots within one hour: 10 latest kept, the hourly bucket is
        // already claimed by the newest.
        assert_eq!(
            expired,
            vec![ManifestId::from_string("m01"), ManifestId::from_string("m00")]
        );
    }
}
