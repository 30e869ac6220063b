//! Snapshot policies
//!
//! A repository holds one global [`Policy`] and optional per-source
//! overrides. Every field is optional; the effective policy for a source is
//! the built-in defaults, overridden by the global policy, overridden by the
//! source policy.

use crate::manifest::SourceInfo;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default number of newest snapshots kept
pub const DEFAULT_KEEP_LATEST: u32 = 10;
/// Default number of hourly snapshots kept
pub const DEFAULT_KEEP_HOURLY: u32 = 48;
/// Default number of daily snapshots kept
pub const DEFAULT_KEEP_DAILY: u32 = 7;
/// Default number of weekly snapshots kept
pub const DEFAULT_KEEP_WEEKLY: u32 = 4;
/// Default number of monthly snapshots kept
pub const DEFAULT_KEEP_MONTHLY: u32 = 24;
/// Default number of annual snapshots kept
pub const DEFAULT_KEEP_ANNUAL: u32 = 3;

/// Which snapshots survive retention
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Newest snapshots always kept
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_latest: Option<u32>,
    /// Hourly buckets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_hourly: Option<u32>,
    /// Daily buckets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_daily: Option<u32>,
    /// Weekly buckets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_weekly: Option<u32>,
    /// Monthly buckets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_monthly: Option<u32>,
    /// Annual buckets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_annual: Option<u32>,
}

impl RetentionPolicy {
    /// Built-in retention
    #[must_use]
    pub const fn defaults() -> Self {
        Self {
            keep_latest: Some(DEFAULT_KEEP_LATEST),
            keep_hourly: Some(DEFAULT_KEEP_HOURLY),
            keep_daily: Some(DEFAULT_KEEP_DAILY),
            keep_weekly: Some(DEFAULT_KEEP_WEEKLY),
            keep_monthly: Some(DEFAULT_KEEP_MONTHLY),
            keep_annual: Some(DEFAULT_KEEP_ANNUAL),
        }
    }

    /// Override fields set in `other`
    #[must_use]
    pub fn merge(self, other: &Self) -> Self {
        Self {
            keep_latest: other.keep_latest.or(self.keep_latest),
            keep_hourly: other.keep_hourly.or(self.keep_hourly),
            keep_daily: other.keep_daily.or(self.keep_daily),
            keep_weekly: other.keep_weekly.or(self.keep_weekly),
            keep_monthly: other.keep_monthly.or(self.keep_monthly),
            keep_annual: other.keep_annual.or(self.keep_annual),
        }
    }
}

/// Which entries are uploaded
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilesPolicy {
    /// Names to skip: exact match, or `*suffix`
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ignore: Vec<String>,
}

impl FilesPolicy {
    /// Check an entry name against the ignore patterns
    #[must_use]
    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignore.iter().any(|pattern| match pattern.strip_prefix('*') {
            Some(suffix) => name.ends_with(suffix),
            None => name == pattern,
        })
    }

    /// Union of both pattern lists
    #[must_use]
    pub fn merge(mut self, other: &Self) -> Self {
        for pattern in &other.ignore {
            if !self.ignore.contains(pattern) {
                self.ignore.push(pattern.clone());
            }
        }
        self
    }
}

/// When snapshots are taken
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulingPolicy {
    /// Snapshots are only taken on request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manual: Option<bool>,
    /// Interval between automatic snapshots
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
}

impl SchedulingPolicy {
    /// Override fields set in `other`
    #[must_use]
    pub fn merge(self, other: &Self) -> Self {
        Self {
            manual: other.manual.or(self.manual),
            interval_secs: other.interval_secs.or(self.interval_secs),
        }
    }

    /// Check if manual scheduling is in effect
    #[inline]
    #[must_use]
    pub fn is_manual(&self) -> bool {
        self.manual.unwrap_or(false)
    }
}

/// Policy document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// Retention
    pub retention: RetentionPolicy,
    /// File selection
    pub files: FilesPolicy,
    /// Scheduling
    pub scheduling: SchedulingPolicy,
}

impl Policy {
    /// Built-in defaults
    #[must_use]
    pub fn defaults() -> Self {
        Self {
            retention: RetentionPolicy::defaults(),
            ..Self::default()
        }
    }

    /// Layer `other` on top of this policy
    #[must_use]
    pub fn merge(self, other: &Self) -> Self {
        Self {
            retention: self.retention.merge(&other.retention),
            files: self.files.merge(&other.files),
            scheduling: self.scheduling.merge(&other.scheduling),
        }
    }

    /// Set manual scheduling
    #[inline]
    #[must_use]
    pub fn with_manual(mut self, manual: bool) -> Self {
        self.scheduling.manual = Some(manual);
        self
    }

    /// Add an ignore pattern
    #[inline]
    #[must_use]
    pub fn with_ignore(mut self, pattern: impl Into<String>) -> Self {
        self.files.ignore.push(pattern.into());
        self
    }
}

/// What a stored policy applies to
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PolicyTarget {
    /// Whole repository
    Global,
    /// One snapshot source
    Source(SourceInfo),
}

impl PolicyTarget {
    /// Storage key
    #[must_use]
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PolicyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => f.write_str("(global)"),
            Self::Source(source) => fmt::Display::fmt(source, f),
        }
    }
}
