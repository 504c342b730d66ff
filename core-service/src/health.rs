//! Cache health report
//!
//! Turns [`CacheStats`] into a three-level status and a list of suggested
//! actions for the host UI.

use core_cache::{CacheHealth, CacheStats};
use core_runtime::config::HealthThresholds;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall sync health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    NeedsAttention,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::NeedsAttention => "needs_attention",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub last_full_sync: Option<i64>,
    pub last_incremental_sync: Option<i64>,
    pub total_documents: i64,
    pub stale_documents: i64,
    pub unindexed_documents: i64,
    pub recent_failures: i64,
    pub recommendations: Vec<String>,
}

/// Build a report from cache statistics
///
/// `full_sync_staleness_secs` is the age after which the last full sync is
/// considered too old.
pub fn assess(
    stats: &CacheStats,
    thresholds: &HealthThresholds,
    full_sync_staleness_secs: i64,
    now: i64,
) -> HealthReport {
    let too_many_failures = stats.recent_failures > thresholds.error_failure_threshold;
    let too_many_stale = stats.stale_documents > thresholds.needs_sync_stale_threshold;

    let mut recommendations = Vec::new();
    if too_many_stale {
        recommendations.push(
            "Many documents have not synced recently; consider running an incremental sync"
                .to_string(),
        );
    }
    if stats.unindexed_documents > thresholds.unindexed_recommendation_threshold {
        recommendations
            .push("Many documents need indexing; consider re-indexing the cache".to_string());
    }
    if too_many_failures {
        recommendations.push(
            "Multiple recent sync failures; check logs and consider running a full sync"
                .to_string(),
        );
    }
    let full_sync_overdue = stats
        .last_full_sync
        .map_or(true, |at| now - at > full_sync_staleness_secs);
    if full_sync_overdue {
        recommendations.push(format!(
            "No full sync in {} days; consider running a full sync",
            full_sync_staleness_secs / 86_400
        ));
    }

    let status = if stats.sync_health == CacheHealth::Error || too_many_failures {
        HealthStatus::Unhealthy
    } else if stats.sync_health == CacheHealth::NeedsSync || too_many_stale {
        HealthStatus::NeedsAttention
    } else {
        HealthStatus::Healthy
    };

    HealthReport {
        status,
        last_full_sync: stats.last_full_sync,
        last_incremental_sync: stats.last_incremental_sync,
        total_documents: stats.total_documents,
        stale_documents: stats.stale_documents,
        unindexed_documents: stats.unindexed_documents,
        recent_failures: stats.recent_failures,
        recommendations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WEEK: i64 = 7 * 86_400;
    const NOW: i64 = 1_700_000_000;

    fn stats() -> CacheStats {
        CacheStats {
            total_documents: 10,
            total_images: 2,
            unindexed_documents: 0,
            stale_documents: 0,
            last_full_sync: Some(NOW - 3600),
            last_incremental_sync: None,
            recent_failures: 0,
            cache_size_mb: Some(0.5),
            sync_health: CacheHealth::Healthy,
        }
    }

    #[test]
    fn test_fresh_cache_is_healthy() {
        let report = assess(&stats(), &HealthThresholds::default(), WEEK, NOW);

        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.recommendations.is_empty());
        assert_eq!(report.total_documents, 10);
    }

    #[test]
    fn test_stale_documents_need_attention() {
        let mut stats = stats();
        stats.stale_documents = 101;

        let report = assess(&stats, &HealthThresholds::default(), WEEK, NOW);

        assert_eq!(report.status, HealthStatus::NeedsAttention);
        assert_eq!(report.recommendations.len(), 1);
        assert!(report.recommendations[0].contains("incremental sync"));
    }

    #[test]
    fn test_boundaries_are_exclusive() {
        let mut stats = stats();
        stats.stale_documents = 100;
        stats.unindexed_documents = 50;
        stats.recent_failures = 5;

        let report = assess(&stats, &HealthThresholds::default(), WEEK, NOW);

        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.recommendations.is_empty());
    }

    #[test]
    fn test_recent_failures_are_unhealthy() {
        let mut stats = stats();
        stats.recent_failures = 6;
        stats.stale_documents = 500;

        let report = assess(&stats, &HealthThresholds::default(), WEEK, NOW);

        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(report
            .recommendations
            .iter()
            .any(|r| r.contains("check logs")));
    }

    #[test]
    fn test_cache_label_drives_status() {
        let mut stats = stats();
        stats.sync_health = CacheHealth::NeedsSync;
        assert_eq!(
            assess(&stats, &HealthThresholds::default(), WEEK, NOW).status,
            HealthStatus::NeedsAttention
        );

        stats.sync_health = CacheHealth::Error;
        assert_eq!(
            assess(&stats, &HealthThresholds::default(), WEEK, NOW).status,
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn test_missing_or_old_full_sync_is_recommended() {
        let mut stats = stats();
        stats.last_full_sync = None;
        stats.unindexed_documents = 80;

        let report = assess(&stats, &HealthThresholds::default(), WEEK, NOW);
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.recommendations.len(), 2);
        assert!(report.recommendations[1].contains("No full sync in 7 days"));

        stats.last_full_sync = Some(NOW - WEEK - 1);
        stats.unindexed_documents = 0;
        let report = assess(&stats, &HealthThresholds::default(), WEEK, NOW);
        assert_eq!(report.recommendations.len(), 1);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&HealthStatus::NeedsAttention).unwrap(),
            "\"needs_attention\""
        );
    }
}
