use crate::collectors::{percentage_series, CollectContext, MetricPlan};
use crate::session::Statistic;

const PLAN: MetricPlan = MetricPlan {
    namespace: "AWS/ElastiCache",
    metrics: &[
        ("CPUUtilization", Statistic::Average),
        ("FreeableMemory", Statistic::Average),
        ("ReplicationLag", Statistic::Average),
        ("CacheHits", Statistic::Sum),
        ("CacheMisses", Statistic::Sum),
        ("Evictions", Statistic::Sum),
    ],
};

/// Derived hit rate, in percent of lookups
pub const HIT_RATE_METRIC: &str = "CacheHitRate";

/// In-memory cache cluster
///
/// Besides the raw counters it records `CacheHitRate` for every period in which both
/// hits and misses were reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheCollector;

impl CacheCollector {
    pub async fn gather(&self, ctx: &CollectContext) {
        let cluster = ctx.resource().short_name().to_string();
        let fetched = ctx.fetch_plan(&PLAN, &[("CacheClusterId", cluster)]).await;

        if let (Some(hits), Some(misses)) = (fetched.get("CacheHits"), fetched.get("CacheMisses")) {
            for (timestamp, rate) in percentage_series(hits, misses) {
                ctx.record_derived(HIT_RATE_METRIC, "Percent", timestamp, rate);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::test_support::*;
    use crate::collectors::ResourceCollector;
    use crate::error::ProviderError;
    use crate::model::{ResourceRef, ResourceType};
    use crate::session::FixtureSession;
    use std::sync::Arc;

    fn cache_ref() -> ResourceRef {
        ResourceRef::new(ResourceType::Cache, "sessions-001", "us-east-2")
    }

    #[tokio::test]
    async fn test_hit_rate_derived() {
        let session = FixtureSession::new()
            .with_metric("sessions-001", "CacheHits", points(&[75.0, 900.0], "Count"))
            .with_metric("sessions-001", "CacheMisses", points(&[25.0, 100.0], "Count"));

        let result = ResourceCollector::for_type(ResourceType::Cache)
            .collect(Arc::new(session), cache_ref(), &create_test_options())
            .await;

        let rates: Vec<f64> = result
            .samples(HIT_RATE_METRIC)
            .iter()
            .map(|(_, s)| s.value)
            .collect();
        assert_eq!(rates, vec![75.0, 90.0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_hit_rate_when_misses_missing() {
        let session = FixtureSession::new()
            .with_metric("sessions-001", "CacheHits", points(&[75.0], "Count"))
            .with_failure(
                "sessions-001#CacheMisses",
                ProviderError::Timeout,
            );

        let result = ResourceCollector::for_type(ResourceType::Cache)
            .collect(Arc::new(session), cache_ref(), &create_test_options())
            .await;

        assert!(result.samples(HIT_RATE_METRIC).is_empty());
        assert_eq!(result.missing_metrics, vec!["CacheMisses".to_string()]);
    }
}
