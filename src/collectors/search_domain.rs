use crate::collectors::{CollectContext, MetricPlan};
use crate::session::Statistic;

const PLAN: MetricPlan = MetricPlan {
    namespace: "AWS/ES",
    metrics: &[
        ("CPUUtilization", Statistic::Average),
        ("FreeStorageSpace", Statistic::Average),
        ("SearchLatency", Statistic::Average),
        ("IndexingLatency", Statistic::Average),
        ("ClusterStatus.red", Statistic::Maximum),
        ("ClusterStatus.yellow", Statistic::Maximum),
    ],
};

/// Managed search domain: cluster health, storage and latency
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchDomainCollector;

impl SearchDomainCollector {
    pub async fn gather(&self, ctx: &CollectContext) {
        let domain = ctx.resource().short_name().to_string();
        ctx.fetch_plan(&PLAN, &[("DomainName", domain)]).await;
    }
}

#[cfg(test)]
mod tests {
    use crate::collectors::test_support::*;
    use crate::collectors::ResourceCollector;
    use crate::model::{ResourceRef, ResourceType};
    use crate::session::FixtureSession;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_collects_cluster_status() {
        let session = FixtureSession::new()
            .with_metric("logs", "ClusterStatus.red", points(&[0.0, 1.0], "Count"))
            .with_metric("logs", "FreeStorageSpace", points(&[2048.0], "Megabytes"));
        let resource = ResourceRef::new(
            ResourceType::SearchDomain,
            "arn:aws:es:us-east-2:123:domain/logs",
            "us-east-2",
        );

        let result = ResourceCollector::for_type(ResourceType::SearchDomain)
            .collect(Arc::new(session), resource, &create_test_options())
            .await;

        assert!(result.error.is_none());
        let red: Vec<f64> = result
            .samples("ClusterStatus.red")
            .iter()
            .map(|(_, s)| s.value)
            .collect();
        assert_eq!(red, vec![0.0, 1.0]);
        assert!(result.samples("ClusterStatus.yellow").is_empty());
    }
}
