use crate::collectors::{CollectContext, MetricPlan};
use crate::session::Statistic;
use log::debug;

const PLAN: MetricPlan = MetricPlan {
    namespace: "AWS/ECS",
    metrics: &[
        ("CPUUtilization", Statistic::Average),
        ("MemoryUtilization", Statistic::Average),
    ],
};

/// Container cluster: utilization metrics plus every service log source
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComputeClusterCollector;

impl ComputeClusterCollector {
    pub async fn gather(&self, ctx: &CollectContext) {
        let cluster = ctx.resource().short_name().to_string();
        ctx.fetch_plan(&PLAN, &[("ClusterName", cluster)]).await;

        let sources = ctx.log_sources().await;
        debug!(
            "Scanning {} log sources for {}",
            sources.len(),
            ctx.resource()
        );
        for source in &sources {
            ctx.scan_logs(source).await;
        }
    }
}
