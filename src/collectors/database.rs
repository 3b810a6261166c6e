use crate::collectors::{CollectContext, MetricPlan};
use crate::session::Statistic;

const PLAN: MetricPlan = MetricPlan {
    namespace: "AWS/RDS",
    metrics: &[
        ("CPUUtilization", Statistic::Average),
        ("FreeableMemory", Statistic::Average),
        ("DatabaseConnections", Statistic::Average),
    ],
};

/// Managed database instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatabaseCollector;

impl DatabaseCollector {
    pub async fn gather(&self, ctx: &CollectContext) {
        let instance = ctx.resource().short_name().to_string();
        ctx.fetch_plan(&PLAN, &[("DBInstanceIdentifier", instance)])
            .await;

        for source in ctx.log_sources().await {
            ctx.scan_logs(&source).await;
        }
    }
}
