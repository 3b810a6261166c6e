use crate::collectors::{CollectContext, MetricPlan};
use crate::session::Statistic;

const PLAN: MetricPlan = MetricPlan {
    namespace: "AWS/ApplicationELB",
    metrics: &[
        ("HTTPCode_Target_5XX_Count", Statistic::Sum),
        ("HTTPCode_ELB_5XX_Count", Statistic::Sum),
        ("RequestCount", Statistic::Sum),
        ("TargetResponseTime", Statistic::Average),
        ("UnHealthyHostCount", Statistic::Maximum),
    ],
};

/// Application load balancer: error counts, traffic, latency and target health
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadBalancerCollector;

impl LoadBalancerCollector {
    pub async fn gather(&self, ctx: &CollectContext) {
        let dimension = dimension_value(&ctx.resource().identifier);
        ctx.fetch_plan(&PLAN, &[("LoadBalancer", dimension)]).await;
    }
}

/// Metric dimension for a load balancer: the `app/<name>/<id>` tail of its ARN
pub fn dimension_value(identifier: &str) -> String {
    match identifier.split_once(":loadbalancer/") {
        Some((_, tail)) => tail.to_string(),
        None => identifier.to_string(),
    }
}
