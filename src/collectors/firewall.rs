use crate::collectors::{percentage_series, CollectContext, MetricPlan};
use crate::session::Statistic;

const PLAN: MetricPlan = MetricPlan {
    namespace: "AWS/WAFV2",
    metrics: &[
        ("AllowedRequests", Statistic::Sum),
        ("BlockedRequests", Statistic::Sum),
    ],
};

/// Derived share of blocked requests, in percent
pub const BLOCKED_RATIO_METRIC: &str = "BlockedRequestRatio";

/// Region that serves metrics for globally scoped web ACLs
const GLOBAL_METRICS_REGION: &str = "us-east-1";

/// Where a web ACL is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclScope {
    Regional,
    Global,
}

impl AclScope {
    pub fn of(identifier: &str) -> Self {
        if identifier.contains(":global/") {
            AclScope::Global
        } else {
            AclScope::Regional
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AclScope::Regional => "regional",
            AclScope::Global => "global",
        }
    }
}

/// Web ACL name: the segment following `webacl/` in its ARN
pub fn acl_name(identifier: &str) -> &str {
    identifier
        .split_once("webacl/")
        .and_then(|(_, tail)| tail.split('/').next())
        .filter(|name| !name.is_empty())
        .unwrap_or(identifier)
}

/// Web application firewall ACL: allowed and blocked request counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FirewallCollector;

impl FirewallCollector {
    pub async fn gather(&self, ctx: &CollectContext) {
        let resource = ctx.resource();
        let scope = AclScope::of(&resource.identifier);
        ctx.set_attribute("scope", scope.as_str());

        let name = acl_name(&resource.identifier).to_string();
        let mut dimensions = vec![("WebACL", name), ("Rule", "ALL".to_string())];
        let metrics_region = match scope {
            AclScope::Global => GLOBAL_METRICS_REGION.to_string(),
            AclScope::Regional => {
                dimensions.push(("Region", resource.region.clone()));
                resource.region.clone()
            }
        };

        let fetched = ctx.fetch_plan_in(&PLAN, &dimensions, &metrics_region).await;
        if let (Some(blocked), Some(allowed)) = (
            fetched.get("BlockedRequests"),
            fetched.get("AllowedRequests"),
        ) {
            for (timestamp, ratio) in percentage_series(blocked, allowed) {
                ctx.record_derived(BLOCKED_RATIO_METRIC, "Percent", timestamp, ratio);
            }
        }
    }
}
