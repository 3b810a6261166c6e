//! Per-resource-type collectors
//!
//! The set of collectors is closed: `ResourceCollector` has one variant per
//! `ResourceType`. Every variant gathers through a `CollectContext`, which applies the
//! shared retry policy, keyword matching and bookkeeping, so the type-specific modules
//! only decide what to fetch.

pub mod cache;
pub mod compute_cluster;
pub mod database;
pub mod firewall;
pub mod load_balancer;
pub mod search_domain;
pub mod stack;

pub use cache::CacheCollector;
pub use compute_cluster::ComputeClusterCollector;
pub use database::DatabaseCollector;
pub use firewall::FirewallCollector;
pub use load_balancer::LoadBalancerCollector;
pub use search_domain::SearchDomainCollector;
pub use stack::StackCollector;

use crate::error::{CollectionError, ProviderError};
use crate::model::{
    CollectionResult, LogExcerpt, MetricSample, ResourceRef, ResourceType, TimeWindow, Timestamp,
};
use crate::retry::{retry_with_backoff, BackoffPolicy};
use crate::session::{CloudSession, DataPoint, LogQuery, MetricQuery, Statistic};
use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Metric period requested from the provider
pub const PERIOD_SECONDS: u32 = 300;

/// Inputs shared by every collection task of a run
#[derive(Debug, Clone)]
pub struct CollectOptions {
    /// Time range to collect
    pub window: TimeWindow,
    /// Keywords that make a log line worth keeping
    pub keywords: Vec<String>,
    /// Backoff applied to every provider call
    pub policy: BackoffPolicy,
    /// Deadline for one resource
    pub timeout: Duration,
}

/// Metrics fetched for one resource type
pub struct MetricPlan {
    pub namespace: &'static str,
    pub metrics: &'static [(&'static str, Statistic)],
}

/// Closed set of collectors, one per resource type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceCollector {
    ComputeCluster(ComputeClusterCollector),
    LoadBalancer(LoadBalancerCollector),
    Database(DatabaseCollector),
    SearchDomain(SearchDomainCollector),
    Cache(CacheCollector),
    Firewall(FirewallCollector),
    Stack(StackCollector),
}

impl ResourceCollector {
    pub fn for_type(resource_type: ResourceType) -> Self {
        match resource_type {
            ResourceType::ComputeCluster => Self::ComputeCluster(ComputeClusterCollector),
            ResourceType::LoadBalancer => Self::LoadBalancer(LoadBalancerCollector),
            ResourceType::Database => Self::Database(DatabaseCollector),
            ResourceType::SearchDomain => Self::SearchDomain(SearchDomainCollector),
            ResourceType::Cache => Self::Cache(CacheCollector),
            ResourceType::Firewall => Self::Firewall(FirewallCollector),
            ResourceType::Stack => Self::Stack(StackCollector),
        }
    }

    /// Collect metrics and log excerpts for one resource
    ///
    /// Never fails: problems are reported through `CollectionResult::error`. When the
    /// deadline expires the data gathered so far is kept and marked partial. When every
    /// provider call failed the result carries no data.
    pub async fn collect(
        &self,
        session: Arc<dyn CloudSession>,
        resource: ResourceRef,
        options: &CollectOptions,
    ) -> CollectionResult {
        let ctx = CollectContext::new(session, resource, options);

        let outcome = tokio::time::timeout(options.timeout, self.gather(&ctx)).await;
        let timed_out = outcome.is_err();
        if timed_out {
            warn!(
                "Collection for {} timed out after {:?}",
                ctx.resource, options.timeout
            );
        }

        ctx.finish(timed_out)
    }

    async fn gather(&self, ctx: &CollectContext) {
        match self {
            Self::ComputeCluster(collector) => collector.gather(ctx).await,
            Self::LoadBalancer(collector) => collector.gather(ctx).await,
            Self::Database(collector) => collector.gather(ctx).await,
            Self::SearchDomain(collector) => collector.gather(ctx).await,
            Self::Cache(collector) => collector.gather(ctx).await,
            Self::Firewall(collector) => collector.gather(ctx).await,
            Self::Stack(collector) => collector.gather(ctx).await,
        }
    }
}

/// Keywords found in `text`, compared case-insensitively
///
/// The returned set holds the keywords as configured, not as they appear in the text.
pub fn match_keywords(text: &str, keywords: &[String]) -> BTreeSet<String> {
    let haystack = text.to_lowercase();
    keywords
        .iter()
        .filter(|keyword| !keyword.is_empty() && haystack.contains(&keyword.to_lowercase()))
        .cloned()
        .collect()
}

#[derive(Default)]
struct Scratch {
    metrics: Vec<MetricSample>,
    logs: Vec<LogExcerpt>,
    missing_metrics: Vec<String>,
    attributes: BTreeMap<String, String>,
    succeeded: usize,
    failures: Vec<ProviderError>,
}

/// State of one collection in progress
///
/// Every fetch goes through the retry policy and is recorded as it completes, so a
/// deadline that cancels the gather future leaves all finished work in place.
pub struct CollectContext {
    session: Arc<dyn CloudSession>,
    resource: ResourceRef,
    window: TimeWindow,
    keywords: Vec<String>,
    policy: BackoffPolicy,
    scratch: Mutex<Scratch>,
}

impl CollectContext {
    fn new(session: Arc<dyn CloudSession>, resource: ResourceRef, options: &CollectOptions) -> Self {
        Self {
            session,
            resource,
            window: options.window,
            keywords: options.keywords.clone(),
            policy: options.policy,
            scratch: Mutex::new(Scratch::default()),
        }
    }

    pub fn resource(&self) -> &ResourceRef {
        &self.resource
    }

    pub fn window(&self) -> TimeWindow {
        self.window
    }

    fn with_scratch<R>(&self, f: impl FnOnce(&mut Scratch) -> R) -> R {
        let mut scratch = self.scratch.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut scratch)
    }

    fn record_failure(&self, what: &str, err: ProviderError) {
        debug!("{} for {} failed: {}", what, self.resource, err);
        self.with_scratch(|s| s.failures.push(err));
    }

    /// Fetch every metric of a plan in the resource's region
    pub async fn fetch_plan(
        &self,
        plan: &MetricPlan,
        dimensions: &[(&str, String)],
    ) -> HashMap<&'static str, Vec<DataPoint>> {
        let region = self.resource.region.clone();
        self.fetch_plan_in(plan, dimensions, &region).await
    }

    /// Fetch every metric of a plan, querying `region`
    ///
    /// Each metric is fetched and retried on its own. A metric whose retries run out
    /// is listed in `missing_metrics` and left out of the returned map.
    pub async fn fetch_plan_in(
        &self,
        plan: &MetricPlan,
        dimensions: &[(&str, String)],
        region: &str,
    ) -> HashMap<&'static str, Vec<DataPoint>> {
        let mut fetched = HashMap::new();
        for (name, statistic) in plan.metrics {
            let query = MetricQuery {
                namespace: plan.namespace.to_string(),
                metric_name: name.to_string(),
                dimensions: dimensions
                    .iter()
                    .map(|(key, value)| (key.to_string(), value.clone()))
                    .collect(),
                statistic: *statistic,
                period_seconds: PERIOD_SECONDS,
                start: self.window.start,
                end: self.window.end,
                region: region.to_string(),
            };
            if let Some(points) = self.fetch_metric(&query).await {
                fetched.insert(*name, points);
            }
        }
        fetched
    }

    async fn fetch_metric(&self, query: &MetricQuery) -> Option<Vec<DataPoint>> {
        let label = format!("{} {}", query.metric_name, self.resource);
        let result = retry_with_backoff(&self.policy, &label, || {
            self.session.fetch_metric(query)
        })
        .await;

        match result {
            Ok(mut points) => {
                points.sort_by_key(|point| point.timestamp);
                points.dedup_by_key(|point| point.timestamp);
                self.with_scratch(|s| {
                    s.succeeded += 1;
                    s.metrics.extend(points.iter().map(|point| MetricSample {
                        resource: self.resource.clone(),
                        name: query.metric_name.clone(),
                        unit: point.unit.clone(),
                        timestamp: point.timestamp,
                        value: point.value,
                    }));
                });
                Some(points)
            }
            Err(err) => {
                self.with_scratch(|s| s.missing_metrics.push(query.metric_name.clone()));
                self.record_failure(&label, err);
                None
            }
        }
    }

    /// Record a metric computed from fetched ones
    pub fn record_derived(&self, name: &str, unit: &str, timestamp: Timestamp, value: f64) {
        self.with_scratch(|s| {
            s.metrics.push(MetricSample {
                resource: self.resource.clone(),
                name: name.to_string(),
                unit: unit.to_string(),
                timestamp,
                value,
            })
        });
    }

    pub fn set_attribute(&self, key: &str, value: impl Into<String>) {
        let value = value.into();
        self.with_scratch(|s| s.attributes.insert(key.to_string(), value));
    }

    /// Log sources attached to the resource (empty when the lookup fails)
    pub async fn log_sources(&self) -> Vec<String> {
        let label = format!("log sources of {}", self.resource);
        let result = retry_with_backoff(&self.policy, &label, || {
            self.session.log_sources(&self.resource)
        })
        .await;

        match result {
            Ok(sources) => {
                self.with_scratch(|s| s.succeeded += 1);
                sources
            }
            Err(err) => {
                self.record_failure(&label, err);
                Vec::new()
            }
        }
    }

    /// Fetch one log source and keep the lines matching at least one keyword
    pub async fn scan_logs(&self, source: &str) {
        let query = LogQuery {
            source: source.to_string(),
            start: self.window.start,
            end: self.window.end,
            region: self.resource.region.clone(),
        };
        let label = format!("logs {} of {}", source, self.resource);
        let result = retry_with_backoff(&self.policy, &label, || {
            self.session.fetch_logs(&query)
        })
        .await;

        match result {
            Ok(lines) => {
                let excerpts: Vec<LogExcerpt> = lines
                    .into_iter()
                    .filter_map(|line| {
                        let matched = match_keywords(&line.message, &self.keywords);
                        (!matched.is_empty()).then(|| LogExcerpt {
                            resource: self.resource.clone(),
                            source: source.to_string(),
                            timestamp: line.timestamp,
                            text: line.message,
                            matched_keywords: matched,
                        })
                    })
                    .collect();
                self.with_scratch(|s| {
                    s.succeeded += 1;
                    s.logs.extend(excerpts);
                });
            }
            Err(err) => self.record_failure(&label, err),
        }
    }

    /// Provider-reported status of the resource
    pub async fn status(&self) -> Option<String> {
        let label = format!("status of {}", self.resource);
        let result = retry_with_backoff(&self.policy, &label, || {
            self.session.describe_status(&self.resource)
        })
        .await;

        match result {
            Ok(status) => {
                self.with_scratch(|s| s.succeeded += 1);
                status
            }
            Err(err) => {
                self.record_failure(&label, err);
                None
            }
        }
    }

    fn finish(self, timed_out: bool) -> CollectionResult {
        let resource = self.resource;
        let scratch = self
            .scratch
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner);

        let mut result = CollectionResult {
            resource,
            metrics: scratch.metrics,
            logs: scratch.logs,
            error: None,
            partial: false,
            missing_metrics: scratch.missing_metrics,
            attributes: scratch.attributes,
        };

        if timed_out {
            result.partial = !result.metrics.is_empty() || !result.logs.is_empty();
            result.error = Some(CollectionError::Timeout);
        } else if scratch.succeeded == 0 && !scratch.failures.is_empty() {
            result.error = Some(classify_failures(&scratch.failures));
            result.metrics.clear();
            result.logs.clear();
            result.attributes.clear();
        }
        result
    }
}

/// Error for a collection in which every provider call failed
fn classify_failures(failures: &[ProviderError]) -> CollectionError {
    if failures
        .iter()
        .any(|e| matches!(e, ProviderError::Unauthorized(_)))
    {
        CollectionError::Unauthorized
    } else if failures
        .iter()
        .any(|e| matches!(e, ProviderError::Throttled(_)))
    {
        CollectionError::RateLimited
    } else {
        let detail = failures
            .first()
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no provider call succeeded".to_string());
        CollectionError::Unknown(detail)
    }
}

/// Per-timestamp ratio `part / (part + rest)` in percent
///
/// Timestamps missing from either series, or with a zero total, are skipped.
pub fn percentage_series(part: &[DataPoint], rest: &[DataPoint]) -> Vec<(Timestamp, f64)> {
    let rest_by_time: HashMap<Timestamp, f64> =
        rest.iter().map(|p| (p.timestamp, p.value)).collect();
    part.iter()
        .filter_map(|p| {
            let other = rest_by_time.get(&p.timestamp)?;
            let total = p.value + other;
            (total > 0.0).then(|| (p.timestamp, p.value / total * 100.0))
        })
        .collect()
}



#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn prop_matched_keywords_are_configured_and_present(text: String, keywords: Vec<String>) -> bool {
        let matched = match_keywords(&text, &keywords);
        let lower = text.to_lowercase();
        matched
            .iter()
            .all(|k| keywords.contains(k) && lower.contains(&k.to_lowercase()))
    }

    #[quickcheck]
    fn prop_keyword_in_text_is_matched(prefix: String, suffix: String) -> bool {
        let keywords = vec!["Exception".to_string()];
        let text = format!("{}EXCEPTION{}", prefix, suffix);
        match_keywords(&text, &keywords).contains("Exception")
    }
}
