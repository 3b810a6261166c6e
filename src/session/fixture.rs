//! Recorded fleet snapshot served through the `CloudSession` trait
//!
//! Used to replay a captured environment offline and as the session double in tests.
//! Failures and delays can be programmed per target; a target is a resource type name,
//! a resource identifier, a metric dimension value, `<dimension>#<metric>`, or a log
//! source name.

use crate::error::{ConfigError, ProviderError};
use crate::model::{ResourceRef, ResourceType};
use crate::session::{BoxFuture, CloudSession, DataPoint, LogLine, LogQuery, MetricQuery};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// On-disk layout of a fixture file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FixtureData {
    #[serde(default)]
    pub resources: Vec<FixtureResource>,
    #[serde(default)]
    pub metrics: Vec<FixtureMetric>,
    #[serde(default)]
    pub logs: Vec<FixtureLogSource>,
    #[serde(default)]
    pub failures: Vec<FixtureFailure>,
    #[serde(default)]
    pub delays: Vec<FixtureDelay>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureResource {
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub identifier: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub log_sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureMetric {
    /// Value of the metric dimension identifying the resource
    pub dimension: String,
    pub metric: String,
    pub points: Vec<DataPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureLogSource {
    pub source: String,
    pub lines: Vec<LogLine>,
}

/// Error kinds a fixture can inject
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Throttled,
    Network,
    Timeout,
    Unauthorized,
    NotFound,
    InvalidResponse,
}

impl FailureKind {
    fn to_error(self, target: &str) -> ProviderError {
        let detail = format!("injected failure for {}", target);
        match self {
            FailureKind::Throttled => ProviderError::Throttled(detail),
            FailureKind::Network => ProviderError::Network(detail),
            FailureKind::Timeout => ProviderError::Timeout,
            FailureKind::Unauthorized => ProviderError::Unauthorized(detail),
            FailureKind::NotFound => ProviderError::NotFound(detail),
            FailureKind::InvalidResponse => ProviderError::InvalidResponse(detail),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureFailure {
    pub target: String,
    pub error: FailureKind,
    /// Number of calls that fail before the target recovers (always fails when unset)
    #[serde(default)]
    pub times: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureDelay {
    pub target: String,
    pub millis: u64,
}

struct FailureRule {
    target: String,
    error: ProviderError,
    remaining: Option<u32>,
}

/// In-memory session backed by fixture data
#[derive(Default)]
pub struct FixtureSession {
    resources: BTreeMap<ResourceType, Vec<String>>,
    statuses: HashMap<String, String>,
    log_sources: HashMap<String, Vec<String>>,
    metrics: HashMap<(String, String), Vec<DataPoint>>,
    logs: HashMap<String, Vec<LogLine>>,
    failures: Mutex<Vec<FailureRule>>,
    delays: HashMap<String, Duration>,
    call_count: AtomicUsize,
}

impl FixtureSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a fixture from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::ReadError(format!("Failed to read fixture {}: {}", path.display(), e))
        })?;
        let data: FixtureData = serde_json::from_str(&content).map_err(|e| {
            ConfigError::ParseError(format!("Invalid fixture {}: {}", path.display(), e))
        })?;
        Ok(Self::from_data(data))
    }

    pub fn from_data(data: FixtureData) -> Self {
        let mut session = Self::new();
        for resource in data.resources {
            session = session.with_resources(resource.resource_type, [&resource.identifier]);
            if let Some(status) = resource.status {
                session = session.with_status(&resource.identifier, status);
            }
            if !resource.log_sources.is_empty() {
                session = session.with_log_sources(&resource.identifier, resource.log_sources);
            }
        }
        for metric in data.metrics {
            session = session.with_metric(metric.dimension, metric.metric, metric.points);
        }
        for log in data.logs {
            session = session.with_logs(log.source, log.lines);
        }
        for failure in data.failures {
            let error = failure.error.to_error(&failure.target);
            session = match failure.times {
                Some(times) => session.with_failures(failure.target, error, times),
                None => session.with_failure(failure.target, error),
            };
        }
        for delay in data.delays {
            session = session.with_delay(delay.target, Duration::from_millis(delay.millis));
        }
        session
    }

    /// Add live resources of a type
    pub fn with_resources<I, S>(mut self, resource_type: ResourceType, identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.resources
            .entry(resource_type)
            .or_default()
            .extend(identifiers.into_iter().map(Into::into));
        self
    }

    pub fn with_status(mut self, identifier: impl Into<String>, status: impl Into<String>) -> Self {
        self.statuses.insert(identifier.into(), status.into());
        self
    }

    pub fn with_log_sources<I, S>(mut self, identifier: impl Into<String>, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.log_sources
            .entry(identifier.into())
            .or_default()
            .extend(sources.into_iter().map(Into::into));
        self
    }

    /// Add data points for one metric of one resource, keyed by dimension value
    pub fn with_metric(
        mut self,
        dimension: impl Into<String>,
        metric: impl Into<String>,
        points: Vec<DataPoint>,
    ) -> Self {
        self.metrics
            .entry((dimension.into(), metric.into()))
            .or_default()
            .extend(points);
        self
    }

    pub fn with_logs(mut self, source: impl Into<String>, lines: Vec<LogLine>) -> Self {
        self.logs.entry(source.into()).or_default().extend(lines);
        self
    }

    /// Make every call touching `target` fail
    pub fn with_failure(self, target: impl Into<String>, error: ProviderError) -> Self {
        self.push_failure(target.into(), error, None)
    }

    /// Make the first `times` calls touching `target` fail
    pub fn with_failures(self, target: impl Into<String>, error: ProviderError, times: u32) -> Self {
        self.push_failure(target.into(), error, Some(times))
    }

    /// Delay every call touching `target`
    pub fn with_delay(mut self, target: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(target.into(), delay);
        self
    }

    /// Number of session calls served so far
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    fn push_failure(self, target: String, error: ProviderError, remaining: Option<u32>) -> Self {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(FailureRule {
                target,
                error,
                remaining,
            });
        self
    }

    /// Apply programmed delays and failures for a call touching `targets`
    async fn intercept(&self, targets: &[String]) -> Result<(), ProviderError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);

        let delay = targets
            .iter()
            .filter_map(|target| self.delays.get(target))
            .max()
            .copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        for rule in failures.iter_mut() {
            if !targets.contains(&rule.target) || rule.remaining == Some(0) {
                continue;
            }
            if let Some(remaining) = rule.remaining.as_mut() {
                *remaining -= 1;
            }
            debug!("Fixture injecting failure for {}: {}", rule.target, rule.error);
            return Err(rule.error.clone());
        }
        Ok(())
    }
}

impl CloudSession for FixtureSession {
    fn list_resources<'a>(
        &'a self,
        resource_type: ResourceType,
        _region: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, ProviderError>> {
        Box::pin(async move {
            self.intercept(&[resource_type.as_str().to_string()]).await?;
            Ok(self
                .resources
                .get(&resource_type)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn log_sources<'a>(
        &'a self,
        resource: &'a ResourceRef,
    ) -> BoxFuture<'a, Result<Vec<String>, ProviderError>> {
        Box::pin(async move {
            self.intercept(&[resource.identifier.clone()]).await?;
            Ok(self
                .log_sources
                .get(&resource.identifier)
                .cloned()
                .unwrap_or_default())
        })
    }

    fn fetch_metric<'a>(
        &'a self,
        query: &'a MetricQuery,
    ) -> BoxFuture<'a, Result<Vec<DataPoint>, ProviderError>> {
        Box::pin(async move {
            let mut targets = Vec::new();
            for (_, value) in &query.dimensions {
                targets.push(value.clone());
                targets.push(format!("{}#{}", value, query.metric_name));
            }
            self.intercept(&targets).await?;

            Ok(query
                .dimensions
                .iter()
                .find_map(|(_, value)| {
                    self.metrics
                        .get(&(value.clone(), query.metric_name.clone()))
                })
                .cloned()
                .unwrap_or_default())
        })
    }

    fn fetch_logs<'a>(
        &'a self,
        query: &'a LogQuery,
    ) -> BoxFuture<'a, Result<Vec<LogLine>, ProviderError>> {
        Box::pin(async move {
            self.intercept(&[query.source.clone()]).await?;
            Ok(self.logs.get(&query.source).cloned().unwrap_or_default())
        })
    }

    fn describe_status<'a>(
        &'a self,
        resource: &'a ResourceRef,
    ) -> BoxFuture<'a, Result<Option<String>, ProviderError>> {
        Box::pin(async move {
            self.intercept(&[resource.identifier.clone()]).await?;
            Ok(self.statuses.get(&resource.identifier).cloned())
        })
    }
}
