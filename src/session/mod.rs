//! Pre-authenticated handles to the cloud provider
//!
//! The engine never resolves credentials itself: it is handed a `SessionSet` and issues
//! every provider call through the `CloudSession` trait.

pub mod fixture;
pub mod http;

pub use fixture::FixtureSession;
pub use http::HttpSession;

use crate::error::ProviderError;
use crate::model::{ResourceRef, ResourceType, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by session calls
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Statistic requested for a metric query
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Statistic {
    Average,
    Sum,
    Maximum,
    Minimum,
}

/// One metric time-series request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricQuery {
    /// Provider namespace, e.g. `AWS/RDS`
    pub namespace: String,
    pub metric_name: String,
    /// Dimension name/value pairs identifying the resource
    pub dimensions: Vec<(String, String)>,
    pub statistic: Statistic,
    pub period_seconds: u32,
    pub start: Timestamp,
    pub end: Timestamp,
    /// Region to query, which can differ from the resource region for global resources
    pub region: String,
}

/// One data point of a metric time series
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataPoint {
    pub timestamp: Timestamp,
    pub value: f64,
    pub unit: String,
}

/// Raw log lines request for one log source
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogQuery {
    pub source: String,
    pub start: Timestamp,
    pub end: Timestamp,
    pub region: String,
}

/// One raw log line
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogLine {
    pub timestamp: Timestamp,
    pub message: String,
}

/// Authenticated access to one provider account and region
pub trait CloudSession: Send + Sync {
    /// List identifiers of every live resource of a type
    fn list_resources<'a>(
        &'a self,
        resource_type: ResourceType,
        region: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, ProviderError>>;

    /// Log sources (groups or streams) attached to a resource
    fn log_sources<'a>(
        &'a self,
        resource: &'a ResourceRef,
    ) -> BoxFuture<'a, Result<Vec<String>, ProviderError>>;

    fn fetch_metric<'a>(
        &'a self,
        query: &'a MetricQuery,
    ) -> BoxFuture<'a, Result<Vec<DataPoint>, ProviderError>>;

    fn fetch_logs<'a>(
        &'a self,
        query: &'a LogQuery,
    ) -> BoxFuture<'a, Result<Vec<LogLine>, ProviderError>>;

    /// Provider-reported lifecycle status, when the resource type has one
    fn describe_status<'a>(
        &'a self,
        resource: &'a ResourceRef,
    ) -> BoxFuture<'a, Result<Option<String>, ProviderError>>;
}

/// Sessions for a run: one default, optionally overridden per resource type
#[derive(Clone)]
pub struct SessionSet {
    default: Arc<dyn CloudSession>,
    per_type: HashMap<ResourceType, Arc<dyn CloudSession>>,
}

impl SessionSet {
    pub fn new(default: Arc<dyn CloudSession>) -> Self {
        Self {
            default,
            per_type: HashMap::new(),
        }
    }

    /// Use a dedicated session for one resource type
    pub fn with_session(
        mut self,
        resource_type: ResourceType,
        session: Arc<dyn CloudSession>,
    ) -> Self {
        self.per_type.insert(resource_type, session);
        self
    }

    pub fn for_type(&self, resource_type: ResourceType) -> Arc<dyn CloudSession> {
        self.per_type
            .get(&resource_type)
            .cloned()
            .unwrap_or_else(|| self.default.clone())
    }
}
