//! Core data model for a diagnostic run
//!
//! This module defines the normalized types every collector produces and the rule
//! engine consumes: resource references, metric samples, log excerpts, per-resource
//! collection results and findings.

use crate::error::CollectionError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Kind of cloud resource the agent knows how to diagnose
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// Container cluster running long-lived services
    ComputeCluster,
    /// Application load balancer
    LoadBalancer,
    /// Managed relational database instance
    Database,
    /// Managed search domain
    SearchDomain,
    /// In-memory cache cluster
    Cache,
    /// Web application firewall ACL
    Firewall,
    /// Infrastructure stack definition
    Stack,
}

impl ResourceType {
    /// Every resource type, in ordering order
    pub const ALL: [ResourceType; 7] = [
        ResourceType::ComputeCluster,
        ResourceType::LoadBalancer,
        ResourceType::Database,
        ResourceType::SearchDomain,
        ResourceType::Cache,
        ResourceType::Firewall,
        ResourceType::Stack,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::ComputeCluster => "compute_cluster",
            ResourceType::LoadBalancer => "load_balancer",
            ResourceType::Database => "database",
            ResourceType::SearchDomain => "search_domain",
            ResourceType::Cache => "cache",
            ResourceType::Firewall => "firewall",
            ResourceType::Stack => "stack",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        ResourceType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| format!("Unknown resource type: {}", s))
    }
}

/// Reference to a single live resource
///
/// Totally ordered by (type, identifier, region), which is the order resources appear
/// in a report and the tie-break order for findings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceRef {
    /// Kind of resource
    pub resource_type: ResourceType,
    /// Provider identifier (name, ARN or path)
    pub identifier: String,
    /// Region the resource lives in
    pub region: String,
}

impl ResourceRef {
    pub fn new(
        resource_type: ResourceType,
        identifier: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            resource_type,
            identifier: identifier.into(),
            region: region.into(),
        }
    }

    /// Last path segment of the identifier, used in messages
    pub fn short_name(&self) -> &str {
        self.identifier
            .rsplit(['/', ':'])
            .find(|segment| !segment.is_empty())
            .unwrap_or(self.identifier.as_str())
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}@{}",
            self.resource_type, self.identifier, self.region
        )
    }
}

/// One metric data point for one resource
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricSample {
    pub resource: ResourceRef,
    /// Metric name, e.g. `CPUUtilization`
    pub name: String,
    /// Unit reported by the provider, e.g. `Percent`
    pub unit: String,
    pub timestamp: Timestamp,
    pub value: f64,
}

/// Log line that matched at least one configured keyword
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogExcerpt {
    pub resource: ResourceRef,
    /// Log group, stream or event source the line came from
    pub source: String,
    pub timestamp: Timestamp,
    pub text: String,
    /// Every configured keyword found in the text
    pub matched_keywords: BTreeSet<String>,
}

/// Normalized output of one collector invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionResult {
    pub resource: ResourceRef,
    pub metrics: Vec<MetricSample>,
    pub logs: Vec<LogExcerpt>,
    pub error: Option<CollectionError>,
    /// Set when a timeout cut collection short but some data was kept
    #[serde(default)]
    pub partial: bool,
    /// Metrics that could not be fetched after retries
    #[serde(default)]
    pub missing_metrics: Vec<String>,
    /// Extra string facts about the resource (stack status, scope, ...)
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl CollectionResult {
    /// Empty, successful result for a resource
    pub fn empty(resource: ResourceRef) -> Self {
        Self {
            resource,
            metrics: Vec::new(),
            logs: Vec::new(),
            error: None,
            partial: false,
            missing_metrics: Vec::new(),
            attributes: BTreeMap::new(),
        }
    }

    /// Result carrying only an error marker and no data
    pub fn failed(resource: ResourceRef, error: CollectionError) -> Self {
        Self {
            error: Some(error),
            ..Self::empty(resource)
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.error.is_none()
    }

    /// Samples for one metric name, ordered by timestamp
    pub fn samples(&self, name: &str) -> Vec<(usize, &MetricSample)> {
        let mut samples: Vec<(usize, &MetricSample)> = self
            .metrics
            .iter()
            .enumerate()
            .filter(|(_, sample)| sample.name == name)
            .collect();
        samples.sort_by_key(|(index, sample)| (sample.timestamp, *index));
        samples
    }

    /// Whether an evidence reference points inside this result
    pub fn resolves(&self, evidence: &EvidenceRef) -> bool {
        match evidence {
            EvidenceRef::Metric(index) => *index < self.metrics.len(),
            EvidenceRef::Log(index) => *index < self.logs.len(),
        }
    }
}

/// Severity level for findings
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational observation
    Info,
    /// Something degraded that deserves attention
    Warning,
    /// Something broken that needs action now
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        };
        f.write_str(label)
    }
}

/// Pointer from a finding to a sample or excerpt of the same resource
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(tag = "kind", content = "index", rename_all = "lowercase")]
pub enum EvidenceRef {
    Metric(usize),
    Log(usize),
}

/// Anomaly produced by the rule engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    pub severity: Severity,
    pub resource: ResourceRef,
    pub rule_id: String,
    pub message: String,
    pub evidence: Vec<EvidenceRef>,
}

/// Time range a run collected data for
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeWindow {
    /// Window of `lookback_hours` ending at `end`
    pub fn ending_at(end: Timestamp, lookback_hours: u32) -> Self {
        Self {
            start: end - Duration::hours(i64::from(lookback_hours)),
            end,
        }
    }

    pub fn contains(&self, timestamp: Timestamp) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}
