//! Report aggregate for one diagnostic run
//!
//! The report owns every collected sample and excerpt of the run. Findings point into it
//! through `EvidenceRef` indices, so nothing in a report refers outside of it.

pub mod writer;

pub use writer::{render_markdown, write_json, write_markdown};

use crate::error::DiscoveryError;
use crate::model::{
    CollectionResult, EvidenceRef, Finding, LogExcerpt, MetricSample, ResourceRef, ResourceType,
    Severity, TimeWindow, Timestamp,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Consolidated output of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub generated_at: Timestamp,
    pub window: TimeWindow,
    #[serde(with = "results_as_list")]
    pub results_by_resource: BTreeMap<ResourceRef, CollectionResult>,
    #[serde(with = "failures_as_list")]
    pub discovery_failures: BTreeMap<ResourceType, DiscoveryError>,
    pub findings: Vec<Finding>,
}

/// Sample or excerpt a finding refers to
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Evidence<'a> {
    Metric(&'a MetricSample),
    Log(&'a LogExcerpt),
}

/// Counts describing a report at a glance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    pub resources: usize,
    pub healthy: usize,
    /// Timed out with some data kept
    pub partial: usize,
    /// Carrying an error and no data
    pub failed: usize,
    pub failed_types: usize,
    pub critical: usize,
    pub warning: usize,
    pub info: usize,
}

impl Report {
    pub fn new(
        generated_at: Timestamp,
        window: TimeWindow,
        results_by_resource: BTreeMap<ResourceRef, CollectionResult>,
        discovery_failures: BTreeMap<ResourceType, DiscoveryError>,
        findings: Vec<Finding>,
    ) -> Self {
        Self {
            generated_at,
            window,
            results_by_resource,
            discovery_failures,
            findings,
        }
    }

    pub fn summary(&self) -> ReportSummary {
        let mut summary = ReportSummary {
            resources: self.results_by_resource.len(),
            failed_types: self.discovery_failures.len(),
            ..ReportSummary::default()
        };
        for result in self.results_by_resource.values() {
            match (&result.error, result.partial) {
                (None, _) => summary.healthy += 1,
                (Some(_), true) => summary.partial += 1,
                (Some(_), false) => summary.failed += 1,
            }
        }
        for finding in &self.findings {
            match finding.severity {
                Severity::Critical => summary.critical += 1,
                Severity::Warning => summary.warning += 1,
                Severity::Info => summary.info += 1,
            }
        }
        summary
    }

    /// Resolve a finding's evidence, or `None` if any reference dangles
    pub fn evidence_for(&self, finding: &Finding) -> Option<Vec<Evidence<'_>>> {
        let result = self.results_by_resource.get(&finding.resource)?;
        finding
            .evidence
            .iter()
            .map(|evidence| match evidence {
                EvidenceRef::Metric(index) => result.metrics.get(*index).map(Evidence::Metric),
                EvidenceRef::Log(index) => result.logs.get(*index).map(Evidence::Log),
            })
            .collect()
    }

    /// Findings for one resource, in report order
    pub fn findings_for<'a>(
        &'a self,
        resource: &'a ResourceRef,
    ) -> impl Iterator<Item = &'a Finding> + 'a {
        self.findings.iter().filter(move |f| &f.resource == resource)
    }
}

/// Results are keyed by their own `resource`, so they serialize as a plain list
mod results_as_list {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<ResourceRef, CollectionResult>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(map.values())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<ResourceRef, CollectionResult>, D::Error> {
        let results = Vec::<CollectionResult>::deserialize(deserializer)?;
        Ok(results
            .into_iter()
            .map(|result| (result.resource.clone(), result))
            .collect())
    }
}

mod failures_as_list {
    use super::*;
    use serde::{Deserializer, Serializer};

    #[derive(Serialize, Deserialize)]
    struct Entry {
        resource_type: ResourceType,
        error: DiscoveryError,
    }

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<ResourceType, DiscoveryError>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(map.iter().map(|(resource_type, error)| Entry {
            resource_type: *resource_type,
            error: error.clone(),
        }))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<ResourceType, DiscoveryError>, D::Error> {
        let entries = Vec::<Entry>::deserialize(deserializer)?;
        Ok(entries
            .into_iter()
            .map(|entry| (entry.resource_type, entry.error))
            .collect())
    }
}
