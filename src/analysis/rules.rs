//! Built-in rule kinds for the analyzer
//!
//! Every rule looks at a single resource's `CollectionResult` and either reports a match
//! with evidence pointing into that result or stays silent. Rules never fetch data.

use crate::analysis::AnalysisContext;
use crate::model::{
    CollectionResult, EvidenceRef, ResourceRef, ResourceType, Severity, TimeWindow,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Which resources a rule looks at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleScope {
    /// Resource types the rule applies to (all types when empty)
    pub resource_types: Vec<ResourceType>,
    /// Only identifiers containing this text, compared case-insensitively
    pub identifier_contains: Option<String>,
    /// Skip identifiers containing this text, compared case-insensitively
    pub identifier_excludes: Option<String>,
}

impl RuleScope {
    pub fn for_types(resource_types: Vec<ResourceType>) -> Self {
        Self {
            resource_types,
            ..Self::default()
        }
    }

    pub fn applies_to(&self, resource: &ResourceRef) -> bool {
        if !self.resource_types.is_empty() && !self.resource_types.contains(&resource.resource_type)
        {
            return false;
        }
        let identifier = resource.identifier.to_lowercase();
        if let Some(part) = &self.identifier_contains {
            if !identifier.contains(&part.to_lowercase()) {
                return false;
            }
        }
        if let Some(part) = &self.identifier_excludes {
            if identifier.contains(&part.to_lowercase()) {
                return false;
            }
        }
        true
    }
}

/// Identity of a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMeta {
    pub id: String,
    pub severity: Severity,
    pub scope: RuleScope,
}

impl RuleMeta {
    pub fn new(id: impl Into<String>, severity: Severity, scope: RuleScope) -> Self {
        Self {
            id: id.into(),
            severity,
            scope,
        }
    }
}

/// Outcome of a rule that fired
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub message: String,
    pub evidence: Vec<EvidenceRef>,
}

/// Trait for deterministic anomaly rules
#[cfg_attr(test, mockall::automock)]
pub trait Rule: Send + Sync {
    fn meta(&self) -> &RuleMeta;

    /// Evaluate the rule against one resource's collected data
    fn evaluate(&self, result: &CollectionResult, ctx: &AnalysisContext) -> Option<RuleMatch>;
}

/// How a series of samples is reduced to one value
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    /// Most recent sample
    #[default]
    Latest,
    Average,
    Maximum,
    Sum,
}

impl Aggregation {
    fn label(&self) -> &'static str {
        match self {
            Aggregation::Latest => "latest",
            Aggregation::Average => "average",
            Aggregation::Maximum => "maximum",
            Aggregation::Sum => "sum",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Comparator {
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "<")]
    Less,
}

impl Comparator {
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparator::GreaterOrEqual => value >= threshold,
            Comparator::Greater => value > threshold,
            Comparator::LessOrEqual => value <= threshold,
            Comparator::Less => value < threshold,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Comparator::GreaterOrEqual => ">=",
            Comparator::Greater => ">",
            Comparator::LessOrEqual => "<=",
            Comparator::Less => "<",
        }
    }
}

/// Rule that compares an aggregate of one metric with a fixed threshold
///
/// A resource without samples for the metric never matches.
pub struct ThresholdRule {
    meta: RuleMeta,
    /// Metric to aggregate
    pub metric: String,
    pub aggregation: Aggregation,
    pub comparator: Comparator,
    pub threshold: f64,
}

impl ThresholdRule {
    /// Create a new threshold rule
    ///
    /// # Arguments
    ///
    /// * `meta` - Rule id, severity and scope
    /// * `metric` - Name of the metric to aggregate
    /// * `aggregation` - How the samples are reduced to one value
    /// * `comparator` - Comparison applied as `value <comparator> threshold`
    /// * `threshold` - Value to compare against
    pub fn new(
        meta: RuleMeta,
        metric: impl Into<String>,
        aggregation: Aggregation,
        comparator: Comparator,
        threshold: f64,
    ) -> Self {
        Self {
            meta,
            metric: metric.into(),
            aggregation,
            comparator,
            threshold,
        }
    }
}

impl Rule for ThresholdRule {
    fn meta(&self) -> &RuleMeta {
        &self.meta
    }

    fn evaluate(&self, result: &CollectionResult, _ctx: &AnalysisContext) -> Option<RuleMatch> {
        let samples = result.samples(&self.metric);
        let (last_index, last) = samples.last()?;

        let (value, evidence) = match self.aggregation {
            Aggregation::Latest => (last.value, vec![EvidenceRef::Metric(*last_index)]),
            Aggregation::Maximum => {
                let (index, sample) = samples
                    .iter()
                    .max_by(|(_, a), (_, b)| a.value.total_cmp(&b.value))?;
                (sample.value, vec![EvidenceRef::Metric(*index)])
            }
            Aggregation::Average | Aggregation::Sum => {
                let sum: f64 = samples.iter().map(|(_, s)| s.value).sum();
                let value = if self.aggregation == Aggregation::Sum {
                    sum
                } else {
                    sum / samples.len() as f64
                };
                let evidence = samples
                    .iter()
                    .map(|(index, _)| EvidenceRef::Metric(*index))
                    .collect();
                (value, evidence)
            }
        };

        if !self.comparator.holds(value, self.threshold) {
            return None;
        }

        Some(RuleMatch {
            message: format!(
                "{} {} {:.2} {} {} on {}",
                self.metric,
                self.aggregation.label(),
                value,
                self.comparator.symbol(),
                self.threshold,
                result.resource.short_name()
            ),
            evidence,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Increase,
    Decrease,
    Either,
}

/// Rule that fires when a metric moves by more than a percentage over the window
///
/// Compares the earliest and latest samples. Fewer than two samples, or an earliest
/// sample of zero, never match.
pub struct RateOfChangeRule {
    meta: RuleMeta,
    pub metric: String,
    /// Relative change in percent that must be exceeded
    pub percent: f64,
    pub direction: Direction,
}

impl RateOfChangeRule {
    /// Create a new rate-of-change rule
    ///
    /// # Arguments
    ///
    /// * `meta` - Rule id, severity and scope
    /// * `metric` - Name of the metric to watch
    /// * `percent` - Relative change in percent that must be exceeded
    /// * `direction` - Which direction of change counts
    pub fn new(meta: RuleMeta, metric: impl Into<String>, percent: f64, direction: Direction) -> Self {
        Self {
            meta,
            metric: metric.into(),
            percent,
            direction,
        }
    }
}

impl Rule for RateOfChangeRule {
    fn meta(&self) -> &RuleMeta {
        &self.meta
    }

    fn evaluate(&self, result: &CollectionResult, _ctx: &AnalysisContext) -> Option<RuleMatch> {
        let samples = result.samples(&self.metric);
        if samples.len() < 2 {
            return None;
        }
        let (first_index, first) = samples[0];
        let (last_index, last) = samples[samples.len() - 1];
        if first.value == 0.0 {
            return None;
        }

        let change = (last.value - first.value) / first.value.abs() * 100.0;
        let exceeded = match self.direction {
            Direction::Increase => change > self.percent,
            Direction::Decrease => -change > self.percent,
            Direction::Either => change.abs() > self.percent,
        };
        if !exceeded {
            return None;
        }

        Some(RuleMatch {
            message: format!(
                "{} changed {:+.1}% ({:.2} -> {:.2}) on {}",
                self.metric,
                change,
                first.value,
                last.value,
                result.resource.short_name()
            ),
            evidence: vec![
                EvidenceRef::Metric(first_index),
                EvidenceRef::Metric(last_index),
            ],
        })
    }
}

/// Limit on matching log excerpts within the rule window
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DensityLimit {
    /// Fires when more than this many excerpts match
    Count(usize),
    /// Fires when matching excerpts per hour exceed this rate
    PerHour(f64),
}

/// Rule that counts log excerpts of a keyword category
///
/// Counts excerpts whose matched keywords intersect the category, within the rule window
/// ending at the analysis reference time. The window defaults to the run lookback.
pub struct KeywordDensityRule {
    meta: RuleMeta,
    /// Keyword category, compared case-insensitively
    keywords: Vec<String>,
    pub limit: DensityLimit,
    pub window: Option<Duration>,
}

impl KeywordDensityRule {
    /// Create a new keyword density rule
    ///
    /// # Arguments
    ///
    /// * `meta` - Rule id, severity and scope
    /// * `keywords` - Keyword category to count
    /// * `limit` - Count or rate that must be exceeded
    /// * `window` - Counting window (the run lookback when `None`)
    pub fn new(
        meta: RuleMeta,
        keywords: Vec<String>,
        limit: DensityLimit,
        window: Option<Duration>,
    ) -> Self {
        Self {
            meta,
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            limit,
            window,
        }
    }
}

impl Rule for KeywordDensityRule {
    fn meta(&self) -> &RuleMeta {
        &self.meta
    }

    fn evaluate(&self, result: &CollectionResult, ctx: &AnalysisContext) -> Option<RuleMatch> {
        let window = TimeWindow {
            start: ctx.as_of - self.window.unwrap_or(ctx.lookback),
            end: ctx.as_of,
        };

        let evidence: Vec<EvidenceRef> = result
            .logs
            .iter()
            .enumerate()
            .filter(|(_, excerpt)| window.contains(excerpt.timestamp))
            .filter(|(_, excerpt)| {
                excerpt
                    .matched_keywords
                    .iter()
                    .any(|k| self.keywords.contains(&k.to_lowercase()))
            })
            .map(|(index, _)| EvidenceRef::Log(index))
            .collect();

        let count = evidence.len();
        let minutes = window.duration().num_minutes();
        let (exceeded, limit_text) = match self.limit {
            DensityLimit::Count(max) => (count > max, format!("limit {}", max)),
            DensityLimit::PerHour(rate) => {
                let hours = window.duration().num_seconds() as f64 / 3600.0;
                let exceeded = hours > 0.0 && count as f64 / hours > rate;
                (exceeded, format!("limit {}/hour", rate))
            }
        };
        if !exceeded || evidence.is_empty() {
            return None;
        }

        Some(RuleMatch {
            message: format!(
                "{} log lines matching [{}] in the last {} minutes ({}) on {}",
                count,
                self.keywords.join(", "),
                minutes,
                limit_text,
                result.resource.short_name()
            ),
            evidence,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CompositeMode {
    /// Every child must match
    All,
    /// At least one child must match
    Any,
}

/// AND/OR combination of other rules on the same resource
///
/// Evidence is the union of the evidence of the children that matched.
pub struct CompositeRule {
    meta: RuleMeta,
    pub mode: CompositeMode,
    children: Vec<Box<dyn Rule>>,
}

impl CompositeRule {
    pub fn new(meta: RuleMeta, mode: CompositeMode, children: Vec<Box<dyn Rule>>) -> Self {
        Self {
            meta,
            mode,
            children,
        }
    }
}

impl Rule for CompositeRule {
    fn meta(&self) -> &RuleMeta {
        &self.meta
    }

    fn evaluate(&self, result: &CollectionResult, ctx: &AnalysisContext) -> Option<RuleMatch> {
        if self.children.is_empty() {
            return None;
        }

        let mut matched = Vec::new();
        for child in &self.children {
            let outcome = if child.meta().scope.applies_to(&result.resource) {
                child.evaluate(result, ctx)
            } else {
                None
            };
            match (outcome, self.mode) {
                (Some(m), _) => matched.push(m),
                (None, CompositeMode::All) => return None,
                (None, CompositeMode::Any) => {}
            }
        }
        if matched.is_empty() {
            return None;
        }

        let evidence: BTreeSet<EvidenceRef> = matched
            .iter()
            .flat_map(|m| m.evidence.iter().copied())
            .collect();
        let joiner = match self.mode {
            CompositeMode::All => " and ",
            CompositeMode::Any => " or ",
        };
        let message = matched
            .iter()
            .map(|m| m.message.as_str())
            .collect::<Vec<_>>()
            .join(joiner);

        Some(RuleMatch {
            message,
            evidence: evidence.into_iter().collect(),
        })
    }
}
