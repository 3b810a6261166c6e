use crate::analysis::rules::{
    Aggregation, Comparator, CompositeMode, CompositeRule, DensityLimit, Direction,
    KeywordDensityRule, RateOfChangeRule, Rule, RuleMeta, RuleScope, ThresholdRule,
};
use crate::model::{ResourceType, Severity};
use chrono::Duration;
use serde::{Deserialize, Serialize};

fn default_severity() -> Severity {
    Severity::Warning
}

/// Declarative rule definition, as found in `[[rules]]` tables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub id: String,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    #[serde(default)]
    pub resource_types: Vec<ResourceType>,
    #[serde(default)]
    pub identifier_contains: Option<String>,
    #[serde(default)]
    pub identifier_excludes: Option<String>,
    #[serde(flatten)]
    pub kind: RuleKind,
}

/// Kind-specific part of a rule definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleKind {
    Threshold {
        metric: String,
        #[serde(default)]
        aggregation: Aggregation,
        comparator: Comparator,
        threshold: f64,
    },
    RateOfChange {
        metric: String,
        percent: f64,
        #[serde(default)]
        direction: Direction,
    },
    KeywordDensity {
        keywords: Vec<String>,
        #[serde(default)]
        max_count: Option<usize>,
        #[serde(default)]
        max_per_hour: Option<f64>,
        #[serde(default)]
        window_minutes: Option<u32>,
    },
    Composite {
        mode: CompositeMode,
        rules: Vec<RuleConfig>,
    },
}

impl RuleConfig {
    /// Check the definition without building it
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("rule id must not be empty".to_string());
        }
        match &self.kind {
            RuleKind::Threshold {
                metric, threshold, ..
            } => {
                if metric.trim().is_empty() {
                    return Err(format!("rule {}: metric must not be empty", self.id));
                }
                if !threshold.is_finite() {
                    return Err(format!("rule {}: threshold must be finite", self.id));
                }
            }
            RuleKind::RateOfChange {
                metric, percent, ..
            } => {
                if metric.trim().is_empty() {
                    return Err(format!("rule {}: metric must not be empty", self.id));
                }
                if !percent.is_finite() || *percent <= 0.0 {
                    return Err(format!("rule {}: percent must be positive", self.id));
                }
            }
            RuleKind::KeywordDensity {
                keywords,
                max_count,
                max_per_hour,
                window_minutes,
            } => {
                if keywords.iter().all(|k| k.trim().is_empty()) {
                    return Err(format!("rule {}: keywords must not be empty", self.id));
                }
                match (max_count, max_per_hour) {
                    (Some(_), None) => {}
                    (None, Some(rate)) if rate.is_finite() && *rate >= 0.0 => {}
                    (None, Some(_)) => {
                        return Err(format!("rule {}: max_per_hour must be >= 0", self.id))
                    }
                    _ => {
                        return Err(format!(
                            "rule {}: set exactly one of max_count or max_per_hour",
                            self.id
                        ))
                    }
                }
                if *window_minutes == Some(0) {
                    return Err(format!("rule {}: window_minutes must be positive", self.id));
                }
            }
            RuleKind::Composite { rules, .. } => {
                if rules.is_empty() {
                    return Err(format!("rule {}: composite needs child rules", self.id));
                }
                for child in rules {
                    child.validate()?;
                }
            }
        }
        Ok(())
    }

    fn meta(&self) -> RuleMeta {
        RuleMeta::new(
            self.id.clone(),
            self.severity,
            RuleScope {
                resource_types: self.resource_types.clone(),
                identifier_contains: self.identifier_contains.clone(),
                identifier_excludes: self.identifier_excludes.clone(),
            },
        )
    }

    /// Build the rule this definition describes
    pub fn build(&self) -> Result<Box<dyn Rule>, String> {
        self.validate()?;
        let meta = self.meta();

        let rule: Box<dyn Rule> = match &self.kind {
            RuleKind::Threshold {
                metric,
                aggregation,
                comparator,
                threshold,
            } => Box::new(ThresholdRule::new(
                meta,
                metric.clone(),
                *aggregation,
                *comparator,
                *threshold,
            )),
            RuleKind::RateOfChange {
                metric,
                percent,
                direction,
            } => Box::new(RateOfChangeRule::new(
                meta,
                metric.clone(),
                *percent,
                *direction,
            )),
            RuleKind::KeywordDensity {
                keywords,
                max_count,
                max_per_hour,
                window_minutes,
            } => {
                let limit = match (max_count, max_per_hour) {
                    (Some(count), _) => DensityLimit::Count(*count),
                    (None, Some(rate)) => DensityLimit::PerHour(*rate),
                    (None, None) => {
                        return Err(format!("rule {}: missing density limit", self.id))
                    }
                };
                let keywords = keywords
                    .iter()
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
                    .collect();
                let window = window_minutes.map(|m| Duration::minutes(i64::from(m)));
                Box::new(KeywordDensityRule::new(meta, keywords, limit, window))
            }
            RuleKind::Composite { mode, rules } => {
                let children = rules
                    .iter()
                    .map(RuleConfig::build)
                    .collect::<Result<Vec<_>, _>>()?;
                Box::new(CompositeRule::new(meta, *mode, children))
            }
        };
        Ok(rule)
    }
}
