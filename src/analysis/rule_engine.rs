use crate::analysis::rule_config::RuleConfig;
use crate::analysis::rules::Rule;
use crate::config::Settings;
use crate::error::ConfigError;
use crate::model::{CollectionResult, Finding, ResourceRef, Timestamp};
use chrono::Duration;
use log::{debug, info};
use serde::Deserialize;
use std::collections::BTreeMap;

const DEFAULT_RULES: &str = include_str!("default_rules.toml");

/// Reference point for time-windowed rules
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisContext {
    /// End of the analysed window
    pub as_of: Timestamp,
    /// Default window for rules that do not set their own
    pub lookback: Duration,
}

impl AnalysisContext {
    pub fn new(as_of: Timestamp, lookback: Duration) -> Self {
        Self { as_of, lookback }
    }
}

#[derive(Deserialize)]
struct RuleFile {
    rules: Vec<RuleConfig>,
}

/// Engine that evaluates every rule against every collected resource
///
/// Evaluation is a pure function of the snapshot and the context: the same inputs always
/// produce the same findings in the same order.
pub struct RuleEngine {
    rules: Vec<Box<dyn Rule>>,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleEngine {
    /// Create a new rule engine with no rules
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Add a rule to the engine
    pub fn add_rule(&mut self, rule: Box<dyn Rule>) {
        self.rules.push(rule);
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Build an engine from rule definitions
    pub fn from_configs(configs: &[RuleConfig]) -> Result<Self, ConfigError> {
        let mut engine = Self::new();
        for config in configs {
            let rule = config.build().map_err(ConfigError::ValidationError)?;
            engine.add_rule(rule);
        }
        Ok(engine)
    }

    /// Engine loaded with the built-in rule set
    pub fn with_default_rules() -> Result<Self, ConfigError> {
        let file: RuleFile = toml::from_str(DEFAULT_RULES)?;
        Self::from_configs(&file.rules)
    }

    /// Engine for a run: configured rules, or the built-in set when none are configured
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        match &settings.rules {
            Some(configs) => Self::from_configs(configs),
            None => Self::with_default_rules(),
        }
    }

    /// Evaluate all rules and return findings in report order
    ///
    /// Matches without evidence, or with evidence that does not resolve inside the
    /// resource's result, are dropped.
    pub fn evaluate(
        &self,
        results: &BTreeMap<ResourceRef, CollectionResult>,
        ctx: &AnalysisContext,
    ) -> Vec<Finding> {
        let mut findings = Vec::new();

        for result in results.values() {
            for rule in &self.rules {
                let meta = rule.meta();
                if !meta.scope.applies_to(&result.resource) {
                    continue;
                }
                let Some(matched) = rule.evaluate(result, ctx) else {
                    continue;
                };
                if matched.evidence.is_empty()
                    || !matched.evidence.iter().all(|e| result.resolves(e))
                {
                    debug!(
                        "Discarding match of {} on {} without valid evidence",
                        meta.id, result.resource
                    );
                    continue;
                }
                findings.push(Finding {
                    severity: meta.severity,
                    resource: result.resource.clone(),
                    rule_id: meta.id.clone(),
                    message: matched.message,
                    evidence: matched.evidence,
                });
            }
        }

        sort_findings(&mut findings);
        info!(
            "Evaluated {} rules over {} resources: {} findings",
            self.rules.len(),
            results.len(),
            findings.len()
        );
        findings
    }
}

/// Order findings by severity (most severe first), then resource, rule id and message
pub fn sort_findings(findings: &mut [Finding]) {
    findings.sort_by(|a, b| {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.resource.cmp(&b.resource))
            .then_with(|| a.rule_id.cmp(&b.rule_id))
            .then_with(|| a.message.cmp(&b.message))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::rules::{
        Aggregation, Comparator, DensityLimit, KeywordDensityRule, MockRule, RuleMatch, RuleMeta,
        RuleScope, ThresholdRule,
    };
    use crate::error::CollectionError;
    use crate::model::{EvidenceRef, LogExcerpt, MetricSample, ResourceType, Severity};
    use chrono::{TimeZone, Utc};

    fn as_of() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn create_test_context() -> AnalysisContext {
        AnalysisContext::new(as_of(), Duration::hours(3))
    }

    fn create_test_result(
        resource_type: ResourceType,
        identifier: &str,
        metric: &str,
        values: &[f64],
    ) -> CollectionResult {
        let resource = ResourceRef::new(resource_type, identifier, "us-east-2");
        let mut result = CollectionResult::empty(resource.clone());
        for (i, value) in values.iter().enumerate() {
            result.metrics.push(MetricSample {
                resource: resource.clone(),
                name: metric.to_string(),
                unit: "Percent".to_string(),
                timestamp: as_of() - Duration::minutes(5 * (values.len() - i) as i64),
                value: *value,
            });
        }
        result
    }

    fn snapshot(results: Vec<CollectionResult>) -> BTreeMap<ResourceRef, CollectionResult> {
        results
            .into_iter()
            .map(|r| (r.resource.clone(), r))
            .collect()
    }

    fn cpu_critical_rule() -> Box<dyn Rule> {
        Box::new(ThresholdRule::new(
            RuleMeta::new("cpu-critical", Severity::Critical, RuleScope::default()),
            "CPUUtilization",
            Aggregation::Latest,
            Comparator::GreaterOrEqual,
            90.0,
        ))
    }

    fn mock_rule(id: &str, severity: Severity, evidence: Vec<EvidenceRef>) -> MockRule {
        let mut rule = MockRule::new();
        rule.expect_meta()
            .return_const(RuleMeta::new(id, severity, RuleScope::default()));
        rule.expect_evaluate().returning(move |result, _| {
            Some(RuleMatch {
                message: format!("fired on {}", result.resource.identifier),
                evidence: evidence.clone(),
            })
        });
        rule
    }

    #[test]
    fn test_rule_engine_creation() {
        let engine = RuleEngine::new();
        assert_eq!(engine.rule_count(), 0);
        assert!(engine
            .evaluate(&BTreeMap::new(), &create_test_context())
            .is_empty());
    }

    #[test]
    fn test_default_rules_load() {
        let engine = RuleEngine::with_default_rules().unwrap();
        assert!(engine.rule_count() >= 10);
    }

    #[test]
    fn test_threshold_92_vs_88() {
        let mut engine = RuleEngine::new();
        engine.add_rule(cpu_critical_rule());

        let hot = snapshot(vec![create_test_result(
            ResourceType::Database,
            "orders-db",
            "CPUUtilization",
            &[92.0],
        )]);
        let findings = engine.evaluate(&hot, &create_test_context());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Critical);
        assert_eq!(findings[0].rule_id, "cpu-critical");

        let cool = snapshot(vec![create_test_result(
            ResourceType::Database,
            "orders-db",
            "CPUUtilization",
            &[88.0],
        )]);
        assert!(engine.evaluate(&cool, &create_test_context()).is_empty());
    }

    #[test]
    fn test_keyword_density_twelve_exceptions() {
        let mut engine = RuleEngine::new();
        engine.add_rule(Box::new(KeywordDensityRule::new(
            RuleMeta::new("exceptions", Severity::Warning, RuleScope::default()),
            vec!["Exception".to_string()],
            DensityLimit::PerHour(10.0),
            Some(Duration::hours(1)),
        )));

        let resource = ResourceRef::new(ResourceType::ComputeCluster, "api", "us-east-2");
        let mut result = CollectionResult::empty(resource.clone());
        for i in 0..12 {
            result.logs.push(LogExcerpt {
                resource: resource.clone(),
                source: "/ecs/api".to_string(),
                timestamp: as_of() - Duration::minutes(5 * i),
                text: "java.lang.IllegalStateException".to_string(),
                matched_keywords: ["Exception".to_string()].into_iter().collect(),
            });
        }

        let findings = engine.evaluate(&snapshot(vec![result]), &create_test_context());
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Warning);
        assert_eq!(findings[0].evidence.len(), 12);
        let expected: Vec<EvidenceRef> = (0..12).map(EvidenceRef::Log).collect();
        assert_eq!(findings[0].evidence, expected);
    }

    #[test]
    fn test_findings_ordering() {
        let mut engine = RuleEngine::new();
        engine.add_rule(Box::new(mock_rule("b-info", Severity::Info, vec![EvidenceRef::Metric(0)])));
        engine.add_rule(Box::new(mock_rule(
            "a-critical",
            Severity::Critical,
            vec![EvidenceRef::Metric(0)],
        )));
        engine.add_rule(Box::new(mock_rule(
            "c-warning",
            Severity::Warning,
            vec![EvidenceRef::Metric(0)],
        )));

        let results = snapshot(vec![
            create_test_result(ResourceType::Stack, "zeta", "StackFailed", &[1.0]),
            create_test_result(ResourceType::ComputeCluster, "beta", "CPUUtilization", &[1.0]),
            create_test_result(ResourceType::ComputeCluster, "alpha", "CPUUtilization", &[1.0]),
        ]);

        let findings = engine.evaluate(&results, &create_test_context());
        let order: Vec<(Severity, &str, &str)> = findings
            .iter()
            .map(|f| (f.severity, f.resource.identifier.as_str(), f.rule_id.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                (Severity::Critical, "alpha", "a-critical"),
                (Severity::Critical, "beta", "a-critical"),
                (Severity::Critical, "zeta", "a-critical"),
                (Severity::Warning, "alpha", "c-warning"),
                (Severity::Warning, "beta", "c-warning"),
                (Severity::Warning, "zeta", "c-warning"),
                (Severity::Info, "alpha", "b-info"),
                (Severity::Info, "beta", "b-info"),
                (Severity::Info, "zeta", "b-info"),
            ]
        );
    }

    #[test]
    fn test_matches_without_valid_evidence_are_dropped() {
        let mut engine = RuleEngine::new();
        engine.add_rule(Box::new(mock_rule("empty", Severity::Critical, vec![])));
        engine.add_rule(Box::new(mock_rule(
            "dangling",
            Severity::Critical,
            vec![EvidenceRef::Log(3)],
        )));

        let results = snapshot(vec![create_test_result(
            ResourceType::Cache,
            "sessions",
            "CPUUtilization",
            &[10.0],
        )]);
        assert!(engine.evaluate(&results, &create_test_context()).is_empty());
    }

    #[test]
    fn test_out_of_scope_rule_not_evaluated() {
        let mut rule = MockRule::new();
        rule.expect_meta().return_const(RuleMeta::new(
            "db-only",
            Severity::Warning,
            RuleScope::for_types(vec![ResourceType::Database]),
        ));
        rule.expect_evaluate().times(0);

        let mut engine = RuleEngine::new();
        engine.add_rule(Box::new(rule));

        let results = snapshot(vec![create_test_result(
            ResourceType::Cache,
            "sessions",
            "CPUUtilization",
            &[10.0],
        )]);
        assert!(engine.evaluate(&results, &create_test_context()).is_empty());
    }

    #[test]
    fn test_failed_results_produce_no_findings() {
        let engine = RuleEngine::with_default_rules().unwrap();
        let resource = ResourceRef::new(ResourceType::Database, "orders-db", "us-east-2");
        let results = snapshot(vec![CollectionResult::failed(
            resource,
            CollectionError::Unauthorized,
        )]);
        assert!(engine.evaluate(&results, &create_test_context()).is_empty());
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let engine = RuleEngine::with_default_rules().unwrap();
        let results = snapshot(vec![
            create_test_result(ResourceType::Database, "orders-db", "CPUUtilization", &[50.0, 95.0]),
            create_test_result(ResourceType::Database, "orders-read-1", "CPUUtilization", &[30.0]),
            create_test_result(ResourceType::Stack, "network", "StackFailed", &[1.0]),
        ]);

        let first = engine.evaluate(&results, &create_test_context());
        let second = engine.evaluate(&results, &create_test_context());
        assert!(!first.is_empty());
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }

    #[test]
    fn test_default_rules_replica_split() {
        let engine = RuleEngine::with_default_rules().unwrap();
        let results = snapshot(vec![
            create_test_result(ResourceType::Database, "orders-primary", "CPUUtilization", &[50.0]),
            create_test_result(ResourceType::Database, "orders-read-1", "CPUUtilization", &[50.0]),
        ]);

        let findings = engine.evaluate(&results, &create_test_context());
        let ids: Vec<(&str, &str)> = findings
            .iter()
            .map(|f| (f.resource.identifier.as_str(), f.rule_id.as_str()))
            .collect();
        assert_eq!(ids, vec![("orders-read-1", "db-replica-cpu-high")]);
    }
}
