pub mod rule_config;
pub mod rule_engine;
pub mod rules;

pub use rule_config::{RuleConfig, RuleKind};
pub use rule_engine::{sort_findings, AnalysisContext, RuleEngine};
pub use rules::{
    Aggregation, Comparator, CompositeMode, CompositeRule, DensityLimit, Direction,
    KeywordDensityRule, RateOfChangeRule, Rule, RuleMatch, RuleMeta, RuleScope, ThresholdRule,
};
