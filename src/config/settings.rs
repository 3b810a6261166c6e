use crate::analysis::RuleConfig;
use crate::config::FilterPattern;
use crate::error::ConfigError;
use crate::model::ResourceType;
use crate::retry::BackoffPolicy;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upper bound for the automatically sized worker pool
const MAX_AUTO_THREADS: usize = 32;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "CLOUDEYES_";

/// Settings for one diagnostic run
///
/// Every field has a default, so a config file only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Region to diagnose
    pub region: String,
    /// How far back metrics and logs are collected
    pub lookback_hours: u32,
    /// Worker pool size (0 = derive from available CPUs)
    pub threads: usize,
    /// Deadline for the whole run
    pub run_timeout_seconds: u64,
    /// Per-resource collection deadline (derived from the run deadline when unset)
    pub collector_timeout_seconds: Option<u64>,
    /// Keywords that make a log line worth keeping
    pub log_keywords: Vec<String>,
    /// Resource types included in the run
    pub resource_types: Vec<ResourceType>,
    /// Per-type name filters
    pub filters: FilterSettings,
    /// Backoff policy for provider calls
    pub retry: RetrySettings,
    /// Rule definitions (built-in defaults when unset)
    pub rules: Option<Vec<RuleConfig>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            region: "us-east-2".to_string(),
            lookback_hours: 3,
            threads: 0,
            run_timeout_seconds: 300,
            collector_timeout_seconds: None,
            log_keywords: default_keywords(),
            resource_types: ResourceType::ALL.to_vec(),
            filters: FilterSettings::default(),
            retry: RetrySettings::default(),
            rules: None,
        }
    }
}

fn default_keywords() -> Vec<String> {
    [
        "FATAL",
        "ERROR",
        "Exception",
        "Traceback",
        "5xx",
        "4xx",
        "Timeout",
        "Connection",
    ]
    .iter()
    .map(|k| k.to_string())
    .collect()
}

/// Name filter for each resource type
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSettings {
    pub compute_cluster: FilterPattern,
    pub load_balancer: FilterPattern,
    pub database: FilterPattern,
    pub search_domain: FilterPattern,
    pub cache: FilterPattern,
    pub firewall: FilterPattern,
    pub stack: FilterPattern,
}

impl FilterSettings {
    pub fn for_type(&self, resource_type: ResourceType) -> &FilterPattern {
        match resource_type {
            ResourceType::ComputeCluster => &self.compute_cluster,
            ResourceType::LoadBalancer => &self.load_balancer,
            ResourceType::Database => &self.database,
            ResourceType::SearchDomain => &self.search_domain,
            ResourceType::Cache => &self.cache,
            ResourceType::Firewall => &self.firewall,
            ResourceType::Stack => &self.stack,
        }
    }

    pub fn set(&mut self, resource_type: ResourceType, pattern: FilterPattern) {
        let slot = match resource_type {
            ResourceType::ComputeCluster => &mut self.compute_cluster,
            ResourceType::LoadBalancer => &mut self.load_balancer,
            ResourceType::Database => &mut self.database,
            ResourceType::SearchDomain => &mut self.search_domain,
            ResourceType::Cache => &mut self.cache,
            ResourceType::Firewall => &mut self.firewall,
            ResourceType::Stack => &mut self.stack,
        };
        *slot = pattern;
    }
}

/// Exponential backoff settings shared by discovery and collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 200,
            max_delay_ms: 5_000,
            max_attempts: 5,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.max_attempts,
        )
    }
}

impl Settings {
    /// Load settings from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the TOML configuration file
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file cannot be read, parsed, or fails validation
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::ReadError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings, falling back to defaults when no file is present
    ///
    /// A missing file is not an error: the defaults are used and a warning is logged.
    /// A file that exists but cannot be parsed is an error. Environment overrides are
    /// applied on top in both cases.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = match path {
            Some(path) if path.exists() => {
                info!("Loading configuration from {}", path.display());
                Self::from_file(path)?
            }
            Some(path) => {
                warn!(
                    "Configuration file {} not found, using defaults",
                    path.display()
                );
                Self::default()
            }
            None => {
                debug!("No configuration file given, using defaults");
                Self::default()
            }
        };

        settings.apply_env_overrides()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Apply `CLOUDEYES_*` environment variables
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_env_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides read through `lookup`, which maps a variable name to its value
    pub fn apply_env_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(region) = var("REGION") {
            self.region = region;
        }
        if let Some(hours) = var("LOOKBACK_HOURS") {
            self.lookback_hours = parse_env("LOOKBACK_HOURS", &hours)?;
        }
        if let Some(threads) = var("THREADS") {
            self.threads = parse_env("THREADS", &threads)?;
        }
        if let Some(timeout) = var("RUN_TIMEOUT_SECONDS") {
            self.run_timeout_seconds = parse_env("RUN_TIMEOUT_SECONDS", &timeout)?;
        }
        if let Some(keywords) = var("LOG_KEYWORDS") {
            self.log_keywords = split_list(&keywords);
        }
        Ok(())
    }

    /// Check that the settings describe a runnable configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.region.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "region must not be empty".to_string(),
            ));
        }
        if self.lookback_hours == 0 {
            return Err(ConfigError::ValidationError(
                "lookback_hours must be greater than 0".to_string(),
            ));
        }
        if self.run_timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "run_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.collector_timeout_seconds == Some(0) {
            return Err(ConfigError::ValidationError(
                "collector_timeout_seconds must be greater than 0".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::ValidationError(
                "retry.max_delay_ms must not be below retry.base_delay_ms".to_string(),
            ));
        }
        if self.log_keywords.iter().all(|k| k.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "log_keywords must contain at least one keyword".to_string(),
            ));
        }
        if self.resource_types.is_empty() {
            return Err(ConfigError::ValidationError(
                "resource_types must not be empty".to_string(),
            ));
        }
        if let Some(rules) = &self.rules {
            for rule in rules {
                rule.validate().map_err(ConfigError::ValidationError)?;
            }
        }
        Ok(())
    }

    /// Number of concurrent collection tasks
    pub fn pool_size(&self) -> usize {
        if self.threads > 0 {
            return self.threads;
        }
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        (cpus * 5).min(MAX_AUTO_THREADS)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_seconds)
    }

    pub fn collector_timeout(&self) -> Option<Duration> {
        self.collector_timeout_seconds.map(Duration::from_secs)
    }

    /// Configured keywords with blanks removed and duplicates dropped
    pub fn keywords(&self) -> Vec<String> {
        let mut keywords: Vec<String> = Vec::new();
        for keyword in &self.log_keywords {
            let keyword = keyword.trim();
            if !keyword.is_empty() && !keywords.iter().any(|k| k == keyword) {
                keywords.push(keyword.to_string());
            }
        }
        keywords
    }

    /// Resource types in the run, deduplicated and in canonical order
    pub fn enabled_types(&self) -> Vec<ResourceType> {
        let mut types = self.resource_types.clone();
        types.sort();
        types.dedup();
        types
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| {
        ConfigError::ParseError(format!(
            "{}{} has an invalid value: '{}'",
            ENV_PREFIX, name, value
        ))
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.region, "us-east-2");
        assert_eq!(settings.lookback_hours, 3);
        assert_eq!(settings.threads, 0);
        assert_eq!(settings.resource_types.len(), 7);
        assert!(settings.log_keywords.contains(&"Traceback".to_string()));
        assert_eq!(settings.retry.policy().max_attempts, 5);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let settings = Settings::from_toml_str(
            r#"
            region = "eu-west-1"
            threads = 4

            [filters]
            database = "orders-*"
            stack = "*-prod"
            "#,
        )
        .unwrap();

        assert_eq!(settings.region, "eu-west-1");
        assert_eq!(settings.pool_size(), 4);
        assert_eq!(settings.lookback_hours, 3);
        assert!(settings
            .filters
            .for_type(ResourceType::Database)
            .matches("orders-primary"));
        assert!(!settings
            .filters
            .for_type(ResourceType::Database)
            .matches("users"));
        assert_eq!(
            settings.filters.for_type(ResourceType::Cache),
            &FilterPattern::All
        );
    }

    #[test]
    fn test_resource_types_from_toml() {
        let settings =
            Settings::from_toml_str(r#"resource_types = ["database", "cache"]"#).unwrap();
        assert_eq!(
            settings.enabled_types(),
            vec![ResourceType::Database, ResourceType::Cache]
        );
    }

    #[test]
    fn test_validation_errors() {
        let result = Settings::from_toml_str("lookback_hours = 0");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));

        let result = Settings::from_toml_str("resource_types = []");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));

        let result = Settings::from_toml_str("log_keywords = [\"  \"]");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));

        let result = Settings::from_toml_str("[retry]\nmax_attempts = 0");
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_malformed_toml() {
        let result = Settings::from_toml_str("region = ");
        assert!(matches!(result, Err(ConfigError::TomlError(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "lookback_hours = 6").unwrap();
        writeln!(file, "run_timeout_seconds = 60").unwrap();

        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.lookback_hours, 6);
        assert_eq!(settings.run_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_load_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        let settings = Settings::load(Some(&missing)).unwrap();
        assert_eq!(settings.lookback_hours, Settings::default().lookback_hours);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CLOUDEYES_REGION", "ap-south-1"),
            ("CLOUDEYES_LOOKBACK_HOURS", "12"),
            ("CLOUDEYES_THREADS", "8"),
            ("CLOUDEYES_LOG_KEYWORDS", "panic, OOM ,"),
        ]
        .into_iter()
        .collect();

        let mut settings = Settings::default();
        settings
            .apply_env_overrides_from(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(settings.region, "ap-south-1");
        assert_eq!(settings.lookback_hours, 12);
        assert_eq!(settings.threads, 8);
        assert_eq!(settings.log_keywords, vec!["panic", "OOM"]);
    }

    #[test]
    fn test_env_override_invalid_number() {
        let mut settings = Settings::default();
        let result = settings.apply_env_overrides_from(|key| {
            (key == "CLOUDEYES_THREADS").then(|| "many".to_string())
        });
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_auto_pool_size_is_bounded() {
        let settings = Settings::default();
        let size = settings.pool_size();
        assert!(size >= 1);
        assert!(size <= MAX_AUTO_THREADS);
    }

    #[test]
    fn test_keywords_dedup() {
        let settings = Settings {
            log_keywords: vec![
                "ERROR".to_string(),
                " ERROR ".to_string(),
                "".to_string(),
                "Timeout".to_string(),
            ],
            ..Settings::default()
        };
        assert_eq!(settings.keywords(), vec!["ERROR", "Timeout"]);
    }
}
