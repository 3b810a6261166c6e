/// Error types for discovery, collection and runs
pub mod error;

/// Core data model: resources, samples, findings
pub mod model;

/// Configuration management
pub mod config;

/// Retry policy for provider calls
pub mod retry;

/// Provider sessions (HTTP gateway and recorded fixtures)
pub mod session;

/// Resource discovery
pub mod discovery;

/// Per-resource-type collectors
pub mod collectors;

/// Worker pool and run deadlines
pub mod orchestrator;

/// Rule engine and rule types
pub mod analysis;

/// Report aggregate and writers
pub mod report;

// Re-export commonly used types
pub use config::Settings;
pub use error::{CollectionError, ConfigError, DiscoveryError, ProviderError, RunError};
pub use model::{CollectionResult, Finding, ResourceRef, ResourceType, Severity};
pub use orchestrator::{run_diagnostics, Orchestrator};
pub use report::Report;
pub use session::{CloudSession, SessionSet};
