pub mod filter;
pub mod settings;

pub use filter::{FilterPattern, NamePattern};
pub use settings::{FilterSettings, RetrySettings, Settings};
