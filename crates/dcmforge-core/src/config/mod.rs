mod loader;
mod types;

pub use loader::{ClassificationConfig, ConfigError};
pub use types::{ClassRule, Detection, DetectorConfig, RulesMeta};
