//! Service configuration.

use serde::{Deserialize, Serialize};

use crate::options::{ExtractionStrategy, OptionLimits};

/// Tunables for the task and run services. Every field has a default, so
/// `{}` is a valid configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub extraction_strategy: ExtractionStrategy,
    pub default_page_size: usize,
    pub max_page_size: usize,
    pub max_concurrency: i64,
    pub max_retry: i64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            extraction_strategy: ExtractionStrategy::Evaluated,
            default_page_size: 100,
            max_page_size: 500,
            max_concurrency: 100,
            max_retry: 10,
        }
    }
}

impl ServiceConfig {
    pub fn option_limits(&self) -> OptionLimits {
        OptionLimits {
            max_concurrency: self.max_concurrency,
            max_retry: self.max_retry,
        }
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
