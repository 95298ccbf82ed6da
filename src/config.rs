//! Bus configuration parameters
//!
//! Tunables for the transport retry policy, the dispatch thread and the
//! default exchange timeout. Loaded from JSON; any omitted field keeps its
//! default.

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::transport::RetryPolicy;

/// Core bus configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    // --- Transport retry ---
    /// Sleep between attempts while the transport answers TRY_AGAIN (ms)
    pub retry_interval_ms: u64,
    /// Total time spent retrying before giving up (ms)
    pub retry_cap_ms: u64,

    // --- Dispatch ---
    /// Name of the dispatch thread
    pub dispatcher_thread_name: String,

    // --- Protocol ---
    /// Timeout used by callers that do not pick their own (ms)
    pub default_exchange_timeout_ms: i32,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: 50,
            retry_cap_ms: 2_000,
            dispatcher_thread_name: "propbus-dispatch".into(),
            default_exchange_timeout_ms: 5_000,
        }
    }
}

impl BusConfig {
    /// Parse a JSON document and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::invalid(format!("config json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry_interval_ms == 0 {
            return Err(Error::invalid("retry_interval_ms must be positive"));
        }
        if self.retry_cap_ms < self.retry_interval_ms {
            return Err(Error::invalid("retry_cap_ms below retry_interval_ms"));
        }
        if self.default_exchange_timeout_ms <= 0 {
            return Err(Error::invalid("default_exchange_timeout_ms must be positive"));
        }
        if self.dispatcher_thread_name.is_empty() {
            return Err(Error::invalid("dispatcher_thread_name is empty"));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_millis(self.retry_interval_ms),
            Duration::from_millis(self.retry_cap_ms),
        )
    }
}
