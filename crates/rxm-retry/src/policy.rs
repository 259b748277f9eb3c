use std::time::Duration;

use serde::Deserialize;

use rxm_types::RxmError;

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 1000;

/// Attempt budget and backoff for a wrapped remote operation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first. Always at least 1.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    /// Free-text label attached to retry diagnostics.
    pub context: Option<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            context: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Result<Self, RxmError> {
        if max_attempts == 0 {
            return Err(RxmError::InvalidArgument("max_attempts must be at least 1".into()));
        }
        Ok(RetryPolicy { max_attempts, base_delay_ms, context: None })
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Clamp a policy that bypassed [`RetryPolicy::new`] (e.g. deserialized).
    pub fn validated(mut self) -> Self {
        if self.max_attempts == 0 {
            tracing::warn!("retry policy max_attempts was 0, using 1");
            self.max_attempts = 1;
        }
        self
    }

    /// Wait before 1-indexed `attempt`. Zero for the first attempt.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.base_delay_ms.saturating_mul(attempt as u64))
    }
}
