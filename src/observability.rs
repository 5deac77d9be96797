//! Observability: correlation ids and structured funnel logging

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation ID tying a funnel session's log lines together
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Create a new correlation ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Get the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Structured logger for funnel persistence events
#[derive(Debug, Clone)]
pub struct FunnelLogger {
    correlation_id: CorrelationId,
}

impl FunnelLogger {
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self { correlation_id }
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    pub fn log_save_success(&self, build_id: &str, latency_ms: u64) {
        tracing::info!(
            correlation_id = %self.correlation_id,
            build_id = %build_id,
            latency_ms = %latency_ms,
            "Build saved"
        );
    }

    pub fn log_save_failure(&self, error: &str, latency_ms: u64) {
        tracing::warn!(
            correlation_id = %self.correlation_id,
            error = %error,
            latency_ms = %latency_ms,
            "Build save failed, will retry"
        );
    }

    pub fn log_quote_resolved(&self, fee_cents: i64, eta_days: u32) {
        tracing::info!(
            correlation_id = %self.correlation_id,
            fee_cents = %fee_cents,
            eta_days = %eta_days,
            "Delivery quote resolved"
        );
    }

}
