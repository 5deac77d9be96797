//! Engine error taxonomy with transience classification

use thiserror::Error;

use crate::types::BuildId;

/// Configurator engine errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Requested model or option is absent from the catalog
    #[error("Catalog entry not found: {kind} '{id}'")]
    CatalogMissing { kind: &'static str, id: String },

    /// Delivery quote cannot be produced (incomplete address or provider
    /// failure); pricing must render "unavailable", never $0
    #[error("Delivery quote unavailable: {reason}")]
    DeliveryUnavailable { reason: String },

    /// Build repository call failed (network/storage)
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    /// Caller is not the owner of the Build
    #[error("Not authorized for build {build_id}")]
    Ownership { build_id: BuildId },

    /// Build not found in the repository
    #[error("Build not found: {0}")]
    BuildNotFound(BuildId),

    /// Anonymous-cache migration failed; the cache entry is preserved
    #[error("Migration error: {message}")]
    Migration { message: String },

    /// Bounded timeout elapsed on an external call
    #[error("Timeout after {ms}ms during {operation}")]
    Timeout { operation: &'static str, ms: u64 },

    /// Funnel step regression or skip outside the allowed order
    #[error("Invalid funnel transition: {from:?} -> {to:?}")]
    InvalidStep {
        from: crate::types::FunnelStep,
        to: crate::types::FunnelStep,
    },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl EngineError {
    /// Transient errors resolve on a later retry (next debounce tick or
    /// next relevant state change); the scheduler never loops internally.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::DeliveryUnavailable { .. }
                | Self::Persistence { .. }
                | Self::Timeout { .. }
                | Self::Migration { .. }
        )
    }

    /// Hard stops for the affected call: authorization failures and
    /// catalog corruption require user redirection, not retry.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Ownership { .. } | Self::CatalogMissing { .. })
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::DeliveryUnavailable {
            reason: reason.into(),
        }
    }

    pub fn migration(message: impl Into<String>) -> Self {
        Self::Migration {
            message: message.into(),
        }
    }
}
