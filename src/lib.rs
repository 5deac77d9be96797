//! Build configuration and pricing persistence engine
//!
//! Core of a factory-built-home configurator funnel: a pure pricing
//! calculator over catalog reference data, a delivery-quote resolver, an
//! anonymous customization cache, an idempotent build repository client,
//! and the debounced autosave scheduler that ties them together per
//! session.

pub mod anon_cache;
pub mod autosave;
pub mod catalog;
pub mod config;
pub mod delivery;
pub mod endpoints;
pub mod errors;
pub mod metrics;
pub mod migration;
pub mod observability;
pub mod pricing;
pub mod repository;
pub mod test_utils;
pub mod types;

// Re-export the surface most callers need
pub use autosave::FunnelSession;
pub use catalog::Catalog;
pub use config::Config;
pub use errors::EngineError;
pub use pricing::compute_pricing;
pub use types::{
    Address, Build, BuildId, DeliveryState, FunnelStep, PricingBreakdown, SaveState,
    SessionEvent, SessionIdentity,
};
