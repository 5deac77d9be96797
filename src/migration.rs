//! Sign-in migration: anonymous cache entry → authenticated Build record
//!
//! A one-shot, at-most-once operation per sign-in for the model being
//! viewed. The cache entry is read once, used to seed a Build through the
//! repository's idempotent create, and deleted only after the write is
//! confirmed. A failed write preserves the entry so no work is lost; the
//! migration can be retried on the next sign-in or model view.

use tracing::{info, warn};

use crate::anon_cache::AnonCache;
use crate::catalog::Catalog;
use crate::config::TaxPolicy;
use crate::errors::EngineError;
use crate::metrics::metrics;
use crate::pricing::compute_pricing;
use crate::repository::BuildRepository;
use crate::types::{BuildId, BuildPayload, DeliveryState, FunnelStep, IdempotencyKey};

/// Migrate the cached customization for `model_id` into a Build owned by
/// `user_id`. Returns `Ok(None)` when there is nothing cached.
///
/// `key` is the session's idempotency key: if the autosave scheduler also
/// issues a create for this session, the repository deduplicates to one
/// record.
pub async fn migrate_on_sign_in(
    cache: &AnonCache,
    repo: &dyn BuildRepository,
    catalog: &Catalog,
    policy: &TaxPolicy,
    model_id: &str,
    user_id: &str,
    key: IdempotencyKey,
) -> Result<Option<BuildId>, EngineError> {
    let Some(entry) = cache.load(model_id)? else {
        return Ok(None);
    };

    let options = catalog.resolve_options(entry.selections.iter())?;
    // No address on file yet, so the delivery line renders unavailable
    let pricing = compute_pricing(
        catalog.model(model_id),
        &options,
        entry.package.as_deref(),
        DeliveryState::Unavailable,
        policy,
    );

    let payload = BuildPayload {
        user_id: user_id.to_string(),
        model_id: model_id.to_string(),
        selections: entry.selections,
        package: entry.package,
        address: None,
        pricing,
        step: FunnelStep::Customize,
    };

    let build_id = match repo.create(payload, key).await {
        Ok(id) => id,
        Err(e) => {
            metrics().migrations_failed.inc();
            warn!(model_id, error = %e, "Migration write failed, cache entry preserved");
            return Err(EngineError::migration(e.to_string()));
        }
    };

    // Cache deletion is the last step, only after confirmed persistence
    cache.clear(model_id)?;
    metrics().migrations_completed.inc();
    info!(model_id, build_id = %build_id, "Anonymous customization migrated");
    Ok(Some(build_id))
}
