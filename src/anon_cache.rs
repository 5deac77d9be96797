//! Anonymous customization cache: one slot per model, with expiry
//!
//! Ephemeral persistence for sessions with no signed-in user, keyed by
//! model identifier only. Entries carry a write timestamp; housekeeping
//! runs opportunistically on open and on save, never on a timer thread.
//! Migration into the build repository lives in [`crate::migration`].

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::CacheConfig;
use crate::errors::EngineError;
use crate::metrics::metrics;
use crate::types::{ModelId, OptionId, PackageKey};

/// One cached customization slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedCustomization {
    pub model_id: ModelId,
    pub selections: BTreeSet<OptionId>,
    pub package: Option<PackageKey>,
    pub saved_at: DateTime<Utc>,
}

/// sled-backed anonymous cache
pub struct AnonCache {
    db: sled::Db,
    retention: Duration,
}

impl AnonCache {
    /// Open (or create) the cache and run retention housekeeping once
    pub fn open(config: &CacheConfig) -> anyhow::Result<Self> {
        Self::open_at(&config.path, config.retention_days)
    }

    pub fn open_at(path: &str, retention_days: i64) -> anyhow::Result<Self> {
        let db = sled::open(path)?;
        let cache = Self {
            db,
            retention: Duration::days(retention_days),
        };
        cache.expire_old()?;
        Ok(cache)
    }

    /// Write the slot for a model, replacing any previous entry
    pub fn save(
        &self,
        model_id: &str,
        selections: &BTreeSet<OptionId>,
        package: Option<&PackageKey>,
    ) -> Result<(), EngineError> {
        let entry = CachedCustomization {
            model_id: model_id.to_string(),
            selections: selections.clone(),
            package: package.cloned(),
            saved_at: Utc::now(),
        };
        let bytes = serde_json::to_vec(&entry)
            .map_err(|e| EngineError::persistence(format!("cache encode: {e}")))?;
        self.db
            .insert(model_id.as_bytes(), bytes)
            .map_err(|e| EngineError::persistence(format!("cache write: {e}")))?;
        metrics().cache_writes.inc();

        // Opportunistic housekeeping on the write path
        let _ = self.expire_old();
        Ok(())
    }

    /// Read the slot for a model. Entries past the retention window are
    /// removed and reported as absent.
    pub fn load(&self, model_id: &str) -> Result<Option<CachedCustomization>, EngineError> {
        let Some(bytes) = self
            .db
            .get(model_id.as_bytes())
            .map_err(|e| EngineError::persistence(format!("cache read: {e}")))?
        else {
            return Ok(None);
        };

        let entry: CachedCustomization = serde_json::from_slice(&bytes)
            .map_err(|e| EngineError::persistence(format!("cache decode: {e}")))?;

        if self.is_expired(&entry) {
            self.clear(model_id)?;
            return Ok(None);
        }
        Ok(Some(entry))
    }

    /// Remove the slot for a model
    pub fn clear(&self, model_id: &str) -> Result<(), EngineError> {
        self.db
            .remove(model_id.as_bytes())
            .map_err(|e| EngineError::persistence(format!("cache remove: {e}")))?;
        Ok(())
    }

    /// Remove every entry older than the retention window; returns the
    /// number of entries removed
    pub fn expire_old(&self) -> Result<usize, EngineError> {
        let mut stale: Vec<Vec<u8>> = Vec::new();
        for item in self.db.iter() {
            let (key, value) =
                item.map_err(|e| EngineError::persistence(format!("cache scan: {e}")))?;
            match serde_json::from_slice::<CachedCustomization>(&value) {
                Ok(entry) if self.is_expired(&entry) => stale.push(key.to_vec()),
                Ok(_) => {}
                // Undecodable entries are stale by definition
                Err(_) => stale.push(key.to_vec()),
            }
        }

        let removed = stale.len();
        for key in stale {
            self.db
                .remove(key)
                .map_err(|e| EngineError::persistence(format!("cache remove: {e}")))?;
        }
        if removed > 0 {
            metrics().cache_expired_entries.inc_by(removed as u64);
            debug!(removed, "Expired anonymous cache entries");
        }
        Ok(removed)
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }

    fn is_expired(&self, entry: &CachedCustomization) -> bool {
        Utc::now() - entry.saved_at > self.retention
    }
}
