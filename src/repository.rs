//! Build repository: authoritative server-side persistence for Build records
//!
//! `create` is idempotent on a caller-generated key so a retried request
//! never produces a duplicate record. `update` is a partial merge where
//! selections and package are replaced wholesale. Ownership is checked on
//! every `update`/`get`; anonymous callers never reach this component.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::Deserialize;
use tracing::debug;

use crate::config::RepositoryConfig;
use crate::errors::EngineError;
use crate::types::{
    Build, BuildId, BuildPatch, BuildPayload, IdempotencyKey, SessionIdentity,
};

/// Persistence seam for Build records
#[async_trait]
pub trait BuildRepository: Send + Sync {
    /// Idempotent create: the same key submitted twice yields the one
    /// original record's id
    async fn create(
        &self,
        payload: BuildPayload,
        key: IdempotencyKey,
    ) -> Result<BuildId, EngineError>;

    /// Partial merge of the provided fields onto the stored record
    async fn update(
        &self,
        build_id: BuildId,
        patch: BuildPatch,
        caller: &SessionIdentity,
    ) -> Result<Build, EngineError>;

    async fn get(&self, build_id: BuildId, caller: &SessionIdentity)
        -> Result<Build, EngineError>;
}

fn require_user(caller: &SessionIdentity, build_id: BuildId) -> Result<&str, EngineError> {
    caller
        .user_id()
        .ok_or(EngineError::Ownership { build_id })
}

fn apply_patch(build: &mut Build, patch: BuildPatch) {
    if let Some(selections) = patch.selections {
        build.selections = selections;
    }
    if let Some(package) = patch.package {
        build.package = package;
    }
    if let Some(address) = patch.address {
        build.address = address;
    }
    if let Some(pricing) = patch.pricing {
        build.pricing = pricing;
    }
    if let Some(step) = patch.step {
        build.step = step;
    }
    build.updated_at = Utc::now();
}

/// In-memory repository used by tests and the simulation driver
#[derive(Default)]
pub struct InMemoryBuildRepository {
    builds: DashMap<BuildId, Build>,
    idempotency: DashMap<IdempotencyKey, BuildId>,
}

impl InMemoryBuildRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build_count(&self) -> usize {
        self.builds.len()
    }
}

#[async_trait]
impl BuildRepository for InMemoryBuildRepository {
    async fn create(
        &self,
        payload: BuildPayload,
        key: IdempotencyKey,
    ) -> Result<BuildId, EngineError> {
        if let Some(existing) = self.idempotency.get(&key) {
            debug!(build_id = %*existing, %key, "Create deduplicated on idempotency key");
            return Ok(*existing);
        }

        let id = BuildId::new();
        let now = Utc::now();
        let build = Build {
            id: Some(id),
            owner: SessionIdentity::Authenticated {
                user_id: payload.user_id,
            },
            model_id: payload.model_id,
            selections: payload.selections,
            package: payload.package,
            address: payload.address,
            quoted_address: None,
            pricing: payload.pricing,
            step: payload.step,
            created_at: now,
            updated_at: now,
        };
        self.builds.insert(id, build);

        match self.idempotency.entry(key) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                // Lost the race to a concurrent create with the same key;
                // the first record wins
                self.builds.remove(&id);
                Ok(*existing.get())
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(id);
                Ok(id)
            }
        }
    }

    async fn update(
        &self,
        build_id: BuildId,
        patch: BuildPatch,
        caller: &SessionIdentity,
    ) -> Result<Build, EngineError> {
        let user_id = require_user(caller, build_id)?;
        let mut entry = self
            .builds
            .get_mut(&build_id)
            .ok_or(EngineError::BuildNotFound(build_id))?;

        if entry.owner.user_id() != Some(user_id) {
            return Err(EngineError::Ownership { build_id });
        }

        apply_patch(&mut entry, patch);
        Ok(entry.clone())
    }

    async fn get(
        &self,
        build_id: BuildId,
        caller: &SessionIdentity,
    ) -> Result<Build, EngineError> {
        let user_id = require_user(caller, build_id)?;
        let entry = self
            .builds
            .get(&build_id)
            .ok_or(EngineError::BuildNotFound(build_id))?;

        if entry.owner.user_id() != Some(user_id) {
            return Err(EngineError::Ownership { build_id });
        }
        Ok(entry.clone())
    }
}

/// HTTP client for the hosted build persistence endpoint
pub struct HttpBuildRepository {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    id: BuildId,
}

impl HttpBuildRepository {
    pub fn new(config: &RepositoryConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn map_status(status: reqwest::StatusCode, build_id: BuildId) -> EngineError {
        match status {
            reqwest::StatusCode::FORBIDDEN | reqwest::StatusCode::UNAUTHORIZED => {
                EngineError::Ownership { build_id }
            }
            reqwest::StatusCode::NOT_FOUND => EngineError::BuildNotFound(build_id),
            other => EngineError::persistence(format!("repository returned {other}")),
        }
    }
}

#[async_trait]
impl BuildRepository for HttpBuildRepository {
    async fn create(
        &self,
        payload: BuildPayload,
        key: IdempotencyKey,
    ) -> Result<BuildId, EngineError> {
        let response = self
            .client
            .post(format!("{}/builds", self.base_url))
            .header("Idempotency-Key", key.to_string())
            .json(&payload)
            .send()
            .await
            .map_err(|e| EngineError::persistence(format!("create request: {e}")))?;

        if !response.status().is_success() {
            return Err(EngineError::persistence(format!(
                "create returned {}",
                response.status()
            )));
        }

        let created: CreateResponse = response
            .json()
            .await
            .map_err(|e| EngineError::persistence(format!("create decode: {e}")))?;
        Ok(created.id)
    }

    async fn update(
        &self,
        build_id: BuildId,
        patch: BuildPatch,
        caller: &SessionIdentity,
    ) -> Result<Build, EngineError> {
        let user_id = require_user(caller, build_id)?;
        let response = self
            .client
            .patch(format!("{}/builds/{}", self.base_url, build_id))
            .header("X-User-Id", user_id)
            .json(&patch)
            .send()
            .await
            .map_err(|e| EngineError::persistence(format!("update request: {e}")))?;

        if !response.status().is_success() {
            return Err(Self::map_status(response.status(), build_id));
        }

        response
            .json::<Build>()
            .await
            .map_err(|e| EngineError::persistence(format!("update decode: {e}")))
    }

    async fn get(
        &self,
        build_id: BuildId,
        caller: &SessionIdentity,
    ) -> Result<Build, EngineError> {
        let user_id = require_user(caller, build_id)?;
        let response = self
            .client
            .get(format!("{}/builds/{}", self.base_url, build_id))
            .header("X-User-Id", user_id)
            .send()
            .await
            .map_err(|e| EngineError::persistence(format!("get request: {e}")))?;

        if !response.status().is_success() {
            return Err(Self::map_status(response.status(), build_id));
        }

        response
            .json::<Build>()
            .await
            .map_err(|e| EngineError::persistence(format!("get decode: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FunnelStep, PricingBreakdown};
    use std::collections::BTreeSet;
    use std::sync::Arc;

    fn payload(user_id: &str) -> BuildPayload {
        BuildPayload {
            user_id: user_id.to_string(),
            model_id: "meadowlark-20".into(),
            selections: BTreeSet::from(["opt-porch".to_string()]),
            package: Some("comfort".into()),
            address: None,
            pricing: PricingBreakdown::zero(),
            step: FunnelStep::Customize,
        }
    }

    fn caller(user_id: &str) -> SessionIdentity {
        SessionIdentity::Authenticated {
            user_id: user_id.to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_is_idempotent_on_key() {
        let repo = InMemoryBuildRepository::new();
        let key = IdempotencyKey::new();

        let first = repo.create(payload("user-1"), key).await.unwrap();
        let second = repo.create(payload("user-1"), key).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(repo.build_count(), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_create_distinct_records() {
        let repo = InMemoryBuildRepository::new();
        let a = repo
            .create(payload("user-1"), IdempotencyKey::new())
            .await
            .unwrap();
        let b = repo
            .create(payload("user-1"), IdempotencyKey::new())
            .await
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(repo.build_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_creates_same_key_single_record() {
        let repo = Arc::new(InMemoryBuildRepository::new());
        let key = IdempotencyKey::new();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let repo = Arc::clone(&repo);
            handles.push(tokio::spawn(async move {
                repo.create(payload("user-1"), key).await.unwrap()
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(repo.build_count(), 1);
    }

    #[tokio::test]
    async fn test_update_replaces_collections_wholesale() {
        let repo = InMemoryBuildRepository::new();
        let id = repo
            .create(payload("user-1"), IdempotencyKey::new())
            .await
            .unwrap();

        let patch = BuildPatch {
            selections: Some(BTreeSet::from(["opt-solar".to_string()])),
            package: Some(None),
            ..Default::default()
        };
        let updated = repo.update(id, patch, &caller("user-1")).await.unwrap();

        // Not merged with the previous selection set
        assert_eq!(updated.selections, BTreeSet::from(["opt-solar".to_string()]));
        assert_eq!(updated.package, None);
        // Untouched fields survive
        assert_eq!(updated.model_id, "meadowlark-20");
    }

    #[tokio::test]
    async fn test_update_bumps_updated_at_only() {
        let repo = InMemoryBuildRepository::new();
        let id = repo
            .create(payload("user-1"), IdempotencyKey::new())
            .await
            .unwrap();
        let before = repo.get(id, &caller("user-1")).await.unwrap();

        let updated = repo
            .update(id, BuildPatch::default(), &caller("user-1"))
            .await
            .unwrap();
        assert_eq!(updated.created_at, before.created_at);
        assert!(updated.updated_at >= before.updated_at);
    }

    #[tokio::test]
    async fn test_ownership_enforced() {
        let repo = InMemoryBuildRepository::new();
        let id = repo
            .create(payload("user-1"), IdempotencyKey::new())
            .await
            .unwrap();

        let err = repo
            .update(id, BuildPatch::default(), &caller("user-2"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Ownership { .. }));

        let err = repo.get(id, &caller("user-2")).await.unwrap_err();
        assert!(matches!(err, EngineError::Ownership { .. }));

        // Anonymous callers are rejected outright
        let err = repo
            .get(id, &SessionIdentity::Anonymous)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Ownership { .. }));
    }

    #[tokio::test]
    async fn test_get_unknown_build() {
        let repo = InMemoryBuildRepository::new();
        let err = repo
            .get(BuildId::new(), &caller("user-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::BuildNotFound(_)));
    }
}
