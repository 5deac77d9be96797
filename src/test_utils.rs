//! Test Utilities Module
//!
//! Test-only doubles for the repository and quote-API seams, with call
//! counting and failure injection for deterministic scheduler tests.
//! Compiled only for tests or with the `test_utils` feature.

#![cfg(any(test, feature = "test_utils"))]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::delivery::{DeliveryQuote, QuoteApi};
use crate::errors::EngineError;
use crate::repository::BuildRepository;
use crate::types::{Build, BuildId, BuildPatch, BuildPayload, IdempotencyKey, SessionIdentity};

/// Deterministic quote API double
pub struct MockQuoteApi {
    fee_cents: i64,
    eta_days: u32,
    should_fail: AtomicBool,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl MockQuoteApi {
    pub fn new(fee_cents: i64, eta_days: u32) -> Self {
        Self {
            fee_cents,
            eta_days,
            should_fail: AtomicBool::new(false),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// A quote API that always reports the provider as down
    pub fn failing() -> Self {
        let api = Self::new(0, 0);
        api.should_fail.store(true, Ordering::SeqCst);
        api
    }

    /// Delay every response, for timeout tests
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QuoteApi for MockQuoteApi {
    async fn fetch_quote(&self, _address: &crate::types::Address) -> Result<DeliveryQuote, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(EngineError::unavailable("provider down"));
        }
        Ok(DeliveryQuote {
            fee_cents: self.fee_cents,
            eta_days: self.eta_days,
        })
    }
}

/// Repository wrapper that counts calls and injects failures.
///
/// Wraps a real implementation (usually the in-memory one) so successful
/// calls behave normally while tests observe traffic and schedule faults.
pub struct RecordingRepository {
    inner: Arc<dyn BuildRepository>,
    create_calls: AtomicUsize,
    update_calls: AtomicUsize,
    failing_creates: AtomicUsize,
    failing_updates: AtomicUsize,
    create_delay_ms: AtomicU64,
}

impl RecordingRepository {
    pub fn new(inner: Arc<dyn BuildRepository>) -> Self {
        Self {
            inner,
            create_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
            failing_creates: AtomicUsize::new(0),
            failing_updates: AtomicUsize::new(0),
            create_delay_ms: AtomicU64::new(0),
        }
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }

    /// Fail the next `n` create calls with a persistence error
    pub fn fail_next_creates(&self, n: usize) {
        self.failing_creates.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` update calls with a persistence error
    pub fn fail_next_updates(&self, n: usize) {
        self.failing_updates.store(n, Ordering::SeqCst);
    }

    /// Hold every create call for `delay` before answering, for tests
    /// racing a slow create response against further local edits
    pub fn delay_creates(&self, delay: Duration) {
        self.create_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn take_fault(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl BuildRepository for RecordingRepository {
    async fn create(
        &self,
        payload: BuildPayload,
        key: IdempotencyKey,
    ) -> Result<BuildId, EngineError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let delay_ms = self.create_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        if Self::take_fault(&self.failing_creates) {
            return Err(EngineError::persistence("injected create failure"));
        }
        self.inner.create(payload, key).await
    }

    async fn update(
        &self,
        build_id: BuildId,
        patch: BuildPatch,
        caller: &SessionIdentity,
    ) -> Result<Build, EngineError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_fault(&self.failing_updates) {
            return Err(EngineError::persistence("injected update failure"));
        }
        self.inner.update(build_id, patch, caller).await
    }

    async fn get(
        &self,
        build_id: BuildId,
        caller: &SessionIdentity,
    ) -> Result<Build, EngineError> {
        self.inner.get(build_id, caller).await
    }
}
