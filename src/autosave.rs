//! Autosave scheduler and funnel session
//!
//! The session owns the Build aggregate and exposes the edit API the UI
//! calls; every edit synchronously recomputes pricing and nudges the
//! scheduler. The scheduler is a single task per session that debounces
//! edits into one write, decides create-vs-update, and serializes writes:
//! at most one persistence call is in flight per Build, and a save always
//! carries the freshest local state at fire time.
//!
//! State machine per session:
//! `Idle -> PendingSave -> Saving -> Idle` on success, or
//! `Saving -> SaveFailed -> PendingSave` on the next edit or an explicit
//! retry after a failure.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::anon_cache::AnonCache;
use crate::catalog::Catalog;
use crate::config::{AutosaveConfig, TaxPolicy};
use crate::delivery::DeliveryResolver;
use crate::errors::EngineError;
use crate::metrics::metrics;
use crate::migration::migrate_on_sign_in;
use crate::observability::{CorrelationId, FunnelLogger};
use crate::pricing::compute_pricing;
use crate::repository::BuildRepository;
use crate::types::{
    Address, Build, BuildId, CommandReceiver, CommandSender, DeliveryState, EventSender,
    FunnelStep, IdempotencyKey, ModelId, PricingBreakdown, SaveState, SchedulerCommand,
    SessionEvent, SessionIdentity,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Debounced persistence loop; one task per funnel session
struct AutosaveScheduler {
    build: Arc<RwLock<Build>>,
    repo: Arc<dyn BuildRepository>,
    cache: Arc<AnonCache>,
    debounce: Duration,
    save_timeout: Duration,
    /// One key per session, so retried creates deduplicate
    idempotency_key: IdempotencyKey,
    state_tx: watch::Sender<SaveState>,
    events: EventSender,
    logger: FunnelLogger,
}

impl AutosaveScheduler {
    async fn run(self, mut rx: CommandReceiver) {
        let mut deadline: Option<Instant> = None;
        let mut dirty = false;

        loop {
            tokio::select! {
                cmd = rx.recv() => {
                    match cmd {
                        None => {
                            // Session dropped; flush whatever is pending
                            if dirty {
                                self.save().await;
                            }
                            break;
                        }
                        Some(SchedulerCommand::Edit) => {
                            dirty = true;
                            deadline = Some(Instant::now() + self.debounce);
                            self.set_state(SaveState::PendingSave);
                        }
                        Some(SchedulerCommand::Retry) => {
                            if dirty {
                                deadline = Some(Instant::now() + self.debounce);
                                self.set_state(SaveState::PendingSave);
                            }
                        }
                        Some(SchedulerCommand::Flush) => {
                            deadline = None;
                            if dirty && self.save().await {
                                dirty = false;
                            }
                        }
                    }
                }
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)),
                    if deadline.is_some() =>
                {
                    deadline = None;
                    if self.save().await {
                        dirty = false;
                    }
                    // On failure dirty stays set; the window re-arms on the
                    // next edit or an explicit retry, never by looping here
                }
            }
        }

        metrics().active_sessions.dec();
        debug!(correlation_id = %self.logger.correlation_id(), "Autosave scheduler stopped");
    }

    /// Fire one persistence call with the freshest local state
    async fn save(&self) -> bool {
        self.set_state(SaveState::Saving);
        metrics().saves_attempted.inc();
        let timer = metrics().save_latency.start_timer();
        let result = self.persist_snapshot().await;
        let latency_ms = (timer.stop_and_record() * 1_000.0) as u64;

        match result {
            Ok(build_id) => {
                metrics().saves_succeeded.inc();
                let target = build_id
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "anonymous-cache".to_string());
                self.logger.log_save_success(&target, latency_ms);
                self.set_state(SaveState::Idle);
                let _ = self.events.send(SessionEvent::SaveSucceeded { build_id });
                true
            }
            Err(e) => {
                metrics().saves_failed.inc();
                self.logger.log_save_failure(&e.to_string(), latency_ms);
                self.set_state(SaveState::SaveFailed);
                let _ = self.events.send(SessionEvent::SaveFailed {
                    reason: e.to_string(),
                });
                false
            }
        }
    }

    async fn persist_snapshot(&self) -> Result<Option<BuildId>, EngineError> {
        // Snapshot at fire time: a burst of edits coalesces into exactly
        // this state, never a snapshot from when the window opened
        let snapshot = self.build.read().clone();

        match &snapshot.owner {
            SessionIdentity::Anonymous => {
                self.cache.save(
                    &snapshot.model_id,
                    &snapshot.selections,
                    snapshot.package.as_ref(),
                )?;
                Ok(None)
            }
            SessionIdentity::Authenticated { user_id } => {
                let build_id = match snapshot.id {
                    Some(build_id) => {
                        self.bounded(
                            "update",
                            self.repo
                                .update(build_id, snapshot.as_patch(), &snapshot.owner),
                        )
                        .await?;
                        build_id
                    }
                    None => {
                        let build_id = self
                            .bounded(
                                "create",
                                self.repo
                                    .create(snapshot.as_payload(user_id), self.idempotency_key),
                            )
                            .await?;
                        metrics().builds_created.inc();

                        // A stale create response is accepted only for this
                        // id side effect; local selections/pricing stay in
                        // charge
                        let mut build = self.build.write();
                        if build.id.is_none() {
                            build.id = Some(build_id);
                        }
                        build_id
                    }
                };

                // Any anonymous residue for this model (e.g. from a failed
                // migration) is deleted only after the confirmed
                // authoritative write, so it can never re-seed a later
                // session into a duplicate record
                self.cache.clear(&snapshot.model_id)?;
                Ok(Some(build_id))
            }
        }
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        fut: impl std::future::Future<Output = Result<T, EngineError>>,
    ) -> Result<T, EngineError> {
        match tokio::time::timeout(self.save_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout {
                operation,
                ms: self.save_timeout.as_millis() as u64,
            }),
        }
    }

    fn set_state(&self, state: SaveState) {
        let _ = self.state_tx.send(state);
    }
}

/// A user's in-progress configuration of one model, with autosave
pub struct FunnelSession {
    catalog: Arc<Catalog>,
    policy: TaxPolicy,
    build: Arc<RwLock<Build>>,
    repo: Arc<dyn BuildRepository>,
    cache: Arc<AnonCache>,
    resolver: Arc<DeliveryResolver>,
    cmd_tx: CommandSender,
    events: EventSender,
    state_rx: watch::Receiver<SaveState>,
    idempotency_key: IdempotencyKey,
    migrated: AtomicBool,
    correlation: CorrelationId,
    task: JoinHandle<()>,
}

impl FunnelSession {
    /// Open an anonymous session for a model, seeding selections from the
    /// anonymous cache when a fresh entry exists
    pub fn start(
        catalog: Arc<Catalog>,
        policy: TaxPolicy,
        model_id: ModelId,
        repo: Arc<dyn BuildRepository>,
        cache: Arc<AnonCache>,
        resolver: Arc<DeliveryResolver>,
        autosave: AutosaveConfig,
    ) -> Result<Self, EngineError> {
        catalog.require_model(&model_id)?;

        let mut build = Build::new(model_id.clone(), SessionIdentity::Anonymous);
        if let Some(entry) = cache.load(&model_id)? {
            build.selections = entry.selections;
            build.package = entry.package;
        }
        Self::recompute_locked(&catalog, &policy, &mut build)?;

        let correlation = CorrelationId::new();
        let build = Arc::new(RwLock::new(build));
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(SaveState::Idle);
        let idempotency_key = IdempotencyKey::new();

        let scheduler = AutosaveScheduler {
            build: Arc::clone(&build),
            repo: Arc::clone(&repo),
            cache: Arc::clone(&cache),
            debounce: Duration::from_millis(autosave.debounce_ms),
            save_timeout: Duration::from_secs(autosave.save_timeout_secs),
            idempotency_key,
            state_tx,
            events: events.clone(),
            logger: FunnelLogger::new(correlation.clone()),
        };
        let task = tokio::spawn(scheduler.run(cmd_rx));
        metrics().active_sessions.inc();
        info!(correlation_id = %correlation, model_id = %model_id, "Funnel session started");

        Ok(Self {
            catalog,
            policy,
            build,
            repo,
            cache,
            resolver,
            cmd_tx,
            events,
            state_rx,
            idempotency_key,
            migrated: AtomicBool::new(false),
            correlation,
            task,
        })
    }

    /// Toggle an option selection; returns the recomputed breakdown
    pub fn toggle_option(&self, option_id: &str) -> Result<PricingBreakdown, EngineError> {
        let pricing = {
            let mut build = self.build.write();
            let model = self.catalog.require_model(&build.model_id)?;
            if !model.option_ids.iter().any(|id| id == option_id) {
                return Err(EngineError::CatalogMissing {
                    kind: "option",
                    id: option_id.to_string(),
                });
            }
            if !build.selections.remove(option_id) {
                build.selections.insert(option_id.to_string());
            }
            Self::recompute_locked(&self.catalog, &self.policy, &mut build)?;
            build.pricing.clone()
        };
        self.note_edit();
        Ok(pricing)
    }

    /// Select a package (replacing any current one) or clear it
    pub fn set_package(&self, key: Option<&str>) -> Result<PricingBreakdown, EngineError> {
        let pricing = {
            let mut build = self.build.write();
            let model = self.catalog.require_model(&build.model_id)?;
            if let Some(key) = key {
                if model.package(key).is_none() {
                    return Err(EngineError::CatalogMissing {
                        kind: "package",
                        id: key.to_string(),
                    });
                }
            }
            // At most one package: selecting a new one replaces, never stacks
            build.package = key.map(str::to_string);
            Self::recompute_locked(&self.catalog, &self.policy, &mut build)?;
            build.pricing.clone()
        };
        self.note_edit();
        Ok(pricing)
    }

    /// Set or clear the delivery address. For an authenticated session
    /// with a complete address this kicks off an async quote resolution;
    /// the UI sees `Pending` until it lands.
    pub fn set_address(&self, address: Option<Address>) -> Result<PricingBreakdown, EngineError> {
        let pricing = {
            let mut build = self.build.write();
            build.address = address;
            // A quote is only reusable for the exact address it was issued
            // for; any change invalidates it and re-enters Pending (which
            // recompute normalizes for anonymous/incomplete cases)
            if build.quoted_address.as_ref() != build.address.as_ref() {
                build.pricing.delivery = DeliveryState::Pending;
            }
            Self::recompute_locked(&self.catalog, &self.policy, &mut build)?;
            build.pricing.clone()
        };
        self.note_edit();
        self.spawn_quote_if_needed();
        Ok(pricing)
    }

    /// Advance the funnel. Steps only move forward; regression or
    /// re-entering the current step is rejected.
    pub fn advance_step(&self, to: FunnelStep) -> Result<(), EngineError> {
        {
            let mut build = self.build.write();
            if to <= build.step {
                return Err(EngineError::InvalidStep {
                    from: build.step,
                    to,
                });
            }
            build.step = to;
        }
        let _ = self.events.send(SessionEvent::FunnelAdvanced { step: to });
        // Advancing is a commitment point; persist promptly
        self.note_edit();
        let _ = self.cmd_tx.send(SchedulerCommand::Flush);
        Ok(())
    }

    /// Explicitly switch the session to another model. Selections and
    /// package reset; any cached delivery quote is invalidated.
    pub fn change_model(&self, model_id: &str) -> Result<PricingBreakdown, EngineError> {
        self.catalog.require_model(model_id)?;
        let pricing = {
            let mut build = self.build.write();
            build.model_id = model_id.to_string();
            build.selections.clear();
            build.package = None;
            build.quoted_address = None;
            if build.pricing.delivery != DeliveryState::NotRequested {
                build.pricing.delivery = DeliveryState::Pending;
            }
            Self::recompute_locked(&self.catalog, &self.policy, &mut build)?;
            build.pricing.clone()
        };
        self.note_edit();
        self.spawn_quote_if_needed();
        Ok(pricing)
    }

    /// Sign-in boundary: adopt the user identity and migrate the
    /// anonymous cache entry into a repository Build (at most once per
    /// session). A failed migration leaves the cache entry in place; the
    /// session still becomes authenticated and the scheduler's idempotent
    /// create path picks the work up later.
    pub async fn sign_in(&self, user_id: &str) -> Result<Option<BuildId>, EngineError> {
        {
            let build = self.build.read();
            if build.owner.is_authenticated() {
                return Ok(build.id);
            }
        }

        // Capture the freshest local edits in the cache slot so migration
        // seeds from them rather than an older autosave
        let (model_id, has_content) = {
            let build = self.build.read();
            let has_content = !build.selections.is_empty() || build.package.is_some();
            if has_content {
                self.cache
                    .save(&build.model_id, &build.selections, build.package.as_ref())?;
            }
            (build.model_id.clone(), has_content)
        };

        let migrated_id = if !self.migrated.swap(true, Ordering::SeqCst) && has_content {
            match migrate_on_sign_in(
                &self.cache,
                &*self.repo,
                &self.catalog,
                &self.policy,
                &model_id,
                user_id,
                self.idempotency_key,
            )
            .await
            {
                Ok(id) => id,
                Err(e) => {
                    // Cache entry preserved; retryable on next sign-in
                    self.migrated.store(false, Ordering::SeqCst);
                    self.adopt_identity(user_id, None)?;
                    return Err(e);
                }
            }
        } else {
            None
        };

        self.adopt_identity(user_id, migrated_id)?;
        if let Some(build_id) = migrated_id {
            let _ = self.events.send(SessionEvent::Migrated { build_id });
        }
        // An untouched session has nothing worth a repository record yet;
        // the first edit opens the create path
        if has_content {
            self.note_edit();
        }
        self.spawn_quote_if_needed();
        Ok(migrated_id)
    }

    fn adopt_identity(&self, user_id: &str, build_id: Option<BuildId>) -> Result<(), EngineError> {
        let mut build = self.build.write();
        build.owner = SessionIdentity::Authenticated {
            user_id: user_id.to_string(),
        };
        if build.id.is_none() {
            build.id = build_id;
        }
        Self::recompute_locked(&self.catalog, &self.policy, &mut build)
    }

    /// Current pricing snapshot
    pub fn pricing(&self) -> PricingBreakdown {
        self.build.read().pricing.clone()
    }

    /// Snapshot of the whole aggregate
    pub fn build(&self) -> Build {
        self.build.read().clone()
    }

    /// Current autosave state
    pub fn save_state(&self) -> SaveState {
        *self.state_rx.borrow()
    }

    /// Watch channel over autosave state transitions
    pub fn state_watch(&self) -> watch::Receiver<SaveState> {
        self.state_rx.clone()
    }

    /// Subscribe to session events (saves, quotes, funnel advances)
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation
    }

    /// Explicit retry after a failed save
    pub fn retry_save(&self) {
        let _ = self.cmd_tx.send(SchedulerCommand::Retry);
    }

    /// Persist now, skipping the remaining debounce window
    pub fn flush(&self) {
        let _ = self.cmd_tx.send(SchedulerCommand::Flush);
    }

    /// Close the session, flushing any pending save
    pub async fn shutdown(self) {
        drop(self.cmd_tx);
        let _ = self.task.await;
    }

    fn note_edit(&self) {
        let _ = self.cmd_tx.send(SchedulerCommand::Edit);
    }

    fn recompute_locked(
        catalog: &Catalog,
        policy: &TaxPolicy,
        build: &mut Build,
    ) -> Result<(), EngineError> {
        let options = catalog.resolve_options(build.selections.iter())?;
        // Normalize the delivery state: anonymous sessions never request a
        // quote; an authenticated session without a usable address renders
        // "unavailable", never an implicit $0
        let delivery = if !build.owner.is_authenticated() {
            DeliveryState::NotRequested
        } else {
            match &build.address {
                Some(addr) if addr.is_complete() => match build.pricing.delivery {
                    // A quote resolution is about to be (or is) in flight
                    DeliveryState::NotRequested => DeliveryState::Pending,
                    other => other,
                },
                _ => DeliveryState::Unavailable,
            }
        };
        build.pricing = compute_pricing(
            catalog.model(&build.model_id),
            &options,
            build.package.as_deref(),
            delivery,
            policy,
        );
        Ok(())
    }

    fn spawn_quote_if_needed(&self) {
        let address = {
            let build = self.build.read();
            if !build.needs_quote() {
                return;
            }
            match &build.address {
                Some(addr) => addr.clone(),
                None => return,
            }
        };

        let resolver = Arc::clone(&self.resolver);
        let build = Arc::clone(&self.build);
        let catalog = Arc::clone(&self.catalog);
        let policy = self.policy;
        let events = self.events.clone();
        let cmd_tx = self.cmd_tx.clone();
        let logger = FunnelLogger::new(self.correlation.clone());

        tokio::spawn(async move {
            let result = resolver.quote_delivery(&address).await;

            {
                let mut build = build.write();
                // Out-of-order guard: a response for a superseded address
                // is discarded in favor of the freshest local state
                if build.address.as_ref() != Some(&address) {
                    debug!(correlation_id = %logger.correlation_id(), "Discarding stale quote response");
                    return;
                }
                match &result {
                    Ok(quote) => {
                        build.pricing.delivery = DeliveryState::Quoted {
                            fee_cents: quote.fee_cents,
                            eta_days: quote.eta_days,
                        };
                        build.quoted_address = Some(address);
                    }
                    Err(_) => {
                        build.pricing.delivery = DeliveryState::Unavailable;
                        build.quoted_address = None;
                    }
                }
                if let Err(e) = Self::recompute_locked(&catalog, &policy, &mut build) {
                    warn!(correlation_id = %logger.correlation_id(), error = %e, "Pricing refresh after quote resolution failed");
                }
            }

            match result {
                Ok(quote) => {
                    logger.log_quote_resolved(quote.fee_cents, quote.eta_days);
                    let _ = events.send(SessionEvent::DeliveryQuoted {
                        fee_cents: quote.fee_cents,
                        eta_days: quote.eta_days,
                    });
                }
                Err(e) => {
                    let _ = events.send(SessionEvent::DeliveryUnavailable {
                        reason: e.to_string(),
                    });
                }
            }
            // Persist the refreshed pricing snapshot on the normal path
            let _ = cmd_tx.send(SchedulerCommand::Edit);
        });
    }
}
