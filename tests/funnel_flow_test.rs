//! End-to-end funnel flow integration tests
//!
//! These tests validate:
//! - Anonymous customization persisting through the cache and surviving a
//!   session restart
//! - Sign-in migration producing exactly one repository record
//! - Delivery quoting folding into a finalized total
//! - Funnel advancement persisting promptly

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use configurator::anon_cache::AnonCache;
use configurator::autosave::FunnelSession;
use configurator::catalog::Catalog;
use configurator::config::{AutosaveConfig, TaxPolicy};
use configurator::delivery::{DeliveryQuote, DeliveryResolver, QuoteApi};
use configurator::errors::EngineError;
use configurator::repository::{BuildRepository, InMemoryBuildRepository};
use configurator::types::{Address, DeliveryState, FunnelStep, SessionEvent};

/// Fixed-fee quote provider for in-process runs
struct SteadyQuoteApi;

#[async_trait]
impl QuoteApi for SteadyQuoteApi {
    async fn fetch_quote(&self, _address: &Address) -> Result<DeliveryQuote, EngineError> {
        Ok(DeliveryQuote {
            fee_cents: 120_000,
            eta_days: 45,
        })
    }
}

struct World {
    repo: Arc<InMemoryBuildRepository>,
    cache: Arc<AnonCache>,
    catalog: Arc<Catalog>,
    _dir: TempDir,
}

impl World {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        Self {
            repo: Arc::new(InMemoryBuildRepository::new()),
            cache: Arc::new(AnonCache::open_at(dir.path().to_str().unwrap(), 30).unwrap()),
            catalog: Arc::new(Catalog::demo()),
            _dir: dir,
        }
    }

    fn session(&self, model: &str) -> FunnelSession {
        FunnelSession::start(
            self.catalog.clone(),
            TaxPolicy::default(),
            model.to_string(),
            self.repo.clone(),
            self.cache.clone(),
            Arc::new(DeliveryResolver::new(
                Arc::new(SteadyQuoteApi),
                Duration::from_secs(5),
            )),
            AutosaveConfig {
                debounce_ms: 2_000,
                save_timeout_secs: 10,
            },
        )
        .unwrap()
    }
}

fn address() -> Address {
    Address {
        street: "12 Fern Hollow Rd".into(),
        city: "Asheville".into(),
        state: "NC".into(),
        postal_code: "28801".into(),
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    tokio::task::yield_now().await;
}

#[tokio::test(start_paused = true)]
async fn test_anonymous_work_survives_session_restart() {
    let world = World::new();

    let session = world.session("meadowlark-20");
    session.toggle_option("opt-porch").unwrap();
    session.set_package(Some("comfort")).unwrap();
    session.shutdown().await;

    // A fresh session on the same model picks the cached work back up
    let session = world.session("meadowlark-20");
    let build = session.build();
    assert!(build.selections.contains("opt-porch"));
    assert_eq!(build.package.as_deref(), Some("comfort"));
    assert_eq!(build.pricing.subtotal_cents, 6_400_000);

    // A different model starts clean
    let other = world.session("juniper-28");
    assert!(other.build().selections.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_sign_in_migrates_cache_into_one_record() {
    let world = World::new();
    let session = world.session("meadowlark-20");

    session.toggle_option("opt-porch").unwrap();
    settle().await;
    assert!(!world.cache.is_empty());

    let build_id = session.sign_in("user-1").await.unwrap().unwrap();
    assert_eq!(world.repo.build_count(), 1);

    let owner = session.build().owner;
    let stored = world.repo.get(build_id, &owner).await.unwrap();
    assert!(stored.selections.contains("opt-porch"));
    assert_eq!(stored.step, FunnelStep::Customize);

    // The cache slot is released only after the record exists
    settle().await;
    assert!(world.cache.load("meadowlark-20").unwrap().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_quote_folds_into_finalized_total() {
    let world = World::new();
    let session = world.session("meadowlark-20");

    session.toggle_option("opt-porch").unwrap();
    session.set_package(Some("comfort")).unwrap();
    session.sign_in("user-1").await.unwrap();

    let mut events = session.subscribe();
    let pricing = session.set_address(Some(address())).unwrap();
    assert_eq!(pricing.delivery, DeliveryState::Pending);

    loop {
        match events.recv().await.unwrap() {
            SessionEvent::DeliveryQuoted { fee_cents, .. } => {
                assert_eq!(fee_cents, 120_000);
                break;
            }
            _ => {}
        }
    }

    // base 6,000,000 + option 50,000 + package 350,000 = 6,400,000;
    // fee 120,000 taxable at 6.25% -> taxes 407,500; total 6,927,500
    let pricing = session.pricing();
    assert!(pricing.total_finalized);
    assert_eq!(pricing.subtotal_cents, 6_400_000);
    assert_eq!(pricing.taxes_cents, 407_500);
    assert_eq!(pricing.total_cents, 6_927_500);
}

#[tokio::test(start_paused = true)]
async fn test_same_address_does_not_requote_on_reload() {
    let world = World::new();
    let session = world.session("meadowlark-20");
    session.sign_in("user-1").await.unwrap();

    let mut events = session.subscribe();
    session.set_address(Some(address())).unwrap();
    loop {
        if matches!(
            events.recv().await.unwrap(),
            SessionEvent::DeliveryQuoted { .. }
        ) {
            break;
        }
    }

    // Re-submitting the unchanged address keeps the cached quote
    let pricing = session.set_address(Some(address())).unwrap();
    assert_eq!(
        pricing.delivery,
        DeliveryState::Quoted {
            fee_cents: 120_000,
            eta_days: 45
        }
    );
}

#[tokio::test(start_paused = true)]
async fn test_funnel_advancement_persists_promptly() {
    let world = World::new();
    let session = world.session("meadowlark-20");
    session.toggle_option("opt-porch").unwrap();
    let build_id = session.sign_in("user-1").await.unwrap().unwrap();

    session.advance_step(FunnelStep::BuyerInfo).unwrap();
    // Flush path: no need to wait out the debounce window
    tokio::task::yield_now().await;
    tokio::time::sleep(Duration::from_millis(10)).await;

    let owner = session.build().owner;
    let stored = world.repo.get(build_id, &owner).await.unwrap();
    assert_eq!(stored.step, FunnelStep::BuyerInfo);
}
