//! Configurator engine entry point
//!
//! Wires the catalog, repository, anonymous cache, delivery resolver and
//! metrics endpoint together, then runs a funnel session against either
//! the hosted services (production) or in-process stand-ins (simulation).

#![deny(unused_imports)]
#![deny(unused_mut)]
#![warn(unused_must_use)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use configurator::anon_cache::AnonCache;
use configurator::autosave::FunnelSession;
use configurator::catalog::Catalog;
use configurator::config::Config;
use configurator::delivery::{DeliveryQuote, DeliveryResolver, QuoteApi};
use configurator::endpoints;
use configurator::errors::EngineError;
use configurator::metrics::metrics;
use configurator::repository::{BuildRepository, HttpBuildRepository, InMemoryBuildRepository};
use configurator::types::{Address, FunnelStep, SessionEvent};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Path to a catalog TOML file (built-in demo catalog when omitted)
    #[arg(long)]
    catalog: Option<String>,

    /// Operating mode (simulation or production)
    #[arg(short, long, default_value = "simulation")]
    mode: String,

    /// Model to open the funnel session on
    #[arg(long, default_value = "meadowlark-20")]
    model: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Simulation,
    Production,
}

/// Quote API stand-in for simulation mode: fixed fee, no network
struct SimulatedQuoteApi;

#[async_trait]
impl QuoteApi for SimulatedQuoteApi {
    async fn fetch_quote(&self, address: &Address) -> Result<DeliveryQuote, EngineError> {
        info!("Simulated delivery quote for {}, {}", address.city, address.state);
        Ok(DeliveryQuote {
            fee_cents: 120_000,
            eta_days: 45,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose)?;

    info!("Starting configurator engine");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    info!("Loading configuration from: {}", args.config);
    let config = load_config(&args.config)?;

    let mode = match args.mode.as_str() {
        "production" => Mode::Production,
        "simulation" => Mode::Simulation,
        _ => {
            warn!("Unknown mode '{}', defaulting to simulation", args.mode);
            Mode::Simulation
        }
    };
    info!("Operating mode: {:?}", mode);

    let catalog = match &args.catalog {
        Some(path) => Arc::new(
            Catalog::from_file(path).with_context(|| format!("Failed to load catalog from {path}"))?,
        ),
        None => Arc::new(Catalog::demo()),
    };
    info!("Catalog loaded: {} models", catalog.model_count());

    if config.monitoring.enable_metrics {
        let port = config.monitoring.metrics_port;
        info!("Starting metrics server on port {}", port);
        tokio::spawn(async move {
            if let Err(e) = endpoints::endpoint_server(port).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let cache = Arc::new(AnonCache::open(&config.cache).context("Failed to open anonymous cache")?);

    let (repo, resolver): (Arc<dyn BuildRepository>, Arc<DeliveryResolver>) = match mode {
        Mode::Production => {
            info!("Build repository: {}", config.repository.base_url);
            info!("Delivery endpoint: {}", config.delivery.endpoint);
            (
                Arc::new(HttpBuildRepository::new(&config.repository)?),
                Arc::new(DeliveryResolver::from_config(&config.delivery)?),
            )
        }
        Mode::Simulation => (
            Arc::new(InMemoryBuildRepository::new()),
            Arc::new(DeliveryResolver::new(
                Arc::new(SimulatedQuoteApi),
                Duration::from_secs(config.delivery.timeout_secs),
            )),
        ),
    };

    let session = FunnelSession::start(
        catalog,
        config.pricing,
        args.model.clone(),
        repo,
        cache,
        resolver,
        config.autosave,
    )
    .with_context(|| format!("Failed to open funnel session for model {}", args.model))?;
    info!(correlation_id = %session.correlation_id(), "Funnel session open");

    if mode == Mode::Simulation {
        walkthrough(&session).await?;
    }

    run_event_loop(session).await
}

/// Scripted funnel walkthrough exercising the whole engine in-process
async fn walkthrough(session: &FunnelSession) -> Result<()> {
    info!("Running simulation walkthrough");

    let pricing = session.toggle_option("opt-porch")?;
    info!("Added porch: subtotal {} cents", pricing.subtotal_cents);

    let pricing = session.set_package(Some("comfort"))?;
    info!("Comfort package: subtotal {} cents", pricing.subtotal_cents);

    let build_id = session.sign_in("demo-user").await?;
    info!(?build_id, "Signed in; anonymous work migrated");

    let mut events = session.subscribe();
    session.set_address(Some(Address {
        street: "12 Fern Hollow Rd".into(),
        city: "Asheville".into(),
        state: "NC".into(),
        postal_code: "28801".into(),
    }))?;

    // Wait for the quote to land before reporting the final figure
    loop {
        match events.recv().await {
            Ok(SessionEvent::DeliveryQuoted { fee_cents, eta_days }) => {
                info!("Delivery quoted: {} cents, {} days", fee_cents, eta_days);
                break;
            }
            Ok(SessionEvent::DeliveryUnavailable { reason }) => {
                warn!("Delivery unavailable: {}", reason);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("Event stream closed: {}", e);
                break;
            }
        }
    }

    session.advance_step(FunnelStep::BuyerInfo)?;
    session.advance_step(FunnelStep::Delivery)?;

    let pricing = session.pricing();
    info!(
        "Walkthrough done: total {} cents (finalized: {})",
        pricing.total_cents, pricing.total_finalized
    );
    Ok(())
}

/// Initialize logging subsystem
fn init_logging(verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        "configurator=debug,info"
    } else {
        "configurator=info,warn,error"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    Ok(())
}

/// Load configuration from file with fallback to defaults
fn load_config(path: &str) -> Result<Config> {
    if std::path::Path::new(path).exists() {
        Config::from_file_with_env(path)
            .with_context(|| format!("Failed to load config from {}", path))
    } else {
        warn!("Config file '{}' not found, using defaults", path);
        Ok(Config::default())
    }
}

/// Main event loop: report session events and periodic statistics until
/// shutdown, then flush the session
async fn run_event_loop(session: FunnelSession) -> Result<()> {
    info!("Event loop started");

    let mut events = session.subscribe();
    let mut stats_interval = tokio::time::interval(tokio::time::Duration::from_secs(60));

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(SessionEvent::SaveSucceeded { build_id }) => {
                        info!(?build_id, "Autosave completed");
                    }
                    Ok(SessionEvent::SaveFailed { reason }) => {
                        warn!("Autosave failed: {}", reason);
                    }
                    Ok(SessionEvent::FunnelAdvanced { step }) => {
                        info!(?step, "Funnel advanced");
                    }
                    Ok(event) => {
                        info!(?event, "Session event");
                    }
                    Err(e) => {
                        warn!("Event stream closed: {}", e);
                        break;
                    }
                }
            }

            _ = stats_interval.tick() => {
                let m = metrics();
                info!("Statistics:");
                info!("   Saves attempted: {}", m.saves_attempted.get());
                info!("   Saves succeeded: {}", m.saves_succeeded.get());
                info!("   Saves failed: {}", m.saves_failed.get());
                info!("   Builds created: {}", m.builds_created.get());
                info!("   Quotes requested: {}", m.quotes_requested.get());
                info!("   Active sessions: {}", m.active_sessions.get());
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    info!("Shutting down gracefully...");
    session.shutdown().await;
    Ok(())
}
