//! Metrics collection and export module

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry};

/// Global metrics registry
pub struct Metrics {
    registry: Registry,

    // Counters
    pub saves_attempted: IntCounter,
    pub saves_succeeded: IntCounter,
    pub saves_failed: IntCounter,
    pub builds_created: IntCounter,
    pub quotes_requested: IntCounter,
    pub quotes_unavailable: IntCounter,
    pub cache_writes: IntCounter,
    pub cache_expired_entries: IntCounter,
    pub migrations_completed: IntCounter,
    pub migrations_failed: IntCounter,

    // Gauges
    pub active_sessions: IntGauge,

    // Histograms
    pub save_latency: Histogram,
    pub quote_latency: Histogram,
}

impl Metrics {
    /// Create new metrics instance
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let saves_attempted = IntCounter::with_opts(Opts::new(
            "saves_attempted_total",
            "Autosave writes attempted (create or update)",
        ))?;

        let saves_succeeded = IntCounter::with_opts(Opts::new(
            "saves_succeeded_total",
            "Autosave writes that persisted successfully",
        ))?;

        let saves_failed = IntCounter::with_opts(Opts::new(
            "saves_failed_total",
            "Autosave writes that failed and will retry",
        ))?;

        let builds_created = IntCounter::with_opts(Opts::new(
            "builds_created_total",
            "Build records created in the repository",
        ))?;

        let quotes_requested = IntCounter::with_opts(Opts::new(
            "delivery_quotes_requested_total",
            "Delivery quote resolutions attempted",
        ))?;

        let quotes_unavailable = IntCounter::with_opts(Opts::new(
            "delivery_quotes_unavailable_total",
            "Delivery quote resolutions that returned unavailable",
        ))?;

        let cache_writes = IntCounter::with_opts(Opts::new(
            "anon_cache_writes_total",
            "Anonymous customization cache writes",
        ))?;

        let cache_expired_entries = IntCounter::with_opts(Opts::new(
            "anon_cache_expired_total",
            "Anonymous cache entries removed by retention housekeeping",
        ))?;

        let migrations_completed = IntCounter::with_opts(Opts::new(
            "migrations_completed_total",
            "Anonymous-to-authenticated migrations completed",
        ))?;

        let migrations_failed = IntCounter::with_opts(Opts::new(
            "migrations_failed_total",
            "Migrations that failed and preserved the cache entry",
        ))?;

        let active_sessions = IntGauge::with_opts(Opts::new(
            "active_sessions",
            "Funnel sessions currently running a scheduler",
        ))?;

        let save_latency = Histogram::with_opts(
            HistogramOpts::new("save_latency_seconds", "Repository save latency")
                .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
        )?;

        let quote_latency = Histogram::with_opts(
            HistogramOpts::new("quote_latency_seconds", "Delivery quote latency")
                .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        )?;

        // Register all metrics
        registry.register(Box::new(saves_attempted.clone()))?;
        registry.register(Box::new(saves_succeeded.clone()))?;
        registry.register(Box::new(saves_failed.clone()))?;
        registry.register(Box::new(builds_created.clone()))?;
        registry.register(Box::new(quotes_requested.clone()))?;
        registry.register(Box::new(quotes_unavailable.clone()))?;
        registry.register(Box::new(cache_writes.clone()))?;
        registry.register(Box::new(cache_expired_entries.clone()))?;
        registry.register(Box::new(migrations_completed.clone()))?;
        registry.register(Box::new(migrations_failed.clone()))?;
        registry.register(Box::new(active_sessions.clone()))?;
        registry.register(Box::new(save_latency.clone()))?;
        registry.register(Box::new(quote_latency.clone()))?;

        Ok(Self {
            registry,
            saves_attempted,
            saves_succeeded,
            saves_failed,
            builds_created,
            quotes_requested,
            quotes_unavailable,
            cache_writes,
            cache_expired_entries,
            migrations_completed,
            migrations_failed,
            active_sessions,
            save_latency,
            quote_latency,
        })
    }

    /// Get the registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render the registry in Prometheus text exposition format
    pub fn export(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}

/// Global metrics instance
pub fn metrics() -> &'static Metrics {
    static METRICS: once_cell::sync::Lazy<Metrics> =
        once_cell::sync::Lazy::new(|| Metrics::new().expect("Failed to initialize metrics"));
    &METRICS
}
