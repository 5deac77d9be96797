//! Delivery quote resolver: external-call wrapper producing a delivery fee
//!
//! One external call per resolution, bounded timeout, no internal retry;
//! transient failures surface as `DeliveryUnavailable` and the autosave
//! scheduler retries on the next relevant state change. The resolved quote
//! is cached on the Build's pricing snapshot keyed by the address it was
//! issued for, so reloading the funnel does not re-issue the call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::DeliveryConfig;
use crate::errors::EngineError;
use crate::metrics::metrics;
use crate::types::Address;

/// Fee and ETA returned by the external delivery provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryQuote {
    pub fee_cents: i64,
    pub eta_days: u32,
}

/// Seam over the external delivery-quote endpoint
#[async_trait]
pub trait QuoteApi: Send + Sync {
    async fn fetch_quote(&self, address: &Address) -> Result<DeliveryQuote, EngineError>;
}

/// reqwest-backed quote API client
pub struct HttpQuoteApi {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpQuoteApi {
    pub fn new(config: &DeliveryConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl QuoteApi for HttpQuoteApi {
    async fn fetch_quote(&self, address: &Address) -> Result<DeliveryQuote, EngineError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(address)
            .send()
            .await
            .map_err(|e| EngineError::unavailable(format!("quote request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(EngineError::unavailable(format!(
                "quote endpoint returned {}",
                response.status()
            )));
        }

        response
            .json::<DeliveryQuote>()
            .await
            .map_err(|e| EngineError::unavailable(format!("quote decode failed: {e}")))
    }
}

/// Resolver enforcing the address-completeness precondition and a bounded
/// timeout around the single external call
pub struct DeliveryResolver {
    api: Arc<dyn QuoteApi>,
    timeout: Duration,
}

impl DeliveryResolver {
    pub fn new(api: Arc<dyn QuoteApi>, timeout: Duration) -> Self {
        Self { api, timeout }
    }

    pub fn from_config(config: &DeliveryConfig) -> anyhow::Result<Self> {
        let api = Arc::new(HttpQuoteApi::new(config)?);
        Ok(Self::new(api, Duration::from_secs(config.timeout_secs)))
    }

    /// Resolve a delivery quote for a complete address.
    ///
    /// Incomplete addresses return `DeliveryUnavailable` immediately,
    /// without touching the external service.
    pub async fn quote_delivery(&self, address: &Address) -> Result<DeliveryQuote, EngineError> {
        if !address.is_complete() {
            debug!("Skipping quote: address incomplete");
            return Err(EngineError::unavailable("address incomplete"));
        }

        metrics().quotes_requested.inc();
        let timer = metrics().quote_latency.start_timer();

        let result = match tokio::time::timeout(self.timeout, self.api.fetch_quote(address)).await
        {
            Ok(inner) => inner,
            Err(_) => Err(EngineError::Timeout {
                operation: "quote_delivery",
                ms: self.timeout.as_millis() as u64,
            }),
        };
        timer.observe_duration();

        match &result {
            Ok(quote) => {
                debug!(
                    fee_cents = quote.fee_cents,
                    eta_days = quote.eta_days,
                    "Delivery quote resolved"
                );
            }
            Err(e) => {
                metrics().quotes_unavailable.inc();
                warn!(error = %e, "Delivery quote unavailable");
            }
        }
        result
    }
}
