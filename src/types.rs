//! Common types used throughout the configurator engine

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

/// Catalog model identifier (slug, e.g. "meadowlark-20")
pub type ModelId = String;

/// Catalog option identifier
pub type OptionId = String;

/// Package key within a model
pub type PackageKey = String;

/// Server-assigned Build identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildId(Uuid);

impl BuildId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BuildId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller-generated token making Build creation retry-safe.
///
/// Generated once per funnel session, not per save attempt, so retried
/// create requests deduplicate to a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdempotencyKey(Uuid);

impl IdempotencyKey {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for IdempotencyKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who owns the funnel session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionIdentity {
    /// No signed-in user; persistence goes to the anonymous cache
    Anonymous,
    /// Signed-in user; persistence goes to the build repository
    Authenticated { user_id: String },
}

impl SessionIdentity {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Self::Anonymous => None,
            Self::Authenticated { user_id } => Some(user_id),
        }
    }
}

/// Ordered checkout funnel position
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FunnelStep {
    Customize,
    BuyerInfo,
    Delivery,
    Contract,
    Confirmation,
}

impl FunnelStep {
    /// The next step in the funnel, if any
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Customize => Some(Self::BuyerInfo),
            Self::BuyerInfo => Some(Self::Delivery),
            Self::Delivery => Some(Self::Contract),
            Self::Contract => Some(Self::Confirmation),
            Self::Confirmation => None,
        }
    }
}

/// Delivery address as collected in the funnel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
}

impl Address {
    /// A quote is only requested for a complete address
    pub fn is_complete(&self) -> bool {
        !self.street.trim().is_empty()
            && !self.city.trim().is_empty()
            && !self.state.trim().is_empty()
            && !self.postal_code.trim().is_empty()
    }
}

/// Delivery fee state on the pricing snapshot.
///
/// `Pending` (quote in flight) is distinct from `Unavailable` (lookup
/// failed or address incomplete) and from a quoted $0 fee; the UI must be
/// able to render all three differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryState {
    /// Anonymous session or no address collected yet
    NotRequested,
    /// Quote request in flight
    Pending,
    /// External provider returned a fee and ETA
    Quoted { fee_cents: i64, eta_days: u32 },
    /// Address incomplete or provider call failed
    Unavailable,
}

impl DeliveryState {
    /// Fee applied to tax/total arithmetic.
    ///
    /// Unknown fees count as zero, but only `Quoted` finalizes the total;
    /// callers must check [`PricingBreakdown::total_finalized`] before
    /// presenting the total as a committed figure.
    pub fn fee_for_totals(&self) -> i64 {
        match self {
            Self::Quoted { fee_cents, .. } => *fee_cents,
            _ => 0,
        }
    }
}

/// Derived price snapshot; always recomputable from catalog + selections,
/// never the source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingBreakdown {
    pub base_cents: i64,
    pub options_cents: i64,
    pub package_cents: i64,
    pub subtotal_cents: i64,
    pub delivery: DeliveryState,
    pub taxes_cents: i64,
    pub total_cents: i64,
    /// Requested model was absent from the catalog
    pub model_missing: bool,
    /// True only when the delivery fee is a confirmed quote; a total built
    /// on an unknown or unavailable fee must not render as committed
    pub total_finalized: bool,
}

impl PricingBreakdown {
    /// All-zero breakdown for a missing model or empty session
    pub fn zero() -> Self {
        Self {
            base_cents: 0,
            options_cents: 0,
            package_cents: 0,
            subtotal_cents: 0,
            delivery: DeliveryState::NotRequested,
            taxes_cents: 0,
            total_cents: 0,
            model_missing: false,
            total_finalized: false,
        }
    }
}

/// Catalog base model (read-only reference data)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub id: ModelId,
    pub name: String,
    pub base_price_cents: i64,
    pub beds: u8,
    pub baths: u8,
    pub square_feet: u32,
    /// Ordered feature list for display
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub packages: Vec<Package>,
    /// Option identifiers selectable on this model
    #[serde(default)]
    pub option_ids: Vec<OptionId>,
}

impl Model {
    pub fn package(&self, key: &str) -> Option<&Package> {
        self.packages.iter().find(|p| p.key == key)
    }
}

/// Catalog option line item (read-only reference data)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionItem {
    pub id: OptionId,
    pub name: String,
    /// May be negative (e.g. downgrade credits)
    pub price_delta_cents: i64,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub is_package: bool,
}

/// Named option bundle; at most one active per Build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub key: PackageKey,
    pub name: String,
    pub price_delta_cents: i64,
    #[serde(default)]
    pub includes: Vec<String>,
}

/// The mutable aggregate root of the funnel: one model, a set of option
/// selections, at most one package, and a derived pricing snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    /// Server-assigned; absent until first persisted
    pub id: Option<BuildId>,
    pub owner: SessionIdentity,
    pub model_id: ModelId,
    pub selections: BTreeSet<OptionId>,
    pub package: Option<PackageKey>,
    pub address: Option<Address>,
    /// Address the cached delivery quote was issued for; a quote is reused
    /// only while the address is unchanged
    pub quoted_address: Option<Address>,
    pub pricing: PricingBreakdown,
    pub step: FunnelStep,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Build {
    pub fn new(model_id: ModelId, owner: SessionIdentity) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            owner,
            model_id,
            selections: BTreeSet::new(),
            package: None,
            address: None,
            quoted_address: None,
            pricing: PricingBreakdown::zero(),
            step: FunnelStep::Customize,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether a fresh delivery quote is needed: authenticated session,
    /// complete address, and no cached quote for that exact address.
    pub fn needs_quote(&self) -> bool {
        if !self.owner.is_authenticated() {
            return false;
        }
        let Some(addr) = &self.address else {
            return false;
        };
        if !addr.is_complete() {
            return false;
        }
        match (&self.pricing.delivery, &self.quoted_address) {
            (DeliveryState::Quoted { .. }, Some(quoted)) => quoted != addr,
            _ => true,
        }
    }

    /// Full patch carrying the freshest local state
    pub fn as_patch(&self) -> BuildPatch {
        BuildPatch {
            selections: Some(self.selections.clone()),
            package: Some(self.package.clone()),
            address: Some(self.address.clone()),
            pricing: Some(self.pricing.clone()),
            step: Some(self.step),
        }
    }

    /// Create payload for an authenticated owner
    pub fn as_payload(&self, user_id: &str) -> BuildPayload {
        BuildPayload {
            user_id: user_id.to_string(),
            model_id: self.model_id.clone(),
            selections: self.selections.clone(),
            package: self.package.clone(),
            address: self.address.clone(),
            pricing: self.pricing.clone(),
            step: self.step,
        }
    }
}

/// Payload for the idempotent create operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildPayload {
    pub user_id: String,
    pub model_id: ModelId,
    pub selections: BTreeSet<OptionId>,
    pub package: Option<PackageKey>,
    pub address: Option<Address>,
    pub pricing: PricingBreakdown,
    pub step: FunnelStep,
}

/// Partial update: only the provided fields are replaced. Selections and
/// package are replaced wholesale (atomic collections, never deep-merged);
/// pricing is always a freshly recomputed snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selections: Option<BTreeSet<OptionId>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package: Option<Option<PackageKey>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<Option<Address>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pricing: Option<PricingBreakdown>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<FunnelStep>,
}

/// Autosave state machine position, observable by the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaveState {
    Idle,
    /// Debounce window open; a save will fire when it elapses
    PendingSave,
    Saving,
    /// Last save failed; re-enters PendingSave on the next edit or an
    /// explicit retry
    SaveFailed,
}

/// Events emitted by the funnel session for downstream collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    SaveSucceeded { build_id: Option<BuildId> },
    SaveFailed { reason: String },
    DeliveryQuoted { fee_cents: i64, eta_days: u32 },
    DeliveryUnavailable { reason: String },
    /// Funnel advanced to a step; buyer-info/contract collaborators key
    /// off this signal
    FunnelAdvanced { step: FunnelStep },
    Migrated { build_id: BuildId },
}

/// Commands accepted by the autosave scheduler loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerCommand {
    /// A selection/package/address/step edit happened; (re)open the
    /// debounce window
    Edit,
    /// Explicit retry after a failed save
    Retry,
    /// Persist now, skipping the remaining debounce window
    Flush,
}

/// Sender for scheduler commands
pub type CommandSender = mpsc::UnboundedSender<SchedulerCommand>;

/// Receiver for scheduler commands
pub type CommandReceiver = mpsc::UnboundedReceiver<SchedulerCommand>;

/// Broadcast sender for session events
pub type EventSender = broadcast::Sender<SessionEvent>;
