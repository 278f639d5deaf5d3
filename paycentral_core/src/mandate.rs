//! The "SEAL" Engine - Cart Mandates
//!
//! Solves the "Agent Picks The Amount" problem by:
//! - Computing the total outside the agent with exact decimals
//! - Sealing items + totals with an HMAC-SHA256 tag over a canonical serialization
//! - Settling each mandate at most once through an idempotency store
//!
//! Lifecycle: `Sealed -> Consumed` or `Sealed -> Expired`, both terminal.

use crate::idempotency::{Claim, IdempotencyRecord, IdempotencyStore, InMemoryIdempotencyStore};
use crate::money::{Cart, Frequency, QuotedLine};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use parking_lot::{Mutex, RwLock};
use paycentral_env::{MandateContext, MandateId, SigningSecret};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

type HmacSha256 = Hmac<Sha256>;

/// Default lifetime of a sealed mandate.
pub const DEFAULT_TTL_MINUTES: i64 = 30;

/// Hex characters of the signature used in payment identifiers.
const PAYMENT_ID_SIG_CHARS: usize = 24;

/// Mandate sealing and settlement errors
#[derive(Debug, Error)]
pub enum MandateError {
    #[error("Invalid cart: {0}")]
    InvalidCart(String),

    #[error("Invalid mandate signature: {mandate_id}")]
    InvalidMandateSignature { mandate_id: MandateId },

    #[error("Mandate {mandate_id} expired at {expired_at}")]
    MandateExpired {
        mandate_id: MandateId,
        expired_at: DateTime<Utc>,
    },

    #[error("Mandate already consumed: {mandate_id}")]
    MandateAlreadyConsumed { mandate_id: MandateId },

    #[error("Mandate not found: {mandate_id}")]
    MandateNotFound { mandate_id: MandateId },

    #[error("Duplicate mandate id: {mandate_id}")]
    DuplicateMandate { mandate_id: MandateId },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl MandateError {
    pub fn invalid_cart(msg: impl Into<String>) -> Self {
        Self::InvalidCart(msg.into())
    }
}

/// Lifecycle state of a mandate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MandateStatus {
    Sealed,
    Consumed,
    Expired,
}

/// How a repeated consumption is answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsumeSemantics {
    /// Return the stored outcome unchanged
    #[default]
    ReplayExisting,

    /// Fail with `MandateAlreadyConsumed`
    RejectDuplicates,
}

/// An item as it was sealed (names already whitespace-normalized).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedItem {
    pub sku: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub tax_rate: Decimal,
    pub line_subtotal: Decimal,
    pub line_tax: Decimal,
}

impl From<QuotedLine> for SealedItem {
    fn from(line: QuotedLine) -> Self {
        Self {
            sku: line.sku,
            name: line.name,
            quantity: line.quantity,
            unit_price: line.unit_price,
            tax_rate: line.tax_rate,
            line_subtotal: line.line_subtotal,
            line_tax: line.line_tax,
        }
    }
}

/// A sealed authorization to charge exactly one cart.
///
/// Everything except `status` is covered by `signature`. Fields are
/// private; only `MandateService` moves the status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartMandate {
    mandate_id: MandateId,
    items: Vec<SealedItem>,
    subtotal: Decimal,
    tax_total: Decimal,
    total: Decimal,
    currency: String,
    #[serde(default)]
    recurrence: Option<Frequency>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    signature: String,
    status: MandateStatus,
}

impl CartMandate {
    pub fn mandate_id(&self) -> MandateId {
        self.mandate_id
    }

    pub fn items(&self) -> &[SealedItem] {
        &self.items
    }

    pub fn subtotal(&self) -> Decimal {
        self.subtotal
    }

    pub fn tax_total(&self) -> Decimal {
        self.tax_total
    }

    pub fn total(&self) -> Decimal {
        self.total
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn recurrence(&self) -> Option<Frequency> {
        self.recurrence
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn status(&self) -> MandateStatus {
        self.status
    }

    /// Canonical serialization covered by the signature.
    ///
    /// Compact JSON with sorted object keys (serde_json's default map),
    /// decimals as normalized strings, timestamps as RFC 3339 with
    /// nanoseconds. Item order is kept as sealed.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, MandateError> {
        let items: Vec<serde_json::Value> = self
            .items
            .iter()
            .map(|item| {
                json!({
                    "sku": item.sku,
                    "name": item.name,
                    "quantity": item.quantity,
                    "unit_price": canonical_decimal(item.unit_price),
                    "tax_rate": canonical_decimal(item.tax_rate),
                    "line_subtotal": canonical_decimal(item.line_subtotal),
                    "line_tax": canonical_decimal(item.line_tax),
                })
            })
            .collect();

        let payload = json!({
            "mandate_id": self.mandate_id.to_string(),
            "items": items,
            "subtotal": canonical_decimal(self.subtotal),
            "tax_total": canonical_decimal(self.tax_total),
            "total": canonical_decimal(self.total),
            "currency": self.currency,
            "recurrence": self.recurrence.map(|f| f.name()),
            "created_at": self.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
            "expires_at": self.expires_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
        });

        serde_json::to_vec(&payload).map_err(|e| MandateError::Serialization(e.to_string()))
    }
}

fn canonical_decimal(value: Decimal) -> String {
    value.normalize().to_string()
}

/// The settled result of consuming a mandate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOutcome {
    pub mandate_id: MandateId,
    pub payment_id: String,
    pub amount: Decimal,
    pub currency: String,
    #[serde(default)]
    pub recurrence: Option<Frequency>,
    pub settled_at: DateTime<Utc>,
}

/// Counters for observability.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MandateStats {
    pub issued: usize,
    pub sealed: usize,
    pub consumed: usize,
    pub expired: usize,
    pub charges: usize,
    pub replays: u64,
    pub rejections: u64,
}

/// Seals carts, verifies mandates and settles them exactly once.
pub struct MandateService<C: MandateContext> {
    secret: SigningSecret,
    context: Arc<C>,
    store: Arc<dyn IdempotencyStore>,
    ttl: Duration,

    /// Every mandate this service sealed, with its current status
    ledger: RwLock<HashMap<MandateId, CartMandate>>,

    /// Financial side effects, one per settled mandate
    charges: Mutex<ChargeLog>,

    replays: AtomicU64,
    rejections: AtomicU64,
}

impl<C: MandateContext> MandateService<C> {
    /// Creates a service over the given store.
    pub fn new(secret: SigningSecret, context: Arc<C>, store: Arc<dyn IdempotencyStore>) -> Self {
        Self {
            secret,
            context,
            store,
            ttl: Duration::minutes(DEFAULT_TTL_MINUTES),
            ledger: RwLock::new(HashMap::new()),
            charges: Mutex::new(ChargeLog::default()),
            replays: AtomicU64::new(0),
            rejections: AtomicU64::new(0),
        }
    }

    /// Creates a service with a fresh in-memory idempotency store.
    pub fn in_memory(secret: SigningSecret, context: Arc<C>) -> Self {
        Self::new(secret, context, Arc::new(InMemoryIdempotencyStore::new()))
    }

    /// Overrides the mandate lifetime.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Seals a cart under a fresh random identifier.
    pub fn seal(&self, cart: &Cart) -> Result<CartMandate, MandateError> {
        self.seal_with_id(cart, MandateId::new())
    }

    /// Seals a cart under a caller-chosen identifier.
    ///
    /// Fails with `DuplicateMandate` if the identifier was already used.
    pub fn seal_with_id(&self, cart: &Cart, mandate_id: MandateId) -> Result<CartMandate, MandateError> {
        let quote = cart.quote()?;

        if self.store.get(&mandate_id)?.is_some() {
            return Err(MandateError::DuplicateMandate { mandate_id });
        }

        let created_at = self.context.now();
        let mut mandate = CartMandate {
            mandate_id,
            items: quote.lines.into_iter().map(SealedItem::from).collect(),
            subtotal: quote.subtotal,
            tax_total: quote.tax_total,
            total: quote.total,
            currency: quote.currency,
            recurrence: cart.recurrence,
            created_at,
            expires_at: created_at + self.ttl,
            signature: String::new(),
            status: MandateStatus::Sealed,
        };
        mandate.signature = hex::encode(self.tag(&mandate)?);

        match self.ledger.write().entry(mandate_id) {
            Entry::Occupied(_) => return Err(MandateError::DuplicateMandate { mandate_id }),
            Entry::Vacant(slot) => {
                slot.insert(mandate.clone());
            }
        }

        debug!(
            "Sealed mandate {} total={} {} ({} items)",
            mandate_id,
            mandate.total,
            mandate.currency,
            mandate.items.len()
        );
        Ok(mandate)
    }

    /// Recomputes the tag and compares it in constant time.
    ///
    /// Any change to items, totals, currency, recurrence, identifier or
    /// timestamps, as well as a malformed signature, yields `false`.
    pub fn verify(&self, mandate: &CartMandate) -> bool {
        let Ok(expected) = hex::decode(&mandate.signature) else {
            return false;
        };
        let Ok(bytes) = mandate.canonical_bytes() else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(self.secret.as_bytes()) else {
            return false;
        };
        mac.update(&bytes);
        mac.verify_slice(&expected).is_ok()
    }

    /// Settles a mandate at most once.
    ///
    /// The first successful caller stores its outcome and records the
    /// charge; every other caller gets that same outcome back (or
    /// `MandateAlreadyConsumed` under `RejectDuplicates`).
    pub fn consume(
        &self,
        mandate: &CartMandate,
        semantics: ConsumeSemantics,
    ) -> Result<TransactionOutcome, MandateError> {
        let mandate_id = mandate.mandate_id;

        if let Some(existing) = self.store.get(&mandate_id)? {
            return self.repeat(existing, semantics);
        }

        if !self.verify(mandate) {
            return Err(self.reject(MandateError::InvalidMandateSignature { mandate_id }));
        }

        let sealed = match self.ledger.read().get(&mandate_id) {
            Some(sealed) => sealed.clone(),
            None => return Err(self.reject(MandateError::MandateNotFound { mandate_id })),
        };
        if sealed.signature != mandate.signature {
            return Err(self.reject(MandateError::InvalidMandateSignature { mandate_id }));
        }

        let now = self.context.now();
        if sealed.status == MandateStatus::Expired || now >= sealed.expires_at {
            self.transition(mandate_id, MandateStatus::Sealed, MandateStatus::Expired);
            return Err(self.reject(MandateError::MandateExpired {
                mandate_id,
                expired_at: sealed.expires_at,
            }));
        }

        let outcome = TransactionOutcome {
            mandate_id,
            payment_id: payment_id(&sealed.signature),
            amount: sealed.total,
            currency: sealed.currency.clone(),
            recurrence: sealed.recurrence,
            settled_at: now,
        };

        match self.store.insert_if_absent(IdempotencyRecord::new(outcome, now))? {
            Claim::Inserted(record) => {
                if let Some(entry) = self.ledger.write().get_mut(&mandate_id) {
                    entry.status = MandateStatus::Consumed;
                }
                self.charges.lock().record(record.outcome.clone());
                info!(
                    "Settled mandate {} as {} for {} {}",
                    mandate_id, record.outcome.payment_id, record.outcome.amount, record.outcome.currency
                );
                Ok(record.outcome)
            }
            Claim::Existing(record) => self.repeat(record, semantics),
        }
    }

    fn repeat(
        &self,
        record: IdempotencyRecord,
        semantics: ConsumeSemantics,
    ) -> Result<TransactionOutcome, MandateError> {
        match semantics {
            ConsumeSemantics::ReplayExisting => {
                self.replays.fetch_add(1, Ordering::Relaxed);
                debug!("Replaying stored outcome for mandate {}", record.key);
                Ok(record.outcome)
            }
            ConsumeSemantics::RejectDuplicates => Err(self.reject(MandateError::MandateAlreadyConsumed {
                mandate_id: record.key,
            })),
        }
    }

    fn reject(&self, error: MandateError) -> MandateError {
        self.rejections.fetch_add(1, Ordering::Relaxed);
        warn!("Rejected consumption: {}", error);
        error
    }

    fn transition(&self, mandate_id: MandateId, from: MandateStatus, to: MandateStatus) {
        if let Some(entry) = self.ledger.write().get_mut(&mandate_id) {
            if entry.status == from {
                entry.status = to;
            }
        }
    }

    fn tag(&self, mandate: &CartMandate) -> Result<Vec<u8>, MandateError> {
        let bytes = mandate.canonical_bytes()?;
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| MandateError::Serialization(format!("HMAC key rejected: {}", e)))?;
        mac.update(&bytes);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Current status of a mandate sealed by this service.
    pub fn status(&self, mandate_id: &MandateId) -> Option<MandateStatus> {
        self.ledger.read().get(mandate_id).map(|m| m.status)
    }

    /// Snapshot of a mandate sealed by this service.
    pub fn mandate(&self, mandate_id: &MandateId) -> Option<CartMandate> {
        self.ledger.read().get(mandate_id).cloned()
    }

    /// Moves every overdue `Sealed` mandate to `Expired`.
    ///
    /// Returns how many mandates expired.
    pub fn expire_stale(&self) -> usize {
        let now = self.context.now();
        let mut expired = 0;
        for mandate in self.ledger.write().values_mut() {
            if mandate.status == MandateStatus::Sealed && now >= mandate.expires_at {
                mandate.status = MandateStatus::Expired;
                expired += 1;
            }
        }
        if expired > 0 {
            warn!("Expired {} stale mandates", expired);
        }
        expired
    }

    /// Every charge recorded so far, in settlement order.
    pub fn charges(&self) -> Vec<TransactionOutcome> {
        self.charges.lock().outcomes.clone()
    }

    /// Charges recorded against one mandate.
    pub fn charges_for(&self, mandate_id: &MandateId) -> usize {
        self.charges.lock().per_mandate.get(mandate_id).copied().unwrap_or(0)
    }

    pub fn stats(&self) -> MandateStats {
        let ledger = self.ledger.read();
        let count = |status| ledger.values().filter(|m| m.status == status).count();
        MandateStats {
            issued: ledger.len(),
            sealed: count(MandateStatus::Sealed),
            consumed: count(MandateStatus::Consumed),
            expired: count(MandateStatus::Expired),
            charges: self.charges.lock().outcomes.len(),
            replays: self.replays.load(Ordering::Relaxed),
            rejections: self.rejections.load(Ordering::Relaxed),
        }
    }
}

/// Settled outcomes in order, plus a per-mandate count.
#[derive(Default)]
struct ChargeLog {
    outcomes: Vec<TransactionOutcome>,
    per_mandate: HashMap<MandateId, usize>,
}

impl ChargeLog {
    fn record(&mut self, outcome: TransactionOutcome) {
        *self.per_mandate.entry(outcome.mandate_id).or_insert(0) += 1;
        self.outcomes.push(outcome);
    }
}

fn payment_id(signature: &str) -> String {
    let prefix: String = signature.chars().take(PAYMENT_ID_SIG_CHARS).collect();
    format!("pay_{}", prefix)
}
