//! PayCentral Core - Sealed Mandates for Agentic Payments
//!
//! This library removes the three ways a probabilistic agent can corrupt a payment:
//! 1. **Wrong Amount Problem**: exact decimal cart totals computed outside the agent
//! 2. **Tampering Problem**: HMAC-SHA256 sealed mandates verified in constant time
//! 3. **Double Charge Problem**: atomic insert-if-absent idempotency records
//!
//! It also carries the statistics used to judge simulated failure rates against
//! rates observed from real models.

pub mod failure;
pub mod money;
pub mod mandate;
pub mod idempotency;
pub mod stats;

// Re-export key types for convenience
pub use failure::FailureMode;
pub use money::{Cart, CartItem, Frequency, Quote, QuotedLine};
pub use mandate::{
    CartMandate, ConsumeSemantics, MandateError, MandateService, MandateStats, MandateStatus,
    SealedItem, TransactionOutcome,
};
pub use idempotency::{
    Claim, IdempotencyRecord, IdempotencyStore, InMemoryIdempotencyStore, SledIdempotencyStore,
};
pub use stats::{
    compare_observed, compare_rates, two_proportion_z_test, wilson_interval, Classification, ComparisonRecord,
    ObservedRates, StatsError, StatsWarning, WilsonInterval, ZTest,
};
