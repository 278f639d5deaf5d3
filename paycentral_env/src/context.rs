//! Core environment context trait for the mandate service.

use chrono::{DateTime, Utc};

/// The central interface for environment interaction.
///
/// The mandate service stamps `created_at` / `expires_at` from `now()` and
/// checks expiry against it at consumption time. Abstracting the clock lets
/// the same service run in production and inside a deterministic simulation.
///
/// # Implementations
///
/// - **Production**: `SystemContext` - wraps `chrono::Utc::now()`
/// - **Simulation**: `SimContext` (paycentral_sim) - virtual clock advanced manually
///
/// # Determinism
///
/// For simulation, `now()` must not depend on the wall clock, otherwise the
/// canonical serialization (and therefore every signature) changes per run.
pub trait MandateContext: Send + Sync + 'static {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
    
    /// Returns the context's seed (for logging/debugging).
    ///
    /// In production, returns 0 (not seeded).
    /// In simulation, returns the master seed.
    fn seed(&self) -> u64;
}
