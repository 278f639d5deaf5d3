//! Simulation context implementing MandateContext for deterministic testing.

use chrono::{DateTime, Utc};
use paycentral_env::MandateContext;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, UNIX_EPOCH};

/// Simulation context backed by a virtual clock.
///
/// Time only moves when the harness advances it, so `created_at` and
/// `expires_at` of every sealed mandate (and therefore every signature)
/// are identical across runs.
pub struct SimContext {
    /// Master seed for this simulation
    seed: u64,

    /// Current virtual time (nanoseconds since simulation start)
    virtual_time_ns: Arc<AtomicU64>,

    /// Epoch offset (virtual time 0 maps to this instant)
    epoch: DateTime<Utc>,
}

impl SimContext {
    /// Creates a new SimContext with the given seed.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            virtual_time_ns: Arc::new(AtomicU64::new(0)),
            epoch: DateTime::<Utc>::from(UNIX_EPOCH + Duration::from_secs(1704067200)), // 2024-01-01 00:00:00 UTC
        }
    }

    /// Creates an Arc-wrapped context for sharing.
    pub fn shared(seed: u64) -> Arc<Self> {
        Arc::new(Self::new(seed))
    }

    /// Advances virtual time by the given duration.
    pub fn advance_time(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.virtual_time_ns.fetch_add(nanos, Ordering::SeqCst);
    }

    /// Sets the virtual time to a specific value.
    pub fn set_time(&self, time_ns: u64) {
        self.virtual_time_ns.store(time_ns, Ordering::SeqCst);
    }

    /// Returns the current virtual time in nanoseconds.
    pub fn time_ns(&self) -> u64 {
        self.virtual_time_ns.load(Ordering::SeqCst)
    }

    /// The instant virtual time 0 maps to.
    pub fn epoch(&self) -> DateTime<Utc> {
        self.epoch
    }
}

impl Clone for SimContext {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed,
            virtual_time_ns: Arc::clone(&self.virtual_time_ns),
            epoch: self.epoch,
        }
    }
}

impl MandateContext for SimContext {
    fn now(&self) -> DateTime<Utc> {
        self.epoch + chrono::Duration::nanoseconds(self.time_ns().min(i64::MAX as u64) as i64)
    }

    fn seed(&self) -> u64 {
        self.seed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_time_starts_at_epoch() {
        let ctx = SimContext::new(42);
        assert_eq!(ctx.now(), ctx.epoch());
        assert_eq!(ctx.now().to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_virtual_time_advance() {
        let ctx = SimContext::new(42);

        ctx.advance_time(Duration::from_secs(90));
        assert_eq!(ctx.time_ns(), 90_000_000_000);
        assert_eq!(ctx.now() - ctx.epoch(), chrono::Duration::seconds(90));

        ctx.set_time(0);
        assert_eq!(ctx.now(), ctx.epoch());
    }

    #[test]
    fn test_clones_share_the_clock() {
        let ctx = SimContext::new(42);
        let clone = ctx.clone();

        ctx.advance_time(Duration::from_millis(100));
        assert_eq!(clone.time_ns(), 100_000_000);
        assert_eq!(clone.seed(), 42);
    }
}
