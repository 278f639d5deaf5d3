//! Production implementation of MandateContext using the system clock.

use crate::MandateContext;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Production context backed by the wall clock.
///
/// This is the "real" implementation used when sealing live carts.
pub struct SystemContext {
    _private: (),
}

impl SystemContext {
    /// Creates a new SystemContext.
    pub fn new() -> Self {
        Self { _private: () }
    }
    
    /// Creates an Arc-wrapped context for sharing across threads.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for SystemContext {
    fn default() -> Self {
        Self::new()
    }
}

impl MandateContext for SystemContext {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
    
    fn seed(&self) -> u64 {
        // Production is not seeded
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_system_context_time_advances() {
        let ctx = SystemContext::new();
        let t1 = ctx.now();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let t2 = ctx.now();
        
        assert!(t2 > t1);
    }
    
    #[test]
    fn test_system_context_seed() {
        let ctx = SystemContext::new();
        assert_eq!(ctx.seed(), 0);
    }
}
