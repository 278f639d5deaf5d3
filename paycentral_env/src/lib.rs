//! PayCentral Environment Abstraction Layer
//!
//! This crate provides the seam that lets the mandate service run against
//! **Production** (wall clock, provisioned secret) and **Simulation**
//! (virtual clock, seed-derived secret) environments.
//!
//! # Core Concept
//!
//! The mandate service never reads the system clock or the process
//! environment directly. Everything that would make a run irreproducible
//! is routed through:
//! - Time (`MandateContext::now()`)
//! - Identity (`MandateId`, random in production, seed-derived in simulation)
//! - Key material (`SigningSecret`)
//!
//! # Example
//!
//! ```ignore
//! use paycentral_env::{MandateContext, SigningSecret, SystemContext};
//!
//! let context = SystemContext::shared();
//! let secret = SigningSecret::from_env(SigningSecret::ENV_VAR)?;
//! let service = MandateService::new(secret, context, store);
//! ```

mod context;
mod types;
mod error;
mod system_impl;

pub use context::MandateContext;
pub use types::{MandateId, SigningSecret};
pub use error::EnvError;
pub use system_impl::SystemContext;
