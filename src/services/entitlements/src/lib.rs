//! Entitlement engine
//!
//! A deterministic finite state machine per (org, user, product, source).
//! [`machine`] holds the pure transition table; [`engine`] applies canonical
//! events against stored entitlements with optimistic locking.

pub mod engine;
pub mod machine;

pub use engine::{EntitlementEngine, EntitlementEngineError};
pub use machine::{transition_for, Transition};
