//! Canonical domain types shared across RevBack services

pub mod core;
pub mod entities;
pub mod entitlements;
pub mod events;
pub mod issues;

pub use self::core::*;
pub use self::entities::*;
pub use self::entitlements::*;
pub use self::events::*;
pub use self::issues::*;
