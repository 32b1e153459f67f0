//! RevBack API gateway
//!
//! The single long-running process: hosts the inbound webhook receiver and
//! the operator API, and runs one worker pool per durable queue. HTTP
//! handlers and workers share the relational store and Redis but no
//! mutable in-process state.

pub mod auth;
pub mod error;
pub mod routes;
pub mod state;
pub mod workers;

pub use error::{ApiError, ApiResult};
pub use state::AppState;
