//! Service plumbing shared by Payflow services.
//!
//! Tracing setup, env configuration, health probes, request-id middleware,
//! serde helpers and the clock used for every time-dependent decision.

pub mod clock;
pub mod config;
pub mod health;
pub mod middleware;
pub mod serde;
pub mod tracing;
