//! actix-web gateway serving x402-gated endpoints.
//!
//! Wires the core [`x402`] publisher, verifier and settlement tracker into
//! HTTP: `/api/intel` is the protected resource, `/settlements/{id}` lets
//! clients poll pending settlements.

pub mod config;
pub mod confirmation;
pub mod cors;
pub mod error;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;
