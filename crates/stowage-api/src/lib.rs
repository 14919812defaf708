//! Stowage HTTP API
//!
//! Axum transport for the chunked upload protocol. Library surface exists so the
//! binary and the integration tests build the same router.

pub mod api_doc;
pub mod auth;
pub mod constants;
pub mod error;
pub mod handlers;
pub mod setup;
pub mod state;
pub mod telemetry;
