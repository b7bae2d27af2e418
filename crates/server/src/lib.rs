//! Copperleaf server - storefront and back office API.
//!
//! The engineering core is the access-control and transactional
//! order-processing path: the authorization gate re-derives roles from
//! storage on every privileged decision, checkout commits stock decrement
//! and order creation as one atomic unit, payment settlement is protected
//! against replay, and the role hierarchy guards the super-admin quorum.
//!
//! Library targets exist so the integration tests can drive the services
//! and router directly; the binary in `main.rs` wires the same pieces to a
//! `PostgreSQL` pool and the network.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod audit;
pub mod config;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;

#[cfg(test)]
mod test_support;

pub use config::ServerConfig;
pub use error::AppError;
pub use state::AppState;
