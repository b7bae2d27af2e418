//! Domain services.
//!
//! Each worker is a set of free async functions over the [`crate::store::Store`]
//! trait and the audit sink, so every one of them runs unchanged against the
//! in-memory store in tests. Routes stay thin: session plumbing and JSON
//! extraction there, every rule here.

pub mod accounts;
pub mod authz;
pub mod catalog;
pub mod checkout;
pub mod csrf;
pub mod fulfillment;
pub mod payment;
pub mod validate;
