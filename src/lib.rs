//! Supply chain order ledger.
//!
//! Orders move through a fixed, role-gated lifecycle recorded in append-only
//! ledgers. A [`registry::Registry`] creates and indexes ledgers; a
//! [`gateway::Gateway`] hydrates them into order views for clients.

pub mod access;
pub mod client;
pub mod config;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod registry;
pub mod types;
pub mod utils;

pub use error::{ConfigError, GatewayError, LedgerError};
