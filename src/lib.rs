//! Pricing Oracle Library
//!
//! Signed multi-source pricing records with moving averages

pub mod config;
pub mod error;
pub mod ledger;
pub mod oracle;
pub mod persistence;
pub mod scheduler;
pub mod server;
pub mod signing;
pub mod types;

pub use error::{OracleError, Result};
