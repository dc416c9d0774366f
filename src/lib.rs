#![doc(test(attr(deny(warnings))))]

//! Fintrack Core keeps per-account balances consistent with an append-mostly
//! ledger and turns recurring templates into real entries without
//! double-charging.

pub mod cli;
pub mod config;
pub mod core;
pub mod currency;
pub mod errors;
pub mod ledger;
pub mod storage;
pub mod utils;

pub use crate::core::services::Session;
pub use crate::core::LedgerEngine;
pub use errors::{LedgerError, Result};

use std::sync::Once;

static INIT_TRACING: Once = Once::new();

/// Initializes global tracing and emits a startup info log.
pub fn init() {
    INIT_TRACING.call_once(|| {
        utils::init_tracing();
        tracing::info!("Fintrack Core tracing initialized.");
    });
}
