//! Services, the engine facade and supporting runtime pieces.

pub mod engine;
pub mod services;
pub mod time;
pub mod utils;

pub use engine::LedgerEngine;
pub use time::{Clock, FixedClock, SystemClock};
