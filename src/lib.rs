//! Ethereum transaction lifecycle engine
//!
//! Normalizes transaction intents, signs them with a local key or hardware
//! wallet, covers gas through a funding relay when the sender is short, then
//! broadcasts and polls for receipts.

pub mod chain;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod tank;
pub mod tx;

pub use engine::{LifecycleOutcome, TransactionEngine};
pub use error::{BridgeError, BridgeResult};
