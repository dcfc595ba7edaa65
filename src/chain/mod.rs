//! Chain module - node access and confirmation tracking
//!
//! This module provides:
//! - The node RPC surface with multi-RPC failover
//! - Fixed-interval receipt polling with a monotonic per-hash state

pub mod confirm;
pub mod provider;

pub use confirm::{ConfirmationHandle, ConfirmationPoller, ConfirmationState};
pub use provider::{fetch_txn_info, ChainProvider, NodeRpc, TxnInfo};
