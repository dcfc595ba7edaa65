//! Error types for the transaction lifecycle engine

use thiserror::Error;

/// Main error type for the engine
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid parameter {field}: {message}")]
    InvalidParameter { field: String, message: String },

    #[error("No wallet is bound to the signing context")]
    MissingWallet,

    #[error("No transaction to sign or send")]
    MissingTransaction,

    #[error("Signer rejected the transaction: {0}")]
    SignerRejected(String),

    #[error("Signer device error: {0}")]
    SignerDevice(String),

    #[error("{0}")]
    TransactionSendingFailed(String),

    #[error("Unexpected transaction failure for {tx_hash}")]
    UnexpectedTransactionFailure { tx_hash: String },

    #[error("Receipt for {tx_hash} is unreadable: {reason}")]
    UnreadableReceipt { tx_hash: String, reason: String },

    #[error("Node RPC error: {0}")]
    Rpc(String),

    #[error("tank: request invalid ({remaining} remaining, {needed} needed)")]
    TankRequestInvalid { remaining: u64, needed: usize },

    #[error("tank: request rejected: {0}")]
    TankRequestRejected(String),

    #[error("tank: relay unreachable: {0}")]
    TankUnavailable(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        BridgeError::InvalidParameter {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Check if the failed step can be retried as-is
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BridgeError::Rpc(_)
                | BridgeError::Timeout { .. }
                | BridgeError::SignerRejected(_)
                | BridgeError::SignerDevice(_)
                | BridgeError::TankUnavailable(_)
        )
    }

    /// Relay failures degrade to the manual funding wait instead of failing the lifecycle
    pub fn is_funding_failure(&self) -> bool {
        matches!(
            self,
            BridgeError::TankRequestInvalid { .. }
                | BridgeError::TankRequestRejected(_)
                | BridgeError::TankUnavailable(_)
        )
    }
}

/// Result type for engine operations
pub type BridgeResult<T> = Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_funding_failures_are_not_retryable_sends() {
        let invalid = BridgeError::TankRequestInvalid {
            remaining: 0,
            needed: 2,
        };
        assert!(invalid.is_funding_failure());
        assert!(!invalid.is_retryable());
        assert_eq!(
            invalid.to_string(),
            "tank: request invalid (0 remaining, 2 needed)"
        );

        assert!(!BridgeError::MissingWallet.is_funding_failure());
        assert!(BridgeError::SignerRejected("denied".into()).is_retryable());
    }

    #[test]
    fn test_sending_failure_surfaces_node_message() {
        let err = BridgeError::TransactionSendingFailed("insufficient funds".into());
        assert_eq!(err.to_string(), "insufficient funds");
    }
}
