//! Signed transaction broadcast with nonce-collision recovery
//!
//! Gas tank submissions and our own submission race on the same nonce. A
//! nonce error after the tank was used is expected: the tank most likely
//! already broadcast our transaction, so we wait for its receipt instead.

use super::signer::SignedTransaction;
use crate::chain::{ConfirmationPoller, NodeRpc};
use crate::error::{BridgeError, BridgeResult};

use dashmap::DashMap;
use ethers::types::H256;
use futures::future::try_join_all;
use lazy_static::lazy_static;
use regex::Regex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Invoked with `(hash, confirmation_count)`; counts strictly increase
pub type ConfirmationCallback = Arc<dyn Fn(H256, u64) + Send + Sync>;

lazy_static! {
    static ref KNOWN_TRANSACTION: Regex =
        Regex::new(r"known transaction: |already known").unwrap();
    static ref INVALID_NONCE: Regex =
        Regex::new(r"the tx doesn't have the correct nonce\.|nonce too low").unwrap();
}

/// How a submission error should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionError {
    /// Our bytes are (probably) already in the network
    AlreadySubmitted,
    Fatal,
}

/// Classify a node's submission error message. The only place node-specific
/// wording is matched.
pub fn classify_submission_error(message: &str, doubt_nonce_error: bool) -> SubmissionError {
    if KNOWN_TRANSACTION.is_match(message) || (doubt_nonce_error && INVALID_NONCE.is_match(message))
    {
        SubmissionError::AlreadySubmitted
    } else {
        SubmissionError::Fatal
    }
}

/// Give up on confirmation notices for a hash not mined within this many blocks
pub const NOTICE_BLOCK_TIMEOUT: u64 = 50;

/// Submits signed transactions and reports confirmations. Notice tasks are
/// aborted when the broadcaster is dropped.
pub struct Broadcaster {
    provider: Arc<dyn NodeRpc>,
    poller: Arc<ConfirmationPoller>,
    /// Stop emitting notices after this many confirmations
    confirmation_blocks: u64,
    notices: DashMap<H256, JoinHandle<()>>,
}

impl Broadcaster {
    pub fn new(
        provider: Arc<dyn NodeRpc>,
        poller: Arc<ConfirmationPoller>,
        confirmation_blocks: u64,
    ) -> Self {
        Self {
            provider,
            poller,
            confirmation_blocks: confirmation_blocks.max(1),
            notices: DashMap::new(),
        }
    }

    /// Resolve with the hash as soon as the node acknowledges the submission.
    /// Confirmation notices arrive on `confirmation_cb` afterwards, starting
    /// no earlier than one poll interval after resolution.
    pub async fn broadcast(
        &self,
        stx: &SignedTransaction,
        doubt_nonce_error: bool,
        confirmation_cb: Option<ConfirmationCallback>,
    ) -> BridgeResult<H256> {
        match self.provider.send_raw_transaction(stx.raw().clone()).await {
            Ok(tx_hash) => {
                info!("Transaction submitted: {:?}", tx_hash);
                crate::metrics::record_tx_submitted();
                if let Some(cb) = confirmation_cb {
                    self.spawn_confirmation_notices(tx_hash, cb);
                }
                Ok(tx_hash)
            }
            Err(e) => {
                let message = match e {
                    BridgeError::Rpc(message) => message,
                    other => other.to_string(),
                };
                error!("Transaction submission failed: {}", message);

                match classify_submission_error(&message, doubt_nonce_error) {
                    SubmissionError::AlreadySubmitted => {
                        warn!("Nonce error, likely from gas tank submission, waiting for receipt");
                        self.recover(stx.hash(), confirmation_cb).await
                    }
                    SubmissionError::Fatal if message.is_empty() => Err(
                        BridgeError::TransactionSendingFailed("Transaction sending failed!".into()),
                    ),
                    SubmissionError::Fatal => Err(BridgeError::TransactionSendingFailed(message)),
                }
            }
        }
    }

    /// Submit several transactions concurrently
    pub async fn broadcast_all(
        &self,
        stxs: &[SignedTransaction],
        doubt_nonce_error: bool,
    ) -> BridgeResult<Vec<H256>> {
        try_join_all(
            stxs.iter()
                .map(|stx| self.broadcast(stx, doubt_nonce_error, None)),
        )
        .await
    }

    /// Notice tasks still running
    pub fn pending_notices(&self) -> usize {
        self.notices.iter().filter(|h| !h.is_finished()).count()
    }

    /// Stop confirmation notices for one hash
    pub fn cancel_notices(&self, tx_hash: H256) {
        if let Some((_, handle)) = self.notices.remove(&tx_hash) {
            handle.abort();
        }
    }

    /// The expected hash is that of our own serialized bytes
    async fn recover(
        &self,
        tx_hash: H256,
        confirmation_cb: Option<ConfirmationCallback>,
    ) -> BridgeResult<H256> {
        let success = match self.poller.wait_for_confirmation(tx_hash).await {
            Ok(success) => success,
            Err(e) => {
                warn!("Could not confirm {:?} after nonce collision: {}", tx_hash, e);
                false
            }
        };

        if !success {
            return Err(BridgeError::UnexpectedTransactionFailure {
                tx_hash: format!("{:?}", tx_hash),
            });
        }

        info!("Recovered from nonce collision: {:?} confirmed", tx_hash);
        crate::metrics::record_nonce_collision_recovered();
        if let Some(cb) = confirmation_cb {
            self.spawn_confirmation_notices(tx_hash, cb);
        }
        Ok(tx_hash)
    }

    fn spawn_confirmation_notices(&self, tx_hash: H256, cb: ConfirmationCallback) {
        let provider = self.provider.clone();
        let interval = self.poller.interval();
        let target = self.confirmation_blocks;

        let task = tokio::spawn(async move {
            let mut last = 0u64;
            let mut first_block: Option<u64> = None;
            while last < target {
                tokio::time::sleep(interval).await;

                let current = match provider.get_block_number().await {
                    Ok(current) => current,
                    Err(e) => {
                        warn!("Block number lookup failed: {}", e);
                        continue;
                    }
                };
                let start = *first_block.get_or_insert(current);

                let included = match provider.get_transaction_receipt(tx_hash).await {
                    Ok(receipt) => receipt.and_then(|r| r.block_number).map(|b| b.as_u64()),
                    Err(e) => {
                        warn!("Receipt lookup for {:?} failed: {}", tx_hash, e);
                        None
                    }
                };
                let Some(included) = included else {
                    if current.saturating_sub(start) >= NOTICE_BLOCK_TIMEOUT {
                        warn!(
                            "{:?} not mined within {} blocks, stopping notices",
                            tx_hash, NOTICE_BLOCK_TIMEOUT
                        );
                        break;
                    }
                    continue;
                };

                let count = current.saturating_sub(included) + 1;
                if count > last {
                    debug!("Transaction {:?} has {} confirmations", tx_hash, count);
                    cb(tx_hash, count);
                    last = count;
                }
            }
        });

        self.notices.retain(|_, handle| !handle.is_finished());
        if let Some(previous) = self.notices.insert(tx_hash, task) {
            previous.abort();
        }
    }
}

impl Drop for Broadcaster {
    fn drop(&mut self) {
        for entry in self.notices.iter() {
            entry.value().abort();
        }
    }
}
