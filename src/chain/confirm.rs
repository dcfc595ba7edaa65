//! Receipt polling for submitted transactions
//!
//! The poller has no built-in timeout. Callers needing a bounded wait wrap
//! `wait_for_confirmation` in `tokio::time::timeout` or cancel the handle
//! returned by `watch`. Failed receipt lookups are retried on the next tick;
//! only what a receipt says is ever recorded.

use crate::chain::NodeRpc;
use crate::error::{BridgeError, BridgeResult};

use dashmap::DashMap;
use ethers::types::{TransactionReceipt, H256};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Default delay between receipt checks
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

/// How long a settled hash is remembered
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(600);

/// Observed state of a transaction hash. Once terminal it never changes
/// while the hash is tracked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationState {
    Pending,
    /// Receipt found; carries the receipt's success flag
    Confirmed(bool),
    /// Receipt found but its outcome cannot be read
    Failed(String),
}

impl ConfirmationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConfirmationState::Pending)
    }
}

struct Settled {
    state: ConfirmationState,
    at: Instant,
}

/// Polls a node for receipts on a fixed interval
pub struct ConfirmationPoller {
    provider: Arc<dyn NodeRpc>,
    interval: Duration,
    retention: Duration,
    states: DashMap<H256, Settled>,
}

impl ConfirmationPoller {
    pub fn new(provider: Arc<dyn NodeRpc>, interval: Duration) -> Self {
        Self {
            provider,
            interval,
            retention: DEFAULT_RETENTION,
            states: DashMap::new(),
        }
    }

    /// Forget settled hashes after `retention`
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Current state of a hash; unknown or evicted hashes are pending
    pub fn state(&self, tx_hash: H256) -> ConfirmationState {
        self.states
            .get(&tx_hash)
            .map(|s| s.state.clone())
            .unwrap_or(ConfirmationState::Pending)
    }

    /// Number of settled hashes still remembered
    pub fn tracked(&self) -> usize {
        self.states.len()
    }

    pub fn forget(&self, tx_hash: H256) {
        self.states.remove(&tx_hash);
    }

    /// Resolves with the receipt's success flag once a receipt exists
    pub async fn wait_for_confirmation(&self, tx_hash: H256) -> BridgeResult<bool> {
        let state = loop {
            let known = self.state(tx_hash);
            if known.is_terminal() {
                break known;
            }

            debug!("Checking for confirmation of {:?}", tx_hash);
            match self.provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    let state = self.transition(tx_hash, receipt_state(&receipt));
                    if let ConfirmationState::Confirmed(success) = state {
                        info!("Transaction {:?} confirmed (success: {})", tx_hash, success);
                        crate::metrics::record_tx_confirmed(success);
                    }
                    break state;
                }
                Ok(None) => {}
                Err(e) => warn!("Receipt lookup for {:?} failed, retrying: {}", tx_hash, e),
            }
            tokio::time::sleep(self.interval).await;
        };

        match state {
            ConfirmationState::Confirmed(success) => Ok(success),
            ConfirmationState::Failed(reason) => Err(BridgeError::UnreadableReceipt {
                tx_hash: format!("{:?}", tx_hash),
                reason,
            }),
            ConfirmationState::Pending => Err(BridgeError::Internal(
                "confirmation settled as pending".to_string(),
            )),
        }
    }

    /// Wait in a background task that can be cancelled
    pub fn watch(self: &Arc<Self>, tx_hash: H256) -> ConfirmationHandle {
        let (tx, rx) = oneshot::channel();
        let poller = self.clone();
        let task = tokio::spawn(async move {
            let result = poller.wait_for_confirmation(tx_hash).await;
            // Receiver may be gone if the caller stopped waiting
            let _ = tx.send(result);
        });

        ConfirmationHandle {
            tx_hash,
            rx: Some(rx),
            task,
        }
    }

    /// Only the first terminal state sticks; returns the state that did
    fn transition(&self, tx_hash: H256, next: ConfirmationState) -> ConfirmationState {
        let settled = self
            .states
            .entry(tx_hash)
            .or_insert_with(|| Settled {
                state: next,
                at: Instant::now(),
            })
            .state
            .clone();
        self.prune();
        settled
    }

    fn prune(&self) {
        let retention = self.retention;
        self.states.retain(|_, s| s.at.elapsed() < retention);
    }
}

fn receipt_state(receipt: &TransactionReceipt) -> ConfirmationState {
    match receipt.status {
        Some(status) => ConfirmationState::Confirmed(status.as_u64() == 1),
        None => ConfirmationState::Failed("receipt has no status field".to_string()),
    }
}

/// Single-resolution handle to a background confirmation wait
pub struct ConfirmationHandle {
    tx_hash: H256,
    rx: Option<oneshot::Receiver<BridgeResult<bool>>>,
    task: JoinHandle<()>,
}

impl ConfirmationHandle {
    pub fn tx_hash(&self) -> H256 {
        self.tx_hash
    }

    pub async fn wait(mut self) -> BridgeResult<bool> {
        let rx = self
            .rx
            .take()
            .ok_or_else(|| BridgeError::Internal("confirmation already awaited".to_string()))?;
        rx.await
            .map_err(|_| BridgeError::Internal("confirmation task stopped".to_string()))?
    }

    pub fn cancel(self) {
        self.task.abort();
    }
}

impl Drop for ConfirmationHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::provider::MockNodeRpc;
    use ethers::types::U64;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn receipt(status: u64) -> TransactionReceipt {
        TransactionReceipt {
            status: Some(U64::from(status)),
            block_number: Some(U64::from(100)),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_polls_until_receipt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut node = MockNodeRpc::new();
        node.expect_get_transaction_receipt().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Ok(None)
            } else {
                Ok(Some(receipt(1)))
            }
        });

        let poller = ConfirmationPoller::new(Arc::new(node), Duration::from_millis(1));
        let hash = H256::repeat_byte(0xab);

        assert!(poller.wait_for_confirmation(hash).await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(poller.state(hash), ConfirmationState::Confirmed(true));
    }

    #[tokio::test]
    async fn test_reverted_receipt_reports_false() {
        let mut node = MockNodeRpc::new();
        node.expect_get_transaction_receipt()
            .returning(|_| Ok(Some(receipt(0))));

        let poller = ConfirmationPoller::new(Arc::new(node), Duration::from_millis(1));
        assert!(!poller
            .wait_for_confirmation(H256::repeat_byte(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_second_wait_is_idempotent() {
        let mut node = MockNodeRpc::new();
        node.expect_get_transaction_receipt()
            .times(1)
            .returning(|_| Ok(Some(receipt(1))));

        let poller = ConfirmationPoller::new(Arc::new(node), Duration::from_millis(1));
        let hash = H256::repeat_byte(2);

        let first = poller.wait_for_confirmation(hash).await.unwrap();
        let second = poller.wait_for_confirmation(hash).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_lookup_errors_are_retried_not_recorded() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut node = MockNodeRpc::new();
        node.expect_get_transaction_receipt().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(BridgeError::Rpc("timeout".into()))
            } else {
                Ok(Some(receipt(1)))
            }
        });

        let poller = ConfirmationPoller::new(Arc::new(node), Duration::from_millis(1));
        let hash = H256::repeat_byte(3);

        assert!(poller.wait_for_confirmation(hash).await.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(poller.state(hash), ConfirmationState::Confirmed(true));
    }

    #[tokio::test]
    async fn test_receipt_without_status_fails() {
        let mut node = MockNodeRpc::new();
        node.expect_get_transaction_receipt()
            .times(1)
            .returning(|_| Ok(Some(TransactionReceipt::default())));

        let poller = ConfirmationPoller::new(Arc::new(node), Duration::from_millis(1));
        let hash = H256::repeat_byte(6);

        assert!(matches!(
            poller.wait_for_confirmation(hash).await,
            Err(BridgeError::UnreadableReceipt { .. })
        ));
        assert!(poller.state(hash).is_terminal());
        assert!(poller.wait_for_confirmation(hash).await.is_err());
    }

    #[tokio::test]
    async fn test_settled_hashes_are_evicted() {
        let mut node = MockNodeRpc::new();
        node.expect_get_transaction_receipt()
            .returning(|_| Ok(Some(receipt(1))));

        let poller = ConfirmationPoller::new(Arc::new(node), Duration::from_millis(1))
            .with_retention(Duration::ZERO);

        assert!(poller.wait_for_confirmation(H256::repeat_byte(7)).await.unwrap());
        assert!(poller.wait_for_confirmation(H256::repeat_byte(8)).await.unwrap());
        assert_eq!(poller.tracked(), 0);
        assert_eq!(poller.state(H256::repeat_byte(7)), ConfirmationState::Pending);
    }

    #[tokio::test]
    async fn test_forget_drops_one_hash() {
        let mut node = MockNodeRpc::new();
        node.expect_get_transaction_receipt()
            .returning(|_| Ok(Some(receipt(0))));

        let poller = ConfirmationPoller::new(Arc::new(node), Duration::from_millis(1));
        let (a, b) = (H256::repeat_byte(9), H256::repeat_byte(10));
        poller.wait_for_confirmation(a).await.unwrap();
        poller.wait_for_confirmation(b).await.unwrap();

        poller.forget(a);
        assert_eq!(poller.tracked(), 1);
        assert_eq!(poller.state(b), ConfirmationState::Confirmed(false));
    }

    #[tokio::test]
    async fn test_watch_resolves_through_handle() {
        let mut node = MockNodeRpc::new();
        node.expect_get_transaction_receipt()
            .returning(|_| Ok(Some(receipt(1))));

        let poller = Arc::new(ConfirmationPoller::new(
            Arc::new(node),
            Duration::from_millis(1),
        ));
        let handle = poller.watch(H256::repeat_byte(4));
        assert!(handle.wait().await.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_watch_stays_pending() {
        let mut node = MockNodeRpc::new();
        node.expect_get_transaction_receipt().returning(|_| Ok(None));

        let poller = Arc::new(ConfirmationPoller::new(
            Arc::new(node),
            Duration::from_millis(1),
        ));
        let hash = H256::repeat_byte(5);
        let handle = poller.watch(hash);
        tokio::time::sleep(Duration::from_millis(5)).await;
        handle.cancel();

        assert_eq!(poller.state(hash), ConfirmationState::Pending);
    }
}
