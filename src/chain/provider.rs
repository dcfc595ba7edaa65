//! Node RPC surface with multi-RPC support and automatic failover

use crate::config::NodeConfig;
use crate::error::{BridgeError, BridgeResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// The node operations the lifecycle engine depends on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NodeRpc: Send + Sync {
    async fn get_balance(&self, address: Address) -> BridgeResult<U256>;

    async fn get_transaction_count(&self, address: Address) -> BridgeResult<U256>;

    /// Current gas price in wei
    async fn get_gas_price(&self) -> BridgeResult<U256>;

    async fn get_chain_id(&self) -> BridgeResult<u64>;

    async fn get_block_number(&self) -> BridgeResult<u64>;

    /// Submit a signed transaction, resolving once the node acknowledges it.
    /// Errors carry the node's message verbatim in `BridgeError::Rpc`.
    async fn send_raw_transaction(&self, raw: Bytes) -> BridgeResult<H256>;

    async fn get_transaction_receipt(&self, tx_hash: H256)
        -> BridgeResult<Option<TransactionReceipt>>;
}

/// HTTP node provider with failover across the configured RPC URLs
pub struct ChainProvider {
    http_providers: Vec<Provider<Http>>,
    current_provider: AtomicUsize,
}

impl ChainProvider {
    pub fn new(config: &NodeConfig) -> BridgeResult<Self> {
        let mut http_providers = Vec::new();

        for url in &config.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(config.poll_interval_ms));
                    http_providers.push(provider);
                    debug!("Added HTTP provider: {}", url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(BridgeError::Config("No valid RPC providers".to_string()));
        }

        Ok(Self {
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Node failover to provider {}", next);
    }

    pub async fn health_check(&self) -> bool {
        self.get_block_number().await.is_ok()
    }
}

fn rpc_error(e: ProviderError) -> BridgeError {
    BridgeError::Rpc(e.to_string())
}

#[async_trait]
impl NodeRpc for ChainProvider {
    async fn get_balance(&self, address: Address) -> BridgeResult<U256> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_balance(address, None).await {
                Ok(balance) => return Ok(balance),
                Err(e) => {
                    warn!("Failed to get balance of {:?}: {}", address, e);
                    self.failover();
                }
            }
        }

        Err(BridgeError::Rpc("All providers failed to get balance".to_string()))
    }

    async fn get_transaction_count(&self, address: Address) -> BridgeResult<U256> {
        self.http()
            .get_transaction_count(address, None)
            .await
            .map_err(rpc_error)
    }

    async fn get_gas_price(&self) -> BridgeResult<U256> {
        self.http().get_gas_price().await.map_err(rpc_error)
    }

    async fn get_chain_id(&self) -> BridgeResult<u64> {
        let chain_id = self.http().get_chainid().await.map_err(rpc_error)?;
        Ok(chain_id.as_u64())
    }

    async fn get_block_number(&self) -> BridgeResult<u64> {
        for _ in 0..self.http_providers.len() {
            match self.http().get_block_number().await {
                Ok(block) => return Ok(block.as_u64()),
                Err(e) => {
                    warn!("Failed to get block number: {}", e);
                    self.failover();
                }
            }
        }

        Err(BridgeError::Rpc("All providers failed".to_string()))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> BridgeResult<H256> {
        // No failover here: a second node may reject the same payload as a known transaction
        let pending = self.http().send_raw_transaction(raw).await.map_err(rpc_error)?;
        Ok(pending.tx_hash())
    }

    async fn get_transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> BridgeResult<Option<TransactionReceipt>> {
        self.http()
            .get_transaction_receipt(tx_hash)
            .await
            .map_err(rpc_error)
    }
}

/// Read nonce, chain id and gas price for a sending address
pub async fn fetch_txn_info(provider: &dyn NodeRpc, address: Address) -> BridgeResult<TxnInfo> {
    let nonce = provider.get_transaction_count(address).await?;
    let chain_id = provider.get_chain_id().await?;
    let gas_price = provider.get_gas_price().await?;

    Ok(TxnInfo {
        nonce: nonce.as_u64(),
        chain_id,
        gas_price_gwei: wei_to_gwei_ceil(gas_price),
    })
}

/// Defaults for building a transaction intent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxnInfo {
    pub nonce: u64,
    pub chain_id: u64,
    pub gas_price_gwei: u64,
}

/// Round up so a quoted price is never below the node's
fn wei_to_gwei_ceil(wei: U256) -> u64 {
    let gwei = U256::exp10(9);
    let (quotient, remainder) = wei.div_mod(gwei);
    let rounded = if remainder.is_zero() {
        quotient
    } else {
        quotient + 1
    };
    rounded.low_u64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gwei_rounds_up() {
        assert_eq!(wei_to_gwei_ceil(U256::from(20_000_000_000u64)), 20);
        assert_eq!(wei_to_gwei_ceil(U256::from(20_000_000_001u64)), 21);
        assert_eq!(wei_to_gwei_ceil(U256::zero()), 0);
    }

    #[tokio::test]
    async fn test_fetch_txn_info() {
        let mut node = MockNodeRpc::new();
        node.expect_get_transaction_count()
            .returning(|_| Ok(U256::from(7)));
        node.expect_get_chain_id().returning(|| Ok(3));
        node.expect_get_gas_price()
            .returning(|| Ok(U256::from(1_500_000_000u64)));

        let info = fetch_txn_info(&node, Address::zero()).await.unwrap();
        assert_eq!(
            info,
            TxnInfo {
                nonce: 7,
                chain_id: 3,
                gas_price_gwei: 2,
            }
        );
    }

    #[test]
    fn test_provider_requires_urls() {
        let config = NodeConfig {
            rpc_urls: vec![],
            network: crate::tx::NetworkKind::Local,
            poll_interval_ms: 100,
            confirmation_blocks: 1,
        };
        assert!(ChainProvider::new(&config).is_err());
    }
}
