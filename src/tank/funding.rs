//! Balance sufficiency and gas tank funding
//!
//! ```text
//! CheckingBalance ──sufficient──▶ Done
//!        │ insufficient
//!        ▼
//! CheckingAllowance ─▶ RequestingFunds ─▶ AwaitingFundingConfirmation ─▶ Done
//!        └────────────── any failure ──────────────▶ ManualWaitForBalance ─▶ Done
//! ```

use super::client::FundingRelay;
use crate::chain::{ConfirmationPoller, NodeRpc};
use crate::error::{BridgeError, BridgeResult};
use crate::tx::SignedTransaction;

use ethers::types::{Address, H256, U256};
use ethers::utils::format_ether;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Notifications for the human operator while waiting for funds
pub trait FundingPrompt: Send + Sync {
    /// `required` is the minimum balance in wei as a decimal string
    fn ask_for_funding(&self, address: Address, required: &str, current: U256);

    /// The address is funded; stop asking
    fn got_funding(&self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundingState {
    CheckingBalance,
    CheckingAllowance,
    RequestingFunds,
    AwaitingFundingConfirmation,
    ManualWaitForBalance,
    Done,
}

/// One shortfall to cover, created only when it is needed
#[derive(Debug, Clone)]
pub struct FundingRequest {
    pub point: Option<u32>,
    pub signed_txs: Vec<SignedTransaction>,
    pub address: Address,
    pub required_balance: U256,
}

impl FundingRequest {
    /// Require enough balance for every transaction's worst-case cost
    pub fn new(point: Option<u32>, signed_txs: Vec<SignedTransaction>, address: Address) -> Self {
        let required_balance = signed_txs
            .iter()
            .fold(U256::zero(), |acc, stx| acc.saturating_add(stx.max_cost()));
        Self {
            point,
            signed_txs,
            address,
            required_balance,
        }
    }

    fn raw_txs(&self) -> Vec<String> {
        self.signed_txs.iter().map(|stx| stx.raw_hex()).collect()
    }
}

pub struct FundingCoordinator {
    provider: Arc<dyn NodeRpc>,
    relay: Option<Arc<dyn FundingRelay>>,
    poller: Arc<ConfirmationPoller>,
    interval: Duration,
}

impl FundingCoordinator {
    /// Without a relay every shortfall goes straight to the manual wait
    pub fn new(
        provider: Arc<dyn NodeRpc>,
        relay: Option<Arc<dyn FundingRelay>>,
        poller: Arc<ConfirmationPoller>,
    ) -> Self {
        let interval = poller.interval();
        Self {
            provider,
            relay,
            poller,
            interval,
        }
    }

    /// Resolves once the address can pay for the request. Returns whether the
    /// gas tank was used, in which case nonce errors on broadcast are suspect.
    pub async fn ensure_funds_for(
        &self,
        request: &FundingRequest,
        prompt: &dyn FundingPrompt,
    ) -> BridgeResult<bool> {
        debug!(state = ?FundingState::CheckingBalance, "tank: checking {:?}", request.address);
        let balance = self.provider.get_balance(request.address).await?;

        if balance >= request.required_balance {
            info!("tank: already have sufficient funds");
            return Ok(false);
        }

        info!(
            "tank: {:?} has {} ETH, needs {} ETH",
            request.address,
            format_ether(balance),
            format_ether(request.required_balance)
        );

        let funding_tx = match self.request_funding(request).await {
            Ok(tx_hash) => tx_hash,
            Err(e) => {
                warn!("tank: funding failed: {}", e);
                crate::metrics::record_tank_request(&e);
                self.wait_for_balance(request.address, request.required_balance, prompt)
                    .await?;
                return Ok(false);
            }
        };
        crate::metrics::record_tank_funded();

        debug!(state = ?FundingState::AwaitingFundingConfirmation, "tank: waiting for {:?}", funding_tx);
        match self.poller.wait_for_confirmation(funding_tx).await {
            Ok(true) => match self.provider.get_balance(request.address).await {
                Ok(new_balance) => {
                    info!(
                        "tank: funds have confirmed ({} -> {} ETH)",
                        format_ether(balance),
                        format_ether(new_balance)
                    );
                    if new_balance < request.required_balance {
                        warn!("tank: funding confirmed but balance is still short");
                        self.wait_for_balance(request.address, request.required_balance, prompt)
                            .await?;
                    }
                }
                Err(e) => {
                    warn!("tank: could not re-read balance after funding: {}", e);
                    self.wait_for_balance(request.address, request.required_balance, prompt)
                        .await?;
                }
            },
            Ok(false) => {
                warn!("tank: funding transaction {:?} reverted", funding_tx);
                self.wait_for_balance(request.address, request.required_balance, prompt)
                    .await?;
            }
            Err(e) => {
                warn!("tank: could not confirm funding transaction: {}", e);
                self.wait_for_balance(request.address, request.required_balance, prompt)
                    .await?;
            }
        }

        debug!(state = ?FundingState::Done, "tank: funded");
        Ok(true)
    }

    /// Allowance check and funding request; returns the relay's funding tx
    async fn request_funding(&self, request: &FundingRequest) -> BridgeResult<H256> {
        let relay = self
            .relay
            .as_ref()
            .ok_or_else(|| BridgeError::TankUnavailable("gas tank disabled".to_string()))?;

        debug!(state = ?FundingState::CheckingAllowance, "tank: point {:?}", request.point);
        match request.point {
            Some(point) => {
                let remaining = relay.remaining_transactions(point).await?;
                if remaining < request.signed_txs.len() as u64 {
                    return Err(BridgeError::TankRequestInvalid {
                        remaining,
                        needed: request.signed_txs.len(),
                    });
                }
            }
            None => info!("tank: skipping remaining-funds check"),
        }

        debug!(state = ?FundingState::RequestingFunds, "tank: requesting {} txs", request.signed_txs.len());
        let response = relay.fund_transactions(request.raw_txs()).await?;
        if !response.success {
            return Err(BridgeError::TankRequestRejected(response.error_message()));
        }

        response.tx_hash.ok_or_else(|| {
            BridgeError::TankRequestRejected("relay accepted but returned no txHash".to_string())
        })
    }

    /// Poll until `address` holds `min_balance`, prompting the operator each
    /// time it is still short. Waits indefinitely.
    pub async fn wait_for_balance(
        &self,
        address: Address,
        min_balance: U256,
        prompt: &dyn FundingPrompt,
    ) -> BridgeResult<()> {
        debug!(state = ?FundingState::ManualWaitForBalance, "tank: awaiting balance {:?} {}", address, min_balance);
        crate::metrics::record_manual_funding_wait();
        let required = min_balance.to_string();

        loop {
            match self.provider.get_balance(address).await {
                Ok(balance) if balance >= min_balance => {
                    prompt.got_funding();
                    return Ok(());
                }
                Ok(balance) => prompt.ask_for_funding(address, &required, balance),
                Err(e) => warn!("tank: balance check failed: {}", e),
            }

            tokio::time::sleep(self.interval).await;
        }
    }
}
