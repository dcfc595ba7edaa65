//! End-to-end transaction lifecycle
//!
//! normalize → sign → ensure funds → broadcast → confirm. Funding happens after
//! signing so the relay can be handed the exact bytes it will pay for.

use crate::chain::{ConfirmationPoller, NodeRpc};
use crate::config::Settings;
use crate::error::{BridgeError, BridgeResult};
use crate::tank::{FundingCoordinator, FundingPrompt, FundingRelay, FundingRequest, TankClient};
use crate::tx::{
    sign_transaction, Broadcaster, ConfirmationCallback, SignedTransaction, SigningContext,
    TransactionIntent, TransactionSigner, UnsignedTransaction,
};

use ethers::types::H256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

/// What happened to one intent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleOutcome {
    pub hash: H256,
    pub success: bool,
    /// The gas tank paid for this transaction
    pub used_tank: bool,
}

pub struct TransactionEngine {
    poller: Arc<ConfirmationPoller>,
    broadcaster: Broadcaster,
    funding: FundingCoordinator,
    ctx: SigningContext,
}

impl TransactionEngine {
    pub fn new(
        provider: Arc<dyn NodeRpc>,
        relay: Option<Arc<dyn FundingRelay>>,
        ctx: SigningContext,
        poll_interval: Duration,
        confirmation_blocks: u64,
    ) -> Self {
        let poller = Arc::new(ConfirmationPoller::new(provider.clone(), poll_interval));
        let broadcaster = Broadcaster::new(provider.clone(), poller.clone(), confirmation_blocks);
        let funding = FundingCoordinator::new(provider, relay, poller.clone());

        Self {
            poller,
            broadcaster,
            funding,
            ctx,
        }
    }

    /// Wire up the configured signer and, when enabled, the gas tank relay
    pub fn from_settings(
        settings: &Settings,
        provider: Arc<dyn NodeRpc>,
        signer: Arc<dyn TransactionSigner>,
    ) -> BridgeResult<Self> {
        let relay: Option<Arc<dyn FundingRelay>> = if settings.tank.enabled {
            Some(Arc::new(TankClient::new(&settings.tank)?))
        } else {
            None
        };

        Ok(Self::new(
            provider,
            relay,
            SigningContext::new(signer, settings.node.network),
            settings.node.poll_interval(),
            settings.node.confirmation_blocks,
        ))
    }

    pub fn poller(&self) -> &Arc<ConfirmationPoller> {
        &self.poller
    }

    pub async fn sign(&self, intent: &TransactionIntent) -> BridgeResult<SignedTransaction> {
        let signer = self.ctx.signer.as_ref().ok_or(BridgeError::MissingWallet)?;
        let mut utx = UnsignedTransaction::from_intent(intent)?;
        utx.from = Some(signer.address());
        sign_transaction(Some(utx), &self.ctx).await
    }

    /// Run one intent through to a receipt
    pub async fn execute(
        &self,
        intent: &TransactionIntent,
        point: Option<u32>,
        prompt: &dyn FundingPrompt,
        confirmation_cb: Option<ConfirmationCallback>,
    ) -> BridgeResult<LifecycleOutcome> {
        let stx = self.sign(intent).await?;
        self.execute_signed(&stx, point, prompt, confirmation_cb).await
    }

    /// Fund, broadcast and confirm an already signed transaction
    pub async fn execute_signed(
        &self,
        stx: &SignedTransaction,
        point: Option<u32>,
        prompt: &dyn FundingPrompt,
        confirmation_cb: Option<ConfirmationCallback>,
    ) -> BridgeResult<LifecycleOutcome> {
        let span = info_span!("lifecycle", id = %Uuid::new_v4(), tx = ?stx.hash());

        async move {
            let address = self
                .ctx
                .signer
                .as_ref()
                .map(|s| s.address())
                .ok_or(BridgeError::MissingWallet)?;
            info!("Executing {:?} from {:?}", stx.hash(), address);

            let request = FundingRequest::new(point, vec![stx.clone()], address);
            let used_tank = self.funding.ensure_funds_for(&request, prompt).await?;

            let hash = self
                .broadcaster
                .broadcast(stx, used_tank, confirmation_cb)
                .await?;
            let success = self.poller.wait_for_confirmation(hash).await?;
            info!("Lifecycle complete: {:?} (success: {})", hash, success);

            Ok(LifecycleOutcome {
                hash,
                success,
                used_tank,
            })
        }
        .instrument(span)
        .await
    }
}
