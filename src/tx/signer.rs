//! Signer abstraction over in-memory keys and hardware devices
//!
//! Ledger does not apply EIP-155 on its own. Past the fork block the
//! signature fields must be pre-set to `r = 0, s = 0, v = chainId` before the
//! device hashes the transaction. Mainnet, Ropsten and offline signing are
//! all assumed to be past the fork; local dev chains are not.

use super::params::{hexify, NormalizedParams, ReplayProtection, UnsignedTransaction};
use crate::error::{BridgeError, BridgeResult};

use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, Signature, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkKind {
    Mainnet,
    /// The default test network
    #[serde(alias = "testnet")]
    Ropsten,
    Offline,
    Local,
}

impl NetworkKind {
    pub fn requires_replay_protection(&self) -> bool {
        matches!(
            self,
            NetworkKind::Mainnet | NetworkKind::Ropsten | NetworkKind::Offline
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerKind {
    LocalKey,
    Ledger,
    Trezor,
}

impl SignerKind {
    pub fn is_hardware(&self) -> bool {
        matches!(self, SignerKind::Ledger | SignerKind::Trezor)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SignerKind::LocalKey => "local_key",
            SignerKind::Ledger => "ledger",
            SignerKind::Trezor => "trezor",
        }
    }
}

/// Merge the EIP-155 preset into `params` when a hardware signer is used on a
/// forked network. Local keys apply EIP-155 themselves and are left alone.
pub fn prepare_replay_protection(
    params: NormalizedParams,
    signer_kind: SignerKind,
    network: NetworkKind,
) -> NormalizedParams {
    if signer_kind.is_hardware() && network.requires_replay_protection() {
        NormalizedParams {
            replay_protection: Some(ReplayProtection::for_chain(params.chain_id)),
            ..params
        }
    } else {
        params
    }
}

/// A signed transaction. Never mutated after signing.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedTransaction {
    tx: TypedTransaction,
    signature: Signature,
    raw: Bytes,
    hash: H256,
}

impl SignedTransaction {
    pub fn new(tx: TypedTransaction, signature: Signature) -> Self {
        let raw = tx.rlp_signed(&signature);
        let hash = H256::from(keccak256(&raw));
        Self {
            tx,
            signature,
            raw,
            hash,
        }
    }

    pub fn transaction(&self) -> &TypedTransaction {
        &self.tx
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Canonical serialized form
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    pub fn raw_hex(&self) -> String {
        hexify(&self.raw)
    }

    /// Hash of the serialized bytes, as the network will report it
    pub fn hash(&self) -> H256 {
        self.hash
    }

    /// Worst-case balance needed to include this transaction
    pub fn max_cost(&self) -> U256 {
        let gas = self.tx.gas().copied().unwrap_or_default();
        let gas_price = self.tx.gas_price().unwrap_or_default();
        let value = self.tx.value().copied().unwrap_or_default();
        gas.saturating_mul(gas_price).saturating_add(value)
    }

    pub fn render(&self) -> RenderedSignedTx {
        RenderedSignedTx {
            message_hash: format!("{:?}", self.hash),
            v: format!("{:#x}", self.signature.v),
            r: format!("{:#x}", self.signature.r),
            s: format!("{:#x}", self.signature.s),
            raw_transaction: self.raw_hex(),
        }
    }
}

/// Hex view of a signed transaction for offline broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedSignedTx {
    pub message_hash: String,
    pub v: String,
    pub r: String,
    pub s: String,
    pub raw_transaction: String,
}

/// Something able to turn an unsigned transaction into a signed one
#[async_trait]
pub trait TransactionSigner: Send + Sync {
    fn kind(&self) -> SignerKind;

    /// Address whose balance pays for the transaction
    fn address(&self) -> Address;

    /// Hardware signers may suspend until the operator approves on-device
    async fn sign(&self, utx: &UnsignedTransaction) -> BridgeResult<SignedTransaction>;
}

/// Signs in-process with a held private key
pub struct LocalKeySigner {
    wallet: LocalWallet,
}

impl LocalKeySigner {
    pub fn new(wallet: LocalWallet) -> Self {
        Self { wallet }
    }

    pub fn from_private_key(key: &str) -> BridgeResult<Self> {
        let wallet = key
            .trim()
            .parse::<LocalWallet>()
            .map_err(|e| BridgeError::Config(format!("Invalid private key: {}", e)))?;
        Ok(Self::new(wallet))
    }
}

#[async_trait]
impl TransactionSigner for LocalKeySigner {
    fn kind(&self) -> SignerKind {
        SignerKind::LocalKey
    }

    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn sign(&self, utx: &UnsignedTransaction) -> BridgeResult<SignedTransaction> {
        let tx = utx.typed();
        let signature = self
            .wallet
            .sign_transaction_sync(&tx)
            .map_err(|e| BridgeError::Internal(format!("local signing failed: {}", e)))?;
        Ok(SignedTransaction::new(tx, signature))
    }
}

/// Which signer to use and on which network
#[derive(Clone)]
pub struct SigningContext {
    pub signer: Option<Arc<dyn TransactionSigner>>,
    pub network: NetworkKind,
}

impl SigningContext {
    pub fn new(signer: Arc<dyn TransactionSigner>, network: NetworkKind) -> Self {
        Self {
            signer: Some(signer),
            network,
        }
    }

    pub fn unbound(network: NetworkKind) -> Self {
        Self {
            signer: None,
            network,
        }
    }

    pub fn signer_kind(&self) -> Option<SignerKind> {
        self.signer.as_ref().map(|s| s.kind())
    }
}

/// Sign `utx` with the context's signer, pre-setting replay protection when
/// the signer and network require it. The result is handed back to the caller.
pub async fn sign_transaction(
    utx: Option<UnsignedTransaction>,
    ctx: &SigningContext,
) -> BridgeResult<SignedTransaction> {
    let signer = ctx.signer.as_ref().ok_or(BridgeError::MissingWallet)?;
    let utx = utx.ok_or(BridgeError::MissingTransaction)?;

    let kind = signer.kind();
    let params = prepare_replay_protection(utx.params.clone(), kind, ctx.network);
    if params.replay_protection.is_some() {
        debug!("Pre-setting EIP-155 fields for {} on {:?}", kind.name(), ctx.network);
    }
    let utx = utx.with_params(params);

    let stx = signer.sign(&utx).await?;
    info!("Signed transaction {:?} with {}", stx.hash(), kind.name());
    crate::metrics::record_tx_signed(kind);

    Ok(stx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tx::params::UnsignedTransaction;
    use crate::tx::TransactionIntent;

    // Well-known development key
    const DEV_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcc5d1a9d2b8f2ff80";

    fn sample_utx() -> UnsignedTransaction {
        UnsignedTransaction::from_intent(&TransactionIntent {
            recipient: Some(Address::repeat_byte(0x22)),
            value: U256::from(1_000u64),
            payload: Bytes::new(),
            gas_limit: 21_000,
            gas_price_gwei: 20,
            nonce: 5,
            chain_id: 1,
        })
        .unwrap()
    }

    struct KindOnly(SignerKind);

    #[async_trait]
    impl TransactionSigner for KindOnly {
        fn kind(&self) -> SignerKind {
            self.0
        }

        fn address(&self) -> Address {
            Address::zero()
        }

        async fn sign(&self, utx: &UnsignedTransaction) -> BridgeResult<SignedTransaction> {
            assert_eq!(
                utx.params.replay_protection.is_some(),
                self.0.is_hardware(),
            );
            Err(BridgeError::SignerRejected("test".into()))
        }
    }

    #[test]
    fn test_replay_protection_only_for_hardware_on_forked_networks() {
        let networks = [
            NetworkKind::Mainnet,
            NetworkKind::Ropsten,
            NetworkKind::Offline,
            NetworkKind::Local,
        ];
        let kinds = [SignerKind::LocalKey, SignerKind::Ledger, SignerKind::Trezor];

        for network in networks {
            for kind in kinds {
                let params = prepare_replay_protection(sample_utx().params, kind, network);
                let expected = kind.is_hardware() && network != NetworkKind::Local;
                assert_eq!(
                    params.replay_protection.is_some(),
                    expected,
                    "{:?} on {:?}",
                    kind,
                    network
                );
            }
        }
    }

    #[test]
    fn test_hardware_on_test_network_gets_zeroed_rs() {
        let params =
            prepare_replay_protection(sample_utx().params, SignerKind::Ledger, NetworkKind::Ropsten);
        let preset = params.replay_protection.unwrap();
        assert!(preset.r.is_zero());
        assert!(preset.s.is_zero());
        assert_eq!(preset.v, params.chain_id);
    }

    #[tokio::test]
    async fn test_local_signing_is_deterministic() {
        let ctx = SigningContext::new(
            Arc::new(LocalKeySigner::from_private_key(DEV_KEY).unwrap()),
            NetworkKind::Mainnet,
        );

        let first = sign_transaction(Some(sample_utx()), &ctx).await.unwrap();
        let second = sign_transaction(Some(sample_utx()), &ctx).await.unwrap();

        assert_eq!(first.raw_hex(), second.raw_hex());
        assert_eq!(first.hash(), H256::from(keccak256(first.raw())));
        // EIP-155 v for chain 1
        assert!(first.signature().v == 37 || first.signature().v == 38);
        assert_eq!(
            first.signature().recover(first.transaction().sighash()).unwrap(),
            ctx.signer.as_ref().unwrap().address()
        );
    }

    #[tokio::test]
    async fn test_missing_wallet_checked_before_transaction() {
        let ctx = SigningContext::unbound(NetworkKind::Mainnet);
        assert!(matches!(
            sign_transaction(None, &ctx).await,
            Err(BridgeError::MissingWallet)
        ));

        let ctx = SigningContext::new(
            Arc::new(LocalKeySigner::from_private_key(DEV_KEY).unwrap()),
            NetworkKind::Mainnet,
        );
        assert!(matches!(
            sign_transaction(None, &ctx).await,
            Err(BridgeError::MissingTransaction)
        ));
    }

    #[tokio::test]
    async fn test_context_routes_preset_to_signer() {
        for kind in [SignerKind::LocalKey, SignerKind::Trezor] {
            let ctx = SigningContext::new(Arc::new(KindOnly(kind)), NetworkKind::Offline);
            assert!(sign_transaction(Some(sample_utx()), &ctx).await.is_err());
        }
    }

    #[test]
    fn test_max_cost_and_render() {
        let wallet = DEV_KEY.parse::<LocalWallet>().unwrap();
        let tx = sample_utx().typed();
        let signature = wallet.sign_transaction_sync(&tx).unwrap();
        let stx = SignedTransaction::new(tx, signature);

        let expected = U256::from(21_000u64) * U256::from(20_000_000_000u64) + U256::from(1_000u64);
        assert_eq!(stx.max_cost(), expected);

        let rendered = stx.render();
        assert_eq!(rendered.raw_transaction, stx.raw_hex());
        assert!(rendered.message_hash.starts_with("0x"));
        assert_eq!(rendered.message_hash.len(), 66);
    }

    #[test]
    fn test_kind_serde_names() {
        let kind: SignerKind = serde_json::from_str("\"local_key\"").unwrap();
        assert_eq!(kind, SignerKind::LocalKey);
        let network: NetworkKind = serde_json::from_str("\"testnet\"").unwrap();
        assert_eq!(network, NetworkKind::Ropsten);
    }
}
