//! Hardware wallet signing over an external device session

use super::params::{hexify, UnsignedTransaction};
use super::signer::{SignedTransaction, SignerKind, TransactionSigner};
use crate::config::WalletConfig;
use crate::error::{BridgeError, BridgeResult};

use async_trait::async_trait;
use ethers::types::{Address, Signature, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

pub const TREZOR_PATH: &str = "m/44'/60'/0'/0/x";
pub const LEDGER_LIVE_PATH: &str = "m/44'/60'/x'/0/0";
pub const LEDGER_LEGACY_PATH: &str = "m/44'/60'/0'/x";

/// Substitute the account index into a path pattern
pub fn derivation_path(pattern: &str, index: u32) -> String {
    pattern.replace('x', &index.to_string())
}

/// Transaction fields as a device expects them: unprefixed big-endian hex
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSignRequest {
    pub to: String,
    pub value: String,
    pub data: String,
    pub gas_limit: String,
    pub gas_price: String,
    pub nonce: String,
    pub chain_id: u64,
    /// Exact bytes to sign, for devices that hash an RLP payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceResponse {
    pub success: bool,
    pub payload: DevicePayload,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DevicePayload {
    Signature { v: String, r: String, s: String },
    Error { error: String },
}

/// A connection to a signing device
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceSession: Send + Sync {
    async fn sign_transaction(
        &self,
        path: &str,
        request: &DeviceSignRequest,
    ) -> BridgeResult<DeviceResponse>;
}

/// Delegates signing to a Ledger or Trezor at a fixed derivation path
pub struct HardwareSigner {
    kind: SignerKind,
    session: Arc<dyn DeviceSession>,
    path: String,
    address: Address,
}

impl HardwareSigner {
    pub fn new(
        kind: SignerKind,
        session: Arc<dyn DeviceSession>,
        path: impl Into<String>,
        address: Address,
    ) -> BridgeResult<Self> {
        if !kind.is_hardware() {
            return Err(BridgeError::Config(format!(
                "{} is not a hardware signer",
                kind.name()
            )));
        }

        Ok(Self {
            kind,
            session,
            path: path.into(),
            address,
        })
    }

    /// Build from the `[wallet]` section, using its derivation path
    pub fn from_wallet_config(
        config: &WalletConfig,
        session: Arc<dyn DeviceSession>,
        address: Address,
    ) -> BridgeResult<Self> {
        let path = config.derivation_path().ok_or_else(|| {
            BridgeError::Config(format!("{} is not a hardware signer", config.signer.name()))
        })?;
        Self::new(config.signer, session, path, address)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn device_request(&self, utx: &UnsignedTransaction) -> DeviceSignRequest {
        let nonce = quantity_hex(utx.params.nonce);
        DeviceSignRequest {
            to: utx
                .recipient
                .map(|to| hex::encode(to.as_bytes()))
                .unwrap_or_default(),
            value: quantity_hex(utx.value),
            data: hex::encode(&utx.payload),
            gas_limit: quantity_hex(utx.params.gas_limit),
            gas_price: quantity_hex(utx.params.gas_price),
            nonce: if nonce.is_empty() { "00".to_string() } else { nonce },
            chain_id: utx.params.chain_id.as_u64(),
            payload: match self.kind {
                SignerKind::Ledger => Some(hexify(&utx.signing_payload())),
                _ => None,
            },
        }
    }
}

#[async_trait]
impl TransactionSigner for HardwareSigner {
    fn kind(&self) -> SignerKind {
        self.kind
    }

    fn address(&self) -> Address {
        self.address
    }

    async fn sign(&self, utx: &UnsignedTransaction) -> BridgeResult<SignedTransaction> {
        let request = self.device_request(utx);
        info!(
            "Waiting for {} approval at {} (nonce 0x{})",
            self.kind.name(),
            self.path,
            request.nonce
        );

        let response = self.session.sign_transaction(&self.path, &request).await?;

        let (v, r, s) = match (response.success, response.payload) {
            (true, DevicePayload::Signature { v, r, s }) => (v, r, s),
            (_, DevicePayload::Error { error }) => return Err(classify_device_error(error)),
            (false, DevicePayload::Signature { .. }) => {
                return Err(BridgeError::SignerDevice(
                    "device reported failure without a message".to_string(),
                ))
            }
        };

        let signature = Signature {
            r: parse_component("r", &r)?,
            s: parse_component("s", &s)?,
            v: parse_component("v", &v)?.as_u64(),
        };

        let tx = utx.typed();
        let signed_hash = match self.kind {
            SignerKind::Ledger => H256::from(keccak256(utx.signing_payload())),
            _ => tx.sighash(),
        };
        let signer = signature.recover(signed_hash).map_err(|e| {
            BridgeError::SignerDevice(format!("device signature does not recover: {}", e))
        })?;
        if signer != self.address {
            return Err(BridgeError::SignerDevice(format!(
                "device at {} signed as {:?}, expected {:?}",
                self.path, signer, self.address
            )));
        }

        Ok(SignedTransaction::new(tx, signature))
    }
}

/// User refusals can be retried by asking again; anything else is a device fault
fn classify_device_error(message: String) -> BridgeError {
    let lowered = message.to_lowercase();
    if lowered.contains("denied") || lowered.contains("rejected") || lowered.contains("cancel") {
        BridgeError::SignerRejected(message)
    } else {
        warn!("Device signing failed: {}", message);
        BridgeError::SignerDevice(message)
    }
}

fn parse_component(name: &str, raw: &str) -> BridgeResult<U256> {
    let digits = raw.trim_start_matches("0x");
    U256::from_str_radix(digits, 16).map_err(|_| {
        BridgeError::SignerDevice(format!("device returned malformed {}: {:?}", name, raw))
    })
}

/// Minimal big-endian bytes as hex; empty for zero
fn quantity_hex(value: U256) -> String {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    hex::encode(&bytes[first..])
}
