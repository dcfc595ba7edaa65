//! Parameter normalization: human units in, wire encoding out

use super::intent::TransactionIntent;
use crate::error::{BridgeError, BridgeResult};

use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Bytes, NameOrAddress, TransactionRequest, U256, U64};
use serde::Serialize;

const WEI_PER_GWEI: u64 = 1_000_000_000;

/// Wire-ready numeric fields. Serializes as 0x-prefixed big-endian hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedParams {
    pub nonce: U256,
    pub chain_id: U64,
    /// In wei
    pub gas_price: U256,
    pub gas_limit: U256,
    #[serde(flatten)]
    pub replay_protection: Option<ReplayProtection>,
}

/// Pre-set EIP-155 signature fields `r = 0, s = 0, v = chainId`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayProtection {
    pub r: U256,
    pub s: U256,
    pub v: U64,
}

impl ReplayProtection {
    pub fn for_chain(chain_id: U64) -> Self {
        Self {
            r: U256::zero(),
            s: U256::zero(),
            v: chain_id,
        }
    }
}

/// Convert an intent's numeric fields into their wire encoding
pub fn normalize(intent: &TransactionIntent) -> BridgeResult<NormalizedParams> {
    if intent.gas_limit == 0 {
        return Err(BridgeError::invalid("gasLimit", "must be positive"));
    }
    if intent.chain_id == 0 {
        return Err(BridgeError::invalid("chainId", "must be positive"));
    }

    let gas_price = U256::from(intent.gas_price_gwei)
        .checked_mul(U256::from(WEI_PER_GWEI))
        .ok_or_else(|| BridgeError::invalid("gasPrice", "overflow converting gwei to wei"))?;

    Ok(NormalizedParams {
        nonce: U256::from(intent.nonce),
        chain_id: U64::from(intent.chain_id),
        gas_price,
        gas_limit: U256::from(intent.gas_limit),
        replay_protection: None,
    })
}

/// A normalized transaction that has not been signed yet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    pub from: Option<Address>,
    pub recipient: Option<Address>,
    pub value: U256,
    pub payload: Bytes,
    pub params: NormalizedParams,
}

impl UnsignedTransaction {
    pub fn from_intent(intent: &TransactionIntent) -> BridgeResult<Self> {
        Ok(Self {
            from: None,
            recipient: intent.recipient,
            value: intent.value,
            payload: intent.payload.clone(),
            params: normalize(intent)?,
        })
    }

    pub fn with_params(mut self, params: NormalizedParams) -> Self {
        self.params = params;
        self
    }

    pub fn request(&self) -> TransactionRequest {
        TransactionRequest {
            from: self.from,
            to: self.recipient.map(NameOrAddress::Address),
            gas: Some(self.params.gas_limit),
            gas_price: Some(self.params.gas_price),
            value: Some(self.value),
            data: Some(self.payload.clone()),
            nonce: Some(self.params.nonce),
            chain_id: Some(self.params.chain_id),
        }
    }

    pub fn typed(&self) -> TypedTransaction {
        TypedTransaction::Legacy(self.request())
    }

    /// Bytes a device hashes and signs. With replay protection preset the
    /// encoding carries `chainId, 0, 0`; otherwise only the six base fields.
    pub fn signing_payload(&self) -> Bytes {
        let request = self.request();
        match self.params.replay_protection {
            Some(_) => request.rlp(),
            None => request.rlp_unsigned(),
        }
    }
}

pub fn hexify(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Minimal 0x-prefixed hex of an integer, `0x0` for zero
pub fn to_hex(value: U256) -> String {
    format!("{:#x}", value)
}
