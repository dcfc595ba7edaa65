//! Transaction intents handed to the engine by feature-specific builders

use crate::chain::TxnInfo;
use crate::error::{BridgeError, BridgeResult};

use ethers::types::{Address, Bytes, U256};
use serde::Deserialize;
use std::str::FromStr;

/// A fully parameterized transaction. Immutable once handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionIntent {
    /// `None` for contract creation
    pub recipient: Option<Address>,
    pub value: U256,
    pub payload: Bytes,
    pub gas_limit: u64,
    pub gas_price_gwei: u64,
    pub nonce: u64,
    pub chain_id: u64,
}

/// Intent as read from JSON. Numbers are decimal or 0x-prefixed hex strings;
/// nonce, chain id and gas price fall back to values read from the node.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentTemplate {
    pub to: Option<String>,
    pub value: Option<String>,
    pub data: Option<String>,
    pub gas_limit: String,
    pub gas_price: Option<String>,
    pub nonce: Option<String>,
    pub chain_id: Option<String>,
}

impl IntentTemplate {
    pub fn resolve(&self, info: Option<&TxnInfo>) -> BridgeResult<TransactionIntent> {
        let recipient = match self.to.as_deref() {
            Some(to) if !to.is_empty() => Some(
                Address::from_str(to).map_err(|e| BridgeError::invalid("to", e.to_string()))?,
            ),
            _ => None,
        };

        let value = match self.value.as_deref() {
            Some(value) => parse_quantity("value", value)?,
            None => U256::zero(),
        };

        let payload = match self.data.as_deref() {
            Some(data) => {
                let bytes = hex::decode(data.trim_start_matches("0x"))
                    .map_err(|e| BridgeError::invalid("data", e.to_string()))?;
                Bytes::from(bytes)
            }
            None => Bytes::new(),
        };

        Ok(TransactionIntent {
            recipient,
            value,
            payload,
            gas_limit: parse_u64("gasLimit", &self.gas_limit)?,
            gas_price_gwei: pick("gasPrice", self.gas_price.as_deref(), info.map(|i| i.gas_price_gwei))?,
            nonce: pick("nonce", self.nonce.as_deref(), info.map(|i| i.nonce))?,
            chain_id: pick("chainId", self.chain_id.as_deref(), info.map(|i| i.chain_id))?,
        })
    }
}

fn pick(field: &str, given: Option<&str>, fallback: Option<u64>) -> BridgeResult<u64> {
    match (given, fallback) {
        (Some(raw), _) => parse_u64(field, raw),
        (None, Some(value)) => Ok(value),
        (None, None) => Err(BridgeError::invalid(field, "missing and no node defaults")),
    }
}

/// Parse a decimal or 0x-prefixed hex integer
pub fn parse_quantity(field: &str, raw: &str) -> BridgeResult<U256> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(BridgeError::invalid(field, "empty value"));
    }

    let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) if !hex.is_empty() => U256::from_str_radix(hex, 16).ok(),
        Some(_) => None,
        None => U256::from_dec_str(raw).ok(),
    };

    parsed.ok_or_else(|| BridgeError::invalid(field, format!("not an integer: {:?}", raw)))
}

pub fn parse_u64(field: &str, raw: &str) -> BridgeResult<u64> {
    let value = parse_quantity(field, raw)?;
    if value > U256::from(u64::MAX) {
        return Err(BridgeError::invalid(field, "out of range"));
    }
    Ok(value.as_u64())
}
