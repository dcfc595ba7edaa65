//! HTTP client for the gas tank funding relay

use crate::config::TankConfig;
use crate::error::{BridgeError, BridgeResult};

use async_trait::async_trait;
use ethers::types::H256;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Relay answer to a funding request
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingResponse {
    pub success: bool,
    pub tx_hash: Option<H256>,
    pub payload: Option<FundingErrorPayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FundingErrorPayload {
    pub error: String,
}

impl FundingResponse {
    pub fn error_message(&self) -> String {
        self.payload
            .as_ref()
            .map(|p| p.error.clone())
            .unwrap_or_else(|| "no reason given".to_string())
    }
}

/// The two relay endpoints the funding coordinator uses
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FundingRelay: Send + Sync {
    /// Funded transactions left for a point
    async fn remaining_transactions(&self, point: u32) -> BridgeResult<u64>;

    /// Ask the relay to fund the sender of these raw signed transactions
    async fn fund_transactions(&self, signed_txs: Vec<String>) -> BridgeResult<FundingResponse>;
}

#[derive(Serialize)]
struct PointRequest {
    point: u32,
}

#[derive(Serialize)]
struct FundRequest {
    txs: Vec<String>,
}

pub struct TankClient {
    base_url: String,
    http: reqwest::Client,
}

impl TankClient {
    pub fn new(config: &TankConfig) -> BridgeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| BridgeError::Config(format!("Failed to build tank client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> BridgeResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("tank: POST {}", url);

        let response = self
            .http
            .post(&url)
            .header(reqwest::header::CACHE_CONTROL, "no-cache")
            .json(body)
            .send()
            .await
            .map_err(|e| BridgeError::TankUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::TankUnavailable(format!(
                "{} returned {}",
                path, status
            )));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| BridgeError::TankUnavailable(format!("bad response from {}: {}", path, e)))
    }
}

#[async_trait]
impl FundingRelay for TankClient {
    async fn remaining_transactions(&self, point: u32) -> BridgeResult<u64> {
        self.post("/point", &PointRequest { point }).await
    }

    async fn fund_transactions(&self, signed_txs: Vec<String>) -> BridgeResult<FundingResponse> {
        self.post("/request", &FundRequest { txs: signed_txs }).await
    }
}
