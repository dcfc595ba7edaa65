//! Prometheus metrics for the transaction lifecycle
//!
//! Exposes metrics for:
//! - Signing by signer kind
//! - Broadcast and confirmation outcomes
//! - Gas tank funding

use crate::error::{BridgeError, BridgeResult};
use crate::tx::SignerKind;

use axum::{routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_int_counter, CounterVec, Encoder, IntCounter, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    pub static ref TX_SIGNED: CounterVec = register_counter_vec!(
        "bridge_tx_signed_total",
        "Total transactions signed",
        &["signer"]
    ).unwrap();

    pub static ref TX_SUBMITTED: IntCounter = register_int_counter!(
        "bridge_tx_submitted_total",
        "Total transactions acknowledged by the node"
    ).unwrap();

    pub static ref TX_CONFIRMED: CounterVec = register_counter_vec!(
        "bridge_tx_confirmed_total",
        "Total receipts observed by status",
        &["status"]
    ).unwrap();

    pub static ref NONCE_COLLISIONS: IntCounter = register_int_counter!(
        "bridge_tx_nonce_collisions_recovered_total",
        "Submission errors treated as already submitted"
    ).unwrap();

    pub static ref TANK_REQUESTS: CounterVec = register_counter_vec!(
        "bridge_tx_tank_requests_total",
        "Gas tank funding attempts by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref MANUAL_FUNDING_WAITS: IntCounter = register_int_counter!(
        "bridge_tx_manual_funding_waits_total",
        "Times the operator was asked to fund an address"
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> BridgeResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| BridgeError::Config(format!("metrics bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| BridgeError::Internal(format!("metrics server: {}", e)))
    }
}

async fn metrics_handler() -> String {
    render()
}

/// Text exposition of every registered metric
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&prometheus::gather(), &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

pub fn record_tx_signed(kind: SignerKind) {
    TX_SIGNED.with_label_values(&[kind.name()]).inc();
}

pub fn record_tx_submitted() {
    TX_SUBMITTED.inc();
}

pub fn record_tx_confirmed(success: bool) {
    let status = if success { "success" } else { "reverted" };
    TX_CONFIRMED.with_label_values(&[status]).inc();
}

pub fn record_nonce_collision_recovered() {
    NONCE_COLLISIONS.inc();
}

pub fn record_tank_funded() {
    TANK_REQUESTS.with_label_values(&["funded"]).inc();
}

pub fn record_tank_request(err: &BridgeError) {
    let outcome = match err {
        BridgeError::TankRequestInvalid { .. } => "no_allowance",
        BridgeError::TankRequestRejected(_) => "rejected",
        BridgeError::TankUnavailable(_) => "unavailable",
        _ => "error",
    };
    TANK_REQUESTS.with_label_values(&[outcome]).inc();
}

pub fn record_manual_funding_wait() {
    MANUAL_FUNDING_WAITS.inc();
}
