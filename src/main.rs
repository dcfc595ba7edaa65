//! bridge-tx - sign, fund, broadcast and confirm one transaction
//!
//! Usage: `bridge-tx <intent.json> [point]`

use anyhow::{bail, Context, Result};
use bridge_tx::chain::{fetch_txn_info, ChainProvider};
use bridge_tx::config::Settings;
use bridge_tx::metrics::MetricsServer;
use bridge_tx::tank::FundingPrompt;
use bridge_tx::tx::{
    ConfirmationCallback, IntentTemplate, LocalKeySigner, SignerKind, TransactionSigner,
};
use bridge_tx::TransactionEngine;

use ethers::types::{Address, H256, U256};
use ethers::utils::format_ether;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Asks for funds on the console log
struct ConsolePrompt;

impl FundingPrompt for ConsolePrompt {
    fn ask_for_funding(&self, address: Address, required: &str, current: U256) {
        let required = U256::from_dec_str(required).unwrap_or_default();
        warn!(
            "Please send at least {} ETH to {:?} (currently {} ETH)",
            format_ether(required.saturating_sub(current)),
            address,
            format_ether(current)
        );
    }

    fn got_funding(&self) {
        info!("Funds received, continuing");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("Starting bridge-tx v{}", env!("CARGO_PKG_VERSION"));

    let mut args = std::env::args().skip(1);
    let intent_path = args
        .next()
        .context("usage: bridge-tx <intent.json> [point]")?;
    let point = args
        .next()
        .map(|p| p.parse::<u32>())
        .transpose()
        .context("point must be a number")?;

    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {:?} ({} RPC urls)",
        settings.node.network,
        settings.node.rpc_urls.len()
    );

    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    if settings.wallet.signer != SignerKind::LocalKey {
        bail!(
            "{} signing needs a device transport; use a local key from the command line",
            settings.wallet.signer.name()
        );
    }
    let key_env = settings
        .wallet
        .private_key_env
        .as_deref()
        .context("wallet.private_key_env is not set")?;
    let key = std::env::var(key_env).with_context(|| format!("{} is not set", key_env))?;
    let signer = Arc::new(LocalKeySigner::from_private_key(&key)?);
    info!("Signing as {:?}", signer.address());

    let template: IntentTemplate = serde_json::from_str(
        &std::fs::read_to_string(&intent_path)
            .with_context(|| format!("Failed to read intent file: {}", intent_path))?,
    )
    .context("Invalid intent JSON")?;

    let provider = Arc::new(ChainProvider::new(&settings.node)?);
    if !provider.health_check().await {
        warn!("Node health check failed, continuing with failover");
    }
    let info = fetch_txn_info(provider.as_ref(), signer.address()).await?;
    let intent = template.resolve(Some(&info))?;

    let engine = TransactionEngine::from_settings(&settings, provider, signer)?;
    let stx = engine.sign(&intent).await?;
    println!("{}", serde_json::to_string_pretty(&stx.render())?);

    let on_confirmation: ConfirmationCallback = Arc::new(|hash: H256, count: u64| {
        info!("{:?}: {} confirmations", hash, count);
    });
    let outcome = engine
        .execute_signed(&stx, point, &ConsolePrompt, Some(on_confirmation))
        .await?;

    println!(
        "{:?} {} (gas tank: {})",
        outcome.hash,
        if outcome.success { "succeeded" } else { "reverted" },
        outcome.used_tank
    );

    if let Some(h) = metrics_handle {
        h.abort();
    }

    if !outcome.success {
        bail!("transaction {:?} reverted", outcome.hash);
    }
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bridge_tx=debug,hyper=warn,reqwest=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}
