//! Configuration management for the transaction engine
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::chain::confirm::DEFAULT_POLL_INTERVAL_MS;
use crate::tx::{derivation_path, NetworkKind, SignerKind, LEDGER_LIVE_PATH, TREZOR_PATH};

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_TANK_URL: &str = "https://gas-tank.urbit.org:3001";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub node: NodeConfig,
    #[serde(default)]
    pub tank: TankConfig,
    pub wallet: WalletConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub rpc_urls: Vec<String>,
    pub network: NetworkKind,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_confirmation_blocks")]
    pub confirmation_blocks: u64,
}

impl NodeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TankConfig {
    pub enabled: bool,
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Default for TankConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: DEFAULT_TANK_URL.to_string(),
            timeout_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    pub signer: SignerKind,
    pub private_key_env: Option<String>,
    pub hd_path: Option<String>,
}

impl WalletConfig {
    /// Configured derivation path, or the account-0 default for the device
    pub fn derivation_path(&self) -> Option<String> {
        if let Some(path) = &self.hd_path {
            return Some(path.clone());
        }
        match self.signer {
            SignerKind::LocalKey => None,
            SignerKind::Ledger => Some(derivation_path(LEDGER_LIVE_PATH, 0)),
            SignerKind::Trezor => Some(derivation_path(TREZOR_PATH, 0)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9100,
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_confirmation_blocks() -> u64 {
    12
}

impl Settings {
    /// Load settings from the file named by `BRIDGE_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var("BRIDGE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    pub fn parse(config_str: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.node.rpc_urls.is_empty() {
            anyhow::bail!("No RPC URLs configured");
        }
        if self.node.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be positive");
        }
        if self.wallet.signer == SignerKind::LocalKey && self.wallet.private_key_env.is_none() {
            anyhow::bail!("Local key signer needs wallet.private_key_env");
        }
        if self.wallet.signer.is_hardware() && self.wallet.hd_path.is_none() {
            tracing::warn!(
                "No hd_path configured for {}, using {:?}",
                self.wallet.signer.name(),
                self.wallet.derivation_path()
            );
        }
        if self.tank.enabled && self.tank.base_url.is_empty() {
            anyhow::bail!("Tank is enabled but has no base_url");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
[node]
rpc_urls = ["http://localhost:8545"]
network = "ropsten"
poll_interval_ms = 250

[tank]
enabled = true
base_url = "${BRIDGE_TEST_TANK_URL}"
timeout_ms = 2000

[wallet]
signer = "local_key"
private_key_env = "BRIDGE_PRIVATE_KEY"
"#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_load_from_file() {
        env::set_var("BRIDGE_TEST_TANK_URL", "http://tank.local:3001");
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.node.network, NetworkKind::Ropsten);
        assert_eq!(settings.node.poll_interval(), Duration::from_millis(250));
        assert_eq!(settings.node.confirmation_blocks, 12);
        assert_eq!(settings.tank.base_url, "http://tank.local:3001");
        assert_eq!(settings.wallet.signer, SignerKind::LocalKey);
        assert!(!settings.metrics.enabled);
    }

    #[test]
    fn test_local_signer_requires_key_env() {
        let config = r#"
[node]
rpc_urls = ["http://localhost:8545"]
network = "mainnet"

[wallet]
signer = "local_key"
"#;
        assert!(Settings::parse(config).is_err());
    }

    #[test]
    fn test_defaults_apply() {
        let config = r#"
[node]
rpc_urls = ["http://localhost:8545"]
network = "offline"

[wallet]
signer = "ledger"
hd_path = "m/44'/60'/0'/0"
"#;
        let settings = Settings::parse(config).unwrap();
        assert_eq!(
            settings.wallet.derivation_path().as_deref(),
            Some("m/44'/60'/0'/0")
        );
        assert_eq!(settings.node.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(settings.tank.base_url, DEFAULT_TANK_URL);
        assert!(settings.wallet.signer.is_hardware());
    }

    #[test]
    fn test_hardware_path_defaults_per_device() {
        let wallet = |signer| WalletConfig {
            signer,
            private_key_env: None,
            hd_path: None,
        };
        assert_eq!(
            wallet(SignerKind::Trezor).derivation_path().as_deref(),
            Some("m/44'/60'/0'/0/0")
        );
        assert_eq!(
            wallet(SignerKind::Ledger).derivation_path().as_deref(),
            Some("m/44'/60'/0'/0/0")
        );
        assert_eq!(wallet(SignerKind::LocalKey).derivation_path(), None);
    }
}
