//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! settlement layer. All types derive Serde traits for deserialization from
//! config files; every section has defaults so minimal files work.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::blockchain::fee::SizeModel;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SettlementConfig {
    /// Unspent-output ledger (Bitcoin).
    pub bitcoin: UtxoLedgerConfig,

    /// Account-balance ledger (Ethereum).
    pub ethereum: AccountLedgerConfig,

    /// Confirmation tracking.
    pub tracker: TrackerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Which network a ledger adapter talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    #[default]
    Main,
    Test,
    Signet,
    Regtest,
}

impl NetworkMode {
    pub fn is_main(&self) -> bool {
        matches!(self, Self::Main)
    }
}

impl std::fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Main => write!(f, "main"),
            Self::Test => write!(f, "test"),
            Self::Signet => write!(f, "signet"),
            Self::Regtest => write!(f, "regtest"),
        }
    }
}

/// Unspent-output ledger configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UtxoLedgerConfig {
    /// Register this ledger at startup.
    pub enabled: bool,

    /// Currency code used for registry lookup.
    pub currency: String,

    /// Display name.
    pub name: String,

    /// Network mode (selects address HRP and default explorer).
    pub network: NetworkMode,

    /// bitcoind JSON-RPC endpoint.
    pub rpc_url: String,

    /// Failover JSON-RPC endpoints, tried in order.
    pub failover_urls: Vec<String>,

    /// RPC basic-auth user.
    pub rpc_user: Option<String>,

    /// RPC basic-auth password.
    pub rpc_password: Option<String>,

    /// Per-call RPC timeout in seconds.
    pub rpc_timeout_secs: u64,

    /// Explorer base URL; defaults per public network when unset.
    pub explorer_url: Option<String>,

    /// Confirmations at which a transaction is final.
    pub finality_confirmations: u64,

    /// Smallest output (satoshi) worth creating; smaller change goes to fee.
    pub dust_threshold: u64,

    /// Confirmations an unspent output needs before it is selected.
    pub min_input_confirmations: u64,

    /// Target blocks passed to `estimatesmartfee`.
    pub fee_conf_target: u16,

    /// Fee rate (sat/vB) when the node has no estimate.
    pub fallback_fee_rate: u64,

    /// Fee rate ceiling (sat/vB).
    pub max_fee_rate: u64,

    /// How long broadcast inputs stay reserved while the node still lists them.
    pub reservation_ttl_secs: u64,

    /// How long an idempotency key keeps replaying its recorded transaction.
    pub idempotency_retention_secs: u64,

    /// Earliest block time (seconds since epoch) an imported key can have
    /// received funds at. The node rescans from here on import; 0 rescans
    /// the whole chain.
    pub rescan_birthday: u64,

    /// Timeout for the import call that triggers a rescan.
    pub import_timeout_secs: u64,

    /// Transaction size model in virtual bytes.
    pub overhead_vbytes: u64,
    pub input_vbytes: u64,
    pub output_vbytes: u64,
}

impl UtxoLedgerConfig {
    pub fn size_model(&self) -> SizeModel {
        SizeModel {
            overhead_vbytes: self.overhead_vbytes,
            input_vbytes: self.input_vbytes,
            output_vbytes: self.output_vbytes,
        }
    }

    /// Explorer base URL, `None` for a local network without one configured.
    pub fn explorer_base(&self) -> Option<String> {
        if let Some(url) = &self.explorer_url {
            return Some(url.clone());
        }
        match self.network {
            NetworkMode::Main => Some("https://blockstream.info/tx/".to_string()),
            NetworkMode::Test => Some("https://blockstream.info/testnet/tx/".to_string()),
            NetworkMode::Signet => Some("https://mempool.space/signet/tx/".to_string()),
            NetworkMode::Regtest => None,
        }
    }
}

impl Default for UtxoLedgerConfig {
    fn default() -> Self {
        let size = SizeModel::P2WPKH;
        Self {
            enabled: false,
            currency: "BTC".to_string(),
            name: "Bitcoin".to_string(),
            network: NetworkMode::Main,
            rpc_url: "http://localhost:8332".to_string(),
            failover_urls: Vec::new(),
            rpc_user: None,
            rpc_password: None,
            rpc_timeout_secs: 10,
            explorer_url: None,
            finality_confirmations: 6,
            dust_threshold: 546,
            min_input_confirmations: 1,
            fee_conf_target: 6,
            fallback_fee_rate: 2,
            max_fee_rate: 500,
            reservation_ttl_secs: 3600,
            idempotency_retention_secs: 86_400,
            rescan_birthday: 0,
            import_timeout_secs: 3_600,
            overhead_vbytes: size.overhead_vbytes,
            input_vbytes: size.input_vbytes,
            output_vbytes: size.output_vbytes,
        }
    }
}

/// Account-balance ledger configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AccountLedgerConfig {
    /// Register this ledger at startup.
    pub enabled: bool,

    pub currency: String,

    pub name: String,

    pub network: NetworkMode,

    /// JSON-RPC endpoint URL.
    pub rpc_url: String,

    /// Failover JSON-RPC endpoint URLs.
    pub failover_urls: Vec<String>,

    /// Chain ID (e.g., 1 for mainnet, 11155111 for Sepolia, 31337 for Anvil).
    pub chain_id: u64,

    /// RPC request timeout in seconds.
    pub rpc_timeout_secs: u64,

    /// Explorer base URL; defaults per public network when unset.
    pub explorer_url: Option<String>,

    /// Block confirmations required for finality.
    pub finality_confirmations: u64,

    /// Gas limit for a plain value transfer.
    pub transfer_gas_limit: u64,

    /// Gas price multiplier (1.0 = node estimate, 1.2 = 20% buffer).
    pub gas_price_multiplier: Decimal,

    /// Maximum gas price in gwei (protection against spikes).
    pub max_gas_price_gwei: u64,

    /// How long an idempotency key keeps replaying its recorded transaction.
    pub idempotency_retention_secs: u64,

    /// Blocks read per incoming-payment scan of one watched address.
    pub incoming_scan_max_blocks: u64,
}

impl AccountLedgerConfig {
    /// Explorer base URL, `None` for a local network without one configured.
    pub fn explorer_base(&self) -> Option<String> {
        if let Some(url) = &self.explorer_url {
            return Some(url.clone());
        }
        match self.network {
            NetworkMode::Main => Some("https://etherscan.io/tx/".to_string()),
            NetworkMode::Test => Some("https://sepolia.etherscan.io/tx/".to_string()),
            NetworkMode::Signet | NetworkMode::Regtest => None,
        }
    }

    /// Gas price ceiling in wei.
    pub fn max_gas_price_wei(&self) -> u128 {
        (self.max_gas_price_gwei as u128).saturating_mul(1_000_000_000)
    }
}

impl Default for AccountLedgerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            currency: "ETH".to_string(),
            name: "Ethereum".to_string(),
            network: NetworkMode::Main,
            rpc_url: "http://localhost:8545".to_string(),
            failover_urls: Vec::new(),
            chain_id: 1,
            rpc_timeout_secs: 10,
            explorer_url: None,
            finality_confirmations: 12,
            transfer_gas_limit: 21_000,
            gas_price_multiplier: Decimal::new(12, 1),
            max_gas_price_gwei: 500,
            idempotency_retention_secs: 86_400,
            incoming_scan_max_blocks: 100,
        }
    }
}

/// Confirmation tracker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Delay between polls of a pending transaction.
    pub poll_interval_ms: u64,

    /// A transaction not included within this window times out.
    pub inclusion_timeout_secs: u64,

    /// Base delay for exponential backoff on node errors.
    pub backoff_base_ms: u64,

    /// Maximum backoff delay.
    pub backoff_max_ms: u64,

    /// How long finished entries stay queryable in the monitor loop.
    pub terminal_retention_secs: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 10_000,
            inclusion_timeout_secs: 3_600,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            terminal_retention_secs: 300,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable ones.
    pub json_logs: bool,

    /// Enable the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml() {
        let config: SettlementConfig = toml::from_str(
            r#"
            [bitcoin]
            enabled = true
            network = "regtest"
            dust_threshold = 1000

            [ethereum]
            chain_id = 31337
            gas_price_multiplier = "1.5"
            "#,
        )
        .unwrap();

        assert!(config.bitcoin.enabled);
        assert_eq!(config.bitcoin.network, NetworkMode::Regtest);
        assert_eq!(config.bitcoin.dust_threshold, 1000);
        assert_eq!(config.bitcoin.input_vbytes, 68);
        assert_eq!(config.ethereum.chain_id, 31337);
        assert_eq!(config.ethereum.gas_price_multiplier, Decimal::new(15, 1));
        assert_eq!(config.tracker.poll_interval_ms, 10_000);
    }

    #[test]
    fn test_default_explorers() {
        let mut btc = UtxoLedgerConfig::default();
        assert_eq!(btc.explorer_base().as_deref(), Some("https://blockstream.info/tx/"));
        btc.network = NetworkMode::Test;
        assert_eq!(
            btc.explorer_base().as_deref(),
            Some("https://blockstream.info/testnet/tx/")
        );

        let mut eth = AccountLedgerConfig::default();
        assert_eq!(eth.explorer_base().as_deref(), Some("https://etherscan.io/tx/"));
        eth.network = NetworkMode::Test;
        assert_eq!(
            eth.explorer_base().as_deref(),
            Some("https://sepolia.etherscan.io/tx/")
        );
        eth.explorer_url = Some("http://localhost/tx/".to_string());
        assert_eq!(eth.explorer_base().as_deref(), Some("http://localhost/tx/"));
    }

    #[test]
    fn test_signet_and_regtest_explorers() {
        let mut btc = UtxoLedgerConfig {
            network: NetworkMode::Signet,
            ..UtxoLedgerConfig::default()
        };
        assert_eq!(
            btc.explorer_base().as_deref(),
            Some("https://mempool.space/signet/tx/")
        );

        btc.network = NetworkMode::Regtest;
        assert_eq!(btc.explorer_base(), None);
        btc.explorer_url = Some("http://localhost:3002/tx/".to_string());
        assert_eq!(btc.explorer_base().as_deref(), Some("http://localhost:3002/tx/"));

        let eth = AccountLedgerConfig {
            network: NetworkMode::Regtest,
            ..AccountLedgerConfig::default()
        };
        assert_eq!(eth.explorer_base(), None);
    }

    #[test]
    fn test_gas_ceiling_in_wei() {
        let eth = AccountLedgerConfig::default();
        assert_eq!(eth.max_gas_price_wei(), 500_000_000_000);
    }
}
