//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, finality ≥ 1, multiplier ≥ 1)
//! - Check that endpoint URLs parse
//!
//! Returns every problem found, not just the first.

use rust_decimal::Decimal;

use crate::config::schema::{
    AccountLedgerConfig, NetworkMode, SettlementConfig, TrackerConfig, UtxoLedgerConfig,
};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &SettlementConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.bitcoin.enabled {
        validate_utxo(&config.bitcoin, &mut errors);
    }
    if config.ethereum.enabled {
        validate_account(&config.ethereum, &mut errors);
    }
    if config.bitcoin.enabled
        && config.ethereum.enabled
        && config.bitcoin.currency.eq_ignore_ascii_case(&config.ethereum.currency)
    {
        errors.push(ValidationError::new(
            "ethereum.currency",
            "duplicates bitcoin.currency",
        ));
    }
    validate_tracker(&config.tracker, &mut errors);

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_urls(section: &str, primary: &str, failover: &[String], errors: &mut Vec<ValidationError>) {
    if url::Url::parse(primary).is_err() {
        errors.push(ValidationError::new(
            format!("{}.rpc_url", section),
            format!("'{}' is not a valid URL", primary),
        ));
    }
    for (i, candidate) in failover.iter().enumerate() {
        if url::Url::parse(candidate).is_err() {
            errors.push(ValidationError::new(
                format!("{}.failover_urls[{}]", section, i),
                format!("'{}' is not a valid URL", candidate),
            ));
        }
    }
}

fn check_currency(section: &str, currency: &str, errors: &mut Vec<ValidationError>) {
    if currency.trim().is_empty() {
        errors.push(ValidationError::new(
            format!("{}.currency", section),
            "must not be empty",
        ));
    }
}

fn validate_utxo(cfg: &UtxoLedgerConfig, errors: &mut Vec<ValidationError>) {
    check_currency("bitcoin", &cfg.currency, errors);
    check_urls("bitcoin", &cfg.rpc_url, &cfg.failover_urls, errors);

    if cfg.rpc_timeout_secs == 0 {
        errors.push(ValidationError::new("bitcoin.rpc_timeout_secs", "must be > 0"));
    }
    if cfg.finality_confirmations == 0 {
        errors.push(ValidationError::new("bitcoin.finality_confirmations", "must be >= 1"));
    }
    if cfg.fee_conf_target == 0 {
        errors.push(ValidationError::new("bitcoin.fee_conf_target", "must be >= 1"));
    }
    if cfg.fallback_fee_rate == 0 {
        errors.push(ValidationError::new("bitcoin.fallback_fee_rate", "must be >= 1"));
    }
    if cfg.max_fee_rate < cfg.fallback_fee_rate {
        errors.push(ValidationError::new(
            "bitcoin.max_fee_rate",
            "must be >= fallback_fee_rate",
        ));
    }
    if cfg.idempotency_retention_secs == 0 {
        errors.push(ValidationError::new(
            "bitcoin.idempotency_retention_secs",
            "must be > 0",
        ));
    }
    if cfg.import_timeout_secs < cfg.rpc_timeout_secs {
        errors.push(ValidationError::new(
            "bitcoin.import_timeout_secs",
            "must be >= rpc_timeout_secs",
        ));
    }
    if cfg.overhead_vbytes == 0 || cfg.input_vbytes == 0 || cfg.output_vbytes == 0 {
        errors.push(ValidationError::new(
            "bitcoin.size_model",
            "overhead, input and output sizes must be > 0",
        ));
    }
}

fn validate_account(cfg: &AccountLedgerConfig, errors: &mut Vec<ValidationError>) {
    check_currency("ethereum", &cfg.currency, errors);
    check_urls("ethereum", &cfg.rpc_url, &cfg.failover_urls, errors);

    if cfg.rpc_timeout_secs == 0 {
        errors.push(ValidationError::new("ethereum.rpc_timeout_secs", "must be > 0"));
    }
    if cfg.finality_confirmations == 0 {
        errors.push(ValidationError::new("ethereum.finality_confirmations", "must be >= 1"));
    }
    if cfg.transfer_gas_limit < 21_000 {
        errors.push(ValidationError::new(
            "ethereum.transfer_gas_limit",
            "must be >= 21000",
        ));
    }
    if cfg.gas_price_multiplier < Decimal::ONE {
        errors.push(ValidationError::new(
            "ethereum.gas_price_multiplier",
            "must be >= 1",
        ));
    }
    if cfg.max_gas_price_gwei == 0 {
        errors.push(ValidationError::new("ethereum.max_gas_price_gwei", "must be > 0"));
    }
    if cfg.idempotency_retention_secs == 0 {
        errors.push(ValidationError::new(
            "ethereum.idempotency_retention_secs",
            "must be > 0",
        ));
    }
    if cfg.incoming_scan_max_blocks == 0 {
        errors.push(ValidationError::new(
            "ethereum.incoming_scan_max_blocks",
            "must be >= 1",
        ));
    }
    if cfg.network == NetworkMode::Signet {
        errors.push(ValidationError::new(
            "ethereum.network",
            "signet is not an account-ledger network",
        ));
    }
    if cfg.network == NetworkMode::Main && cfg.chain_id != 1 {
        errors.push(ValidationError::new(
            "ethereum.chain_id",
            format!("main network expects chain id 1, got {}", cfg.chain_id),
        ));
    }
}

fn validate_tracker(cfg: &TrackerConfig, errors: &mut Vec<ValidationError>) {
    if cfg.poll_interval_ms == 0 {
        errors.push(ValidationError::new("tracker.poll_interval_ms", "must be > 0"));
    }
    if cfg.inclusion_timeout_secs == 0 {
        errors.push(ValidationError::new("tracker.inclusion_timeout_secs", "must be > 0"));
    }
    if cfg.backoff_max_ms < cfg.backoff_base_ms {
        errors.push(ValidationError::new(
            "tracker.backoff_max_ms",
            "must be >= backoff_base_ms",
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        let mut config = SettlementConfig::default();
        config.bitcoin.enabled = true;
        config.ethereum.enabled = true;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = SettlementConfig::default();
        config.bitcoin.enabled = true;
        config.bitcoin.rpc_url = "not a url".to_string();
        config.bitcoin.finality_confirmations = 0;
        config.ethereum.enabled = true;
        config.ethereum.gas_price_multiplier = Decimal::new(9, 1);
        config.tracker.poll_interval_ms = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"bitcoin.rpc_url"));
        assert!(fields.contains(&"bitcoin.finality_confirmations"));
        assert!(fields.contains(&"ethereum.gas_price_multiplier"));
        assert!(fields.contains(&"tracker.poll_interval_ms"));
    }

    #[test]
    fn test_disabled_ledger_not_checked() {
        let mut config = SettlementConfig::default();
        config.bitcoin.rpc_url = "garbage".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_import_timeout_and_retention() {
        let mut config = SettlementConfig::default();
        config.bitcoin.enabled = true;
        config.bitcoin.import_timeout_secs = 5;
        config.bitcoin.idempotency_retention_secs = 0;
        config.ethereum.enabled = true;
        config.ethereum.incoming_scan_max_blocks = 0;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert!(fields.contains(&"bitcoin.import_timeout_secs"));
        assert!(fields.contains(&"bitcoin.idempotency_retention_secs"));
        assert!(fields.contains(&"ethereum.incoming_scan_max_blocks"));
    }

    #[test]
    fn test_mainnet_chain_id() {
        let mut config = SettlementConfig::default();
        config.ethereum.enabled = true;
        config.ethereum.chain_id = 5;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "ethereum.chain_id");
    }
}
