//! Operator CLI for the settlement layer.
//!
//! Every command loads the TOML config, builds the adapter registry and runs
//! one operation against the selected ledger.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chain_settlement::config::load_config;
use chain_settlement::lifecycle::{build_registry, wait_for_signal, Shutdown};
use chain_settlement::observability::{logging, metrics};
use chain_settlement::{
    AdapterRegistry, ConfirmationTracker, KeyManager, LedgerAddress, TransferRequest, TxId,
};

/// Environment variable holding the key used by `send`.
const SIGNING_KEY_ENV_VAR: &str = "SETTLEMENT_SIGNING_KEY";

#[derive(Parser)]
#[command(name = "settlement-cli")]
#[command(about = "Address issuance, payouts and confirmation tracking", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "settlement.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Issue a fresh receiving address and print its exported key
    NewAddress {
        #[arg(short, long)]
        currency: String,
    },
    /// Check an address's format and checksum (offline)
    Validate {
        #[arg(short, long)]
        currency: String,
        address: String,
    },
    /// Show an address's balance
    Balance {
        #[arg(short, long)]
        currency: String,
        address: String,
    },
    /// Quote the fee for a prospective transfer
    Fee {
        #[arg(short, long)]
        currency: String,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        /// Amount in whole units, e.g. 0.0015
        amount: String,
    },
    /// Sign and broadcast a transfer
    Send {
        #[arg(short, long)]
        currency: String,
        #[arg(long)]
        to: String,
        /// Amount in whole units, e.g. 0.0015
        amount: String,
        /// Ledger-native signing key; defaults to $SETTLEMENT_SIGNING_KEY
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        idempotency_key: Option<String>,
    },
    /// Show a transaction
    Tx {
        #[arg(short, long)]
        currency: String,
        id: String,
    },
    /// Show a transaction's confirmation count
    Confirmations {
        #[arg(short, long)]
        currency: String,
        id: String,
    },
    /// Wait until a transaction is final
    Watch {
        #[arg(short, long)]
        currency: String,
        id: String,
        #[arg(long, default_value_t = 3600)]
        timeout_secs: u64,
    },
    /// Scan an address for incoming payments and print what was found
    Incoming {
        #[arg(short, long)]
        currency: String,
        address: String,
        /// First block to scan; defaults to the current tip
        #[arg(long)]
        from_height: Option<u64>,
    },
    /// List configured currencies and node health
    Currencies,
    /// Print the explorer link for a transaction
    Explorer {
        #[arg(short, long)]
        currency: String,
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    logging::init(&config.observability.log_level, config.observability.json_logs);
    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let registry = Arc::new(build_registry(&config, KeyManager::in_memory()).await?);

    match cli.command {
        Commands::NewAddress { currency } => {
            let adapter = registry.get(&currency)?;
            let address = adapter.generate_address().await?;
            // The in-memory key store ends with this process.
            let key = adapter.export_key(&address).await?;
            println!("address: {}", address);
            println!("key:     {}", key);
        }
        Commands::Validate { currency, address } => {
            let adapter = registry.get(&currency)?;
            let valid = adapter.validate_address(&address);
            println!("{}", if valid { "valid" } else { "invalid" });
            if !valid {
                std::process::exit(1);
            }
        }
        Commands::Balance { currency, address } => {
            let adapter = registry.get(&currency)?;
            let balance = adapter.get_balance(&LedgerAddress::new(address)).await?;
            println!("{} {}", adapter.units().format(balance), adapter.currency());
        }
        Commands::Fee {
            currency,
            from,
            to,
            amount,
        } => {
            let adapter = registry.get(&currency)?;
            let amount = adapter.units().parse(&amount)?;
            let quote = adapter
                .estimate_fee(&LedgerAddress::new(from), &LedgerAddress::new(to), amount)
                .await?;
            println!("fee: {} {}", adapter.units().format(quote.fee), quote.currency);
            println!("{}", serde_json::to_string_pretty(&quote)?);
        }
        Commands::Send {
            currency,
            to,
            amount,
            key,
            idempotency_key,
        } => {
            let adapter = registry.get(&currency)?;
            let encoded = match key {
                Some(key) => key,
                None => std::env::var(SIGNING_KEY_ENV_VAR).map_err(|_| {
                    format!("pass --key or set {}", SIGNING_KEY_ENV_VAR)
                })?,
            };
            let from = adapter.import_key(&encoded).await?;
            let amount = adapter.units().parse(&amount)?;

            let mut request = TransferRequest::new(from, LedgerAddress::new(to), amount);
            if let Some(idempotency_key) = idempotency_key {
                request = request.with_idempotency_key(idempotency_key);
            }
            let tx_id = adapter.send(&request).await?;
            println!("{}", tx_id);
            println!("{}", adapter.explorer_url(&tx_id));
        }
        Commands::Tx { currency, id } => {
            let adapter = registry.get(&currency)?;
            let tx = adapter.get_transaction(&TxId::new(id)).await?;
            println!("{}", serde_json::to_string_pretty(&tx)?);
        }
        Commands::Confirmations { currency, id } => {
            let adapter = registry.get(&currency)?;
            let confirmations = adapter.get_confirmations(&TxId::new(id)).await?;
            println!("{}/{}", confirmations, adapter.finality_threshold());
        }
        Commands::Watch {
            currency,
            id,
            timeout_secs,
        } => watch(registry, &config.tracker, &currency, TxId::new(id), timeout_secs).await?,
        Commands::Incoming {
            currency,
            address,
            from_height,
        } => {
            let tracker = ConfirmationTracker::new(registry.clone(), config.tracker.clone());
            let address = LedgerAddress::new(address);
            match from_height {
                Some(height) => tracker.watch_address_from(&currency, &address, height)?,
                None => tracker.watch_address(&currency, &address)?,
            };
            let status = tracker.poll_address(&currency, &address).await?;
            let adapter = registry.get(&currency)?;
            println!(
                "settled: {} {}  pending: {} {}",
                adapter.units().format(status.settled_amount()),
                adapter.currency(),
                adapter.units().format(status.pending_amount()),
                adapter.currency()
            );
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        Commands::Currencies => {
            for currency in registry.supported_currencies() {
                let adapter = registry.get(&currency)?;
                let health = if adapter.is_healthy().await { "up" } else { "down" };
                println!("{:<6} {:<12} node {}", currency, adapter.name(), health);
            }
        }
        Commands::Explorer { currency, id } => {
            let adapter = registry.get(&currency)?;
            println!("{}", adapter.explorer_url(&TxId::new(id)));
        }
    }

    Ok(())
}

async fn watch(
    registry: Arc<AdapterRegistry>,
    tracker_config: &chain_settlement::config::TrackerConfig,
    currency: &str,
    tx_id: TxId,
    timeout_secs: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let tracker = ConfirmationTracker::new(registry, tracker_config.clone());
    let shutdown = Shutdown::new();
    let token = shutdown.subscribe();

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        signal_shutdown.trigger();
    });

    let status = tracker
        .wait(currency, &tx_id, Duration::from_secs(timeout_secs), Some(&token))
        .await?;
    println!(
        "{} {} ({}/{} confirmations)",
        status.tx_id, status.state, status.confirmations, status.finality
    );
    Ok(())
}
