//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! settlement.toml
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → SettlementConfig (validated, immutable)
//!     → lifecycle::startup builds nodes and adapters from it
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded
//! - All fields have defaults to allow minimal configs
//! - Finality, dust and inclusion timeout are explicit settings, never
//!   hard-coded in the adapters

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AccountLedgerConfig, NetworkMode, ObservabilityConfig, SettlementConfig, TrackerConfig,
    UtxoLedgerConfig,
};
