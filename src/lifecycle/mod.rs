//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → node clients → adapters → AdapterRegistry
//!
//! Shutdown (shutdown.rs):
//!     Signal received → cancel token → monitor loop exits → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then nodes, then adapters
//! - A node that is down at startup is logged, not fatal; calls fail later
//!   with `NetworkUnavailable`

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
pub use startup::build_registry;
