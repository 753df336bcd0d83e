//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! adapters, key manager, tracker produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (plain or JSON lines)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Key material never appears in events or labels
//! - Metric updates go through the `metrics` facade and are no-ops until an
//!   exporter is installed

pub mod logging;
pub mod metrics;
