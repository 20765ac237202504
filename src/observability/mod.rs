//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! credentials / resilience / cache / guard produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters and gauges)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Prometheus scrape endpoint
//! ```
//!
//! # Design Decisions
//! - Secrets never reach either sink; credentials are logged as previews
//! - Metric helpers are no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
