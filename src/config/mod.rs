//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) + numbered credential env entries
//!     → loader.rs (parse, deserialize, merge credentials)
//!     → validation.rs (semantic checks, all errors at once)
//!     → GuardConfig (validated, immutable)
//!     → ControlPlane::install builds the singletons from it
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; resilience state is never persisted
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::GuardConfig;
pub use schema::{
    AdminConfig, CacheConfig, CircuitBreakerSettings, CredentialsConfig, LogFormat,
    MaintenanceConfig, ObservabilityConfig, RateLimitConfig, RetryConfig, TierConfig,
};
pub use validation::{validate_config, ValidationError};
