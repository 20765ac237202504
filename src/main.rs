//! quota-guard daemon
//!
//! Hosts the resilience control plane (credential pool, per-scope rate
//! limiters and circuit breakers, result cache) and exposes its state over
//! the admin endpoint.
//!
//! ```text
//!   caller ──▶ cache ──▶ rate limiter ──▶ credential pool ──▶ breaker ──▶ downstream
//!                                                │                 │
//!                                  rotate / revoke ◀──── classified failure
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use quota_guard::config::{load_config, GuardConfig};
use quota_guard::lifecycle::startup;
use quota_guard::observability::logging;

#[derive(Parser)]
#[command(name = "quota-guard", version)]
#[command(about = "Credential rotation, rate limiting and circuit breaking for quota-limited APIs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control plane until SIGINT/SIGTERM
    Serve {
        #[arg(short, long, default_value = "quota-guard.toml")]
        config: PathBuf,
    },
    /// Validate a config file and print a summary
    Check {
        #[arg(short, long, default_value = "quota-guard.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { config } => {
            let config = load_config(&config)?;
            logging::init(&config.observability);

            tracing::info!("quota-guard v{} starting", env!("CARGO_PKG_VERSION"));
            tracing::info!(
                credentials = config.credentials.keys.len(),
                failure_threshold = config.circuit_breaker.failure_threshold,
                breaker_timeout_secs = config.circuit_breaker.timeout_secs,
                cache_enabled = config.cache.enabled,
                admin_enabled = config.admin.enabled,
                "Configuration loaded"
            );

            startup::run(config).await?;
        }
        Commands::Check { config } => {
            let config = load_config(&config)?;
            print_summary(&config);
        }
    }

    Ok(())
}

fn print_summary(config: &GuardConfig) {
    let limit = |v: Option<u32>| match v.filter(|l| *l > 0) {
        Some(l) => l.to_string(),
        None => "-".to_string(),
    };

    println!("Configuration OK");
    println!("  credentials:      {}", config.credentials.keys.len());
    println!(
        "  rate limit:       {}/min {}/hour {}/day (acquire timeout {}s)",
        limit(config.rate_limit.requests_per_minute),
        limit(config.rate_limit.requests_per_hour),
        limit(config.rate_limit.requests_per_day),
        config.rate_limit.acquire_timeout_secs,
    );
    for scope in config.rate_limit.scopes.keys() {
        let tiers = config.rate_limit.tiers_for(scope);
        println!(
            "    scope {:<12}  {}/min {}/hour {}/day",
            scope,
            limit(tiers.requests_per_minute),
            limit(tiers.requests_per_hour),
            limit(tiers.requests_per_day),
        );
    }
    println!(
        "  circuit breaker:  threshold {}, timeout {}s, {} half-open probes",
        config.circuit_breaker.failure_threshold,
        config.circuit_breaker.timeout_secs,
        config.circuit_breaker.half_open_max_calls,
    );
    if config.cache.enabled {
        println!(
            "  cache:            ttl {}s, max {} entries",
            config.cache.ttl_secs, config.cache.max_size
        );
    } else {
        println!("  cache:            disabled");
    }
    println!("  retries:          {} attempts", config.retries.max_attempts);
    println!(
        "  admin:            {}",
        if config.admin.enabled { config.admin.bind_address.as_str() } else { "disabled" }
    );
}
