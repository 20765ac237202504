use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::Value;

#[derive(Parser)]
#[command(name = "guard-cli")]
#[command(about = "Management CLI for the quota-guard admin endpoint", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8081")]
    url: String,

    /// Admin bearer token.
    #[arg(short, long, env = "QUOTA_GUARD_ADMIN_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Overall health and open breakers
    Status,
    /// Credential pool counts (never the secrets)
    Credentials,
    /// Per-scope rate limiter windows and quota pressure
    RateLimits,
    /// Per-scope circuit breaker state
    Breakers,
    /// Result cache hit/miss stats
    Cache,
    /// Force every circuit breaker closed
    ResetBreakers,
    /// Clear every rate limiter window and quota counter
    ResetRateLimits,
    /// Drop expired cache entries now
    CleanupCache,
}

impl Commands {
    fn endpoint(&self) -> (Method, &'static str) {
        match self {
            Commands::Status => (Method::GET, "/admin/status"),
            Commands::Credentials => (Method::GET, "/admin/credentials"),
            Commands::RateLimits => (Method::GET, "/admin/rate-limits"),
            Commands::Breakers => (Method::GET, "/admin/breakers"),
            Commands::Cache => (Method::GET, "/admin/cache"),
            Commands::ResetBreakers => (Method::POST, "/admin/breakers/reset"),
            Commands::ResetRateLimits => (Method::POST, "/admin/rate-limits/reset"),
            Commands::CleanupCache => (Method::POST, "/admin/cache/cleanup"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let (method, path) = cli.command.endpoint();
    let res = client
        .request(method, format!("{}{}", cli.url.trim_end_matches('/'), path))
        .headers(headers)
        .send()
        .await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            if !text.is_empty() {
                eprintln!("Response: {}", text);
            }
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
