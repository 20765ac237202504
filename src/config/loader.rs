//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;

use crate::config::schema::{CredentialsConfig, GuardConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load a TOML file, merge environment credentials, and validate.
pub fn load_config(path: &Path) -> Result<GuardConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let config = parse_config(&content, |name| std::env::var(name).ok())?;
    tracing::info!(path = %path.display(), "Configuration loaded");
    Ok(config)
}

/// Parse `content`, resolving numbered credential entries through `lookup`.
pub fn parse_config<F>(content: &str, lookup: F) -> Result<GuardConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config: GuardConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    config.credentials.keys = collect_credentials(&config.credentials, lookup);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Inline keys followed by `PREFIX`, `PREFIX1` ..= `PREFIX{max_numbered}`.
///
/// Blank entries and duplicates are skipped; first occurrence wins.
pub fn collect_credentials<F>(config: &CredentialsConfig, lookup: F) -> Vec<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut keys: Vec<String> = Vec::new();
    let mut push = |raw: String| {
        let key = raw.trim().to_string();
        if !key.is_empty() && !keys.contains(&key) {
            keys.push(key);
        }
    };

    for key in &config.keys {
        push(key.clone());
    }

    if let Some(prefix) = &config.env_prefix {
        let names = std::iter::once(prefix.clone())
            .chain((1..=config.max_numbered).map(|n| format!("{prefix}{n}")));
        for name in names {
            if let Some(value) = lookup(&name) {
                push(value);
            }
        }
    }

    tracing::debug!(count = keys.len(), "Collected credentials");
    keys
}
