// src/config/mod.rs
mod models;

pub use models::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Prefix of environment variables overlaid on the file configuration,
/// e.g. `BALANCER_UPSTREAM__TIMEOUT_MS=500`.
pub const ENV_PREFIX: &str = "BALANCER";

/// Load configuration from an optional file (YAML or JSON), then apply
/// environment overrides and validate the result.
pub async fn load_config(path: Option<&Path>) -> Result<Config> {
    let base = match path {
        Some(path) => read_config_file(path).await?,
        None => Config::default(),
    };

    let config = overlay(base, environment())?;

    config.validate()?;
    Ok(config)
}

// `BALANCER_` then `__` between nesting levels; single underscores stay
// inside key names such as `timeout_ms`.
fn environment() -> ::config::Environment {
    ::config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

async fn read_config_file(path: &Path) -> Result<Config> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let extension = path.extension().and_then(|s| s.to_str());
    let config = if matches!(extension, Some("yaml") | Some("yml")) {
        serde_yaml::from_str(&contents).context("Failed to parse YAML config")?
    } else {
        serde_json::from_str(&contents).context("Failed to parse JSON config")?
    };

    Ok(config)
}

fn overlay<S>(base: Config, source: S) -> Result<Config>
where
    S: ::config::Source + Send + Sync + 'static,
{
    let staged = ::config::Config::try_from(&base).context("Failed to stage configuration")?;

    ::config::Config::builder()
        .add_source(staged)
        .add_source(source)
        .build()
        .context("Failed to merge configuration overrides")?
        .try_deserialize()
        .context("Invalid configuration override")
}
