//! Configuration loading for the sockslink binary
//!
//! Provides TOML parsing for the proxy and optional upstream sections.

mod proxy;

pub use proxy::{Config, ProxyConfig, UpstreamConfig};

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read config file: {:?}", path.as_ref()))?;

    parse_config(&content)
}

/// Parse configuration from a TOML string
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("failed to parse configuration")?;
    config.validate()?;
    Ok(config)
}
