//! Configuration types
//!
//! The engine itself is configured with plain strings; these types are
//! the binary's TOML surface over them.

use crate::socks::Address;
use anyhow::{bail, Result};
use serde::Deserialize;

/// Top-level configuration file structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// The proxy section
    pub proxy: ProxyConfig,
}

/// Local proxy settings
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    /// Address to listen on for both TCP and UDP, `host:port`
    pub listen: String,

    /// Optional upstream SOCKS5 proxy to chain through
    #[serde(default)]
    pub upstream: Option<UpstreamConfig>,
}

/// Upstream SOCKS5 proxy settings
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Upstream proxy address, `host:port`
    pub addr: String,

    /// Username offered during authentication
    #[serde(default)]
    pub username: Option<String>,

    /// Password offered during authentication
    #[serde(default)]
    pub password: Option<String>,
}

impl Config {
    /// Check the configuration for obvious mistakes.
    pub fn validate(&self) -> Result<()> {
        if Address::parse(&self.proxy.listen).is_none() {
            bail!("invalid listen address: {}", self.proxy.listen);
        }

        if let Some(upstream) = &self.proxy.upstream {
            if Address::parse(&upstream.addr).is_none() {
                bail!("invalid upstream address: {}", upstream.addr);
            }
            if upstream.username.is_none() && upstream.password.is_some() {
                bail!("upstream password set without a username");
            }
            if let Some(username) = &upstream.username {
                if username.is_empty() || username.len() > 255 {
                    bail!("upstream username must be 1 to 255 bytes");
                }
            }
            if let Some(password) = &upstream.password {
                if password.len() > 255 {
                    bail!("upstream password must be at most 255 bytes");
                }
            }
        }

        Ok(())
    }
}
