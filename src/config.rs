use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::errors::DpiError;

/// Tunables consumed by the engine and the dissectors.
///
/// Read-only after initialization; every dissection call sees the same
/// values.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Entries kept in the DNS address reverse cache; 0 disables it.
    pub address_cache_size: usize,
    /// Entries kept in the FPC-DNS cache; 0 disables it.
    pub fpc_dns_cache_size: usize,
    /// Run the host-based subprotocol match on extracted names.
    pub dns_subclassification_enabled: bool,
    /// Schedule extra dissection on queries so the response is parsed too.
    pub dns_parse_response_enabled: bool,
    /// Packets inspected per flow before the engine forces a give-up.
    pub packets_limit_per_flow: u32,
    /// Keep a copy of the first payload bytes on each flow.
    pub track_payload: bool,
    /// Number of flow-table roots; must be a power of two.
    pub num_roots: usize,
    /// Upper bound on tracked flows across all roots.
    pub max_flows: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            address_cache_size: 0,
            fpc_dns_cache_size: 1024,
            dns_subclassification_enabled: true,
            dns_parse_response_enabled: true,
            packets_limit_per_flow: 32,
            track_payload: false,
            num_roots: 512,
            max_flows: 200_000,
        }
    }
}

impl Config {
    /// Loads and validates a TOML configuration file.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Config> {
        let text = fs::read_to_string(path.as_ref())
            .with_context(|| format!("failed to read config file {}", path.as_ref().display()))?;
        let config: Config = toml::from_str(&text).context("failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.num_roots.is_power_of_two() {
            bail!(DpiError::InvalidConfig(format!(
                "num_roots must be a power of two, got {}",
                self.num_roots
            )));
        }
        if self.max_flows == 0 {
            bail!(DpiError::InvalidConfig("max_flows must be nonzero".into()));
        }
        if self.packets_limit_per_flow == 0 {
            bail!(DpiError::InvalidConfig(
                "packets_limit_per_flow must be nonzero".into()
            ));
        }
        Ok(())
    }
}
