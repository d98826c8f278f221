//! Configuration module for tradefeed.
//!
//! This module provides structured configuration loading from environment variables,
//! organized by concern: market data providers and local data storage.

mod broker_config;
mod data_config;

pub use broker_config::{AlphaVantageConfig, BinanceConfig, BrokerEnvConfig, CTraderConfig};
pub use data_config::{DataEnvConfig, parse_list};

use anyhow::{Context, Result};

/// Main application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub broker: BrokerEnvConfig,
    pub data: DataEnvConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Call `dotenvy::dotenv().ok()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self> {
        let broker = BrokerEnvConfig::from_env().context("Failed to load broker config")?;
        let data = DataEnvConfig::from_env().context("Failed to load data config")?;
        Ok(Self { broker, data })
    }
}
