//! Data storage and facade configuration parsing from environment variables.

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CRYPTO_PAIRS: &str =
    "BTC/USDT,ETH/USDT,BNB/USDT,XRP/USDT,ADA/USDT,SOL/USDT,DOT/USDT,DOGE/USDT";

/// Splits a comma separated list, dropping blanks
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[derive(Debug, Clone)]
pub struct DataEnvConfig {
    pub data_dir: PathBuf,
    pub charts_dir: PathBuf,
    pub use_live_data: bool,
    pub cache_ttl_secs: u64,
    pub crypto_pairs: Vec<String>,
}

impl DataEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            data_dir: PathBuf::from(env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string())),
            charts_dir: PathBuf::from(
                env::var("CHARTS_DIR").unwrap_or_else(|_| "charts".to_string()),
            ),
            use_live_data: env::var("USE_LIVE_DATA")
                .unwrap_or_else(|_| "true".to_string())
                .parse::<bool>()
                .unwrap_or(true),
            cache_ttl_secs: env::var("DATA_CACHE_TTL_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse::<u64>()
                .context("Failed to parse DATA_CACHE_TTL_SECS")?,
            crypto_pairs: parse_list(
                &env::var("CRYPTO_PAIRS").unwrap_or_else(|_| DEFAULT_CRYPTO_PAIRS.to_string()),
            ),
        })
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}
