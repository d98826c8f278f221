//! Market data provider configuration parsing from environment variables.
//!
//! This module handles loading configuration for every provider:
//! - cTrader Open API (forex, indices, metals)
//! - Binance (crypto klines and pair listing)
//! - Alpha Vantage (crypto REST fallback)

use crate::infrastructure::alpha_vantage;
use crate::infrastructure::binance::market_data as binance;
use crate::infrastructure::ctrader::{BrokerCredentials, ClientSettings};
use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

fn parse_u64(key: &str, default: u64) -> Result<u64> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<u64>()
        .context(format!("Failed to parse {}", key))
}

fn parse_u32(key: &str, default: u32) -> Result<u32> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<u32>()
        .context(format!("Failed to parse {}", key))
}

/// cTrader Open API configuration
#[derive(Clone)]
pub struct CTraderConfig {
    pub ws_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub account_id: i64,
    pub access_token: String,
    pub request_timeout_secs: u64,
    pub symbols_timeout_secs: u64,
    pub reconnect_base_secs: u64,
    pub reconnect_max_attempts: u32,
    pub heartbeat_secs: u64,
}

impl std::fmt::Debug for CTraderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CTraderConfig")
            .field("ws_url", &self.ws_url)
            .field("client_id", &self.client_id)
            .field("account_id", &self.account_id)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish_non_exhaustive()
    }
}

impl CTraderConfig {
    pub fn from_env() -> Result<Self> {
        let account_id = match env::var("CTRADER_ACCOUNT_ID") {
            Ok(raw) if !raw.trim().is_empty() => raw
                .trim()
                .parse::<i64>()
                .context("Failed to parse CTRADER_ACCOUNT_ID")?,
            _ => 0,
        };

        Ok(Self {
            ws_url: env::var("CTRADER_WS_URL")
                .unwrap_or_else(|_| "wss://demo.ctraderapi.com:5036".to_string()),
            client_id: env::var("CTRADER_CLIENT_ID").unwrap_or_default(),
            client_secret: env::var("CTRADER_CLIENT_SECRET").unwrap_or_default(),
            account_id,
            access_token: env::var("CTRADER_ACCESS_TOKEN").unwrap_or_default(),
            request_timeout_secs: parse_u64("CTRADER_REQUEST_TIMEOUT_SECS", 30)?,
            symbols_timeout_secs: parse_u64("CTRADER_SYMBOLS_TIMEOUT_SECS", 10)?,
            reconnect_base_secs: parse_u64("CTRADER_RECONNECT_BASE_SECS", 5)?,
            reconnect_max_attempts: parse_u32("CTRADER_RECONNECT_MAX_ATTEMPTS", 5)?,
            heartbeat_secs: parse_u64("CTRADER_HEARTBEAT_SECS", 10)?,
        })
    }

    /// All credentials present
    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty()
            && !self.client_secret.is_empty()
            && !self.access_token.is_empty()
            && self.account_id != 0
    }

    pub fn credentials(&self) -> BrokerCredentials {
        BrokerCredentials {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            account_id: self.account_id,
            access_token: self.access_token.clone(),
        }
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            symbols_timeout: Duration::from_secs(self.symbols_timeout_secs),
            reconnect_base: Duration::from_secs(self.reconnect_base_secs),
            reconnect_max_attempts: self.reconnect_max_attempts,
            ..ClientSettings::default()
        }
    }

    /// Never shorter than one second; a zero period would stop the writer.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }
}

/// Binance API configuration
#[derive(Debug, Clone, Default)]
pub struct BinanceConfig {
    pub api_key: String,
    pub base_url: String,
}

impl BinanceConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: env::var("BINANCE_API_KEY").unwrap_or_default(),
            base_url: env::var("BINANCE_BASE_URL")
                .unwrap_or_else(|_| binance::DEFAULT_BASE_URL.to_string()),
        }
    }
}

/// Alpha Vantage API configuration
#[derive(Debug, Clone, Default)]
pub struct AlphaVantageConfig {
    pub api_key: String,
    pub base_url: String,
}

impl AlphaVantageConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: env::var("ALPHA_VANTAGE_API_KEY").unwrap_or_default(),
            base_url: env::var("ALPHA_VANTAGE_BASE_URL")
                .unwrap_or_else(|_| alpha_vantage::DEFAULT_BASE_URL.to_string()),
        }
    }
}

/// Aggregated provider configuration
#[derive(Debug, Clone)]
pub struct BrokerEnvConfig {
    pub ctrader: CTraderConfig,
    pub binance: BinanceConfig,
    pub alpha_vantage: AlphaVantageConfig,
}

impl BrokerEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            ctrader: CTraderConfig::from_env().context("Failed to load cTrader config")?,
            binance: BinanceConfig::from_env(),
            alpha_vantage: AlphaVantageConfig::from_env(),
        })
    }
}
