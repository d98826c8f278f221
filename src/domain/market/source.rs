use crate::domain::errors::MarketDataError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Source policy for the data facade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DataSource {
    /// Live provider for the symbol's market, CSV when it has nothing
    #[default]
    Auto,
    /// CSV files only, no network
    Csv,
    /// Live provider only; an empty result is returned rather than stale files
    Live,
    /// Pin the broker
    Broker,
    /// Pin the crypto provider with its own fallback chain
    Crypto,
    /// Pin the crypto REST API
    Api,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::Auto => "auto",
            DataSource::Csv => "csv",
            DataSource::Live => "live",
            DataSource::Broker => "ctrader",
            DataSource::Crypto => "crypto",
            DataSource::Api => "api",
        }
    }

    /// Whether an empty live result may be replaced by CSV data
    pub fn allows_csv_fallback(&self) -> bool {
        !matches!(self, DataSource::Live | DataSource::Csv)
    }
}

impl FromStr for DataSource {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" | "" => Ok(DataSource::Auto),
            "csv" => Ok(DataSource::Csv),
            "live" => Ok(DataSource::Live),
            "ctrader" | "broker" => Ok(DataSource::Broker),
            "crypto" | "ccxt" | "exchange" => Ok(DataSource::Crypto),
            "api" => Ok(DataSource::Api),
            other => Err(MarketDataError::NotConfigured {
                reason: format!("unknown data source '{}'", other),
            }),
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source selection inside the crypto provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CryptoSource {
    /// Exchange, then CSV, then REST API
    #[default]
    Auto,
    Exchange,
    Csv,
    Api,
}

impl CryptoSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CryptoSource::Auto => "auto",
            CryptoSource::Exchange => "exchange",
            CryptoSource::Csv => "csv",
            CryptoSource::Api => "api",
        }
    }
}

impl FromStr for CryptoSource {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" | "" => Ok(CryptoSource::Auto),
            "exchange" | "ccxt" => Ok(CryptoSource::Exchange),
            "csv" => Ok(CryptoSource::Csv),
            "api" => Ok(CryptoSource::Api),
            other => Err(MarketDataError::NotConfigured {
                reason: format!("unknown crypto source '{}'", other),
            }),
        }
    }
}

/// Where a facade result actually came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataOrigin {
    /// Live broker fetch; the broker provider has already refreshed the CSV snapshot
    Broker,
    /// Crypto exchange or REST API
    Remote,
    /// Local CSV files
    Csv,
    /// Shared from the in-memory cache
    Cache,
    /// No source had data
    Unavailable,
}

impl DataOrigin {
    /// Fresh network data that is not on disk yet
    pub fn needs_snapshot(&self) -> bool {
        matches!(self, DataOrigin::Remote)
    }
}
