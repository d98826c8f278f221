use thiserror::Error;

/// Errors produced while acquiring market data.
///
/// None of these are fatal: every caller above the individual sources treats
/// them as "try the next source" and ultimately degrades to an empty series.
#[derive(Debug, Error)]
pub enum MarketDataError {
    #[error("{source_name} has no data for {symbol} {timeframe}")]
    NotAvailable {
        source_name: String,
        symbol: String,
        timeframe: String,
    },

    #[error("Timeframe '{timeframe}' is not supported in the {dialect} dialect")]
    UnsupportedTimeframe {
        timeframe: String,
        dialect: &'static str,
    },

    #[error("Unknown symbol: {symbol}")]
    UnknownSymbol { symbol: String },

    #[error("Not authenticated with the broker")]
    NotAuthenticated,

    #[error("Request {request_id} timed out after {duration_ms}ms")]
    Timeout { request_id: String, duration_ms: u64 },

    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },

    #[error("Broker error {code}: {description}")]
    Broker { code: String, description: String },

    #[error("Invalid market data for {symbol}: {reason}")]
    InvalidData { symbol: String, reason: String },

    #[error("HTTP request failed: {reason}")]
    Http { reason: String },

    #[error("Circuit breaker open: {reason}")]
    CircuitOpen { reason: String },

    #[error("Source is not configured: {reason}")]
    NotConfigured { reason: String },

    #[error("All sources failed for {symbol} {timeframe}: {}", .attempts.join("; "))]
    Exhausted {
        symbol: String,
        timeframe: String,
        attempts: Vec<String>,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl MarketDataError {
    pub fn not_available(source_name: &str, symbol: &str, timeframe: impl ToString) -> Self {
        MarketDataError::NotAvailable {
            source_name: source_name.to_string(),
            symbol: symbol.to_string(),
            timeframe: timeframe.to_string(),
        }
    }

    pub fn http(reason: impl ToString) -> Self {
        MarketDataError::Http {
            reason: reason.to_string(),
        }
    }

    /// Missing data as opposed to a failure worth an error log
    pub fn is_not_available(&self) -> bool {
        matches!(self, MarketDataError::NotAvailable { .. })
    }
}

impl From<reqwest::Error> for MarketDataError {
    fn from(e: reqwest::Error) -> Self {
        MarketDataError::http(e)
    }
}

impl From<reqwest_middleware::Error> for MarketDataError {
    fn from(e: reqwest_middleware::Error) -> Self {
        MarketDataError::http(e)
    }
}
