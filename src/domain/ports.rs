use crate::domain::errors::MarketDataError;
use crate::domain::market::{OhlcvSeries, Timeframe};
use async_trait::async_trait;

/// What a caller asks a single source for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OhlcvRequest {
    /// Canonical (uppercase, slash-free) symbol
    pub symbol: String,
    pub timeframe: Timeframe,
    pub bars: usize,
}

impl OhlcvRequest {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe, bars: usize) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            bars,
        }
    }
}

/// A single place OHLCV data can come from (exchange, REST API, CSV files).
///
/// An `Ok` result is expected to be non-empty; sources report missing data as
/// [`MarketDataError::NotAvailable`] so the fallback chain can move on.
#[async_trait]
pub trait OhlcvSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch(&self, request: &OhlcvRequest) -> Result<OhlcvSeries, MarketDataError>;

    /// Release network resources. Sources without any keep the default.
    async fn close(&self) {}
}

/// Lists tradable pairs, most liquid first.
#[async_trait]
pub trait PairDirectory: Send + Sync {
    async fn list_pairs(&self, limit: usize) -> Result<Vec<String>, MarketDataError>;
}
