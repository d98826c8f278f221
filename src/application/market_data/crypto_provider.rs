use super::fallback::FallbackChain;
use crate::domain::market::symbol::{denormalize_pair, normalize_symbol};
use crate::domain::market::{CryptoSource, DataOrigin, MarketType, OhlcvSeries, Timeframe};
use crate::domain::ports::{OhlcvRequest, OhlcvSource, PairDirectory};
use crate::infrastructure::csv_store::CsvStore;
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const TOP_PAIRS_LIMIT: usize = 50;

/// Days covered by each backtest period.
const PERIOD_DAYS: &[(&str, i64)] = &[
    ("1m", 30),
    ("3m", 90),
    ("6m", 180),
    ("1y", 365),
    ("2y", 730),
    ("5y", 1825),
];

/// Candle count for a backtest period at `timeframe`. Only 1h, 4h and 1d
/// are defined.
pub fn period_bars(period: &str, timeframe: Timeframe) -> Option<usize> {
    let days = PERIOD_DAYS
        .iter()
        .find(|(name, _)| *name == period)
        .map(|(_, days)| *days)?;
    let per_day = match timeframe {
        Timeframe::OneHour => 24,
        Timeframe::FourHour => 6,
        Timeframe::OneDay => 1,
        _ => return None,
    };
    Some((days * per_day) as usize)
}

/// Crypto OHLCV with exchange → CSV charts → REST API fallback.
pub struct CryptoDataProvider {
    exchange: Option<Arc<dyn OhlcvSource>>,
    csv: Arc<dyn OhlcvSource>,
    api: Option<Arc<dyn OhlcvSource>>,
    pair_directory: Option<Arc<dyn PairDirectory>>,
    store: Arc<CsvStore>,
    default_pairs: Vec<String>,
}

impl CryptoDataProvider {
    pub fn new(store: Arc<CsvStore>, csv: Arc<dyn OhlcvSource>) -> Self {
        Self {
            exchange: None,
            csv,
            api: None,
            pair_directory: None,
            store,
            default_pairs: Vec::new(),
        }
    }

    pub fn with_exchange(mut self, exchange: Arc<dyn OhlcvSource>) -> Self {
        self.exchange = Some(exchange);
        self
    }

    pub fn with_api(mut self, api: Arc<dyn OhlcvSource>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn with_pair_directory(mut self, directory: Arc<dyn PairDirectory>) -> Self {
        self.pair_directory = Some(directory);
        self
    }

    pub fn with_default_pairs(mut self, pairs: Vec<String>) -> Self {
        self.default_pairs = pairs;
        self
    }

    fn chain_for(&self, source: CryptoSource) -> FallbackChain {
        let mut chain = FallbackChain::default();
        match source {
            CryptoSource::Auto => {
                if let Some(exchange) = &self.exchange {
                    chain = chain.with(Arc::clone(exchange));
                }
                chain = chain.with(Arc::clone(&self.csv));
                if let Some(api) = &self.api {
                    chain = chain.with(Arc::clone(api));
                }
            }
            CryptoSource::Exchange => {
                if let Some(exchange) = &self.exchange {
                    chain = chain.with(Arc::clone(exchange));
                }
            }
            CryptoSource::Csv => chain = chain.with(Arc::clone(&self.csv)),
            CryptoSource::Api => {
                if let Some(api) = &self.api {
                    chain = chain.with(Arc::clone(api));
                }
            }
        }
        chain
    }

    /// Network sources only, in `auto` order.
    pub fn live_chain(&self) -> FallbackChain {
        let mut chain = FallbackChain::default();
        for source in self.exchange.iter().chain(self.api.iter()) {
            chain = chain.with(Arc::clone(source));
        }
        chain
    }

    /// Up to `count` bars; empty when the timeframe is not a crypto
    /// timeframe or every source comes up empty.
    pub async fn get_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        count: usize,
        source: CryptoSource,
    ) -> OhlcvSeries {
        let symbol = normalize_symbol(symbol);
        let Some(timeframe) = Timeframe::parse(timeframe)
            .filter(|tf| Timeframe::exchange_supported().contains(tf))
        else {
            error!("CryptoDataProvider: Invalid timeframe: {}", timeframe);
            return OhlcvSeries::empty();
        };

        self.fetch(&OhlcvRequest::new(symbol, timeframe, count), source)
            .await
    }

    pub async fn fetch(&self, request: &OhlcvRequest, source: CryptoSource) -> OhlcvSeries {
        self.fetch_with_origin(request, source).await.0
    }

    /// Like [`CryptoDataProvider::fetch`], also telling whether the bars came
    /// from the network or from CSV files.
    pub async fn fetch_with_origin(
        &self,
        request: &OhlcvRequest,
        source: CryptoSource,
    ) -> (OhlcvSeries, DataOrigin) {
        let chain = self.chain_for(source);
        if chain.is_empty() {
            error!(
                "CryptoDataProvider: Source {} is not configured",
                source.as_str()
            );
            return (OhlcvSeries::empty(), DataOrigin::Unavailable);
        }

        match chain.fetch(request).await {
            Ok(sourced) if sourced.source == self.csv.name() => (sourced.series, DataOrigin::Csv),
            Ok(sourced) => (sourced.series, DataOrigin::Remote),
            Err(e) => {
                error!(
                    "CryptoDataProvider: All data sources failed for {} {}: {}",
                    request.symbol, request.timeframe, e
                );
                (OhlcvSeries::empty(), DataOrigin::Unavailable)
            }
        }
    }

    /// Whether `source` includes the CSV step.
    pub fn reads_csv(&self, source: CryptoSource) -> bool {
        matches!(source, CryptoSource::Auto | CryptoSource::Csv)
    }

    pub async fn get_historical_data(
        &self,
        symbol: &str,
        period: &str,
        timeframe: &str,
        source: CryptoSource,
    ) -> OhlcvSeries {
        let Some(parsed) = Timeframe::parse(timeframe) else {
            error!("CryptoDataProvider: Invalid timeframe: {}", timeframe);
            return OhlcvSeries::empty();
        };
        let Some(count) = period_bars(period, parsed) else {
            error!(
                "CryptoDataProvider: Invalid period {} for timeframe {}",
                period, timeframe
            );
            return OhlcvSeries::empty();
        };

        self.get_ohlcv(symbol, timeframe, count, source).await
    }

    /// Latest close on the 1m timeframe.
    pub async fn get_latest_price(&self, symbol: &str, source: CryptoSource) -> Option<Decimal> {
        let price = self.get_ohlcv(symbol, "1m", 1, source).await.last_close();
        if price.is_none() {
            error!("CryptoDataProvider: Failed to get latest price for {}", symbol);
        }
        price
    }

    /// Defaults to 1h, 4h and 1d. Timeframes without data are left out.
    pub async fn get_multi_timeframe_data(
        &self,
        symbol: &str,
        timeframes: Option<&[&str]>,
        count: usize,
        source: CryptoSource,
    ) -> BTreeMap<Timeframe, OhlcvSeries> {
        let timeframes = timeframes.unwrap_or(&["1h", "4h", "1d"]);
        let mut result = BTreeMap::new();

        for tf in timeframes {
            let series = self.get_ohlcv(symbol, tf, count, source).await;
            match Timeframe::parse(tf) {
                Some(parsed) if !series.is_empty() => {
                    result.insert(parsed, series);
                }
                _ => warn!(
                    "CryptoDataProvider: Failed to get data for {} on {} timeframe",
                    symbol, tf
                ),
            }
        }
        result
    }

    /// Exchange USDT pairs by volume, then chart file names, then the
    /// configured defaults.
    pub async fn get_crypto_pairs(&self, source: CryptoSource) -> Vec<String> {
        info!(
            "CryptoDataProvider: Fetching cryptocurrency pairs from source: {}",
            source.as_str()
        );
        let mut pairs = Vec::new();

        if matches!(source, CryptoSource::Auto | CryptoSource::Exchange)
            && let Some(directory) = &self.pair_directory
        {
            match directory.list_pairs(TOP_PAIRS_LIMIT).await {
                Ok(listed) => {
                    info!("CryptoDataProvider: Fetched {} pairs from exchange", listed.len());
                    pairs = listed;
                }
                Err(e) => error!("CryptoDataProvider: Error getting pairs from exchange: {}", e),
            }
        }

        if pairs.is_empty() && matches!(source, CryptoSource::Auto | CryptoSource::Csv) {
            pairs = self.store.list_chart_symbols(MarketType::Crypto);
            debug!("CryptoDataProvider: Loaded {} pairs from chart files", pairs.len());
        }

        if pairs.is_empty() {
            warn!("CryptoDataProvider: No pairs found from sources, using default pairs list");
            pairs = self
                .default_pairs
                .iter()
                .map(|p| denormalize_pair(p))
                .collect();
        }
        pairs
    }

    pub fn get_crypto_timeframes(&self) -> Vec<Timeframe> {
        Timeframe::exchange_supported()
    }

    pub async fn close(&self) {
        for source in self.exchange.iter().chain(self.api.iter()) {
            source.close().await;
        }
        info!("CryptoDataProvider: Closed data sources");
    }
}
