use super::broker_provider::BrokerDataProvider;
use super::crypto_provider::CryptoDataProvider;
use super::data_cache::{CacheKey, DataCache};
use crate::domain::market::symbol::normalize_symbol;
use crate::domain::market::timeframe::normalize_timeframe;
use crate::domain::market::{
    CryptoSource, DataOrigin, DataSource, MarketType, OhlcvSeries, Timeframe,
};
use crate::domain::ports::OhlcvRequest;
use crate::infrastructure::csv_store::CsvStore;
use crate::infrastructure::ctrader::symbols::TIMEFRAME_PERIODS;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Used when neither the broker nor any file names a crypto symbol.
pub const DEFAULT_CRYPTO_SYMBOLS: &[&str] = &[
    "BTCUSDT", "ETHUSDT", "XRPUSDT", "ADAUSDT", "SOLUSDT", "BNBUSDT", "DOGEUSDT", "MATICUSDT",
];

/// A route's result before the CSV fallback is considered.
struct Routed {
    series: OhlcvSeries,
    origin: DataOrigin,
    csv_tried: bool,
}

impl Routed {
    fn new(series: OhlcvSeries, origin: DataOrigin, csv_tried: bool) -> Self {
        let origin = if series.is_empty() {
            DataOrigin::Unavailable
        } else {
            origin
        };
        Self {
            series,
            origin,
            csv_tried,
        }
    }

    fn unavailable() -> Self {
        Self::new(OhlcvSeries::empty(), DataOrigin::Unavailable, false)
    }
}

/// Outcome of [`DataProcessor::download`].
#[derive(Debug)]
pub struct Download {
    pub series: Arc<OhlcvSeries>,
    pub origin: DataOrigin,
    /// Set when a new snapshot was written
    pub saved: Option<PathBuf>,
}

/// Single entry point for OHLCV data.
///
/// Routes each request to the broker or the crypto provider by market,
/// falls back to CSV files and caches non-empty results. Never fails:
/// unavailable data comes back as an empty series.
pub struct DataProcessor {
    store: Arc<CsvStore>,
    crypto: Arc<CryptoDataProvider>,
    broker: Option<Arc<BrokerDataProvider>>,
    cache: DataCache,
    use_live_data: bool,
}

impl DataProcessor {
    pub fn new(store: Arc<CsvStore>, crypto: Arc<CryptoDataProvider>, cache_ttl: Duration) -> Self {
        Self {
            store,
            crypto,
            broker: None,
            cache: DataCache::new(cache_ttl),
            use_live_data: true,
        }
    }

    pub fn with_broker(mut self, broker: Arc<BrokerDataProvider>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn with_live_data(mut self, use_live_data: bool) -> Self {
        self.use_live_data = use_live_data;
        self
    }

    pub fn store(&self) -> &Arc<CsvStore> {
        &self.store
    }

    pub fn cache(&self) -> &DataCache {
        &self.cache
    }

    pub fn broker(&self) -> Option<&Arc<BrokerDataProvider>> {
        self.broker.as_ref()
    }

    /// Starts the broker session when live data is enabled.
    pub fn connect(&self) -> bool {
        match &self.broker {
            Some(broker) if self.use_live_data => {
                info!("DataProcessor: Connecting to cTrader for live data");
                broker.connect()
            }
            _ => false,
        }
    }

    fn broker_ready(&self) -> Option<&Arc<BrokerDataProvider>> {
        self.broker
            .as_ref()
            .filter(|broker| self.use_live_data && broker.is_ready())
    }

    /// Up to `bars` bars, oldest first. Identical requests within the cache
    /// TTL share one series.
    pub async fn get_data(
        &self,
        symbol: &str,
        timeframe: &str,
        bars: usize,
        source: DataSource,
    ) -> Arc<OhlcvSeries> {
        self.get_data_with_origin(symbol, timeframe, bars, source)
            .await
            .0
    }

    /// Like [`DataProcessor::get_data`], also telling where the series came from.
    pub async fn get_data_with_origin(
        &self,
        symbol: &str,
        timeframe: &str,
        bars: usize,
        source: DataSource,
    ) -> (Arc<OhlcvSeries>, DataOrigin) {
        let symbol = normalize_symbol(symbol);
        let timeframe = normalize_timeframe(timeframe);
        let key = CacheKey::new(&symbol, timeframe, bars, source);

        if let Some(cached) = self.cache.get(&key) {
            info!("DataProcessor: Using cached data for {} {}", symbol, timeframe);
            return (cached, DataOrigin::Cache);
        }

        let generation = self.cache.generation();
        let request = OhlcvRequest::new(&symbol, timeframe, bars);
        let market = MarketType::infer(&symbol);

        let mut routed = match source {
            DataSource::Auto if market == MarketType::Crypto => self.from_crypto(&request).await,
            DataSource::Auto | DataSource::Broker => self.from_broker(&request).await,
            DataSource::Crypto => self.from_crypto(&request).await,
            DataSource::Api => {
                let (series, origin) = self
                    .crypto
                    .fetch_with_origin(&request, CryptoSource::Api)
                    .await;
                Routed::new(series, origin, false)
            }
            DataSource::Csv => self.from_csv(&request),
            DataSource::Live => self.from_live(&request, market).await,
        };

        if routed.series.is_empty() && source.allows_csv_fallback() && !routed.csv_tried {
            warn!(
                "DataProcessor: Failed to get {} {} from {}, trying CSV fallback",
                symbol, timeframe, source
            );
            routed = self.from_csv(&request);
        }

        let series = routed.series.tail(bars);
        if series.is_empty() {
            warn!("DataProcessor: No data available for {} {}", symbol, timeframe);
            return (Arc::new(series), DataOrigin::Unavailable);
        }
        (self.cache.insert(key, series, generation), routed.origin)
    }

    async fn from_broker(&self, request: &OhlcvRequest) -> Routed {
        match self.broker_ready() {
            Some(broker) => {
                info!(
                    "DataProcessor: Fetching live data from cTrader for {} {}",
                    request.symbol, request.timeframe
                );
                let (series, origin) = broker
                    .update_data(&request.symbol, request.timeframe, request.bars)
                    .await;
                // The broker provider reads the snapshot itself when the fetch fails
                Routed::new(series, origin, true)
            }
            None => self.from_csv(request),
        }
    }

    async fn from_crypto(&self, request: &OhlcvRequest) -> Routed {
        if !self.use_live_data {
            return self.from_csv(request);
        }
        info!(
            "DataProcessor: Fetching live data from crypto provider for {} {}",
            request.symbol, request.timeframe
        );
        let (series, origin) = self.crypto.fetch_with_origin(request, CryptoSource::Auto).await;
        Routed::new(series, origin, self.crypto.reads_csv(CryptoSource::Auto))
    }

    async fn from_live(&self, request: &OhlcvRequest, market: MarketType) -> Routed {
        let fetched = if market == MarketType::Crypto {
            self.crypto
                .live_chain()
                .fetch(request)
                .await
                .map(|sourced| (sourced.series, DataOrigin::Remote))
        } else {
            match &self.broker {
                Some(broker) => broker
                    .fetch_live(request)
                    .await
                    .map(|series| (series, DataOrigin::Broker)),
                None => {
                    error!("DataProcessor: No broker configured for live {}", request.symbol);
                    return Routed::unavailable();
                }
            }
        };

        match fetched {
            Ok((series, origin)) => Routed::new(series, origin, false),
            Err(e) => {
                error!("DataProcessor: Live data unavailable for {}: {}", request.symbol, e);
                Routed::unavailable()
            }
        }
    }

    fn from_csv(&self, request: &OhlcvRequest) -> Routed {
        debug!(
            "DataProcessor: Loading data from CSV for {} {}",
            request.symbol, request.timeframe
        );
        let mut series = self.store.load(&request.symbol, request.timeframe);
        // Crypto chart files use exchange pair names
        if series.is_empty() && MarketType::infer(&request.symbol) == MarketType::Crypto {
            series = self
                .store
                .load_chart(MarketType::Crypto, &request.symbol, request.timeframe);
        }
        Routed::new(series, DataOrigin::Csv, true)
    }

    /// Fetches a pair bypassing the cache and keeps a CSV snapshot of fresh
    /// network data under the normalized symbol. Bars read from CSV are never
    /// written back, so a short request cannot truncate a longer history.
    pub async fn download(
        &self,
        symbol: &str,
        timeframe: &str,
        bars: usize,
        source: DataSource,
    ) -> Download {
        let normalized = normalize_symbol(symbol);
        let tf = normalize_timeframe(timeframe);
        self.cache.invalidate(&normalized, tf);

        let (series, origin) = self
            .get_data_with_origin(&normalized, timeframe, bars, source)
            .await;
        let saved = if origin.needs_snapshot() {
            match self.store.save(&series, &normalized, tf) {
                Ok(path) => Some(path),
                Err(e) => {
                    error!("DataProcessor: Error saving data for {} {}: {}", normalized, tf, e);
                    None
                }
            }
        } else {
            None
        };

        Download {
            series,
            origin,
            saved,
        }
    }

    /// Drops every cached entry for the pair, then fetches again.
    pub async fn update_data(&self, symbol: &str, timeframe: &str, bars: usize) -> Arc<OhlcvSeries> {
        let normalized = normalize_symbol(symbol);
        let removed = self.cache.invalidate(&normalized, normalize_timeframe(timeframe));
        debug!(
            "DataProcessor: Invalidated {} cache entries for {} {}",
            removed, normalized, timeframe
        );
        self.get_data(symbol, timeframe, bars, DataSource::Auto).await
    }

    /// Defaults to H1, H4 and D1. Timeframes without data are left out.
    pub async fn get_multi_timeframe_data(
        &self,
        symbol: &str,
        timeframes: Option<&[&str]>,
        bars: usize,
    ) -> BTreeMap<Timeframe, Arc<OhlcvSeries>> {
        let timeframes = timeframes.unwrap_or(&["H1", "H4", "D1"]);
        let mut result = BTreeMap::new();
        for tf in timeframes {
            let series = self.get_data(symbol, tf, bars, DataSource::Auto).await;
            if !series.is_empty() {
                result.insert(normalize_timeframe(tf), series);
            }
        }
        result
    }

    /// Sorted, de-duplicated symbols, optionally limited to one market.
    pub async fn get_available_symbols(&self, market: Option<MarketType>) -> Vec<String> {
        let mut symbols = BTreeSet::new();

        if let Some(broker) = self.broker_ready() {
            symbols.extend(
                broker
                    .get_available_symbols()
                    .await
                    .into_iter()
                    .map(|s| s.name),
            );
        }

        if matches!(market, None | Some(MarketType::Crypto)) {
            let from_files = self.crypto_symbols_from_files();
            if from_files.is_empty() {
                info!(
                    "DataProcessor: Using default list of {} crypto symbols",
                    DEFAULT_CRYPTO_SYMBOLS.len()
                );
                symbols.extend(DEFAULT_CRYPTO_SYMBOLS.iter().map(|s| s.to_string()));
            } else {
                info!(
                    "DataProcessor: Loaded {} crypto symbols from CSV files",
                    from_files.len()
                );
                symbols.extend(from_files);
            }
        }

        symbols
            .into_iter()
            .filter(|s| market.is_none_or(|m| MarketType::infer(s) == m))
            .collect()
    }

    fn crypto_symbols_from_files(&self) -> BTreeSet<String> {
        let from_data = self.store.list_data_files().into_iter().filter_map(|stem| {
            let symbol = stem.split('_').next().unwrap_or_default().to_uppercase();
            (MarketType::infer(&symbol) == MarketType::Crypto).then_some(symbol)
        });
        from_data
            .chain(self.store.list_chart_symbols(MarketType::Crypto))
            .collect()
    }

    /// Broker timeframes, crypto timeframes or both (any other source).
    pub fn get_available_timeframes(&self, source: DataSource) -> Vec<Timeframe> {
        let mut timeframes = BTreeSet::new();
        if source != DataSource::Crypto {
            timeframes.extend(
                TIMEFRAME_PERIODS
                    .iter()
                    .filter_map(|(name, _)| Timeframe::parse(name)),
            );
        }
        if source != DataSource::Broker {
            timeframes.extend(self.crypto.get_crypto_timeframes());
        }
        timeframes.into_iter().collect()
    }

    /// Broker M1 close, then crypto 1m close, then the last H1 close on disk.
    pub async fn get_latest_price(&self, symbol: &str) -> Option<Decimal> {
        let symbol = normalize_symbol(symbol);

        if let Some(broker) = self.broker_ready()
            && let Some(price) = broker.get_latest_price(&symbol).await
        {
            return Some(price);
        }

        if self.use_live_data
            && let Some(price) = self.crypto.get_latest_price(&symbol, CryptoSource::Auto).await
        {
            return Some(price);
        }

        self.store.load(&symbol, Timeframe::OneHour).last_close()
    }

    pub async fn close(&self) {
        if let Some(broker) = &self.broker {
            broker.disconnect();
        }
        self.crypto.close().await;
        self.cache.invalidate_all();
        info!("DataProcessor: Closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::csv_source::CsvOhlcvSource;
    use crate::infrastructure::mock::{MockOhlcvSource, sample_series};
    use std::fs;
    use tempfile::{TempDir, tempdir};

    fn processor(exchange: Arc<MockOhlcvSource>) -> (DataProcessor, TempDir) {
        let dir = tempdir().unwrap();
        let store = Arc::new(CsvStore::new(dir.path().join("data"), dir.path().join("charts")));
        let csv = Arc::new(CsvOhlcvSource::with_charts(Arc::clone(&store), MarketType::Crypto));
        let crypto = CryptoDataProvider::new(Arc::clone(&store), csv).with_exchange(exchange);
        let processor = DataProcessor::new(store, Arc::new(crypto), Duration::from_secs(300));
        (processor, dir)
    }

    #[tokio::test]
    async fn test_crypto_symbols_route_to_crypto_provider() {
        let exchange = Arc::new(MockOhlcvSource::returning("exchange", sample_series(40)));
        let (processor, _dir) = processor(exchange.clone());

        let series = processor.get_data("btc/usdt", "1h", 25, DataSource::Auto).await;

        assert_eq!(series.len(), 25);
        assert_eq!(exchange.calls(), 1);
    }

    #[tokio::test]
    async fn test_cache_hit_skips_providers() {
        let exchange = Arc::new(MockOhlcvSource::returning("exchange", sample_series(40)));
        let (processor, _dir) = processor(exchange.clone());

        let first = processor.get_data("BTCUSDT", "H1", 10, DataSource::Auto).await;
        let second = processor.get_data("BTCUSDT", "60", 10, DataSource::Auto).await;

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(exchange.calls(), 1);
    }

    #[tokio::test]
    async fn test_update_data_refetches() {
        let exchange = Arc::new(MockOhlcvSource::returning("exchange", sample_series(40)));
        let (processor, _dir) = processor(exchange.clone());

        let first = processor.get_data("BTCUSDT", "H1", 10, DataSource::Auto).await;
        let updated = processor.update_data("BTCUSDT", "H1", 10).await;

        assert!(!Arc::ptr_eq(&first, &updated));
        assert_eq!(exchange.calls(), 2);
    }

    #[tokio::test]
    async fn test_live_policy_skips_csv() {
        let exchange = Arc::new(MockOhlcvSource::empty("exchange"));
        let (processor, dir) = processor(exchange);
        let data = dir.path().join("data");
        fs::create_dir_all(&data).unwrap();
        fs::write(
            data.join("BTCUSDT_H1.csv"),
            "2024-01-01 00:00 1 2 0.5 1.5 10\n2024-01-01 01:00 1 2 0.5 1.6 10",
        )
        .unwrap();

        let live = processor.get_data("BTCUSDT", "H1", 10, DataSource::Live).await;
        let auto = processor.get_data("BTCUSDT", "H1", 10, DataSource::Auto).await;

        assert!(live.is_empty());
        assert_eq!(auto.len(), 2);
    }

    #[tokio::test]
    async fn test_crypto_auto_reads_csv_once() {
        let dir = tempdir().unwrap();
        let store = Arc::new(CsvStore::new(dir.path().join("data"), dir.path().join("charts")));
        store
            .save(&sample_series(5), "BTCUSDT", Timeframe::OneHour)
            .unwrap();
        let csv = Arc::new(MockOhlcvSource::empty("csv"));
        let crypto = CryptoDataProvider::new(Arc::clone(&store), csv.clone())
            .with_exchange(Arc::new(MockOhlcvSource::failing("exchange", "down")));
        let processor = DataProcessor::new(store, Arc::new(crypto), Duration::from_secs(300));

        let (series, origin) = processor
            .get_data_with_origin("BTCUSDT", "H1", 5, DataSource::Auto)
            .await;

        // The chain's own CSV step had its turn; the facade does not load the file again
        assert!(series.is_empty());
        assert_eq!(origin, DataOrigin::Unavailable);
        assert_eq!(csv.calls(), 1);
    }

    #[tokio::test]
    async fn test_api_policy_still_falls_back_to_csv() {
        let (processor, _dir) = processor(Arc::new(MockOhlcvSource::empty("exchange")));
        processor
            .store()
            .save(&sample_series(8), "ETHUSDT", Timeframe::OneHour)
            .unwrap();

        let (series, origin) = processor
            .get_data_with_origin("ETHUSDT", "H1", 5, DataSource::Api)
            .await;

        assert_eq!(series.len(), 5);
        assert_eq!(origin, DataOrigin::Csv);
    }

    #[tokio::test]
    async fn test_origin_reports_cache_hits() {
        let exchange = Arc::new(MockOhlcvSource::returning("exchange", sample_series(40)));
        let (processor, _dir) = processor(exchange);

        let (_, first) = processor
            .get_data_with_origin("BTCUSDT", "H1", 10, DataSource::Auto)
            .await;
        let (_, second) = processor
            .get_data_with_origin("BTCUSDT", "H1", 10, DataSource::Auto)
            .await;

        assert_eq!(first, DataOrigin::Remote);
        assert_eq!(second, DataOrigin::Cache);
    }

    #[tokio::test]
    async fn test_available_timeframes_by_source() {
        let (processor, _dir) = processor(Arc::new(MockOhlcvSource::empty("exchange")));

        let broker = processor.get_available_timeframes(DataSource::Broker);
        let crypto = processor.get_available_timeframes(DataSource::Crypto);
        let all = processor.get_available_timeframes(DataSource::Auto);

        assert_eq!(broker.len(), 14);
        assert_eq!(crypto.len(), 8);
        assert_eq!(all.len(), 14);
        assert!(all.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_available_crypto_symbols_from_files_or_defaults() {
        let (processor, dir) = processor(Arc::new(MockOhlcvSource::empty("exchange")));

        let defaults = processor.get_available_symbols(Some(MarketType::Crypto)).await;
        assert_eq!(defaults.len(), DEFAULT_CRYPTO_SYMBOLS.len());

        let charts = dir.path().join("charts").join("crypto");
        fs::create_dir_all(&charts).unwrap();
        fs::write(charts.join("SOLUSDT60.csv"), "").unwrap();
        fs::write(charts.join("SOLUSDT240.csv"), "").unwrap();

        let listed = processor.get_available_symbols(None).await;
        assert_eq!(listed, vec!["SOLUSDT"]);
        assert!(
            processor
                .get_available_symbols(Some(MarketType::Forex))
                .await
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_latest_price_falls_back_to_h1_file() {
        let (processor, dir) = processor(Arc::new(MockOhlcvSource::empty("exchange")));
        let processor = processor.with_live_data(false);
        let data = dir.path().join("data");
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("EURUSD_H1.csv"), "2024-01-01 00:00 1 2 0.5 1.25 10").unwrap();

        assert_eq!(
            processor.get_latest_price("EURUSD").await,
            Some(Decimal::new(125, 2))
        );
        assert_eq!(processor.get_latest_price("GBPJPY").await, None);
    }
}
