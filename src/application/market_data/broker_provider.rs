use crate::domain::errors::MarketDataError;
use crate::domain::market::{DataOrigin, OhlcvSeries, Timeframe};
use crate::domain::ports::{OhlcvRequest, OhlcvSource};
use crate::infrastructure::csv_store::CsvStore;
use crate::infrastructure::ctrader::source::resolve_request;
use crate::infrastructure::ctrader::symbols::{SYMBOL_IDS, TIMEFRAME_PERIODS};
use crate::infrastructure::ctrader::{CTraderClient, CTraderOhlcvSource, LiveUpdate, SymbolInfo};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Broker market data with CSV files as the safety net.
///
/// Every successful historical fetch is written back to
/// `data/{SYMBOL}_{TF}.csv`, so the files always hold the latest snapshot the
/// broker delivered.
pub struct BrokerDataProvider {
    client: CTraderClient,
    source: CTraderOhlcvSource,
    store: Arc<CsvStore>,
    live_writer: Mutex<Option<JoinHandle<()>>>,
}

impl BrokerDataProvider {
    pub fn new(client: CTraderClient, store: Arc<CsvStore>) -> Self {
        Self {
            source: CTraderOhlcvSource::new(client.clone()),
            client,
            store,
            live_writer: Mutex::new(None),
        }
    }

    pub fn client(&self) -> &CTraderClient {
        &self.client
    }

    pub fn connect(&self) -> bool {
        self.client.connect()
    }

    pub fn is_ready(&self) -> bool {
        self.client.is_ready()
    }

    /// Live bars when the broker can deliver them, the CSV snapshot otherwise.
    pub async fn get_historical_data(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bars: usize,
    ) -> OhlcvSeries {
        self.fetch_historical(symbol, timeframe, bars).await.0
    }

    /// Same as [`BrokerDataProvider::get_historical_data`], also reporting
    /// whether the bars are fresh from the broker or the CSV snapshot.
    pub async fn fetch_historical(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bars: usize,
    ) -> (OhlcvSeries, DataOrigin) {
        let request = OhlcvRequest::new(symbol, timeframe, bars);

        match self.source.fetch(&request).await {
            Ok(series) => {
                info!(
                    "BrokerDataProvider: Retrieved {} bars for {} {}",
                    series.len(),
                    symbol,
                    timeframe
                );
                if let Err(e) = self.store.save(&series, symbol, timeframe) {
                    error!("BrokerDataProvider: Failed to save {} {}: {}", symbol, timeframe, e);
                }
                (series, DataOrigin::Broker)
            }
            Err(e) => {
                warn!(
                    "BrokerDataProvider: {} {} unavailable from broker ({}), loading from CSV",
                    symbol, timeframe, e
                );
                let series = self.load_data(symbol, timeframe).tail(bars);
                let origin = if series.is_empty() {
                    DataOrigin::Unavailable
                } else {
                    DataOrigin::Csv
                };
                (series, origin)
            }
        }
    }

    /// Broker only, no CSV fallback and no snapshot write.
    pub async fn fetch_live(&self, request: &OhlcvRequest) -> Result<OhlcvSeries, MarketDataError> {
        self.source.fetch(request).await
    }

    /// Refreshes the CSV snapshot from the broker.
    pub async fn update_data(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        bars: usize,
    ) -> (OhlcvSeries, DataOrigin) {
        info!("BrokerDataProvider: Updating {} {}", symbol, timeframe);
        self.fetch_historical(symbol, timeframe, bars).await
    }

    pub fn load_data(&self, symbol: &str, timeframe: Timeframe) -> OhlcvSeries {
        self.store.load(symbol, timeframe)
    }

    /// Last M1 close from the broker, else from the M1 CSV file. Does not
    /// touch the saved snapshot.
    pub async fn get_latest_price(&self, symbol: &str) -> Option<Decimal> {
        let request = OhlcvRequest::new(symbol, Timeframe::OneMin, 1);
        match self.source.fetch(&request).await {
            Ok(series) => series.last_close(),
            Err(_) => self.load_data(symbol, Timeframe::OneMin).last_close(),
        }
    }

    /// Subscribes to live bars and starts appending them to
    /// `data/{SYMBOL}_{TF}_live.csv`. Returns `false` for a repeated
    /// subscription or when the broker refuses it.
    pub async fn subscribe_live(&self, symbol: &str, timeframe: Timeframe) -> bool {
        let (symbol_id, period) = match resolve_request(symbol, timeframe) {
            Ok(resolved) => resolved,
            Err(e) => {
                error!("BrokerDataProvider: Cannot subscribe to {}: {}", symbol, e);
                return false;
            }
        };

        self.ensure_live_writer();
        match self
            .client
            .subscribe_live(symbol, symbol_id, timeframe, period)
            .await
        {
            Ok(subscribed) => subscribed,
            Err(e) => {
                error!("BrokerDataProvider: Subscription to {} {} failed: {}", symbol, timeframe, e);
                false
            }
        }
    }

    pub fn live_updates(&self) -> tokio::sync::broadcast::Receiver<LiveUpdate> {
        self.client.live_updates()
    }

    fn ensure_live_writer(&self) {
        let mut writer = self
            .live_writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if writer.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let mut updates = self.client.live_updates();
        let store = Arc::clone(&self.store);
        *writer = Some(tokio::spawn(async move {
            loop {
                match updates.recv().await {
                    Ok(LiveUpdate::Bars {
                        symbol,
                        timeframe,
                        bars,
                    }) => {
                        if let Err(e) = store.append_live(&bars, &symbol, timeframe) {
                            error!("BrokerDataProvider: Failed to append live data: {}", e);
                        }
                    }
                    Ok(LiveUpdate::Spot { .. }) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("BrokerDataProvider: Live writer lagged, {} updates lost", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
    }

    /// Symbols offered by the broker account; empty when unavailable.
    pub async fn get_available_symbols(&self) -> Vec<SymbolInfo> {
        match self.client.list_symbols().await {
            Ok(symbols) => symbols,
            Err(e) => {
                error!("BrokerDataProvider: Error getting available symbols: {}", e);
                Vec::new()
            }
        }
    }

    /// Name → id from the broker, or the built-in table when the broker
    /// list is unavailable.
    pub async fn get_symbol_ids(&self) -> BTreeMap<String, i64> {
        let listed = self.get_available_symbols().await;
        if listed.is_empty() {
            return SYMBOL_IDS
                .iter()
                .map(|(name, id)| (name.to_string(), *id))
                .collect();
        }
        listed.into_iter().map(|s| (s.name, s.id)).collect()
    }

    pub fn get_available_timeframes(&self) -> Vec<(&'static str, u32)> {
        TIMEFRAME_PERIODS.to_vec()
    }

    pub fn disconnect(&self) {
        self.client.disconnect();
        if let Some(handle) = self
            .live_writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::ctrader::messages::Trendbar;
    use crate::infrastructure::ctrader::{BrokerCredentials, ClientSettings};
    use crate::infrastructure::mock::{MockBrokerBehaviour, MockBrokerTransport};
    use rust_decimal_macros::dec;
    use std::fs;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    fn trendbars(n: i64) -> Vec<Trendbar> {
        (0..n)
            .map(|i| Trendbar {
                volume: 100,
                period: Some(9),
                low: Some(108_000 + i),
                delta_open: Some(1),
                delta_high: Some(3),
                delta_close: Some(2),
                utc_timestamp_in_minutes: 28_487_520 + i * 60,
            })
            .collect()
    }

    async fn provider(
        behaviour: MockBrokerBehaviour,
        connect: bool,
    ) -> (BrokerDataProvider, Arc<MockBrokerTransport>, TempDir) {
        let dir = tempdir().unwrap();
        let store = Arc::new(CsvStore::new(dir.path().join("data"), dir.path().join("charts")));
        let transport = Arc::new(MockBrokerTransport::new(behaviour));
        let client = CTraderClient::new(
            transport.clone(),
            BrokerCredentials {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
                account_id: 7,
                access_token: "token".to_string(),
            },
            ClientSettings {
                request_timeout: Duration::from_millis(200),
                symbols_timeout: Duration::from_millis(200),
                auth_timeout: Duration::from_millis(200),
                reconnect_base: Duration::from_secs(60),
                reconnect_max_attempts: 1,
            },
        );
        let provider = BrokerDataProvider::new(client, store);
        if connect {
            provider.connect();
            assert!(provider.client().wait_until_ready(Duration::from_secs(2)).await);
        }
        (provider, transport, dir)
    }

    fn write_csv(dir: &TempDir, name: &str, rows: usize) {
        let data = dir.path().join("data");
        fs::create_dir_all(&data).unwrap();
        let body: Vec<String> = (0..rows)
            .map(|i| format!("2024-01-01 {:02}:00 1.1 1.2 1.0 1.{} 10", i % 24, i % 10))
            .collect();
        fs::write(data.join(name), body.join("\n")).unwrap();
    }

    #[tokio::test]
    async fn test_live_fetch_is_saved_to_csv() {
        let behaviour = MockBrokerBehaviour {
            trendbars: trendbars(5),
            ..Default::default()
        };
        let (provider, _, dir) = provider(behaviour, true).await;

        let (series, origin) = provider.fetch_historical("EURUSD", Timeframe::OneHour, 3).await;

        assert_eq!(series.len(), 3);
        assert_eq!(origin, DataOrigin::Broker);
        assert_eq!(series.last_close(), Some(dec!(1.08006)));
        let saved = fs::read_to_string(dir.path().join("data").join("EURUSD_H1.csv")).unwrap();
        assert!(saved.starts_with("# Historical data for EURUSD H1"));
        assert_eq!(provider.load_data("EURUSD", Timeframe::OneHour).len(), 3);
    }

    #[tokio::test]
    async fn test_timeout_falls_back_to_csv() {
        let behaviour = MockBrokerBehaviour {
            answer_trendbars: false,
            ..Default::default()
        };
        let (provider, transport, dir) = provider(behaviour, true).await;
        write_csv(&dir, "EURUSD_H1.csv", 12);

        let (series, origin) = provider.fetch_historical("EURUSD", Timeframe::OneHour, 5).await;

        assert_eq!(series.len(), 5);
        assert_eq!(origin, DataOrigin::Csv);
        assert_eq!(transport.trendbar_requests(), 1);
        // The snapshot on disk is left alone
        assert_eq!(provider.load_data("EURUSD", Timeframe::OneHour).len(), 12);
    }

    #[tokio::test]
    async fn test_unauthenticated_reads_csv() {
        let (provider, transport, dir) = provider(MockBrokerBehaviour::default(), false).await;
        write_csv(&dir, "GBPUSD_H1.csv", 4);

        let series = provider.get_historical_data("GBPUSD", Timeframe::OneHour, 10).await;

        assert_eq!(series.len(), 4);
        assert_eq!(transport.open_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_symbol_never_reaches_broker() {
        let (provider, transport, _dir) = provider(MockBrokerBehaviour::default(), true).await;

        let (series, origin) = provider.fetch_historical("UNKNOWNSYM", Timeframe::OneHour, 10).await;

        assert!(series.is_empty());
        assert_eq!(origin, DataOrigin::Unavailable);
        assert_eq!(transport.trendbar_requests(), 0);
    }

    #[tokio::test]
    async fn test_latest_price_uses_m1_csv_offline() {
        let (provider, _, dir) = provider(MockBrokerBehaviour::default(), false).await;
        write_csv(&dir, "XAUUSD_M1.csv", 3);

        assert_eq!(provider.get_latest_price("XAUUSD").await, Some(dec!(1.2)));
        assert_eq!(provider.get_latest_price("USDCAD").await, None);
    }

    #[tokio::test]
    async fn test_symbol_ids_prefer_broker_list() {
        let (offline, _, _d1) = provider(MockBrokerBehaviour::default(), false).await;
        assert_eq!(offline.get_symbol_ids().await.get("US30"), Some(&193));

        let (online, _, _d2) = provider(MockBrokerBehaviour::default(), true).await;
        let ids = online.get_symbol_ids().await;
        assert_eq!(ids.len(), 3);
        assert_eq!(ids.get("EURUSD"), Some(&2596));
    }

    #[tokio::test]
    async fn test_live_bars_are_appended() {
        let (provider, transport, dir) = provider(MockBrokerBehaviour::default(), true).await;

        assert!(provider.subscribe_live("EURUSD", Timeframe::OneMin).await);
        assert!(!provider.subscribe_live("EURUSD", Timeframe::OneMin).await);
        transport.push_spot(2596, 108_000, 108_010, Some((1, 108_000)));

        let live = dir.path().join("data").join("EURUSD_M1_live.csv");
        for _ in 0..50 {
            if live.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let content = fs::read_to_string(&live).unwrap();
        assert!(content.starts_with("# Live data for EURUSD M1"));
        assert!(content.contains("1.08002"));
    }
}
