use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{TempDir, tempdir};
use tradefeed::application::market_data::{BrokerDataProvider, CryptoDataProvider, DataProcessor};
use tradefeed::domain::market::{DataOrigin, DataSource, MarketType, Timeframe};
use tradefeed::infrastructure::csv_source::CsvOhlcvSource;
use tradefeed::infrastructure::csv_store::CsvStore;
use tradefeed::infrastructure::ctrader::messages::Trendbar;
use tradefeed::infrastructure::ctrader::{BrokerCredentials, CTraderClient, ClientSettings};
use tradefeed::infrastructure::mock::{
    MockBrokerBehaviour, MockBrokerTransport, MockOhlcvSource, sample_series,
};

struct Harness {
    processor: DataProcessor,
    store: Arc<CsvStore>,
    exchange: Arc<MockOhlcvSource>,
    api: Arc<MockOhlcvSource>,
    _dir: TempDir,
}

fn harness(exchange: MockOhlcvSource) -> Harness {
    let dir = tempdir().unwrap();
    let store = Arc::new(CsvStore::new(dir.path().join("data"), dir.path().join("charts")));
    let exchange = Arc::new(exchange);
    let api = Arc::new(MockOhlcvSource::returning("api", sample_series(10)));
    let csv = Arc::new(CsvOhlcvSource::with_charts(store.clone(), MarketType::Crypto));
    let crypto = CryptoDataProvider::new(store.clone(), csv)
        .with_exchange(exchange.clone())
        .with_api(api.clone());
    let processor = DataProcessor::new(store.clone(), Arc::new(crypto), Duration::from_secs(300));
    Harness {
        processor,
        store,
        exchange,
        api,
        _dir: dir,
    }
}

fn trendbars(n: i64) -> Vec<Trendbar> {
    (0..n)
        .map(|i| Trendbar {
            volume: 50,
            period: Some(9),
            low: Some(108_000 + i * 10),
            delta_open: Some(2),
            delta_high: Some(6),
            delta_close: Some(4),
            utc_timestamp_in_minutes: 28_487_520 + i * 60,
        })
        .collect()
}

async fn connected_broker(
    store: Arc<CsvStore>,
    behaviour: MockBrokerBehaviour,
) -> (Arc<BrokerDataProvider>, Arc<MockBrokerTransport>) {
    let transport = Arc::new(MockBrokerTransport::new(behaviour));
    let client = CTraderClient::new(
        transport.clone(),
        BrokerCredentials {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            account_id: 42,
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
    let broker = Arc::new(BrokerDataProvider::new(client, store));
    broker.connect();
    assert!(broker.client().wait_until_ready(Duration::from_secs(2)).await);
    (broker, transport)
}

#[tokio::test]
async fn test_csv_tail_is_returned_in_order() {
    let h = harness(MockOhlcvSource::empty("exchange"));
    h.store
        .save(&sample_series(100), "EURUSD", Timeframe::OneHour)
        .unwrap();

    let series = h.processor.get_data("EURUSD", "H1", 50, DataSource::Csv).await;

    assert_eq!(series.len(), 50);
    assert!(series.is_strictly_increasing());
    assert_eq!(series.first().unwrap().close, dec!(150));
    assert_eq!(series.last().unwrap().close, dec!(199));
}

#[tokio::test]
async fn test_unknown_symbol_yields_empty_series() {
    let h = harness(MockOhlcvSource::empty("exchange"));

    for source in [DataSource::Auto, DataSource::Csv, DataSource::Live, DataSource::Broker] {
        let series = h.processor.get_data("UNKNOWNSYM", "H1", 10, source).await;
        assert!(series.is_empty(), "{} should yield nothing", source);
    }
    assert!(h.processor.cache().is_empty());
}

#[tokio::test]
async fn test_identical_requests_share_cached_series() {
    let h = harness(MockOhlcvSource::empty("exchange"));
    h.store
        .save(&sample_series(20), "GBPUSD", Timeframe::FourHour)
        .unwrap();

    let first = h.processor.get_data("GBPUSD", "4h", 10, DataSource::Auto).await;
    let second = h.processor.get_data("gbpusd", "H4", 10, DataSource::Auto).await;
    assert!(Arc::ptr_eq(&first, &second));

    let missing_a = h.processor.get_data("NZDUSD", "H4", 10, DataSource::Auto).await;
    let missing_b = h.processor.get_data("NZDUSD", "H4", 10, DataSource::Auto).await;
    assert!(!Arc::ptr_eq(&missing_a, &missing_b));
}

#[tokio::test]
async fn test_crypto_auto_stops_at_exchange() {
    let h = harness(MockOhlcvSource::returning("exchange", sample_series(30)));

    let series = h.processor.get_data("BTCUSDT", "1h", 12, DataSource::Auto).await;

    assert_eq!(series.len(), 12);
    assert_eq!(h.exchange.calls(), 1);
    assert_eq!(h.api.calls(), 0);
}

#[tokio::test]
async fn test_crypto_falls_through_to_api() {
    let h = harness(MockOhlcvSource::failing("exchange", "rate limited"));

    let series = h.processor.get_data("ETHUSDT", "H1", 5, DataSource::Auto).await;

    assert_eq!(series.len(), 5);
    assert_eq!(h.exchange.calls(), 1);
    assert_eq!(h.api.calls(), 1);
}

#[tokio::test]
async fn test_broker_data_flows_through_facade() {
    let h = harness(MockOhlcvSource::empty("exchange"));
    let behaviour = MockBrokerBehaviour {
        trendbars: trendbars(6),
        ..Default::default()
    };
    let (broker, transport) = connected_broker(h.store.clone(), behaviour).await;
    let processor = h.processor.with_broker(broker);

    let series = processor.get_data("EURUSD", "H1", 4, DataSource::Auto).await;

    assert_eq!(series.len(), 4);
    assert_eq!(transport.trendbar_requests(), 1);
    assert_eq!(series.last().unwrap().low, dec!(1.08050));
    // The fetched bars are also the new CSV snapshot
    assert_eq!(h.store.load("EURUSD", Timeframe::OneHour).len(), 4);

    processor.close().await;
}

#[tokio::test]
async fn test_live_policy_skips_csv() {
    let h = harness(MockOhlcvSource::empty("exchange"));
    let behaviour = MockBrokerBehaviour {
        answer_trendbars: false,
        ..Default::default()
    };
    h.store
        .save(&sample_series(10), "EURUSD", Timeframe::OneHour)
        .unwrap();
    let (broker, _transport) = connected_broker(h.store.clone(), behaviour).await;
    let processor = h.processor.with_broker(broker);

    let live = processor.get_data("EURUSD", "H1", 5, DataSource::Live).await;
    assert!(live.is_empty());

    let auto = processor.get_data("EURUSD", "H1", 5, DataSource::Auto).await;
    assert_eq!(auto.len(), 5);

    processor.close().await;
}

#[test]
fn test_update_data_refreshes_cache() {
    tokio_test::block_on(async {
        let h = harness(MockOhlcvSource::empty("exchange"));
        h.store
            .save(&sample_series(10), "USDJPY", Timeframe::OneDay)
            .unwrap();

        let before = h.processor.get_data("USDJPY", "D1", 10, DataSource::Auto).await;
        h.store
            .save(&sample_series(12), "USDJPY", Timeframe::OneDay)
            .unwrap();
        let after = h.processor.update_data("USDJPY", "D1", 10).await;

        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(after.last().unwrap().close, dec!(111));
    });
}

#[tokio::test]
async fn test_download_never_rewrites_csv_history() {
    let h = harness(MockOhlcvSource::empty("exchange"));
    h.store
        .save(&sample_series(1000), "EURUSD", Timeframe::OneHour)
        .unwrap();

    let download = h.processor.download("eurusd", "H1", 500, DataSource::Auto).await;

    assert_eq!(download.series.len(), 500);
    assert_eq!(download.origin, DataOrigin::Csv);
    assert!(download.saved.is_none());
    assert_eq!(h.store.load("EURUSD", Timeframe::OneHour).len(), 1000);
}

#[tokio::test]
async fn test_download_saves_remote_data_under_normalized_symbol() {
    let h = harness(MockOhlcvSource::returning("exchange", sample_series(30)));

    let download = h.processor.download("btc/usdt", "1h", 20, DataSource::Auto).await;

    assert_eq!(download.origin, DataOrigin::Remote);
    let path = download.saved.expect("remote data is saved");
    assert_eq!(path, h.store.path_for("BTCUSDT", Timeframe::OneHour));
    assert!(path.ends_with("BTCUSDT_H1.csv"));
    assert_eq!(h.store.load("BTCUSDT", Timeframe::OneHour).len(), 20);
}

#[tokio::test]
async fn test_download_skips_cache_and_empty_results() {
    let h = harness(MockOhlcvSource::returning("exchange", sample_series(30)));

    let cached = h.processor.get_data("BTCUSDT", "H1", 10, DataSource::Auto).await;
    let download = h.processor.download("BTCUSDT", "H1", 10, DataSource::Auto).await;
    assert_eq!(download.origin, DataOrigin::Remote);
    assert!(!Arc::ptr_eq(&cached, &download.series));
    assert_eq!(h.exchange.calls(), 2);

    let missing = h.processor.download("NZDCHF", "H1", 10, DataSource::Auto).await;
    assert_eq!(missing.origin, DataOrigin::Unavailable);
    assert!(missing.saved.is_none());
    assert!(!h.store.path_for("NZDCHF", Timeframe::OneHour).exists());
}
