use chrono::NaiveDate;
use rust_decimal_macros::dec;
use std::fs;
use tempfile::tempdir;
use tradefeed::domain::market::symbol::{denormalize_pair, format_exchange_pair, normalize_symbol};
use tradefeed::domain::market::timeframe::normalize_timeframe;
use tradefeed::domain::market::{Bar, MarketType, OhlcvSeries, Timeframe};
use tradefeed::infrastructure::csv_store::CsvStore;

#[test]
fn test_timeframe_spellings_agree() {
    for tf in Timeframe::all() {
        assert_eq!(Timeframe::parse(tf.to_broker_string()), Some(tf));
        if let Some(exchange) = tf.to_exchange_string() {
            assert_eq!(Timeframe::parse(exchange), Some(tf));
        }
    }
    assert_eq!(normalize_timeframe("240"), Timeframe::FourHour);
    assert_eq!(normalize_timeframe("nonsense"), Timeframe::OneHour);
}

#[test]
fn test_symbol_forms() {
    assert_eq!(normalize_symbol(" btc/usdt "), "BTCUSDT");
    assert_eq!(format_exchange_pair("BTCUSDT"), "BTC/USDT");
    assert_eq!(denormalize_pair("ETH/USDT"), "ETHUSDT");
    assert_eq!(MarketType::infer("EURUSD"), MarketType::Forex);
    assert_eq!(MarketType::infer("SOLUSDT"), MarketType::Crypto);
}

#[test]
fn test_saved_file_keeps_five_decimals() {
    let dir = tempdir().unwrap();
    let store = CsvStore::new(dir.path().join("data"), dir.path().join("charts"));
    let ts = NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_hms_opt(12, 0, 0)
        .unwrap();
    let series = OhlcvSeries::new(vec![Bar::new(
        ts,
        dec!(1.0801),
        dec!(1.0809),
        dec!(1.07995),
        dec!(1.08052),
        dec!(1520.7),
    )]);

    let path = store.save(&series, "EURUSD", Timeframe::OneHour).unwrap();
    let text = fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("# Historical data for EURUSD H1\n"));
    assert!(text.ends_with("2024-03-01 12:00 1.08010 1.08090 1.07995 1.08052 1520"));

    let loaded = store.load("EURUSD", Timeframe::OneHour);
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded.last_close(), Some(dec!(1.08052)));
    assert_eq!(loaded.first().unwrap().timestamp, ts);
}

#[test]
fn test_save_refuses_empty_series() {
    let dir = tempdir().unwrap();
    let store = CsvStore::new(dir.path().join("data"), dir.path().join("charts"));

    assert!(store.save(&OhlcvSeries::empty(), "EURUSD", Timeframe::OneHour).is_err());
    assert!(!store.path_for("EURUSD", Timeframe::OneHour).exists());
}
