//! Static broker identifier tables.

use crate::domain::market::Timeframe;

/// Broker symbol ids. Aliases share an id (`BTCUSDT` trades as `BTCUSD`).
pub const SYMBOL_IDS: &[(&str, i64)] = &[
    // Crypto
    ("BTCUSD", 101),
    ("BTCUSDT", 101),
    ("ETHUSD", 102),
    ("ETHUSDT", 102),
    ("XRPUSD", 2592),
    ("ADAUSD", 2597),
    // Forex
    ("EURUSD", 2596),
    ("GBPUSD", 2),
    ("GBPJPY", 4410),
    ("USDJPY", 4),
    ("AUDUSD", 5),
    ("USDCAD", 8),
    // Indices
    ("US30", 193),
    ("US500", 2600),
    ("USTEC", 2552),
    ("NAS100", 185),
    ("SPX500", 2600),
    // Metals
    ("XAUUSD", 2469),
    ("XAGUSD", 42),
];

/// Broker trendbar period codes
pub const TIMEFRAME_PERIODS: &[(&str, u32)] = &[
    ("M1", 1),
    ("M2", 2),
    ("M3", 3),
    ("M4", 4),
    ("M5", 5),
    ("M10", 6),
    ("M15", 7),
    ("M30", 8),
    ("H1", 9),
    ("H4", 10),
    ("H12", 11),
    ("D1", 12),
    ("W1", 13),
    ("MN1", 14),
];

/// Id for a broker-form symbol (see [`crate::domain::market::symbol::broker_symbol`]).
pub fn symbol_id(symbol: &str) -> Option<i64> {
    SYMBOL_IDS
        .iter()
        .find(|(name, _)| *name == symbol)
        .map(|(_, id)| *id)
}

/// First table name for an id, which is the primary spelling.
pub fn symbol_name(id: i64) -> Option<&'static str> {
    SYMBOL_IDS
        .iter()
        .find(|(_, sid)| *sid == id)
        .map(|(name, _)| *name)
}

pub fn period_code(timeframe: Timeframe) -> Option<u32> {
    let code = timeframe.to_broker_string();
    TIMEFRAME_PERIODS
        .iter()
        .find(|(name, _)| *name == code)
        .map(|(_, period)| *period)
}

pub fn timeframe_for_period(period: u32) -> Option<Timeframe> {
    TIMEFRAME_PERIODS
        .iter()
        .find(|(_, p)| *p == period)
        .and_then(|(name, _)| Timeframe::parse(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_lookup() {
        assert_eq!(symbol_id("EURUSD"), Some(2596));
        assert_eq!(symbol_id("BTCUSDT"), symbol_id("BTCUSD"));
        assert_eq!(symbol_id("UNKNOWNSYM"), None);
        assert_eq!(symbol_name(101), Some("BTCUSD"));
        assert_eq!(symbol_name(2600), Some("US500"));
    }

    #[test]
    fn test_every_timeframe_has_a_period() {
        for tf in Timeframe::all() {
            let period = period_code(tf).unwrap();
            assert_eq!(timeframe_for_period(period), Some(tf));
        }
        assert_eq!(period_code(Timeframe::TenMin), Some(6));
        assert_eq!(timeframe_for_period(99), None);
    }
}
