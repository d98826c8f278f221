use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::errors::MarketDataError;

/// Bar granularity understood by every data source.
///
/// Each variant has up to three spellings:
/// - broker style (`"H1"`), used for CSV file names and broker requests
/// - exchange style (`"1h"`), used by the crypto exchange and REST API
/// - minute suffix (`"60"`), used by chart CSV file names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    OneMin,
    TwoMin,
    ThreeMin,
    FourMin,
    FiveMin,
    TenMin,
    FifteenMin,
    ThirtyMin,
    OneHour,
    FourHour,
    TwelveHour,
    OneDay,
    OneWeek,
    OneMonth,
}

impl Timeframe {
    /// Returns the duration of this timeframe in minutes
    pub fn to_minutes(&self) -> usize {
        match self {
            Timeframe::OneMin => 1,
            Timeframe::TwoMin => 2,
            Timeframe::ThreeMin => 3,
            Timeframe::FourMin => 4,
            Timeframe::FiveMin => 5,
            Timeframe::TenMin => 10,
            Timeframe::FifteenMin => 15,
            Timeframe::ThirtyMin => 30,
            Timeframe::OneHour => 60,
            Timeframe::FourHour => 240,
            Timeframe::TwelveHour => 720,
            Timeframe::OneDay => 1440,
            Timeframe::OneWeek => 10080,
            Timeframe::OneMonth => 43200,
        }
    }

    /// Returns the duration in seconds
    pub fn to_seconds(&self) -> i64 {
        (self.to_minutes() * 60) as i64
    }

    /// Broker-style code (`M1`, `H1`, `D1`, ...)
    pub fn to_broker_string(&self) -> &'static str {
        match self {
            Timeframe::OneMin => "M1",
            Timeframe::TwoMin => "M2",
            Timeframe::ThreeMin => "M3",
            Timeframe::FourMin => "M4",
            Timeframe::FiveMin => "M5",
            Timeframe::TenMin => "M10",
            Timeframe::FifteenMin => "M15",
            Timeframe::ThirtyMin => "M30",
            Timeframe::OneHour => "H1",
            Timeframe::FourHour => "H4",
            Timeframe::TwelveHour => "H12",
            Timeframe::OneDay => "D1",
            Timeframe::OneWeek => "W1",
            Timeframe::OneMonth => "MN1",
        }
    }

    /// Exchange-style interval (`1m`, `1h`, `1d`, ...).
    ///
    /// Only the eight granularities the crypto sources serve have one.
    pub fn to_exchange_string(&self) -> Option<&'static str> {
        match self {
            Timeframe::OneMin => Some("1m"),
            Timeframe::FiveMin => Some("5m"),
            Timeframe::FifteenMin => Some("15m"),
            Timeframe::ThirtyMin => Some("30m"),
            Timeframe::OneHour => Some("1h"),
            Timeframe::FourHour => Some("4h"),
            Timeframe::OneDay => Some("1d"),
            Timeframe::OneWeek => Some("1w"),
            _ => None,
        }
    }

    /// Minute count as used in chart file names (`EURUSD60.csv`)
    pub fn to_minutes_suffix(&self) -> String {
        self.to_minutes().to_string()
    }

    /// Like [`Timeframe::to_exchange_string`] but fails for timeframes the
    /// exchange dialect cannot express.
    pub fn require_exchange_string(&self) -> Result<&'static str, MarketDataError> {
        self.to_exchange_string()
            .ok_or_else(|| MarketDataError::UnsupportedTimeframe {
                timeframe: self.to_broker_string().to_string(),
                dialect: "exchange",
            })
    }

    /// Returns all available timeframes in ascending order
    pub fn all() -> Vec<Timeframe> {
        vec![
            Timeframe::OneMin,
            Timeframe::TwoMin,
            Timeframe::ThreeMin,
            Timeframe::FourMin,
            Timeframe::FiveMin,
            Timeframe::TenMin,
            Timeframe::FifteenMin,
            Timeframe::ThirtyMin,
            Timeframe::OneHour,
            Timeframe::FourHour,
            Timeframe::TwelveHour,
            Timeframe::OneDay,
            Timeframe::OneWeek,
            Timeframe::OneMonth,
        ]
    }

    /// Timeframes the crypto sources can serve
    pub fn exchange_supported() -> Vec<Timeframe> {
        Self::all()
            .into_iter()
            .filter(|tf| tf.to_exchange_string().is_some())
            .collect()
    }

    /// Parses any known spelling. Returns `None` for anything unrecognised.
    pub fn parse(s: &str) -> Option<Timeframe> {
        let s = s.trim();

        // Broker codes are case sensitive: "1M" is not "M1"
        let broker = match s {
            "M1" => Some(Timeframe::OneMin),
            "M2" => Some(Timeframe::TwoMin),
            "M3" => Some(Timeframe::ThreeMin),
            "M4" => Some(Timeframe::FourMin),
            "M5" => Some(Timeframe::FiveMin),
            "M10" => Some(Timeframe::TenMin),
            "M15" => Some(Timeframe::FifteenMin),
            "M30" => Some(Timeframe::ThirtyMin),
            "H1" => Some(Timeframe::OneHour),
            "H4" => Some(Timeframe::FourHour),
            "H12" => Some(Timeframe::TwelveHour),
            "D1" | "D" => Some(Timeframe::OneDay),
            "W1" | "W" => Some(Timeframe::OneWeek),
            "MN1" | "MN" => Some(Timeframe::OneMonth),
            _ => None,
        };
        if broker.is_some() {
            return broker;
        }

        if let Ok(minutes) = s.parse::<usize>() {
            return Self::all().into_iter().find(|tf| tf.to_minutes() == minutes);
        }

        match s.to_lowercase().as_str() {
            "1m" | "1min" | "onemin" => Some(Timeframe::OneMin),
            "3m" | "3min" => Some(Timeframe::ThreeMin),
            "5m" | "5min" | "fivemin" => Some(Timeframe::FiveMin),
            "15m" | "15min" | "fifteenmin" => Some(Timeframe::FifteenMin),
            "30m" | "30min" => Some(Timeframe::ThirtyMin),
            "1h" | "1hour" | "60min" | "onehour" => Some(Timeframe::OneHour),
            "4h" | "4hour" | "fourhour" => Some(Timeframe::FourHour),
            "12h" | "12hour" => Some(Timeframe::TwelveHour),
            "1d" | "1day" | "daily" | "oneday" => Some(Timeframe::OneDay),
            "1w" | "1week" | "weekly" => Some(Timeframe::OneWeek),
            _ => None,
        }
    }
}

impl FromStr for Timeframe {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::parse(s).ok_or_else(|| MarketDataError::UnsupportedTimeframe {
            timeframe: s.to_string(),
            dialect: "any",
        })
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_broker_string())
    }
}

/// Maps any spelling to a [`Timeframe`], defaulting to one hour.
pub fn normalize_timeframe(timeframe: &str) -> Timeframe {
    Timeframe::parse(timeframe).unwrap_or(Timeframe::OneHour)
}

/// Any spelling to broker style, `"H1"` when unknown.
pub fn to_broker_timeframe(timeframe: &str) -> &'static str {
    normalize_timeframe(timeframe).to_broker_string()
}

/// Any spelling to exchange style, `"1h"` when unknown or not expressible.
pub fn to_exchange_timeframe(timeframe: &str) -> &'static str {
    normalize_timeframe(timeframe)
        .to_exchange_string()
        .unwrap_or("1h")
}

/// Any spelling to the chart file minute suffix, `"60"` when unknown.
pub fn timeframe_to_minutes(timeframe: &str) -> String {
    normalize_timeframe(timeframe).to_minutes_suffix()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_minutes() {
        assert_eq!(Timeframe::OneMin.to_minutes(), 1);
        assert_eq!(Timeframe::FifteenMin.to_minutes(), 15);
        assert_eq!(Timeframe::OneHour.to_minutes(), 60);
        assert_eq!(Timeframe::FourHour.to_minutes(), 240);
        assert_eq!(Timeframe::OneDay.to_minutes(), 1440);
        assert_eq!(Timeframe::OneWeek.to_minutes(), 10080);
        assert_eq!(Timeframe::OneMonth.to_minutes(), 43200);
    }

    #[test]
    fn test_parse_all_dialects() {
        assert_eq!(Timeframe::parse("H1"), Some(Timeframe::OneHour));
        assert_eq!(Timeframe::parse("1h"), Some(Timeframe::OneHour));
        assert_eq!(Timeframe::parse("60"), Some(Timeframe::OneHour));
        assert_eq!(Timeframe::parse("1Hour"), Some(Timeframe::OneHour));
        assert_eq!(Timeframe::parse("M15"), Some(Timeframe::FifteenMin));
        assert_eq!(Timeframe::parse("15m"), Some(Timeframe::FifteenMin));
        assert_eq!(Timeframe::parse("D1"), Some(Timeframe::OneDay));
        assert_eq!(Timeframe::parse("1440"), Some(Timeframe::OneDay));
        assert_eq!(Timeframe::parse("MN1"), Some(Timeframe::OneMonth));
        assert_eq!(Timeframe::parse("7"), None);
        assert_eq!(Timeframe::parse("fortnight"), None);
        assert!("garbage".parse::<Timeframe>().is_err());
    }

    #[test]
    fn test_three_dialects_round_trip() {
        for tf in Timeframe::exchange_supported() {
            let broker = tf.to_broker_string();
            let exchange = tf.to_exchange_string().unwrap();
            let minutes = tf.to_minutes_suffix();

            assert_eq!(Timeframe::parse(broker), Some(tf));
            assert_eq!(Timeframe::parse(exchange), Some(tf));
            assert_eq!(Timeframe::parse(&minutes), Some(tf));

            assert_eq!(to_broker_timeframe(exchange), broker);
            assert_eq!(to_exchange_timeframe(broker), exchange);
            assert_eq!(timeframe_to_minutes(exchange), minutes);
        }
    }

    #[test]
    fn test_normalizers_are_total() {
        assert_eq!(normalize_timeframe("nonsense"), Timeframe::OneHour);
        assert_eq!(to_broker_timeframe(""), "H1");
        assert_eq!(to_exchange_timeframe("weird"), "1h");
        assert_eq!(to_exchange_timeframe("M2"), "1h");
        assert_eq!(timeframe_to_minutes("?"), "60");
    }

    #[test]
    fn test_exchange_dialect_fails_fast() {
        assert!(Timeframe::TwelveHour.require_exchange_string().is_err());
        assert_eq!(Timeframe::FourHour.require_exchange_string().unwrap(), "4h");
        assert_eq!(Timeframe::exchange_supported().len(), 8);
    }
}
