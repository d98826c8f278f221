//! Broker message envelope and payloads.
//!
//! Every frame is a JSON object `{"clientMsgId", "payloadType", "payload"}`.
//! Responses echo the `clientMsgId` of the request they answer; events
//! (spots, heartbeats) carry none.

use crate::domain::errors::MarketDataError;
use crate::domain::market::Bar;
use chrono::DateTime;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod payload_type {
    pub const HEARTBEAT_EVENT: u32 = 51;
    pub const APPLICATION_AUTH_REQ: u32 = 2100;
    pub const APPLICATION_AUTH_RES: u32 = 2101;
    pub const ACCOUNT_AUTH_REQ: u32 = 2102;
    pub const ACCOUNT_AUTH_RES: u32 = 2103;
    pub const SYMBOLS_LIST_REQ: u32 = 2114;
    pub const SYMBOLS_LIST_RES: u32 = 2115;
    pub const SUBSCRIBE_SPOTS_REQ: u32 = 2127;
    pub const SUBSCRIBE_SPOTS_RES: u32 = 2128;
    pub const SPOT_EVENT: u32 = 2131;
    pub const SUBSCRIBE_LIVE_TRENDBAR_REQ: u32 = 2135;
    pub const GET_TRENDBARS_REQ: u32 = 2137;
    pub const GET_TRENDBARS_RES: u32 = 2138;
    pub const ERROR_RES: u32 = 2142;
    pub const SUBSCRIBE_LIVE_TRENDBAR_RES: u32 = 2165;
}

/// Broker prices are integers in 1/100000 of a unit.
const PRICE_SCALE: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerMessage {
    #[serde(
        rename = "clientMsgId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub client_msg_id: Option<String>,
    #[serde(rename = "payloadType")]
    pub payload_type: u32,
    #[serde(default)]
    pub payload: Value,
}

impl BrokerMessage {
    pub fn new<P: Serialize>(payload_type: u32, payload: &P) -> Result<Self, MarketDataError> {
        let payload = serde_json::to_value(payload).map_err(|e| MarketDataError::InvalidData {
            symbol: format!("payload {}", payload_type),
            reason: e.to_string(),
        })?;
        Ok(Self {
            client_msg_id: None,
            payload_type,
            payload,
        })
    }

    pub fn heartbeat() -> Self {
        Self {
            client_msg_id: None,
            payload_type: payload_type::HEARTBEAT_EVENT,
            payload: Value::Object(Default::default()),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.client_msg_id = Some(id.into());
        self
    }

    pub fn to_json(&self) -> Result<String, MarketDataError> {
        serde_json::to_string(self).map_err(|e| MarketDataError::InvalidData {
            symbol: format!("payload {}", self.payload_type),
            reason: e.to_string(),
        })
    }

    pub fn from_json(text: &str) -> Result<Self, MarketDataError> {
        serde_json::from_str(text).map_err(|e| MarketDataError::InvalidData {
            symbol: "broker frame".to_string(),
            reason: e.to_string(),
        })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, MarketDataError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| MarketDataError::InvalidData {
            symbol: format!("payload {}", self.payload_type),
            reason: e.to_string(),
        })
    }

    /// Turns an error response into the matching error, passes others through.
    pub fn into_result(self) -> Result<Self, MarketDataError> {
        if self.payload_type != payload_type::ERROR_RES {
            return Ok(self);
        }
        let error: ErrorRes = self.decode()?;
        Err(MarketDataError::Broker {
            code: error.error_code,
            description: error.description.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationAuthReq {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountAuthReq {
    pub ctid_trader_account_id: i64,
    pub access_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolsListReq {
    pub ctid_trader_account_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightSymbol {
    pub symbol_id: i64,
    #[serde(default)]
    pub symbol_name: Option<String>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolsListRes {
    #[serde(default)]
    pub symbol: Vec<LightSymbol>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTrendbarsReq {
    pub ctid_trader_account_id: i64,
    pub symbol_id: i64,
    pub period: u32,
    pub from_timestamp: i64,
    pub to_timestamp: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTrendbarsRes {
    #[serde(default)]
    pub period: Option<u32>,
    #[serde(default)]
    pub symbol_id: Option<i64>,
    #[serde(default)]
    pub trendbar: Vec<Trendbar>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeSpotsReq {
    pub ctid_trader_account_id: i64,
    pub symbol_id: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeLiveTrendbarReq {
    pub ctid_trader_account_id: i64,
    pub symbol_id: i64,
    pub period: u32,
}

/// Spot quote; live trendbars for subscribed periods ride along.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpotEvent {
    pub symbol_id: i64,
    #[serde(default)]
    pub bid: Option<i64>,
    #[serde(default)]
    pub ask: Option<i64>,
    #[serde(default)]
    pub trendbar: Vec<Trendbar>,
}

impl SpotEvent {
    pub fn bid_price(&self) -> Option<Decimal> {
        self.bid.map(points_to_price)
    }

    pub fn ask_price(&self) -> Option<Decimal> {
        self.ask.map(points_to_price)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRes {
    pub error_code: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// One trendbar as sent by the broker: `low` in points, the other prices as
/// deltas above `low`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trendbar {
    #[serde(default)]
    pub volume: i64,
    #[serde(default)]
    pub period: Option<u32>,
    #[serde(default)]
    pub low: Option<i64>,
    #[serde(default)]
    pub delta_open: Option<i64>,
    #[serde(default)]
    pub delta_high: Option<i64>,
    #[serde(default)]
    pub delta_close: Option<i64>,
    pub utc_timestamp_in_minutes: i64,
}

impl Trendbar {
    /// Missing deltas collapse onto `low`. `Ok(None)` without a low price or
    /// with an out-of-range timestamp; deltas that overflow are an error.
    pub fn to_bar(&self) -> Result<Option<Bar>, MarketDataError> {
        let Some(low) = self.low else {
            return Ok(None);
        };
        let Some(timestamp) = self
            .utc_timestamp_in_minutes
            .checked_mul(60)
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
        else {
            return Ok(None);
        };

        let price = |delta: Option<i64>| {
            low.checked_add(delta.unwrap_or(0))
                .map(points_to_price)
                .ok_or_else(|| MarketDataError::InvalidData {
                    symbol: format!("trendbar at minute {}", self.utc_timestamp_in_minutes),
                    reason: format!("delta {:?} overflows low {}", delta, low),
                })
        };

        Ok(Some(Bar::new(
            timestamp.naive_utc(),
            price(self.delta_open)?,
            price(self.delta_high)?,
            points_to_price(low),
            price(self.delta_close)?,
            Decimal::from(self.volume),
        )))
    }
}

pub fn points_to_price(points: i64) -> Decimal {
    Decimal::new(points, PRICE_SCALE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_envelope_field_names() {
        let msg = BrokerMessage::new(
            payload_type::GET_TRENDBARS_REQ,
            &GetTrendbarsReq {
                ctid_trader_account_id: 42,
                symbol_id: 2596,
                period: 9,
                from_timestamp: 1,
                to_timestamp: 2,
            },
        )
        .unwrap()
        .with_id("req-1");

        let value: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["clientMsgId"], "req-1");
        assert_eq!(value["payloadType"], 2137);
        assert_eq!(value["payload"]["ctidTraderAccountId"], 42);
        assert_eq!(value["payload"]["symbolId"], 2596);
        assert_eq!(value["payload"]["fromTimestamp"], 1);
    }

    #[test]
    fn test_heartbeat_has_no_id() {
        let text = BrokerMessage::heartbeat().to_json().unwrap();
        assert!(!text.contains("clientMsgId"));
        assert!(text.contains("\"payloadType\":51"));
    }

    #[test]
    fn test_trendbar_deltas() {
        let bar = Trendbar {
            volume: 321,
            period: Some(9),
            low: Some(108_250),
            delta_open: Some(25),
            delta_high: Some(120),
            delta_close: Some(80),
            utc_timestamp_in_minutes: 28_487_520,
        }
        .to_bar()
        .unwrap()
        .unwrap();

        assert_eq!(bar.low, dec!(1.08250));
        assert_eq!(bar.open, dec!(1.08275));
        assert_eq!(bar.high, dec!(1.08370));
        assert_eq!(bar.close, dec!(1.08330));
        assert_eq!(bar.volume, dec!(321));
        assert_eq!(bar.timestamp.to_string(), "2024-03-01 00:00:00");
    }

    #[test]
    fn test_trendbar_without_low_is_skipped() {
        let bar = Trendbar {
            utc_timestamp_in_minutes: 1,
            ..Default::default()
        };
        assert!(bar.to_bar().unwrap().is_none());
    }

    #[test]
    fn test_trendbar_delta_overflow_is_invalid() {
        let bar = Trendbar {
            low: Some(i64::MAX - 10),
            delta_high: Some(100),
            utc_timestamp_in_minutes: 28_487_520,
            ..Default::default()
        };
        let err = bar.to_bar().unwrap_err();
        assert!(matches!(err, MarketDataError::InvalidData { .. }));
    }

    #[test]
    fn test_error_response_becomes_broker_error() {
        let msg = BrokerMessage::from_json(
            &json!({
                "clientMsgId": "req-9",
                "payloadType": 2142,
                "payload": {"errorCode": "CH_CLIENT_AUTH_FAILURE", "description": "bad secret"}
            })
            .to_string(),
        )
        .unwrap();

        match msg.into_result() {
            Err(MarketDataError::Broker { code, description }) => {
                assert_eq!(code, "CH_CLIENT_AUTH_FAILURE");
                assert_eq!(description, "bad secret");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_trendbars_response() {
        let msg = BrokerMessage::from_json(
            r#"{"payloadType":2138,"payload":{"period":9,"symbolId":2596,
                "trendbar":[{"volume":5,"low":100000,"deltaOpen":1,"deltaHigh":2,"deltaClose":1,"utcTimestampInMinutes":28487520}]}}"#,
        )
        .unwrap();

        let res: GetTrendbarsRes = msg.decode().unwrap();
        assert_eq!(res.period, Some(9));
        assert_eq!(res.trendbar.len(), 1);
        assert_eq!(res.trendbar[0].to_bar().unwrap().unwrap().high, dec!(1.00002));
    }
}
