use crate::domain::errors::MarketDataError;
use crate::domain::market::{Bar, OhlcvSeries};
use crate::domain::ports::{OhlcvRequest, OhlcvSource, PairDirectory};
use crate::infrastructure::ctrader::messages::{BrokerMessage, Trendbar, payload_type};
use crate::infrastructure::ctrader::transport::{BrokerChannel, BrokerTransport};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};
use tracing::debug;

/// `n` hourly bars starting 2024-01-01 00:00 with closes 100, 101, ...
pub fn sample_series(n: usize) -> OhlcvSeries {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or_default();
    let bars = (0..n)
        .map(|i| {
            let close = Decimal::from(100 + i as i64);
            Bar::new(
                start + ChronoDuration::hours(i as i64),
                close - Decimal::ONE,
                close + Decimal::ONE,
                close - Decimal::TWO,
                close,
                Decimal::from(1000),
            )
        })
        .collect();
    OhlcvSeries::new(bars)
}

enum Outcome {
    Series(OhlcvSeries),
    Fail(String),
}

/// Scripted [`OhlcvSource`] that counts its calls.
pub struct MockOhlcvSource {
    name: String,
    outcome: Outcome,
    calls: AtomicUsize,
}

impl MockOhlcvSource {
    pub fn empty(name: &str) -> Self {
        Self::returning(name, OhlcvSeries::empty())
    }

    pub fn returning(name: &str, series: OhlcvSeries) -> Self {
        Self {
            name: name.to_string(),
            outcome: Outcome::Series(series),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(name: &str, reason: &str) -> Self {
        Self {
            name: name.to_string(),
            outcome: Outcome::Fail(reason.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OhlcvSource for MockOhlcvSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self, request: &OhlcvRequest) -> Result<OhlcvSeries, MarketDataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.outcome {
            Outcome::Series(series) => Ok(series.tail(request.bars)),
            Outcome::Fail(reason) => Err(MarketDataError::http(reason)),
        }
    }
}

/// Fixed pair list, or a failure when empty.
pub struct MockPairDirectory {
    pairs: Vec<String>,
}

impl MockPairDirectory {
    pub fn new(pairs: &[&str]) -> Self {
        Self {
            pairs: pairs.iter().map(|p| p.to_string()).collect(),
        }
    }
}

#[async_trait]
impl PairDirectory for MockPairDirectory {
    async fn list_pairs(&self, limit: usize) -> Result<Vec<String>, MarketDataError> {
        if self.pairs.is_empty() {
            return Err(MarketDataError::http("pair listing unavailable"));
        }
        Ok(self.pairs.iter().take(limit).cloned().collect())
    }
}

/// How the fake broker answers.
#[derive(Debug, Clone)]
pub struct MockBrokerBehaviour {
    pub reject_auth: bool,
    pub fail_open: bool,
    /// How long `open()` takes before answering
    pub open_delay: Duration,
    /// `false` leaves trendbar requests unanswered
    pub answer_trendbars: bool,
    pub trendbars: Vec<Trendbar>,
    pub symbols: Vec<(i64, String)>,
}

impl Default for MockBrokerBehaviour {
    fn default() -> Self {
        Self {
            reject_auth: false,
            fail_open: false,
            open_delay: Duration::ZERO,
            answer_trendbars: true,
            trendbars: Vec::new(),
            symbols: vec![
                (2596, "EURUSD".to_string()),
                (101, "BTCUSD".to_string()),
                (2469, "XAUUSD".to_string()),
            ],
        }
    }
}

struct LiveConnection {
    to_client: mpsc::WeakSender<BrokerMessage>,
    kill: Arc<Notify>,
}

/// In-process broker: answers the auth handshake, symbol lists, trendbar
/// requests and subscriptions on a [`BrokerChannel`] pair.
pub struct MockBrokerTransport {
    behaviour: MockBrokerBehaviour,
    opens: AtomicUsize,
    refuse_connections: AtomicBool,
    symbol_requests: Arc<AtomicUsize>,
    trendbar_requests: Arc<AtomicUsize>,
    current: Mutex<Option<LiveConnection>>,
}

impl MockBrokerTransport {
    pub fn new(behaviour: MockBrokerBehaviour) -> Self {
        Self {
            refuse_connections: AtomicBool::new(behaviour.fail_open),
            behaviour,
            opens: AtomicUsize::new(0),
            symbol_requests: Arc::new(AtomicUsize::new(0)),
            trendbar_requests: Arc::new(AtomicUsize::new(0)),
            current: Mutex::new(None),
        }
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Makes every later `open()` fail (or succeed again).
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.refuse_connections.store(refuse, Ordering::SeqCst);
    }

    pub fn symbol_requests(&self) -> usize {
        self.symbol_requests.load(Ordering::SeqCst)
    }

    pub fn trendbar_requests(&self) -> usize {
        self.trendbar_requests.load(Ordering::SeqCst)
    }

    /// Closes the current connection from the broker side.
    pub fn drop_connection(&self) {
        let connection = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(connection) = connection {
            connection.kill.notify_one();
        }
    }

    /// Pushes a spot event, optionally carrying one live trendbar
    /// `(period, low)` stamped at the current minute.
    pub fn push_spot(&self, symbol_id: i64, bid: i64, ask: i64, trendbar: Option<(u32, i64)>) {
        let minutes = Utc::now().timestamp() / 60;
        let trendbars: Vec<Value> = trendbar
            .map(|(period, low)| {
                json!({
                    "volume": 1,
                    "period": period,
                    "low": low,
                    "deltaOpen": 0,
                    "deltaHigh": 5,
                    "deltaClose": 2,
                    "utcTimestampInMinutes": minutes,
                })
            })
            .into_iter()
            .collect();

        let event = BrokerMessage {
            client_msg_id: None,
            payload_type: payload_type::SPOT_EVENT,
            payload: json!({
                "symbolId": symbol_id,
                "bid": bid,
                "ask": ask,
                "trendbar": trendbars,
            }),
        };

        let current = self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(to_client) = current.as_ref().and_then(|c| c.to_client.upgrade()) {
            let _ = to_client.try_send(event);
        }
    }
}

fn reply(
    behaviour: &MockBrokerBehaviour,
    symbol_requests: &AtomicUsize,
    trendbar_requests: &AtomicUsize,
    request: &BrokerMessage,
) -> Option<BrokerMessage> {
    let (response_type, payload) = match request.payload_type {
        payload_type::APPLICATION_AUTH_REQ if behaviour.reject_auth => (
            payload_type::ERROR_RES,
            json!({"errorCode": "CH_CLIENT_AUTH_FAILURE", "description": "rejected"}),
        ),
        payload_type::APPLICATION_AUTH_REQ => (payload_type::APPLICATION_AUTH_RES, json!({})),
        payload_type::ACCOUNT_AUTH_REQ => (
            payload_type::ACCOUNT_AUTH_RES,
            json!({"ctidTraderAccountId": request.payload["ctidTraderAccountId"]}),
        ),
        payload_type::SYMBOLS_LIST_REQ => {
            symbol_requests.fetch_add(1, Ordering::SeqCst);
            let symbols: Vec<Value> = behaviour
                .symbols
                .iter()
                .map(|(id, name)| json!({"symbolId": id, "symbolName": name, "enabled": true}))
                .collect();
            (payload_type::SYMBOLS_LIST_RES, json!({"symbol": symbols}))
        }
        payload_type::GET_TRENDBARS_REQ => {
            trendbar_requests.fetch_add(1, Ordering::SeqCst);
            if !behaviour.answer_trendbars {
                return None;
            }
            (
                payload_type::GET_TRENDBARS_RES,
                json!({
                    "period": request.payload["period"],
                    "symbolId": request.payload["symbolId"],
                    "trendbar": serde_json::to_value(&behaviour.trendbars).unwrap_or_default(),
                }),
            )
        }
        payload_type::SUBSCRIBE_SPOTS_REQ => (payload_type::SUBSCRIBE_SPOTS_RES, json!({})),
        payload_type::SUBSCRIBE_LIVE_TRENDBAR_REQ => {
            (payload_type::SUBSCRIBE_LIVE_TRENDBAR_RES, json!({}))
        }
        payload_type::HEARTBEAT_EVENT => return None,
        other => (
            payload_type::ERROR_RES,
            json!({"errorCode": "UNSUPPORTED", "description": format!("type {}", other)}),
        ),
    };

    Some(BrokerMessage {
        client_msg_id: request.client_msg_id.clone(),
        payload_type: response_type,
        payload,
    })
}

#[async_trait]
impl BrokerTransport for MockBrokerTransport {
    async fn open(&self) -> Result<BrokerChannel, MarketDataError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if !self.behaviour.open_delay.is_zero() {
            tokio::time::sleep(self.behaviour.open_delay).await;
        }
        if self.refuse_connections.load(Ordering::SeqCst) {
            return Err(MarketDataError::ConnectionLost {
                reason: "mock broker refused connection".to_string(),
            });
        }

        let (client, server) = BrokerChannel::pair();
        let BrokerChannel {
            outbound: to_client,
            inbound: mut from_client,
        } = server;
        let kill = Arc::new(Notify::new());

        *self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(LiveConnection {
            to_client: to_client.downgrade(),
            kill: Arc::clone(&kill),
        });

        let behaviour = self.behaviour.clone();
        let symbol_requests = Arc::clone(&self.symbol_requests);
        let trendbar_requests = Arc::clone(&self.trendbar_requests);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = kill.notified() => break,
                    request = from_client.recv() => {
                        let Some(request) = request else { break };
                        if let Some(response) =
                            reply(&behaviour, &symbol_requests, &trendbar_requests, &request)
                            && to_client.send(response).await.is_err()
                        {
                            break;
                        }
                    }
                }
            }
            debug!("MockBrokerTransport: connection closed");
        });

        Ok(client)
    }
}
