//! cTrader Open API client
//!
//! Owns one broker session at a time and exposes:
//! - the connection state machine on a watch channel
//!   (`Disconnected → Connecting → AppAuthenticated → Ready`)
//! - request/response correlation by `clientMsgId`, one oneshot per request
//! - automatic reconnect with exponential backoff after unexpected drops
//! - live trendbar and spot updates on a broadcast channel

use super::messages::{
    AccountAuthReq, ApplicationAuthReq, BrokerMessage, GetTrendbarsReq, GetTrendbarsRes,
    SpotEvent, SubscribeLiveTrendbarReq, SubscribeSpotsReq, SymbolsListReq, SymbolsListRes,
    payload_type,
};
use super::symbols::timeframe_for_period;
use super::transport::BrokerTransport;
use crate::domain::errors::MarketDataError;
use crate::domain::market::{Bar, Timeframe};
use chrono::{NaiveDateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AppAuthenticated,
    Ready,
}

/// Pushed to every live subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum LiveUpdate {
    Bars {
        symbol: String,
        timeframe: Timeframe,
        bars: Vec<Bar>,
    },
    Spot {
        symbol: String,
        bid: Option<Decimal>,
        ask: Option<Decimal>,
        received_at: NaiveDateTime,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolInfo {
    pub id: i64,
    pub name: String,
}

#[derive(Clone)]
pub struct BrokerCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub account_id: i64,
    pub access_token: String,
}

impl std::fmt::Debug for BrokerCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerCredentials")
            .field("client_id", &self.client_id)
            .field("account_id", &self.account_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub request_timeout: Duration,
    pub symbols_timeout: Duration,
    pub auth_timeout: Duration,
    /// First reconnect delay; each further attempt doubles it
    pub reconnect_base: Duration,
    pub reconnect_max_attempts: u32,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            symbols_timeout: Duration::from_secs(10),
            auth_timeout: Duration::from_secs(15),
            reconnect_base: Duration::from_secs(5),
            reconnect_max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct Subscription {
    symbol: String,
    symbol_id: i64,
    timeframe: Timeframe,
    period: u32,
}

struct Session {
    epoch: u64,
    outbound: Option<mpsc::Sender<BrokerMessage>>,
}

struct Inner {
    transport: Arc<dyn BrokerTransport>,
    credentials: BrokerCredentials,
    settings: ClientSettings,
    state_tx: watch::Sender<ConnectionState>,
    session: Mutex<Session>,
    pending: Mutex<HashMap<String, oneshot::Sender<BrokerMessage>>>,
    request_counter: AtomicU64,
    reconnect_scheduled: AtomicBool,
    shutdown: AtomicBool,
    live_tx: broadcast::Sender<LiveUpdate>,
    subscriptions: Mutex<HashSet<Subscription>>,
    symbol_cache: RwLock<Option<Vec<SymbolInfo>>>,
}

/// Cheap to clone; every clone drives the same session.
#[derive(Clone)]
pub struct CTraderClient {
    inner: Arc<Inner>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl CTraderClient {
    pub fn new(
        transport: Arc<dyn BrokerTransport>,
        credentials: BrokerCredentials,
        settings: ClientSettings,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (live_tx, _) = broadcast::channel(1000);

        Self {
            inner: Arc::new(Inner {
                transport,
                credentials,
                settings,
                state_tx,
                session: Mutex::new(Session {
                    epoch: 0,
                    outbound: None,
                }),
                pending: Mutex::new(HashMap::new()),
                request_counter: AtomicU64::new(1),
                reconnect_scheduled: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                live_tx,
                subscriptions: Mutex::new(HashSet::new()),
                symbol_cache: RwLock::new(None),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn is_ready(&self) -> bool {
        self.state() == ConnectionState::Ready
    }

    pub fn is_reconnect_scheduled(&self) -> bool {
        self.inner.reconnect_scheduled.load(Ordering::SeqCst)
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.inner.settings
    }

    /// Starts connecting in the background and returns at once. Returns
    /// `false` when a session is already up or being set up.
    pub fn connect(&self) -> bool {
        if self.state() != ConnectionState::Disconnected || self.is_reconnect_scheduled() {
            debug!("CTraderClient: connect() ignored, state {:?}", self.state());
            return false;
        }
        self.inner.shutdown.store(false, Ordering::SeqCst);
        info!("CTraderClient: Connecting to cTrader API...");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if let Err(e) = Inner::establish(&inner, false).await {
                error!("CTraderClient: Connection failed: {}", e);
                Inner::schedule_reconnect(&inner);
            }
        });
        true
    }

    /// Closes the session without scheduling a reconnect.
    pub fn disconnect(&self) {
        info!("CTraderClient: Disconnecting");
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.end_session(None);
    }

    /// Waits until the session is ready or `timeout` passes.
    pub async fn wait_until_ready(&self, timeout: Duration) -> bool {
        let mut rx = self.watch_state();
        tokio::time::timeout(timeout, rx.wait_for(|s| *s == ConnectionState::Ready))
            .await
            .map(|r| r.is_ok())
            .unwrap_or(false)
    }

    pub fn live_updates(&self) -> broadcast::Receiver<LiveUpdate> {
        self.inner.live_tx.subscribe()
    }

    /// Historical trendbars in `[from, to]` (epoch milliseconds).
    pub async fn get_trendbars(
        &self,
        symbol_id: i64,
        period: u32,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<Bar>, MarketDataError> {
        self.ensure_ready()?;

        let msg = BrokerMessage::new(
            payload_type::GET_TRENDBARS_REQ,
            &GetTrendbarsReq {
                ctid_trader_account_id: self.inner.credentials.account_id,
                symbol_id,
                period,
                from_timestamp: from_ms,
                to_timestamp: to_ms,
            },
        )?;

        let response = self
            .inner
            .request("trendbars", msg, self.inner.settings.request_timeout)
            .await?;
        expect_type(&response, payload_type::GET_TRENDBARS_RES)?;

        let res: GetTrendbarsRes = response.decode()?;
        let mut bars: Vec<Bar> = Vec::with_capacity(res.trendbar.len());
        for trendbar in &res.trendbar {
            if let Some(bar) = trendbar.to_bar()? {
                bars.push(bar);
            }
        }
        if bars.len() < res.trendbar.len() {
            warn!(
                "CTraderClient: Skipped {} trendbars without prices",
                res.trendbar.len() - bars.len()
            );
        }
        Ok(bars)
    }

    /// Symbols offered by the account. Cached after the first success.
    pub async fn list_symbols(&self) -> Result<Vec<SymbolInfo>, MarketDataError> {
        self.ensure_ready()?;

        if let Ok(cache) = self.inner.symbol_cache.read()
            && let Some(symbols) = cache.as_ref()
        {
            return Ok(symbols.clone());
        }

        info!("CTraderClient: Requesting symbol list...");
        let msg = BrokerMessage::new(
            payload_type::SYMBOLS_LIST_REQ,
            &SymbolsListReq {
                ctid_trader_account_id: self.inner.credentials.account_id,
            },
        )?;
        let response = self
            .inner
            .request("symbols", msg, self.inner.settings.symbols_timeout)
            .await?;
        expect_type(&response, payload_type::SYMBOLS_LIST_RES)?;

        let res: SymbolsListRes = response.decode()?;
        let symbols: Vec<SymbolInfo> = res
            .symbol
            .into_iter()
            .filter(|s| s.enabled.unwrap_or(true))
            .filter_map(|s| {
                Some(SymbolInfo {
                    id: s.symbol_id,
                    name: s.symbol_name?,
                })
            })
            .collect();

        info!("CTraderClient: Received {} symbols", symbols.len());
        match self.inner.symbol_cache.write() {
            Ok(mut cache) => *cache = Some(symbols.clone()),
            Err(poisoned) => *poisoned.into_inner() = Some(symbols.clone()),
        }
        Ok(symbols)
    }

    /// Subscribes to spots and live trendbars. Returns `false` when the
    /// subscription already exists.
    pub async fn subscribe_live(
        &self,
        symbol: &str,
        symbol_id: i64,
        timeframe: Timeframe,
        period: u32,
    ) -> Result<bool, MarketDataError> {
        self.ensure_ready()?;

        let subscription = Subscription {
            symbol: symbol.to_string(),
            symbol_id,
            timeframe,
            period,
        };
        if lock(&self.inner.subscriptions).contains(&subscription) {
            info!("CTraderClient: Already subscribed to {} {}", symbol, timeframe);
            return Ok(false);
        }

        info!("CTraderClient: Subscribing to live {} data for {}...", timeframe, symbol);
        self.inner.send_subscription(&subscription).await?;
        lock(&self.inner.subscriptions).insert(subscription);
        info!("CTraderClient: Subscribed to live {} data for {}", timeframe, symbol);
        Ok(true)
    }

    fn ensure_ready(&self) -> Result<(), MarketDataError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(MarketDataError::NotAuthenticated)
        }
    }
}

/// `base · 2^attempt`, with `attempt` counted from zero
fn reconnect_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

/// How far a failed session setup got
enum EstablishError {
    /// No session was installed
    Open(MarketDataError),
    /// A session was installed, then lost or rejected
    Session(MarketDataError),
}

impl std::fmt::Display for EstablishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EstablishError::Open(e) | EstablishError::Session(e) => e.fmt(f),
        }
    }
}

fn expect_type(msg: &BrokerMessage, expected: u32) -> Result<(), MarketDataError> {
    if msg.payload_type == expected {
        Ok(())
    } else {
        Err(MarketDataError::InvalidData {
            symbol: format!("payload {}", expected),
            reason: format!("unexpected response type {}", msg.payload_type),
        })
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn next_request_id(&self, prefix: &str) -> String {
        format!(
            "{}-{}",
            prefix,
            self.request_counter.fetch_add(1, Ordering::SeqCst)
        )
    }

    /// Sends `msg` under a fresh request id and waits for the correlated
    /// response. Error responses come back as `Err`.
    async fn request(
        &self,
        prefix: &str,
        msg: BrokerMessage,
        timeout: Duration,
    ) -> Result<BrokerMessage, MarketDataError> {
        let request_id = self.next_request_id(prefix);
        let outbound = lock(&self.session)
            .outbound
            .clone()
            .ok_or_else(|| MarketDataError::ConnectionLost {
                reason: "no open session".to_string(),
            })?;

        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(request_id.clone(), tx);

        if outbound.send(msg.with_id(request_id.clone())).await.is_err() {
            lock(&self.pending).remove(&request_id);
            return Err(MarketDataError::ConnectionLost {
                reason: "session closed while sending".to_string(),
            });
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => response.into_result(),
            Ok(Err(_)) => Err(MarketDataError::ConnectionLost {
                reason: format!("session closed before {} was answered", request_id),
            }),
            Err(_) => {
                lock(&self.pending).remove(&request_id);
                Err(MarketDataError::Timeout {
                    request_id,
                    duration_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Opens a transport session and runs both authentication steps. A
    /// reconnect hands its flag back once the new session is installed.
    async fn establish(inner: &Arc<Inner>, reconnecting: bool) -> Result<(), EstablishError> {
        inner.set_state(ConnectionState::Connecting);

        let channel = match inner.transport.open().await {
            Ok(channel) => channel,
            Err(e) => {
                inner.set_state(ConnectionState::Disconnected);
                return Err(EstablishError::Open(e));
            }
        };

        let epoch = {
            let mut session = lock(&inner.session);
            // disconnect() raises the flag before it takes this lock
            if inner.shutdown.load(Ordering::SeqCst) {
                drop(session);
                inner.set_state(ConnectionState::Disconnected);
                info!("CTraderClient: Disconnect requested while connecting, closing new session");
                return Err(EstablishError::Open(MarketDataError::ConnectionLost {
                    reason: "disconnect requested while connecting".to_string(),
                }));
            }
            session.epoch += 1;
            session.outbound = Some(channel.outbound);
            if reconnecting {
                inner.reconnect_scheduled.store(false, Ordering::SeqCst);
            }
            session.epoch
        };

        let reader = Arc::clone(inner);
        let mut inbound = channel.inbound;
        tokio::spawn(async move {
            while let Some(msg) = inbound.recv().await {
                reader.dispatch(msg);
            }
            if reader.end_session(Some(epoch)) {
                warn!("CTraderClient: Disconnected from cTrader API");
                Inner::schedule_reconnect(&reader);
            }
        });

        match inner.authenticate(epoch).await {
            Ok(()) => {
                inner.resubscribe().await;
                Ok(())
            }
            Err(e) => {
                inner.end_session(Some(epoch));
                Err(EstablishError::Session(e))
            }
        }
    }

    /// Publishes `state` only while session `epoch` is still the live one.
    fn advance(&self, epoch: u64, state: ConnectionState) -> Result<(), MarketDataError> {
        let session = lock(&self.session);
        if session.epoch != epoch || session.outbound.is_none() {
            return Err(MarketDataError::ConnectionLost {
                reason: "session ended during authentication".to_string(),
            });
        }
        self.set_state(state);
        Ok(())
    }

    async fn authenticate(&self, epoch: u64) -> Result<(), MarketDataError> {
        info!("CTraderClient: Connected, authenticating application");
        let app_auth = BrokerMessage::new(
            payload_type::APPLICATION_AUTH_REQ,
            &ApplicationAuthReq {
                client_id: self.credentials.client_id.clone(),
                client_secret: self.credentials.client_secret.clone(),
            },
        )?;
        let response = self
            .request("app-auth", app_auth, self.settings.auth_timeout)
            .await?;
        expect_type(&response, payload_type::APPLICATION_AUTH_RES)?;
        info!("CTraderClient: Application authenticated successfully");
        self.advance(epoch, ConnectionState::AppAuthenticated)?;

        let account_auth = BrokerMessage::new(
            payload_type::ACCOUNT_AUTH_REQ,
            &AccountAuthReq {
                ctid_trader_account_id: self.credentials.account_id,
                access_token: self.credentials.access_token.clone(),
            },
        )?;
        let response = self
            .request("account-auth", account_auth, self.settings.auth_timeout)
            .await?;
        expect_type(&response, payload_type::ACCOUNT_AUTH_RES)?;
        info!("CTraderClient: Account authenticated successfully");
        self.advance(epoch, ConnectionState::Ready)
    }

    async fn send_subscription(&self, subscription: &Subscription) -> Result<(), MarketDataError> {
        let spots = BrokerMessage::new(
            payload_type::SUBSCRIBE_SPOTS_REQ,
            &SubscribeSpotsReq {
                ctid_trader_account_id: self.credentials.account_id,
                symbol_id: vec![subscription.symbol_id],
            },
        )?;
        match self
            .request("spots", spots, self.settings.request_timeout)
            .await
        {
            Ok(_) => {}
            // Already subscribed to spots through another timeframe
            Err(MarketDataError::Broker { code, .. }) if code == "ALREADY_SUBSCRIBED" => {}
            Err(e) => return Err(e),
        }

        let trendbars = BrokerMessage::new(
            payload_type::SUBSCRIBE_LIVE_TRENDBAR_REQ,
            &SubscribeLiveTrendbarReq {
                ctid_trader_account_id: self.credentials.account_id,
                symbol_id: subscription.symbol_id,
                period: subscription.period,
            },
        )?;
        self.request("live-trendbar", trendbars, self.settings.request_timeout)
            .await?;
        Ok(())
    }

    async fn resubscribe(&self) {
        let subscriptions: Vec<Subscription> =
            lock(&self.subscriptions).iter().cloned().collect();
        for subscription in subscriptions {
            if let Err(e) = self.send_subscription(&subscription).await {
                warn!(
                    "CTraderClient: Resubscribe to {} {} failed: {}",
                    subscription.symbol, subscription.timeframe, e
                );
            }
        }
    }

    /// Routes one inbound message: correlated responses to their waiter,
    /// events to live subscribers.
    fn dispatch(&self, msg: BrokerMessage) {
        if let Some(id) = msg.client_msg_id.clone() {
            let waiter = lock(&self.pending).remove(&id);
            if let Some(waiter) = waiter {
                let _ = waiter.send(msg);
                return;
            }
            debug!("CTraderClient: Late or unknown response {}", id);
        }

        match msg.payload_type {
            payload_type::SPOT_EVENT => match msg.decode::<SpotEvent>() {
                Ok(event) => self.publish_spot(event),
                Err(e) => warn!("CTraderClient: Bad spot event: {}", e),
            },
            payload_type::HEARTBEAT_EVENT => {}
            payload_type::ERROR_RES => {
                if let Err(e) = msg.into_result() {
                    error!("CTraderClient: Broker error: {}", e);
                }
            }
            other => debug!("CTraderClient: Ignoring message type {}", other),
        }
    }

    fn publish_spot(&self, event: SpotEvent) {
        let subscriptions: Vec<Subscription> = lock(&self.subscriptions)
            .iter()
            .filter(|s| s.symbol_id == event.symbol_id)
            .cloned()
            .collect();
        let Some(first) = subscriptions.first() else {
            return;
        };

        if event.bid.is_some() || event.ask.is_some() {
            let _ = self.live_tx.send(LiveUpdate::Spot {
                symbol: first.symbol.clone(),
                bid: event.bid_price(),
                ask: event.ask_price(),
                received_at: Utc::now().naive_utc(),
            });
        }

        for trendbar in &event.trendbar {
            let Some(timeframe) = trendbar.period.and_then(timeframe_for_period) else {
                continue;
            };
            let bar = match trendbar.to_bar() {
                Ok(Some(bar)) => bar,
                Ok(None) => continue,
                Err(e) => {
                    warn!("CTraderClient: Dropping live trendbar: {}", e);
                    continue;
                }
            };
            for subscription in subscriptions.iter().filter(|s| s.timeframe == timeframe) {
                let _ = self.live_tx.send(LiveUpdate::Bars {
                    symbol: subscription.symbol.clone(),
                    timeframe,
                    bars: vec![bar.clone()],
                });
            }
        }
    }

    /// Ends the session `epoch` (or whatever is current for `None`). Returns
    /// `false` if that session was already gone.
    fn end_session(&self, epoch: Option<u64>) -> bool {
        {
            let mut session = lock(&self.session);
            if let Some(epoch) = epoch
                && (epoch != session.epoch || session.outbound.is_none())
            {
                return false;
            }
            session.outbound = None;
            session.epoch += 1;
        }

        // Dropping the senders wakes every waiter with ConnectionLost
        lock(&self.pending).clear();
        self.set_state(ConnectionState::Disconnected);
        true
    }

    fn schedule_reconnect(inner: &Arc<Inner>) {
        if inner.shutdown.load(Ordering::SeqCst) {
            return;
        }
        if inner.reconnect_scheduled.swap(true, Ordering::SeqCst) {
            debug!("CTraderClient: Reconnect already scheduled");
            return;
        }

        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            let max_attempts = inner.settings.reconnect_max_attempts;
            for attempt in 0..max_attempts {
                let delay = reconnect_delay(inner.settings.reconnect_base, attempt);
                info!(
                    "CTraderClient: Reconnecting in {:?} (attempt {}/{})",
                    delay,
                    attempt + 1,
                    max_attempts
                );
                tokio::time::sleep(delay).await;

                if inner.shutdown.load(Ordering::SeqCst) {
                    break;
                }
                match Inner::establish(&inner, true).await {
                    Ok(()) => {
                        info!("CTraderClient: Successfully reconnected to cTrader API");
                        return;
                    }
                    Err(EstablishError::Open(e)) => {
                        warn!("CTraderClient: Reconnection attempt failed: {}", e)
                    }
                    Err(EstablishError::Session(e)) => {
                        warn!("CTraderClient: Reconnection attempt failed: {}", e);
                        // The flag went back with the installed session
                        if inner.reconnect_scheduled.swap(true, Ordering::SeqCst) {
                            debug!("CTraderClient: A newer reconnect took over");
                            return;
                        }
                    }
                }
            }

            if !inner.shutdown.load(Ordering::SeqCst) {
                error!("CTraderClient: Maximum reconnection attempts reached, giving up");
            }
            inner.reconnect_scheduled.store(false, Ordering::SeqCst);
        });
    }
}
