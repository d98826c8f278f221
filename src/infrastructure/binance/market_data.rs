//! Binance OHLCV Source
//!
//! Historical klines from the Binance spot REST API:
//! - exchange-dialect timeframes only (`1m` … `1w`)
//! - pair resolution against `exchangeInfo`, with alternative spellings
//! - backwards paging for requests above the 1000-bar API limit
//! - most liquid USDT pairs from the 24h ticker

use crate::domain::errors::MarketDataError;
use crate::domain::market::symbol::{denormalize_pair, exchange_pair_alternatives, format_exchange_pair};
use crate::domain::market::{Bar, OhlcvSeries};
use crate::domain::ports::{OhlcvRequest, OhlcvSource, PairDirectory};
use crate::infrastructure::core::{CircuitBreaker, HttpClientFactory, build_url_with_query};
use async_trait::async_trait;
use chrono::DateTime;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const MAX_KLINES_PER_REQUEST: usize = 1000;
const MARKETS_CACHE_TTL: Duration = Duration::from_secs(3600);

pub struct BinanceOhlcvSource {
    client: ClientWithMiddleware,
    api_key: String,
    base_url: String,
    circuit_breaker: CircuitBreaker,
    /// `BASE/QUOTE` pairs currently trading, with fetch time
    markets_cache: RwLock<Option<(HashSet<String>, Instant)>>,
}

impl BinanceOhlcvSource {
    pub fn builder() -> BinanceOhlcvSourceBuilder {
        BinanceOhlcvSourceBuilder::default()
    }

    fn get(&self, url: &str) -> reqwest_middleware::RequestBuilder {
        let request = self.client.get(url);
        if self.api_key.is_empty() {
            request
        } else {
            request.header("X-MBX-APIKEY", &self.api_key)
        }
    }

    async fn markets(&self) -> Result<HashSet<String>, MarketDataError> {
        {
            let cache = self
                .markets_cache
                .read()
                .map_err(|e| MarketDataError::http(format!("markets cache lock poisoned: {}", e)))?;
            if let Some((markets, cached_at)) = cache.as_ref()
                && cached_at.elapsed() < MARKETS_CACHE_TTL
            {
                return Ok(markets.clone());
            }
        }

        info!("BinanceOhlcvSource: Loading markets from exchangeInfo");

        #[derive(Debug, Deserialize)]
        struct SymbolInfo {
            status: String,
            #[serde(rename = "baseAsset")]
            base_asset: String,
            #[serde(rename = "quoteAsset")]
            quote_asset: String,
        }

        #[derive(Debug, Deserialize)]
        struct ExchangeInfo {
            symbols: Vec<SymbolInfo>,
        }

        let url = format!("{}/api/v3/exchangeInfo", self.base_url);
        let response = self.get(&url).send().await?;
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(MarketDataError::http(format!(
                "exchangeInfo fetch failed: {}",
                error_text
            )));
        }
        let info: ExchangeInfo = response.json().await?;

        let markets: HashSet<String> = info
            .symbols
            .into_iter()
            .filter(|s| s.status == "TRADING")
            .map(|s| format!("{}/{}", s.base_asset, s.quote_asset))
            .collect();

        info!("BinanceOhlcvSource: {} markets trading", markets.len());

        let mut cache = self
            .markets_cache
            .write()
            .map_err(|e| MarketDataError::http(format!("markets cache lock poisoned: {}", e)))?;
        *cache = Some((markets.clone(), Instant::now()));

        Ok(markets)
    }

    /// The listed `BASE/QUOTE` spelling for `symbol`. Without a market list
    /// the primary spelling is used as is.
    async fn resolve_pair(&self, symbol: &str) -> Result<String, MarketDataError> {
        let primary = format_exchange_pair(symbol);
        match self.markets().await {
            Ok(markets) => resolve_against(&markets, symbol, &primary).ok_or_else(|| {
                warn!("BinanceOhlcvSource: Symbol {} not listed", primary);
                MarketDataError::UnknownSymbol {
                    symbol: symbol.to_string(),
                }
            }),
            Err(e) => {
                debug!(
                    "BinanceOhlcvSource: Market list unavailable ({}), using {}",
                    e, primary
                );
                Ok(primary)
            }
        }
    }

    async fn fetch_klines(
        &self,
        pair: &str,
        interval: &str,
        bars: usize,
    ) -> Result<Vec<Bar>, MarketDataError> {
        let api_symbol = denormalize_pair(pair);
        let url = format!("{}/api/v3/klines", self.base_url);

        let mut collected: Vec<Bar> = Vec::new();
        let mut end_time: Option<i64> = None;

        while collected.len() < bars {
            let limit = (bars - collected.len()).min(MAX_KLINES_PER_REQUEST);
            let limit_str = limit.to_string();
            let mut params = vec![
                ("symbol", api_symbol.clone()),
                ("interval", interval.to_string()),
                ("limit", limit_str),
            ];
            if let Some(end) = end_time {
                params.push(("endTime", end.to_string()));
            }
            let url_with_query = build_url_with_query(&url, &params)?;

            let response = self.get(&url_with_query).send().await?;
            if !response.status().is_success() {
                let error_text = response.text().await.unwrap_or_default();
                return Err(MarketDataError::http(format!(
                    "klines fetch failed for {}: {}",
                    api_symbol, error_text
                )));
            }
            let klines: Vec<serde_json::Value> = response.json().await?;

            let page = parse_klines(&klines);
            let page_len = page.len();
            let Some(oldest) = page.first() else {
                break;
            };
            end_time = Some(oldest.timestamp.and_utc().timestamp_millis() - 1);

            let mut page = page;
            page.append(&mut collected);
            collected = page;

            if page_len < limit {
                break;
            }
        }

        Ok(collected)
    }
}

/// Kline rows are `[openTime, "open", "high", "low", "close", "volume", ...]`.
/// Malformed rows are skipped.
pub fn parse_klines(klines: &[serde_json::Value]) -> Vec<Bar> {
    klines
        .iter()
        .filter_map(|k| {
            let arr = k.as_array()?;
            if arr.len() < 6 {
                return None;
            }
            let timestamp = DateTime::from_timestamp_millis(arr[0].as_i64()?)?.naive_utc();
            let field = |i: usize| Decimal::from_str_exact(arr[i].as_str()?).ok();

            Some(Bar::new(
                timestamp,
                field(1)?,
                field(2)?,
                field(3)?,
                field(4)?,
                field(5)?,
            ))
        })
        .collect()
}

fn resolve_against(markets: &HashSet<String>, symbol: &str, primary: &str) -> Option<String> {
    if markets.contains(primary) {
        return Some(primary.to_string());
    }
    exchange_pair_alternatives(symbol)
        .into_iter()
        .find(|alt| markets.contains(alt))
}

#[async_trait]
impl OhlcvSource for BinanceOhlcvSource {
    fn name(&self) -> &str {
        "exchange"
    }

    async fn fetch(&self, request: &OhlcvRequest) -> Result<OhlcvSeries, MarketDataError> {
        let interval = request.timeframe.require_exchange_string()?;

        // An unlisted symbol is not a sign of an unhealthy exchange
        let pair = self.resolve_pair(&request.symbol).await?;
        let bars = self
            .circuit_breaker
            .call(self.fetch_klines(&pair, interval, request.bars))
            .await?;

        if bars.is_empty() {
            return Err(MarketDataError::not_available(
                self.name(),
                &request.symbol,
                request.timeframe,
            ));
        }

        info!(
            "BinanceOhlcvSource: Fetched {} bars for {} {}",
            bars.len(),
            request.symbol,
            interval
        );
        Ok(OhlcvSeries::new(bars))
    }
}

#[async_trait]
impl PairDirectory for BinanceOhlcvSource {
    async fn list_pairs(&self, limit: usize) -> Result<Vec<String>, MarketDataError> {
        #[derive(Debug, Deserialize)]
        struct Ticker24hr {
            symbol: String,
            #[serde(rename = "quoteVolume")]
            quote_volume: String,
        }

        let url = format!("{}/api/v3/ticker/24hr", self.base_url);
        let tickers: Vec<Ticker24hr> = self
            .circuit_breaker
            .call(async {
                let response = self.get(&url).send().await?;
                if !response.status().is_success() {
                    let error_text = response.text().await.unwrap_or_default();
                    return Err(MarketDataError::http(format!(
                        "24hr ticker fetch failed: {}",
                        error_text
                    )));
                }
                Ok::<_, MarketDataError>(response.json::<Vec<Ticker24hr>>().await?)
            })
            .await?;

        let mut candidates: Vec<(String, Decimal)> = tickers
            .into_iter()
            .filter(|t| t.symbol.ends_with("USDT"))
            .filter_map(|t| {
                let volume = Decimal::from_str_exact(&t.quote_volume).ok()?;
                Some((t.symbol, volume))
            })
            .collect();

        candidates.sort_by(|a, b| b.1.cmp(&a.1));

        let pairs: Vec<String> = candidates
            .into_iter()
            .take(limit)
            .map(|(symbol, _)| symbol)
            .collect();

        info!("BinanceOhlcvSource: {} USDT pairs by volume", pairs.len());
        Ok(pairs)
    }
}

#[derive(Default)]
pub struct BinanceOhlcvSourceBuilder {
    api_key: Option<String>,
    base_url: Option<String>,
    client: Option<ClientWithMiddleware>,
}

impl BinanceOhlcvSourceBuilder {
    pub fn api_key(mut self, api_key: String) -> Self {
        self.api_key = Some(api_key);
        self
    }

    pub fn base_url(mut self, base_url: String) -> Self {
        self.base_url = Some(base_url);
        self
    }

    pub fn client(mut self, client: ClientWithMiddleware) -> Self {
        self.client = Some(client);
        self
    }

    pub fn build(self) -> BinanceOhlcvSource {
        let base_url = self
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        BinanceOhlcvSource {
            client: self.client.unwrap_or_else(HttpClientFactory::create_client),
            api_key: self.api_key.unwrap_or_default(),
            base_url,
            circuit_breaker: CircuitBreaker::new(
                "BinanceOhlcv",
                5,
                2,
                Duration::from_secs(60),
            ),
            markets_cache: RwLock::new(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::Timeframe;
    use crate::infrastructure::core::CircuitState;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_parse_klines() {
        let klines = vec![
            json!([1709251200000i64, "61000.10", "61500.00", "60900.00", "61400.55", "123.456", 1709254799999i64, "0", 10, "0", "0", "0"]),
            json!([1709254800000i64, "61400.55", "61600.00", "61300.00", "61550.00", "98.1"]),
            json!(["bad"]),
            json!([1709258400000i64, "x", "1", "1", "1", "1"]),
        ];

        let bars = parse_klines(&klines);
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].open, dec!(61000.10));
        assert_eq!(bars[0].volume, dec!(123.456));
        assert_eq!(bars[1].timestamp.to_string(), "2024-03-01 01:00:00");
    }

    #[test]
    fn test_resolve_against_markets() {
        let markets: HashSet<String> = ["BTC/USDT", "ETH/USD", "SOL/USDC"]
            .into_iter()
            .map(String::from)
            .collect();

        assert_eq!(
            resolve_against(&markets, "BTCUSDT", "BTC/USDT").as_deref(),
            Some("BTC/USDT")
        );
        assert_eq!(
            resolve_against(&markets, "SOLUSDC", "SOL/USDC").as_deref(),
            Some("SOL/USDC")
        );
        assert_eq!(resolve_against(&markets, "DOGEUSDT", "DOGE/USDT"), None);
    }

    #[tokio::test]
    async fn test_unlisted_symbols_do_not_open_breaker() {
        let client = reqwest_middleware::ClientBuilder::new(reqwest::Client::new()).build();
        let source = BinanceOhlcvSource::builder()
            .base_url("http://127.0.0.1:1".to_string())
            .client(client)
            .build();
        let markets: HashSet<String> = ["BTC/USDT".to_string()].into_iter().collect();
        *source.markets_cache.write().unwrap() = Some((markets, Instant::now()));

        for _ in 0..6 {
            let request = OhlcvRequest::new("NOPEUSDT", Timeframe::OneHour, 10);
            let err = source.fetch(&request).await.unwrap_err();
            assert!(matches!(err, MarketDataError::UnknownSymbol { .. }));
        }
        assert_eq!(source.circuit_breaker.state(), CircuitState::Closed);

        // A listed pair still reaches the network instead of being rejected
        let request = OhlcvRequest::new("BTCUSDT", Timeframe::OneHour, 10);
        let err = source.fetch(&request).await.unwrap_err();
        assert!(!matches!(err, MarketDataError::CircuitOpen { .. }));
    }

    #[tokio::test]
    async fn test_unsupported_timeframe_fails_without_network() {
        let source = BinanceOhlcvSource::builder()
            .base_url("http://127.0.0.1:1".to_string())
            .build();
        let request = OhlcvRequest::new("BTCUSDT", Timeframe::TwelveHour, 10);

        let err = source.fetch(&request).await.unwrap_err();
        assert!(matches!(err, MarketDataError::UnsupportedTimeframe { .. }));
    }
}
