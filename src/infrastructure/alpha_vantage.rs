//! Alpha Vantage OHLCV Source
//!
//! Last-resort REST source for crypto bars. Intraday bars come from
//! `CRYPTO_INTRADAY`, daily and weekly bars from `DIGITAL_CURRENCY_*`.
//! The API has no 4h interval and quotes USDT pairs in USD.

use crate::domain::errors::MarketDataError;
use crate::domain::market::symbol::rest_api_pair;
use crate::domain::market::{Bar, OhlcvSeries, Timeframe};
use crate::domain::ports::{OhlcvRequest, OhlcvSource};
use crate::infrastructure::core::{CircuitBreaker, HttpClientFactory, build_url_with_query};
use crate::infrastructure::csv_store::parse_timestamp;
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde_json::Value;
use std::time::Duration;
use tracing::{error, info, warn};

pub const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co/query";

/// Which endpoint serves a timeframe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlphaVantageInterval {
    Intraday(&'static str),
    Daily,
    Weekly,
}

impl AlphaVantageInterval {
    pub fn for_timeframe(timeframe: Timeframe) -> Result<Self, MarketDataError> {
        match timeframe {
            Timeframe::OneMin => Ok(Self::Intraday("1min")),
            Timeframe::FiveMin => Ok(Self::Intraday("5min")),
            Timeframe::FifteenMin => Ok(Self::Intraday("15min")),
            Timeframe::ThirtyMin => Ok(Self::Intraday("30min")),
            Timeframe::OneHour => Ok(Self::Intraday("60min")),
            Timeframe::OneDay => Ok(Self::Daily),
            Timeframe::OneWeek => Ok(Self::Weekly),
            other => Err(MarketDataError::UnsupportedTimeframe {
                timeframe: other.to_string(),
                dialect: "alpha vantage",
            }),
        }
    }

    fn function(&self) -> &'static str {
        match self {
            Self::Intraday(_) => "CRYPTO_INTRADAY",
            Self::Daily => "DIGITAL_CURRENCY_DAILY",
            Self::Weekly => "DIGITAL_CURRENCY_WEEKLY",
        }
    }

    fn series_key(&self) -> String {
        match self {
            Self::Intraday(interval) => format!("Time Series Crypto ({})", interval),
            Self::Daily => "Time Series (Digital Currency Daily)".to_string(),
            Self::Weekly => "Time Series (Digital Currency Weekly)".to_string(),
        }
    }
}

pub struct AlphaVantageSource {
    client: ClientWithMiddleware,
    api_key: String,
    base_url: String,
    circuit_breaker: CircuitBreaker,
}

impl AlphaVantageSource {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            api_key: api_key.into(),
            base_url: base_url.into(),
            circuit_breaker: CircuitBreaker::new(
                "AlphaVantage",
                3,
                1,
                Duration::from_secs(120),
            ),
        }
    }

    async fn query(
        &self,
        interval: AlphaVantageInterval,
        base: &str,
        market: &str,
    ) -> Result<Value, MarketDataError> {
        let mut params = vec![
            ("function", interval.function()),
            ("symbol", base),
            ("market", market),
        ];
        if let AlphaVantageInterval::Intraday(name) = interval {
            params.push(("interval", name));
            params.push(("outputsize", "full"));
        }
        params.push(("apikey", self.api_key.as_str()));

        let url = build_url_with_query(&self.base_url, &params)?;
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(MarketDataError::http(format!(
                "Alpha Vantage request failed: {}",
                response.status()
            )));
        }

        Ok(response.json().await?)
    }
}

/// Pulls bars out of an Alpha Vantage time-series document.
///
/// Daily and weekly documents have used both `1a. open (USD)` and `1. open`
/// style columns over time; either is accepted.
pub fn parse_time_series(
    document: &Value,
    interval: AlphaVantageInterval,
    market: &str,
) -> Result<Vec<Bar>, String> {
    for key in ["Error Message", "Note", "Information"] {
        if let Some(message) = document.get(key).and_then(Value::as_str) {
            return Err(format!("{}: {}", key, message));
        }
    }

    let series_key = interval.series_key();
    let series = document
        .get(&series_key)
        .and_then(Value::as_object)
        .ok_or_else(|| format!("'{}' not found in response", series_key))?;

    let column = |entry: &Value, short: &str, name: &str| -> Option<Decimal> {
        let value = entry
            .get(format!("{} ({})", short, market).as_str())
            .or_else(|| entry.get(name))?
            .as_str()?;
        value.parse().ok()
    };

    let mut bars = Vec::with_capacity(series.len());
    for (stamp, entry) in series {
        let timestamp =
            parse_timestamp(stamp).ok_or_else(|| format!("bad timestamp '{}'", stamp))?;
        let bar = (|| {
            Some(Bar::new(
                timestamp,
                column(entry, "1a. open", "1. open")?,
                column(entry, "2a. high", "2. high")?,
                column(entry, "3a. low", "3. low")?,
                column(entry, "4a. close", "4. close")?,
                column(entry, "5. volume", "5. volume").unwrap_or(Decimal::ZERO),
            ))
        })()
        .ok_or_else(|| format!("incomplete entry at {}", stamp))?;
        bars.push(bar);
    }

    Ok(bars)
}

#[async_trait]
impl OhlcvSource for AlphaVantageSource {
    fn name(&self) -> &str {
        "api"
    }

    async fn fetch(&self, request: &OhlcvRequest) -> Result<OhlcvSeries, MarketDataError> {
        if self.api_key.is_empty() {
            error!("AlphaVantageSource: API key not configured");
            return Err(MarketDataError::NotConfigured {
                reason: "ALPHA_VANTAGE_API_KEY is empty".to_string(),
            });
        }

        let interval = AlphaVantageInterval::for_timeframe(request.timeframe).inspect_err(|_| {
            warn!(
                "AlphaVantageSource: Timeframe {} not supported",
                request.timeframe
            )
        })?;
        let (base, market) = rest_api_pair(&request.symbol);

        let document = self
            .circuit_breaker
            .call(self.query(interval, &base, &market))
            .await?;

        let bars = parse_time_series(&document, interval, &market).map_err(|reason| {
            MarketDataError::InvalidData {
                symbol: request.symbol.clone(),
                reason,
            }
        })?;

        let series = OhlcvSeries::new(bars).tail(request.bars);
        if series.is_empty() {
            return Err(MarketDataError::not_available(
                self.name(),
                &request.symbol,
                request.timeframe,
            ));
        }

        info!(
            "AlphaVantageSource: Fetched {} bars for {} {}",
            series.len(),
            request.symbol,
            request.timeframe
        );
        Ok(series)
    }
}
