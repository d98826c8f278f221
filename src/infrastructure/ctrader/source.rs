use super::client::CTraderClient;
use super::symbols::{period_code, symbol_id};
use crate::domain::errors::MarketDataError;
use crate::domain::market::symbol::broker_symbol;
use crate::domain::market::{OhlcvSeries, Timeframe};
use crate::domain::ports::{OhlcvRequest, OhlcvSource};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info};

/// Symbol id and period code for a request, or the error that makes the
/// request impossible without touching the network.
pub fn resolve_request(
    symbol: &str,
    timeframe: Timeframe,
) -> Result<(i64, u32), MarketDataError> {
    let name = broker_symbol(symbol);
    let id = symbol_id(&name).ok_or(MarketDataError::UnknownSymbol { symbol: name })?;
    let period = period_code(timeframe).ok_or_else(|| MarketDataError::UnsupportedTimeframe {
        timeframe: timeframe.to_string(),
        dialect: "broker",
    })?;
    Ok((id, period))
}

/// Window ending now that covers `bars` periods of `timeframe`, in epoch ms.
pub fn request_window(timeframe: Timeframe, bars: usize) -> (i64, i64) {
    let to = Utc::now().timestamp_millis();
    let span = timeframe.to_seconds() * 1000 * bars as i64;
    (to - span, to)
}

/// Historical trendbars from a [`CTraderClient`] session.
pub struct CTraderOhlcvSource {
    client: CTraderClient,
}

impl CTraderOhlcvSource {
    pub fn new(client: CTraderClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OhlcvSource for CTraderOhlcvSource {
    fn name(&self) -> &str {
        "ctrader"
    }

    async fn fetch(&self, request: &OhlcvRequest) -> Result<OhlcvSeries, MarketDataError> {
        let (id, period) = resolve_request(&request.symbol, request.timeframe).inspect_err(|e| {
            error!("CTraderOhlcvSource: {}", e);
        })?;

        if !self.client.is_ready() {
            return Err(MarketDataError::NotAuthenticated);
        }

        let (from, to) = request_window(request.timeframe, request.bars);
        info!(
            "CTraderOhlcvSource: Requesting {} {} bars for {}",
            request.bars, request.timeframe, request.symbol
        );
        let bars = self.client.get_trendbars(id, period, from, to).await?;

        let series = OhlcvSeries::new(bars).tail(request.bars);
        if series.is_empty() {
            return Err(MarketDataError::not_available(
                self.name(),
                &request.symbol,
                request.timeframe,
            ));
        }
        Ok(series)
    }
}
