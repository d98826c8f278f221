use crate::domain::errors::MarketDataError;
use crate::domain::market::{MarketType, OhlcvSeries};
use crate::domain::ports::{OhlcvRequest, OhlcvSource};
use crate::infrastructure::csv_store::CsvStore;
use async_trait::async_trait;
use std::sync::Arc;

/// Serves bars from local CSV files.
///
/// With a chart market set, `charts/{market}/{SYMBOL}{minutes}.csv` is
/// tried before the regular data files.
pub struct CsvOhlcvSource {
    store: Arc<CsvStore>,
    chart_market: Option<MarketType>,
}

impl CsvOhlcvSource {
    pub fn new(store: Arc<CsvStore>) -> Self {
        Self {
            store,
            chart_market: None,
        }
    }

    pub fn with_charts(store: Arc<CsvStore>, market: MarketType) -> Self {
        Self {
            store,
            chart_market: Some(market),
        }
    }

    fn load(&self, request: &OhlcvRequest) -> OhlcvSeries {
        if let Some(market) = self.chart_market {
            let chart = self
                .store
                .load_chart(market, &request.symbol, request.timeframe);
            if !chart.is_empty() {
                return chart;
            }
        }
        self.store.load(&request.symbol, request.timeframe)
    }
}

#[async_trait]
impl OhlcvSource for CsvOhlcvSource {
    fn name(&self) -> &str {
        "csv"
    }

    async fn fetch(&self, request: &OhlcvRequest) -> Result<OhlcvSeries, MarketDataError> {
        let series = self.load(request);
        if series.is_empty() {
            return Err(MarketDataError::not_available(
                self.name(),
                &request.symbol,
                request.timeframe,
            ));
        }
        Ok(series.tail(request.bars))
    }
}
