use crate::domain::errors::MarketDataError;
use crate::domain::market::OhlcvSeries;
use crate::domain::ports::{OhlcvRequest, OhlcvSource};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A series together with the name of the source that produced it
#[derive(Debug, Clone)]
pub struct Sourced {
    pub series: OhlcvSeries,
    pub source: String,
}

/// Ordered list of sources combined by "first non-empty result wins".
///
/// Each source is tried in turn. Errors and empty results are logged and the
/// next source is asked; later sources are never called once one succeeds.
#[derive(Clone, Default)]
pub struct FallbackChain {
    sources: Vec<Arc<dyn OhlcvSource>>,
}

impl FallbackChain {
    pub fn new(sources: Vec<Arc<dyn OhlcvSource>>) -> Self {
        Self { sources }
    }

    pub fn with(mut self, source: Arc<dyn OhlcvSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn source_names(&self) -> Vec<&str> {
        self.sources.iter().map(|s| s.name()).collect()
    }

    pub async fn fetch(&self, request: &OhlcvRequest) -> Result<Sourced, MarketDataError> {
        let mut attempts = Vec::with_capacity(self.sources.len());

        for source in &self.sources {
            match source.fetch(request).await {
                Ok(series) if !series.is_empty() => {
                    info!(
                        "FallbackChain: {} bars for {} {} from {}",
                        series.len(),
                        request.symbol,
                        request.timeframe,
                        source.name()
                    );
                    return Ok(Sourced {
                        series,
                        source: source.name().to_string(),
                    });
                }
                Ok(_) => {
                    debug!("FallbackChain: {} returned no rows", source.name());
                    attempts.push(format!("{}: empty", source.name()));
                }
                Err(e) if e.is_not_available() => {
                    debug!("FallbackChain: {}", e);
                    attempts.push(format!("{}: no data", source.name()));
                }
                Err(e) => {
                    warn!(
                        "FallbackChain: {} failed for {} {}: {}",
                        source.name(),
                        request.symbol,
                        request.timeframe,
                        e
                    );
                    attempts.push(format!("{}: {}", source.name(), e));
                }
            }
        }

        Err(MarketDataError::Exhausted {
            symbol: request.symbol.clone(),
            timeframe: request.timeframe.to_string(),
            attempts,
        })
    }

    pub async fn close(&self) {
        for source in &self.sources {
            source.close().await;
        }
    }
}
