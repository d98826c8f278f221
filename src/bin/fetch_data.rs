//! Fetch market data for a grid of symbols and timeframes and save it as CSV.
//!
//! # Usage
//! ```sh
//! cargo run --bin fetch_data -- --symbols EURUSD,BTCUSDT --timeframes H1,D1 --count 500
//! ```
//!
//! Failures for one symbol/timeframe are logged and the grid continues.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use std::time::Duration;
use tracing::{Level, error, info, warn};
use tracing_subscriber::prelude::*;
use tradefeed::config::{Config, parse_list};
use tradefeed::domain::market::{DataOrigin, DataSource};
use tradefeed::infrastructure::factory::ServiceFactory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SourceArg {
    Auto,
    Csv,
    Api,
    Ctrader,
}

impl From<SourceArg> for DataSource {
    fn from(arg: SourceArg) -> Self {
        match arg {
            SourceArg::Auto => DataSource::Auto,
            SourceArg::Csv => DataSource::Csv,
            SourceArg::Api => DataSource::Api,
            SourceArg::Ctrader => DataSource::Broker,
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Fetch and save market data", long_about = None)]
struct Args {
    /// Comma-separated list of symbols to fetch
    #[arg(long, default_value = "BTCUSD,ETHUSD,EURUSD,GBPUSD,USDJPY,XAUUSD")]
    symbols: String,

    /// Comma-separated list of timeframes to fetch
    #[arg(long, default_value = "M15,H1,H4,D1")]
    timeframes: String,

    /// Number of candles to fetch for each symbol/timeframe
    #[arg(long, default_value_t = 500)]
    count: usize,

    /// Data source to use
    #[arg(long, value_enum, default_value_t = SourceArg::Auto)]
    source: SourceArg,

    /// Seconds to wait for the broker session before falling back to CSV
    #[arg(long, default_value_t = 15)]
    connect_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;
    let source = DataSource::from(args.source);

    let processor = ServiceFactory::create_data_processor(&config);
    if matches!(source, DataSource::Auto | DataSource::Broker) && processor.connect() {
        let ready = match processor.broker() {
            Some(broker) => {
                broker
                    .client()
                    .wait_until_ready(Duration::from_secs(args.connect_timeout))
                    .await
            }
            None => false,
        };
        if !ready {
            warn!("cTrader session not ready, broker symbols will be read from CSV");
        }
    }

    let symbols = parse_list(&args.symbols);
    let timeframes = parse_list(&args.timeframes);
    info!(
        "Fetching data for {} symbols and {} timeframes",
        symbols.len(),
        timeframes.len()
    );
    info!("Symbols: {:?}", symbols);
    info!("Timeframes: {:?}", timeframes);

    let mut saved = 0usize;
    for symbol in &symbols {
        for timeframe in &timeframes {
            info!("Fetching {} candles for {} {}...", args.count, symbol, timeframe);

            let download = processor
                .download(symbol, timeframe, args.count, source)
                .await;
            if download.series.is_empty() {
                error!("Failed to fetch data for {} {}", symbol, timeframe);
                continue;
            }
            info!(
                "Successfully fetched {} candles for {} {} ({:?})",
                download.series.len(),
                symbol,
                timeframe,
                download.origin
            );

            match (&download.saved, download.origin) {
                (Some(path), _) => {
                    saved += 1;
                    info!("Saved {}", path.display());
                }
                (None, DataOrigin::Broker) => {
                    saved += 1;
                    info!("Broker snapshot refreshed for {} {}", symbol, timeframe);
                }
                (None, DataOrigin::Remote) => {
                    error!("Error saving data for {} {}", symbol, timeframe);
                }
                (None, _) => {
                    info!("{} {} came from CSV, existing file kept", symbol, timeframe);
                }
            }
        }
    }

    info!("Done: {} files written", saved);
    processor.close().await;
    Ok(())
}
