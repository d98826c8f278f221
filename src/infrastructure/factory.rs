use crate::application::market_data::{BrokerDataProvider, CryptoDataProvider, DataProcessor};
use crate::config::Config;
use crate::domain::market::MarketType;
use crate::infrastructure::alpha_vantage::AlphaVantageSource;
use crate::infrastructure::binance::BinanceOhlcvSource;
use crate::infrastructure::core::HttpClientFactory;
use crate::infrastructure::csv_source::CsvOhlcvSource;
use crate::infrastructure::csv_store::CsvStore;
use crate::infrastructure::ctrader::{BrokerTransport, CTraderClient, WebSocketTransport};
use std::sync::Arc;
use tracing::{info, warn};

pub struct ServiceFactory;

impl ServiceFactory {
    pub fn create_store(config: &Config) -> Arc<CsvStore> {
        Arc::new(CsvStore::new(
            config.data.data_dir.clone(),
            config.data.charts_dir.clone(),
        ))
    }

    /// Exchange → crypto chart CSV → Alpha Vantage, each present only when
    /// usable.
    pub fn create_crypto_provider(config: &Config, store: Arc<CsvStore>) -> CryptoDataProvider {
        let csv = Arc::new(CsvOhlcvSource::with_charts(
            Arc::clone(&store),
            MarketType::Crypto,
        ));
        let mut provider = CryptoDataProvider::new(store, csv)
            .with_default_pairs(config.data.crypto_pairs.clone());

        if config.data.use_live_data {
            let exchange = Arc::new(
                BinanceOhlcvSource::builder()
                    .api_key(config.broker.binance.api_key.clone())
                    .base_url(config.broker.binance.base_url.clone())
                    .client(HttpClientFactory::create_client())
                    .build(),
            );
            provider = provider
                .with_exchange(exchange.clone())
                .with_pair_directory(exchange);
        }

        if config.broker.alpha_vantage.api_key.is_empty() {
            info!("ServiceFactory: ALPHA_VANTAGE_API_KEY not set, REST fallback disabled");
        } else {
            provider = provider.with_api(Arc::new(AlphaVantageSource::new(
                config.broker.alpha_vantage.api_key.clone(),
                config.broker.alpha_vantage.base_url.clone(),
            )));
        }
        provider
    }

    /// Broker client over the configured WebSocket, or `None` without
    /// credentials.
    pub fn create_broker_provider(
        config: &Config,
        store: Arc<CsvStore>,
    ) -> Option<BrokerDataProvider> {
        let ctrader = &config.broker.ctrader;
        if !ctrader.is_configured() {
            warn!("ServiceFactory: cTrader credentials missing, broker data will come from CSV");
            return None;
        }

        let transport: Arc<dyn BrokerTransport> = Arc::new(WebSocketTransport::new(
            ctrader.ws_url.clone(),
            ctrader.heartbeat_interval(),
        ));
        let client = CTraderClient::new(transport, ctrader.credentials(), ctrader.client_settings());
        Some(BrokerDataProvider::new(client, store))
    }

    /// Fully wired facade. Call [`DataProcessor::connect`] to start the
    /// broker session.
    pub fn create_data_processor(config: &Config) -> DataProcessor {
        let store = Self::create_store(config);
        let crypto = Self::create_crypto_provider(config, Arc::clone(&store));
        let broker = Self::create_broker_provider(config, Arc::clone(&store));

        let mut processor = DataProcessor::new(store, Arc::new(crypto), config.data.cache_ttl())
            .with_live_data(config.data.use_live_data);
        if let Some(broker) = broker {
            processor = processor.with_broker(Arc::new(broker));
        }
        processor
    }
}
