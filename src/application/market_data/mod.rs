// Market data acquisition: providers, fallback and caching
pub mod broker_provider;
pub mod crypto_provider;
pub mod data_cache;
pub mod data_processor;
pub mod fallback;

pub use broker_provider::BrokerDataProvider;
pub use crypto_provider::CryptoDataProvider;
pub use data_cache::{CacheKey, DataCache};
pub use data_processor::{DataProcessor, Download};
pub use fallback::{FallbackChain, Sourced};
