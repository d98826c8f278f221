pub mod ohlcv;
pub mod source;
pub mod symbol;
pub mod timeframe;

pub use ohlcv::{Bar, OhlcvSeries};
pub use source::{CryptoSource, DataOrigin, DataSource};
pub use symbol::MarketType;
pub use timeframe::Timeframe;
