// Market data acquisition and the data facade
pub mod market_data;
