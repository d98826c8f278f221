pub mod alpha_vantage;
pub mod binance;
pub mod core;
pub mod csv_source;
pub mod csv_store;
pub mod ctrader;
pub mod factory;
pub mod mock;

pub use csv_store::CsvStore;
pub use factory::ServiceFactory;
