pub mod client;
pub mod messages;
pub mod source;
pub mod symbols;
pub mod transport;

pub use client::{BrokerCredentials, CTraderClient, ClientSettings, ConnectionState, LiveUpdate, SymbolInfo};
pub use source::CTraderOhlcvSource;
pub use transport::{BrokerChannel, BrokerTransport, WebSocketTransport};
