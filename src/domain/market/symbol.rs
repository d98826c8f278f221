use serde::{Deserialize, Serialize};
use std::fmt;

/// Quote currencies recognised when splitting concatenated crypto pairs.
/// Order matters: `USDT` must be tried before `USD`.
pub const CRYPTO_QUOTE_CURRENCIES: &[&str] = &["USDT", "USD", "BTC", "ETH"];

/// Index symbols routed to the broker
pub const INDEX_SYMBOLS: &[&str] = &["US30", "US500", "NAS100", "UK100", "GER40", "JPN225"];

/// Coarse market classification inferred from a symbol string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketType {
    Forex,
    Crypto,
    Indices,
    Metals,
    Unknown,
}

impl MarketType {
    /// Directory name used under `charts/`
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketType::Forex => "forex",
            MarketType::Crypto => "crypto",
            MarketType::Indices => "indices",
            MarketType::Metals => "metals",
            MarketType::Unknown => "unknown",
        }
    }

    /// Infers the market from the symbol.
    ///
    /// Six-letter alphabetic symbols are treated as forex first, so `BTCUSD`
    /// and `XAUUSD` land with the broker, which lists both.
    pub fn infer(symbol: &str) -> MarketType {
        let symbol = symbol.to_uppercase();

        if symbol.len() == 6 && symbol.chars().all(|c| c.is_ascii_alphabetic()) {
            return MarketType::Forex;
        }
        if symbol.contains("USDT") || symbol.contains("BTC") || symbol.contains("ETH") {
            return MarketType::Crypto;
        }
        if INDEX_SYMBOLS.contains(&symbol.as_str()) {
            return MarketType::Indices;
        }
        if symbol.starts_with("XAU") || symbol.starts_with("XAG") {
            return MarketType::Metals;
        }
        MarketType::Unknown
    }

    pub fn parse(s: &str) -> Option<MarketType> {
        match s.to_lowercase().as_str() {
            "forex" => Some(MarketType::Forex),
            "crypto" => Some(MarketType::Crypto),
            "indices" => Some(MarketType::Indices),
            "metals" => Some(MarketType::Metals),
            "unknown" => Some(MarketType::Unknown),
            _ => None,
        }
    }
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical form: trimmed, uppercase, slash-free.
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().replace('/', "").to_uppercase()
}

/// Broker form: canonical with any `.P` / `.F` style suffix dropped.
pub fn broker_symbol(symbol: &str) -> String {
    let canonical = normalize_symbol(symbol);
    match canonical.split_once('.') {
        Some((base, _)) => base.to_string(),
        None => canonical,
    }
}

/// Splits after the first three characters, the fallback for unknown quotes.
///
/// Wrong for any base or quote whose ticker is not three characters long;
/// kept because nothing better is known about the intended pairs.
fn split_three(symbol: &str) -> (&str, &str) {
    match symbol.char_indices().nth(3) {
        Some((idx, _)) => symbol.split_at(idx),
        None => (symbol, ""),
    }
}

/// `BTCUSDT` → `BTC/USDT`. Pairs already in exchange form are returned as is.
pub fn format_exchange_pair(symbol: &str) -> String {
    if symbol.contains('/') {
        return symbol.to_string();
    }

    for quote in CRYPTO_QUOTE_CURRENCIES {
        if let Some(base) = symbol.strip_suffix(quote)
            && !base.is_empty()
        {
            return format!("{}/{}", base, quote);
        }
    }

    let (base, quote) = split_three(symbol);
    format!("{}/{}", base, quote)
}

/// `BTC/USDT` → `BTCUSDT`
pub fn denormalize_pair(pair: &str) -> String {
    pair.replace('/', "")
}

/// Alternative exchange spellings tried when the primary pair is not listed.
pub fn exchange_pair_alternatives(symbol: &str) -> Vec<String> {
    let (base, quote) = split_three(symbol);
    let mut alternatives = vec![
        symbol.replacen("USDT", "/USDT", 1),
        symbol.replacen("USD", "/USD", 1),
        format!("{}/{}", base, quote),
    ];
    alternatives.dedup();
    alternatives
}

/// Base and quote currencies as the REST API expects them (`USDT` quoted as `USD`).
pub fn rest_api_pair(symbol: &str) -> (String, String) {
    if let Some(base) = symbol.strip_suffix("USDT") {
        return (base.to_string(), "USD".to_string());
    }
    if let Some(base) = symbol.strip_suffix("USD") {
        return (base.to_string(), "USD".to_string());
    }
    let (base, quote) = split_three(symbol);
    (base.to_string(), quote.to_string())
}
