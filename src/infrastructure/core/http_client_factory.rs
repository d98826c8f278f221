use crate::domain::errors::MarketDataError;
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use std::time::Duration;
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_RETRIES: u32 = 3;

pub struct HttpClientFactory;

impl HttpClientFactory {
    /// Client with transient-error retries (exponential backoff, 3 retries)
    /// and a 30s request timeout.
    pub fn create_client() -> ClientWithMiddleware {
        Self::create_client_with(DEFAULT_TIMEOUT, DEFAULT_MAX_RETRIES)
    }

    pub fn create_client_with(timeout: Duration, max_retries: u32) -> ClientWithMiddleware {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);

        let client = Client::builder()
            .pool_max_idle_per_host(5)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .user_agent(concat!("tradefeed/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| Client::new());

        ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build()
    }
}

/// Appends percent-encoded query parameters to `base_url`.
///
/// The middleware client has no `.query()`, so URLs are assembled up front.
pub fn build_url_with_query<K, V>(base_url: &str, params: &[(K, V)]) -> Result<String, MarketDataError>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut url = Url::parse(base_url)
        .map_err(|e| MarketDataError::http(format!("invalid URL '{}': {}", base_url, e)))?;

    if !params.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (k, v) in params {
            pairs.append_pair(k.as_ref(), v.as_ref());
        }
    }

    Ok(url.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_is_appended_and_encoded() {
        let url = build_url_with_query(
            "https://api.binance.com/api/v3/klines",
            &[("symbol", "BTCUSDT"), ("interval", "1h"), ("note", "a b/c")],
        )
        .unwrap();
        assert_eq!(
            url,
            "https://api.binance.com/api/v3/klines?symbol=BTCUSDT&interval=1h&note=a+b%2Fc"
        );
    }

    #[test]
    fn test_existing_query_is_extended() {
        let url = build_url_with_query("https://example.com/query?function=X", &[("apikey", "k")])
            .unwrap();
        assert_eq!(url, "https://example.com/query?function=X&apikey=k");
    }

    #[test]
    fn test_no_params_keeps_url() {
        let params: [(&str, &str); 0] = [];
        let url = build_url_with_query("https://example.com/path", &params).unwrap();
        assert_eq!(url, "https://example.com/path");
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(build_url_with_query("not a url", &[("a", "b")]).is_err());
    }
}
