pub mod adapter;
pub mod http_client;

use crate::config::{ApiConfig, EndpointConfig};
use crate::models::{BundleKey, MetricFamily};
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tracing::debug;
use url::Url;

pub use self::adapter::{adapt_payload, RawHistoryPayload};
use self::http_client::HttpClient;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    #[error("request failed: {0}")]
    Transport(String),

    #[error("could not decode body from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP client setup failed: {0}")]
    Client(String),

    #[error("could not read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SourceError {
    /// Transport failures, rate limiting and server errors are worth another try.
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::Transport(_) => true,
            SourceError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(e: reqwest::Error) -> Self {
        SourceError::Transport(e.to_string())
    }
}

impl From<url::ParseError> for SourceError {
    fn from(e: url::ParseError) -> Self {
        SourceError::InvalidUrl(e.to_string())
    }
}

// ── Source trait ──────────────────────────────────────────────────────────────

/// Swappable provider of raw history payloads, one call per metric family.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn fetch_family(
        &self,
        key: &BundleKey,
        family: MetricFamily,
    ) -> Result<RawHistoryPayload, SourceError>;
}

// ── REST API ──────────────────────────────────────────────────────────────────

/// Caller-supplied request context. Passed in explicitly; the source never
/// reads ambient session state.
#[derive(Debug, Clone, Default)]
pub struct ApiContext {
    pub bearer_token: Option<String>,
}

impl ApiContext {
    pub fn from_config(config: &ApiConfig) -> Self {
        Self {
            bearer_token: config.bearer_token.clone().filter(|t| !t.trim().is_empty()),
        }
    }
}

pub struct ApiSource {
    client: HttpClient,
    base_url: Url,
    endpoints: EndpointConfig,
    context: ApiContext,
}

impl ApiSource {
    pub fn new(config: &ApiConfig, context: ApiContext) -> Result<Self, SourceError> {
        let base_url = Url::parse(&config.base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(SourceError::InvalidUrl(config.base_url.clone()));
        }

        Ok(Self {
            client: HttpClient::new(config)?,
            base_url,
            endpoints: config.endpoints.clone(),
            context,
        })
    }

    fn endpoint(&self, family: MetricFamily) -> &str {
        match family {
            MetricFamily::Price => &self.endpoints.price,
            MetricFamily::SalesRank => &self.endpoints.sales_rank,
            MetricFamily::Rating => &self.endpoints.rating,
        }
    }

    /// `{base}/{endpoint}?asin=…&marketplaceId=…&period=…`
    pub fn family_url(&self, key: &BundleKey, family: MetricFamily) -> Result<Url, SourceError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SourceError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(self.endpoint(family).split('/').filter(|s| !s.is_empty()));
        url.query_pairs_mut()
            .append_pair("asin", &key.asin)
            .append_pair("marketplaceId", &key.marketplace_id.to_string())
            .append_pair("period", key.range.period());
        Ok(url)
    }
}

#[async_trait]
impl MetricsSource for ApiSource {
    async fn fetch_family(
        &self,
        key: &BundleKey,
        family: MetricFamily,
    ) -> Result<RawHistoryPayload, SourceError> {
        let url = self.family_url(key, family)?;
        debug!("{} {}: {}", key, family, url);
        self.client
            .get_json(&url, self.context.bearer_token.as_deref())
            .await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimeRange;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: String) -> ApiConfig {
        ApiConfig {
            base_url,
            max_retries: 2,
            retry_base_ms: 1,
            ..ApiConfig::default()
        }
    }

    #[test]
    fn test_family_url() {
        let source = ApiSource::new(&config("https://api.example.com/api/".into()), ApiContext::default()).unwrap();
        let key = BundleKey::new("B000TEST01", 3, TimeRange::Quarter);
        let url = source.family_url(&key, MetricFamily::SalesRank).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/api/products/sales-rank?asin=B000TEST01&marketplaceId=3&period=90d"
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(SourceError::Http { status: 503, url: String::new() }.is_retryable());
        assert!(SourceError::Http { status: 429, url: String::new() }.is_retryable());
        assert!(!SourceError::Http { status: 404, url: String::new() }.is_retryable());
        assert!(!SourceError::Decode { url: String::new(), message: String::new() }.is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_family_sends_query_and_token() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/products/price-history"))
            .and(query_param("asin", "B000TEST01"))
            .and(query_param("marketplaceId", "1"))
            .and(query_param("period", "7d"))
            .and(header("authorization", "Bearer secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": { "amazon": { "data": { "2024-01-01": { "price": 19.99 } } } }
            })))
            .mount(&mock_server)
            .await;

        let context = ApiContext { bearer_token: Some("secret".into()) };
        let source = ApiSource::new(&config(mock_server.uri()), context).unwrap();
        let key = BundleKey::new("B000TEST01", 1, TimeRange::Week);

        let payload = source.fetch_family(&key, MetricFamily::Price).await.unwrap();
        let series = adapt_payload(MetricFamily::Price, &payload);
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].key.as_str(), "amazon_price");
    }

    #[tokio::test]
    async fn test_server_error_is_retried_then_reported() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&mock_server)
            .await;

        let source = ApiSource::new(&config(mock_server.uri()), ApiContext::default()).unwrap();
        let key = BundleKey::new("B000TEST01", 1, TimeRange::Week);

        let err = source.fetch_family(&key, MetricFamily::Rating).await.unwrap_err();
        assert!(matches!(err, SourceError::Http { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&mock_server)
            .await;

        let source = ApiSource::new(&config(mock_server.uri()), ApiContext::default()).unwrap();
        let key = BundleKey::new("B000TEST01", 1, TimeRange::Week);

        let err = source.fetch_family(&key, MetricFamily::Price).await.unwrap_err();
        assert!(matches!(err, SourceError::Http { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_response_cookies_are_not_sent_back() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("set-cookie", "session=abc; Path=/")
                    .set_body_json(serde_json::json!({ "data": {} })),
            )
            .expect(2)
            .mount(&mock_server)
            .await;

        let source = ApiSource::new(&config(mock_server.uri()), ApiContext::default()).unwrap();
        let key = BundleKey::new("B000TEST01", 1, TimeRange::Week);
        source.fetch_family(&key, MetricFamily::Price).await.unwrap();
        source.fetch_family(&key, MetricFamily::Price).await.unwrap();

        let requests = mock_server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].headers.get("cookie").is_none());
    }

    #[tokio::test]
    async fn test_invalid_json_is_decode_error() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&mock_server)
            .await;

        let source = ApiSource::new(&config(mock_server.uri()), ApiContext::default()).unwrap();
        let key = BundleKey::new("B000TEST01", 1, TimeRange::Week);

        let err = source.fetch_family(&key, MetricFamily::Price).await.unwrap_err();
        assert!(matches!(err, SourceError::Decode { .. }));
    }
}
