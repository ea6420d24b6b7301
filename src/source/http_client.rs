use super::SourceError;
use crate::config::ApiConfig;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, warn};
use url::Url;

pub struct HttpClient {
    inner: reqwest::Client,
    config: ApiConfig,
}

impl HttpClient {
    pub fn new(config: &ApiConfig) -> Result<Self, SourceError> {
        let inner = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .timeout(Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .build()
            .map_err(|e| SourceError::Client(e.to_string()))?;

        Ok(Self {
            inner,
            config: config.clone(),
        })
    }

    /// GET `url` and decode the JSON body, retrying transport errors, 429 and 5xx.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &Url,
        bearer: Option<&str>,
    ) -> Result<T, SourceError> {
        let strategy = ExponentialBackoff::from_millis(2)
            .factor(self.config.retry_base_ms.max(1))
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.config.max_retries as usize);

        let mut attempt = 0u32;
        let body = RetryIf::spawn(
            strategy,
            || {
                attempt += 1;
                self.get_text(url, bearer, attempt)
            },
            |e: &SourceError| {
                let retry = e.is_retryable();
                if retry {
                    warn!("GET {} failed, retrying: {}", url, e);
                }
                retry
            },
        )
        .await?;

        serde_json::from_str(&body).map_err(|e| SourceError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }

    async fn get_text(
        &self,
        url: &Url,
        bearer: Option<&str>,
        attempt: u32,
    ) -> Result<String, SourceError> {
        debug!("GET {} (attempt {})", url, attempt);

        let mut req = self.inner.get(url.clone());
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        Ok(resp.text().await?)
    }
}
