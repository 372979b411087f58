//! Shared HTTP transport for the protocol clients.
//!
//! Every request goes through [`HttpFetcher::get`], which applies the
//! configured timeout and retries transient failures:
//!
//! - `429 Too Many Requests`: honors `Retry-After`, otherwise exponential
//!   backoff capped at [`HttpFetcher::MAX_RETRY_DELAY`]
//! - `5xx`, connect errors and timeouts: linear backoff up to
//!   `HttpConfig::max_retries`
//!
//! Any other non-success status fails immediately.

use std::time::Duration;

use geoharvest_core::error::AppError;
use geoharvest_core::xml::{XmlElement, parse_document};
use geoharvest_core::{Credentials, HttpConfig};
use reqwest::{Client, Proxy, StatusCode, Url};
use serde::de::DeserializeOwned;
use tokio::time::sleep;

/// A configured HTTP client bound to one job's credentials and proxy.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    config: HttpConfig,
    credentials: Option<Credentials>,
}

impl HttpFetcher {
    /// Maximum backoff delay for rate-limited retries.
    pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

    /// Maximum retries for rate-limited (429) responses.
    /// Higher than normal retries because rate limits are transient.
    /// With 500ms base and 30s cap: 1s, 2s, 4s, 8s, 16s, 30s, 30s, 30s, 30s = ~151s total wait.
    const RATE_LIMIT_MAX_RETRIES: u32 = 10;

    /// Builds the underlying reqwest client.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` for an unusable proxy URL and
    /// `AppError::ClientError` if the client cannot be built.
    pub fn new(
        config: &HttpConfig,
        credentials: Option<Credentials>,
        proxy: Option<&str>,
    ) -> Result<Self, AppError> {
        let mut builder = Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.timeout);

        if let Some(proxy) = proxy {
            let proxy = Proxy::all(proxy)
                .map_err(|e| AppError::ConfigError(format!("invalid proxy '{proxy}': {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| AppError::ClientError(e.to_string()))?;

        Ok(Self {
            client,
            config: config.clone(),
            credentials,
        })
    }

    /// Sends a GET request, retrying transient failures.
    pub async fn get(&self, url: &Url) -> Result<reqwest::Response, AppError> {
        let max_retries = self.config.max_retries.max(1);
        let base_delay = self.config.retry_base_delay;
        let mut last_error = AppError::Generic("No attempts made".to_string());
        let effective_max = Self::RATE_LIMIT_MAX_RETRIES.max(max_retries);

        for attempt in 1..=effective_max {
            let mut request = self.client.get(url.clone());
            if let Some(credentials) = &self.credentials {
                request = request.basic_auth(&credentials.username, Some(&credentials.password));
            }

            match request.send().await {
                Ok(resp) => {
                    let status = resp.status();

                    if status.is_success() {
                        return Ok(resp);
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        last_error = AppError::RateLimitExceeded;
                        if attempt < effective_max {
                            let delay = resp
                                .headers()
                                .get("retry-after")
                                .and_then(|v| v.to_str().ok())
                                .and_then(|v| v.trim().parse::<u64>().ok())
                                .map(Duration::from_secs)
                                .unwrap_or_else(|| {
                                    (base_delay * 2_u32.pow(attempt)).min(Self::MAX_RETRY_DELAY)
                                });
                            tracing::debug!(%url, attempt, ?delay, "Rate limited, retrying");
                            sleep(delay).await;
                            continue;
                        }
                        tracing::warn!(%url, attempts = attempt, "Rate limit retries exhausted");
                        return Err(last_error);
                    }

                    if status.is_server_error() {
                        last_error = AppError::ClientError(format!(
                            "Server error: HTTP {} from {}",
                            status.as_u16(),
                            url
                        ));
                        if attempt < max_retries {
                            let delay = base_delay * attempt;
                            tracing::debug!(%url, attempt, status = status.as_u16(), ?delay, "Server error, retrying");
                            sleep(delay).await;
                            continue;
                        }
                        return Err(last_error);
                    }

                    return Err(AppError::ClientError(format!(
                        "HTTP {} from {}",
                        status.as_u16(),
                        url
                    )));
                }
                Err(e) => {
                    let transient = e.is_timeout() || e.is_connect();
                    last_error = if e.is_timeout() {
                        AppError::Timeout(self.config.timeout.as_secs())
                    } else if e.is_connect() {
                        AppError::NetworkError(format!("Connection failed: {}", e))
                    } else {
                        AppError::ClientError(e.to_string())
                    };

                    if transient && attempt < max_retries {
                        let delay = base_delay * attempt;
                        tracing::debug!(%url, attempt, error = %e, ?delay, "Request failed, retrying");
                        sleep(delay).await;
                        continue;
                    }
                    break;
                }
            }
        }

        tracing::warn!(%url, error = %last_error, "Request failed");
        Err(last_error)
    }

    /// GETs `url` and returns the body as text.
    pub async fn get_text(&self, url: &Url) -> Result<String, AppError> {
        self.get(url)
            .await?
            .text()
            .await
            .map_err(|e| AppError::ClientError(e.to_string()))
    }

    /// GETs `url` and deserializes the JSON body.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, AppError> {
        self.get(url)
            .await?
            .json()
            .await
            .map_err(|e| AppError::ClientError(e.to_string()))
    }

    /// GETs `url` and parses the body as an XML document.
    pub async fn get_xml(&self, url: &Url) -> Result<XmlElement, AppError> {
        let body = self.get_text(url).await?;
        if body.trim().is_empty() {
            return Err(AppError::EmptyResponse);
        }
        parse_document(&body)
    }
}

/// Parses a source endpoint URL. Only `http` and `https` are accepted.
pub fn parse_source_url(raw: &str) -> Result<Url, AppError> {
    let url = Url::parse(raw.trim()).map_err(|_| AppError::InvalidSourceUrl(raw.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(AppError::InvalidSourceUrl(raw.to_string())),
    }
}
