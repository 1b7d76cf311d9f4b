//! HTTP operations with local smoothing and retry logic
//!
//! [`HttpHandler`] wraps an adapter's `reqwest::Client` with a per-adapter
//! `governor` limiter (burst smoothing inside one process) and exponential
//! backoff on 429, 503 and transport failures. The shared, cross-process
//! budget is enforced separately by the rate limiter.

use std::num::NonZeroU32;
use std::time::Duration;

use governor::{clock::DefaultClock, state::InMemoryState, Jitter, Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use url::Url;

use super::config::ClientConfig;
use crate::constants::limits;
use crate::errors::{SourceError, SourceResult};

type LocalLimiter = RateLimiter<governor::state::NotKeyed, InMemoryState, DefaultClock>;

/// HTTP operations handler for one source
#[derive(Debug)]
pub struct HttpHandler {
    source_name: String,
    client: Client,
    rate_limiter: LocalLimiter,
    max_retries: u32,
    request_timeout: Duration,
}

impl HttpHandler {
    /// Build a handler from client configuration
    pub fn new(source_name: &str, config: &ClientConfig) -> SourceResult<Self> {
        let client = config.build_http_client(source_name)?;
        let rate_limiter = Self::build_rate_limiter(source_name, config.rate_limit_rps)?;
        Ok(Self {
            source_name: source_name.to_string(),
            client,
            rate_limiter,
            max_retries: config.max_retries,
            request_timeout: config.request_timeout,
        })
    }

    fn build_rate_limiter(source_name: &str, rate_limit_rps: u32) -> SourceResult<LocalLimiter> {
        let rps = NonZeroU32::new(rate_limit_rps).ok_or_else(|| SourceError::Misconfigured {
            source_name: source_name.to_string(),
            reason: "local rate limit must be non-zero".to_string(),
        })?;
        Ok(RateLimiter::direct(Quota::per_second(rps)))
    }

    fn backoff_delay(attempt: u32) -> Duration {
        Duration::from_millis(limits::RETRY_BASE_DELAY_MS * 2_u64.pow(attempt))
    }

    fn transport_error(&self, error: reqwest::Error) -> SourceError {
        if error.is_timeout() {
            SourceError::Timeout {
                source_name: self.source_name.clone(),
                millis: self.request_timeout.as_millis() as u64,
            }
        } else {
            SourceError::Http {
                source_name: self.source_name.clone(),
                error,
            }
        }
    }

    /// GET `url` with the given extra headers, retrying transient failures
    pub async fn get(&self, url: &Url, headers: &[(&str, &str)]) -> SourceResult<reqwest::Response> {
        self.rate_limiter
            .until_ready_with_jitter(Jitter::up_to(Duration::from_millis(100)))
            .await;

        let mut retries = 0;
        loop {
            let mut request = self.client.get(url.as_str());
            for (name, value) in headers {
                request = request.header(*name, *value);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    let retryable = status == StatusCode::TOO_MANY_REQUESTS
                        || status == StatusCode::SERVICE_UNAVAILABLE;

                    if retryable && retries < self.max_retries {
                        retries += 1;
                        let delay = Self::backoff_delay(retries);
                        tracing::warn!(
                            "{} responded {}. Backing off for {}ms",
                            self.source_name,
                            status.as_u16(),
                            delay.as_millis()
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    if status == StatusCode::TOO_MANY_REQUESTS {
                        return Err(SourceError::Throttled {
                            source_name: self.source_name.clone(),
                        });
                    }

                    if !status.is_success() {
                        return Err(SourceError::Status {
                            source_name: self.source_name.clone(),
                            status: status.as_u16(),
                        });
                    }

                    tracing::debug!("{}: fetched {}", self.source_name, url);
                    return Ok(response);
                }
                Err(e) if retries < self.max_retries && !e.is_builder() => {
                    retries += 1;
                    let delay = Self::backoff_delay(retries);
                    tracing::warn!(
                        "{} request failed (attempt {}/{}): {}. Retrying in {}ms",
                        self.source_name,
                        retries,
                        self.max_retries,
                        e,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::warn!(
                        "{} request failed after {} retries: {}",
                        self.source_name,
                        retries,
                        e
                    );
                    return Err(self.transport_error(e));
                }
            }
        }
    }

    /// GET `url` and decode the JSON body
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &Url,
        headers: &[(&str, &str)],
    ) -> SourceResult<T> {
        let body = self
            .get(url, headers)
            .await?
            .text()
            .await
            .map_err(|e| self.transport_error(e))?;

        serde_json::from_str(&body).map_err(|e| SourceError::Decode {
            source_name: self.source_name.clone(),
            reason: e.to_string(),
        })
    }

    /// Name of the source this handler serves
    pub fn source_name(&self) -> &str {
        &self.source_name
    }
}
