//! Rate-limited outbound HTTP transport
//!
//! Every outbound request acquires a token from its target domain's bucket
//! before it may touch the wire, reports AIMD feedback afterwards, and
//! retries throttle responses (429/503) with exponential backoff honouring
//! `Retry-After`. Timeouts are never retried. Buckets are created lazily
//! per registrable domain and evicted after ten minutes of silence.

use dashmap::DashMap;
use rand::Rng;
use reqwest::{Request, Response, StatusCode, header};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::FetchConfig;
use crate::errors::FetchError;

pub mod bucket;
pub mod domain;

pub use bucket::{AimdLimits, BucketSnapshot, TokenBucket};
pub use domain::{registrable_domain, registrable_of_host};

/// Shared handle to the rate-limited client
pub type SharedFetcher = Arc<RateLimitedClient>;

pub struct RateLimitedClient {
    client: reqwest::Client,
    config: FetchConfig,
    limits: AimdLimits,
    buckets: DashMap<String, Arc<TokenBucket>>,
}

impl RateLimitedClient {
    pub fn new(config: FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        let limits = AimdLimits::from(&config);
        Ok(Self {
            client,
            config,
            limits,
            buckets: DashMap::new(),
        })
    }

    /// Underlying reqwest client for building requests
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    fn bucket(&self, domain: &str) -> Arc<TokenBucket> {
        self.buckets
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(TokenBucket::new(self.limits)))
            .value()
            .clone()
    }

    /// Block on the domain bucket until a token is granted or the deadline
    /// passes. Cancellation works by dropping the future.
    async fn acquire_token(
        &self,
        bucket: &TokenBucket,
        domain: &str,
        deadline: Instant,
    ) -> Result<(), FetchError> {
        loop {
            match bucket.try_acquire() {
                Ok(()) => return Ok(()),
                Err(wait) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(FetchError::TokenDeadline {
                            domain: domain.to_string(),
                        });
                    }
                    let remaining = deadline - now;
                    tokio::time::sleep(wait.min(remaining)).await;
                    if Instant::now() >= deadline {
                        return Err(FetchError::TokenDeadline {
                            domain: domain.to_string(),
                        });
                    }
                }
            }
        }
    }

    /// Execute a request through the per-domain limiter.
    ///
    /// Responses in `200..=399` feed `record_success`; 429/503 feed
    /// `record_throttle` and retry up to `retry_max_attempts`; timeouts
    /// feed `record_timeout` and fail immediately. Other statuses are
    /// returned untouched for the caller to interpret.
    pub async fn execute(
        &self,
        request: Request,
        deadline: Instant,
    ) -> Result<Response, FetchError> {
        let url = request.url().to_string();
        let domain = registrable_domain(&url)?;
        let bucket = self.bucket(&domain);
        let started = Instant::now();

        let mut attempt: u32 = 0;
        loop {
            let try_request = request.try_clone().ok_or_else(|| FetchError::InvalidUrl {
                url: url.clone(),
                message: "request body is not cloneable for retry".to_string(),
            })?;

            self.acquire_token(&bucket, &domain, deadline).await?;

            let now = Instant::now();
            if now >= deadline {
                return Err(FetchError::Timeout {
                    url,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
            }
            let remaining = deadline - now;

            let outcome = tokio::time::timeout(remaining, self.client.execute(try_request)).await;
            let response = match outcome {
                Err(_) => {
                    bucket.record_timeout();
                    return Err(FetchError::Timeout {
                        url,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    });
                }
                Ok(Err(e)) if e.is_timeout() => {
                    bucket.record_timeout();
                    return Err(FetchError::Timeout {
                        url,
                        elapsed_ms: started.elapsed().as_millis() as u64,
                    });
                }
                Ok(Err(e)) => return Err(FetchError::Transport(e)),
                Ok(Ok(response)) => response,
            };

            let status = response.status();
            if status.is_success() || status.is_redirection() {
                bucket.record_success();
                return Ok(response);
            }

            if status == StatusCode::TOO_MANY_REQUESTS || status == StatusCode::SERVICE_UNAVAILABLE
            {
                bucket.record_throttle();
                if attempt >= self.config.retry_max_attempts {
                    return Err(FetchError::Throttled {
                        domain,
                        status: status.as_u16(),
                    });
                }
                let backoff = self.backoff_for(attempt, &response);
                debug!(
                    "throttled by {} ({}), retry {}/{} after {:?}",
                    domain,
                    status,
                    attempt + 1,
                    self.config.retry_max_attempts,
                    backoff
                );
                attempt += 1;
                let now = Instant::now();
                if now + backoff >= deadline {
                    return Err(FetchError::Throttled {
                        domain,
                        status: status.as_u16(),
                    });
                }
                tokio::time::sleep(backoff).await;
                continue;
            }

            // Other statuses carry no AIMD signal; hand back to the caller.
            return Ok(response);
        }
    }

    /// `Retry-After` (seconds form) wins, capped by the configured maximum;
    /// otherwise exponential backoff `base·2^n` with jitter.
    fn backoff_for(&self, attempt: u32, response: &Response) -> Duration {
        let retry_after = response
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);

        let backoff = match retry_after {
            Some(server_wait) => server_wait,
            None => {
                let base = self.config.retry_base_backoff;
                let exponential = base * 2u32.saturating_pow(attempt);
                let jitter_ms = rand::rng().random_range(0..=base.as_millis().max(1) as u64 / 2);
                exponential + Duration::from_millis(jitter_ms)
            }
        };
        backoff.min(self.config.retry_max_backoff)
    }

    pub async fn get(&self, url: &str, deadline: Instant) -> Result<Response, FetchError> {
        let request = self
            .client
            .get(url)
            .build()
            .map_err(FetchError::Transport)?;
        self.execute(request, deadline).await
    }

    pub async fn head(&self, url: &str, deadline: Instant) -> Result<Response, FetchError> {
        let request = self
            .client
            .head(url)
            .build()
            .map_err(FetchError::Transport)?;
        self.execute(request, deadline).await
    }

    pub async fn get_with_headers(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        deadline: Instant,
    ) -> Result<Response, FetchError> {
        let mut builder = self.client.get(url);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.build().map_err(FetchError::Transport)?;
        self.execute(request, deadline).await
    }

    /// GET and decode the body, turning non-2xx statuses into errors.
    pub async fn get_text(&self, url: &str, deadline: Instant) -> Result<String, FetchError> {
        let response = self.get(url, deadline).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        response.text().await.map_err(FetchError::Transport)
    }

    pub async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        deadline: Instant,
    ) -> Result<T, FetchError> {
        let response = self.get(url, deadline).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        response.json().await.map_err(FetchError::Transport)
    }

    /// Evict buckets idle longer than `idle_bucket_ttl`; returns the count.
    pub fn evict_idle(&self) -> usize {
        let ttl = self.config.idle_bucket_ttl;
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| bucket.idle_for() < ttl);
        let evicted = before - self.buckets.len();
        if evicted > 0 {
            debug!("evicted {} idle rate-limit buckets", evicted);
        }
        evicted
    }

    /// Current per-domain rates for the stats endpoint
    pub fn snapshot(&self) -> HashMap<String, BucketSnapshot> {
        self.buckets
            .iter()
            .map(|e| (e.key().clone(), e.value().snapshot()))
            .collect()
    }

    /// Test hook: force a domain's bucket into existence
    pub fn bucket_for_domain(&self, domain: &str) -> Arc<TokenBucket> {
        self.bucket(domain)
    }
}

/// Background sweep evicting idle buckets, cancelled on shutdown.
pub async fn run_bucket_sweeper(
    fetcher: SharedFetcher,
    cancel: tokio_util::sync::CancellationToken,
) {
    let mut tick = tokio::time::interval(Duration::from_secs(60));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                fetcher.evict_idle();
            }
            _ = cancel.cancelled() => {
                debug!("bucket sweeper stopped");
                break;
            }
        }
    }
}
