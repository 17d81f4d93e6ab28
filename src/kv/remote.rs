//! Remote KV backend
//!
//! Thin client for a networked KV service shared by several trawlarr
//! processes. The wire contract is deliberately small:
//!
//! - `GET    {base}/kv/{key}`            → 200 body = value, 404 = missing
//! - `PUT    {base}/kv/{key}`            → body = value, `X-Ttl-Seconds`
//!   header (absent = never expires)
//! - `DELETE {base}/kv/{key}`            → 200/404
//! - `GET    {base}/kv?prefix={prefix}`  → JSON array of keys
//!
//! The server is responsible for expiry; this client only transports.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

use super::KvStore;
use crate::errors::KvError;

const TTL_HEADER: &str = "x-ttl-seconds";

pub struct RemoteKvStore {
    client: reqwest::Client,
    base_url: String,
}

impl RemoteKvStore {
    pub fn new(base_url: &str) -> Result<Self, KvError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| KvError::Backend {
                message: format!("building kv http client: {e}"),
            })?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn key_url(&self, key: &str) -> String {
        format!("{}/kv/{}", self.base_url, urlencoding::encode(key))
    }
}

fn transport_err(e: reqwest::Error) -> KvError {
    KvError::Backend {
        message: format!("kv transport: {e}"),
    }
}

#[async_trait]
impl KvStore for RemoteKvStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, KvError> {
        let response = self
            .client
            .get(self.key_url(key))
            .send()
            .await
            .map_err(transport_err)?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(KvError::NotFound),
            status if status.is_success() => {
                Ok(response.bytes().await.map_err(transport_err)?.to_vec())
            }
            status => Err(KvError::Backend {
                message: format!("kv get returned {status}"),
            }),
        }
    }

    async fn put(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), KvError> {
        let mut request = self.client.put(self.key_url(key)).body(value.to_vec());
        if !ttl.is_zero() {
            request = request.header(TTL_HEADER, ttl.as_secs());
        }
        let response = request.send().await.map_err(transport_err)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(KvError::Backend {
                message: format!("kv put returned {}", response.status()),
            })
        }
    }

    async fn delete(&self, key: &str) -> Result<(), KvError> {
        let response = self
            .client
            .delete(self.key_url(key))
            .send()
            .await
            .map_err(transport_err)?;
        if response.status().is_success() || response.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(KvError::Backend {
                message: format!("kv delete returned {}", response.status()),
            })
        }
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let url = format!(
            "{}/kv?prefix={}",
            self.base_url,
            urlencoding::encode(prefix)
        );
        let response = self.client.get(url).send().await.map_err(transport_err)?;
        if !response.status().is_success() {
            return Err(KvError::Backend {
                message: format!("kv scan returned {}", response.status()),
            });
        }
        Ok(response.json().await.map_err(transport_err)?)
    }
}
