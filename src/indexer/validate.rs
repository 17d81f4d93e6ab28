//! Batch URL validation
//!
//! One HEAD per URL with a short timeout, falling back to GET where the
//! hoster rejects HEAD (outright error or 405/501). A URL is valid iff
//! the final status is below 400. The batch runs concurrently up to a
//! bound; order of the result map is irrelevant, callers re-apply their
//! own ordering.

use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::fetch::SharedFetcher;

pub async fn validate_urls(
    fetcher: &SharedFetcher,
    urls: &[String],
    timeout: Duration,
    max_concurrent: usize,
) -> HashMap<String, bool> {
    let started = Instant::now();
    let results: Vec<(String, bool)> = stream::iter(urls.iter().cloned())
        .map(|url| {
            let fetcher = fetcher.clone();
            async move {
                let valid = check_one(&fetcher, &url, timeout).await;
                (url, valid)
            }
        })
        .buffer_unordered(max_concurrent.max(1))
        .collect()
        .await;

    let valid_count = results.iter().filter(|(_, v)| *v).count();
    debug!(
        "validated {} urls ({} ok) in {:?}",
        urls.len(),
        valid_count,
        started.elapsed()
    );
    results.into_iter().collect()
}

async fn check_one(fetcher: &SharedFetcher, url: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    match fetcher.head(url, deadline).await {
        Ok(response) if !matches!(response.status().as_u16(), 405 | 501) => {
            response.status().as_u16() < 400
        }
        // HEAD rejected or failed: some hosters only answer GET.
        _ => {
            let deadline = Instant::now() + timeout;
            match fetcher.get(url, deadline).await {
                Ok(response) => response.status().as_u16() < 400,
                Err(_) => false,
            }
        }
    }
}
