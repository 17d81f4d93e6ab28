//! Site health probe
//!
//! HEAD against the plugin's origin, falling back to a one-byte ranged GET
//! where HEAD is rejected (405/501). Connectivity plus any status below
//! 500 counts as reachable; a Cloudflare challenge (cf-ray header with
//! 403/503, or body markers) is recorded as a captcha wall, which zeroes
//! the health observation.

use std::time::Instant;

use crate::fetch::SharedFetcher;
use crate::scoring::HealthProbe;

/// Body fragments that identify an anti-bot interstitial
const CHALLENGE_MARKERS: &[&str] = &[
    "cf-browser-verification",
    "challenge-platform",
    "Just a moment...",
    "Attention Required!",
];

/// Full probe outcome; the scoring observation is a projection of this
#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthReport {
    pub url: String,
    pub reachable: bool,
    pub captcha: bool,
    pub duration_ms: u64,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

impl HealthReport {
    pub fn as_probe(&self) -> HealthProbe {
        HealthProbe {
            ok: self.reachable,
            captcha: self.captcha,
            duration_ms: self.duration_ms,
        }
    }
}

pub async fn probe_health(fetcher: &SharedFetcher, url: &str, deadline: Instant) -> HealthReport {
    let started = Instant::now();

    let head = fetcher.head(url, deadline).await;
    let response = match head {
        Ok(response) if matches!(response.status().as_u16(), 405 | 501) => {
            // Some origins reject HEAD outright; retry with a ranged GET.
            fetcher
                .get_with_headers(url, &[("Range", "bytes=0-0")], deadline)
                .await
        }
        other => other,
    };

    let duration_ms = started.elapsed().as_millis() as u64;
    match response {
        Ok(response) => {
            let status = response.status().as_u16();
            let has_cf_ray = response.headers().contains_key("cf-ray");
            let mut captcha = has_cf_ray && matches!(status, 403 | 503);
            if !captcha && matches!(status, 403 | 503) {
                let body = response.text().await.unwrap_or_default();
                captcha = CHALLENGE_MARKERS.iter().any(|m| body.contains(m));
            }
            HealthReport {
                url: url.to_string(),
                reachable: status < 500 && !captcha,
                captcha,
                duration_ms,
                status_code: Some(status),
                error: None,
            }
        }
        Err(e) => HealthReport {
            url: url.to_string(),
            reachable: false,
            captcha: false,
            duration_ms,
            status_code: None,
            error: Some(e.to_string()),
        },
    }
}

/// Probe the base URL and then mirrors until one answers; used by the
/// per-plugin health endpoint.
pub async fn probe_with_mirrors(
    fetcher: &SharedFetcher,
    base_url: &str,
    mirrors: &[String],
    deadline: Instant,
) -> (HealthReport, Vec<HealthReport>) {
    let primary = probe_health(fetcher, base_url, deadline).await;
    let mut mirror_reports = Vec::new();
    if !primary.reachable {
        for mirror in mirrors {
            let report = probe_health(fetcher, mirror, deadline).await;
            let reachable = report.reachable;
            mirror_reports.push(report);
            if reachable {
                break;
            }
        }
    }
    (primary, mirror_reports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_projects_to_probe() {
        let report = HealthReport {
            url: "https://x".to_string(),
            reachable: true,
            captcha: false,
            duration_ms: 1234,
            status_code: Some(200),
            error: None,
        };
        let probe = report.as_probe();
        assert!(probe.ok);
        assert!(!probe.captcha);
        assert_eq!(probe.duration_ms, 1234);
    }
}
