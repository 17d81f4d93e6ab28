//! Registrable-domain extraction
//!
//! Rate-limit buckets and resolver dispatch are keyed by the registrable
//! domain so `cdn1.example.com` and `www.example.com` share one bucket.
//! A compact multi-part-suffix list stands in for the full public-suffix
//! table; unknown hosts fall back to the last two labels.

use url::Url;

use crate::errors::FetchError;

/// Country-code second-level suffixes where eTLD+1 spans three labels
const MULTI_PART_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "ac.uk", "gov.uk", "co.nz", "co.za", "co.jp", "ne.jp", "or.jp", "com.au",
    "net.au", "org.au", "com.br", "net.br", "com.mx", "com.ar", "com.tr", "co.in", "co.kr",
];

/// Extract the registrable domain of a URL, lowercased.
pub fn registrable_domain(raw: &str) -> Result<String, FetchError> {
    let url = Url::parse(raw).map_err(|e| FetchError::InvalidUrl {
        url: raw.to_string(),
        message: e.to_string(),
    })?;
    let host = url.host_str().ok_or_else(|| FetchError::InvalidUrl {
        url: raw.to_string(),
        message: "no host".to_string(),
    })?;
    Ok(registrable_of_host(host))
}

/// Registrable domain of an already-extracted host
pub fn registrable_of_host(host: &str) -> String {
    let host = host.trim_end_matches('.').to_ascii_lowercase();

    // IP literals have no registrable domain; key the bucket on the address.
    if host.parse::<std::net::IpAddr>().is_ok() {
        return host;
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host;
    }

    let last_two = labels[labels.len() - 2..].join(".");
    if MULTI_PART_SUFFIXES.contains(&last_two.as_str()) && labels.len() >= 3 {
        return labels[labels.len() - 3..].join(".");
    }
    last_two
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_subdomains() {
        assert_eq!(
            registrable_domain("https://cdn1.mirror.example.com/x").unwrap(),
            "example.com"
        );
        assert_eq!(
            registrable_domain("http://www.example.com/").unwrap(),
            "example.com"
        );
    }

    #[test]
    fn handles_multi_part_suffixes() {
        assert_eq!(
            registrable_domain("https://media.example.co.uk/y").unwrap(),
            "example.co.uk"
        );
    }

    #[test]
    fn ip_hosts_pass_through() {
        assert_eq!(
            registrable_domain("http://127.0.0.1:8080/z").unwrap(),
            "127.0.0.1"
        );
    }

    #[test]
    fn bare_domain_unchanged() {
        assert_eq!(registrable_of_host("Example.COM"), "example.com");
    }

    #[test]
    fn rejects_relative_urls() {
        assert!(registrable_domain("/no/scheme").is_err());
    }
}
