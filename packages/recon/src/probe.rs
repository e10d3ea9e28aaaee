// ABOUTME: HTTP reachability probe deciding between full and lightweight recon
// ABOUTME: Any HTTP response counts as reachable, including error statuses

use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("Failed to build probe HTTP client: {0}")]
    Client(String),

    #[error("Target URL is not valid: {0}")]
    InvalidUrl(String),
}

pub type Result<T> = std::result::Result<T, ProbeError>;

/// Checks whether a target answers HTTP at all. Scan targets routinely serve
/// broken TLS and 4xx/5xx pages, so certificate validation is off and every
/// status counts as reachable. Only transport failure means unreachable.
pub struct ReachabilityProbe {
    client: reqwest::Client,
}

impl ReachabilityProbe {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| ProbeError::Client(e.to_string()))?;
        Ok(Self { client })
    }

    pub async fn is_reachable(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(response) => {
                debug!(url, status = %response.status(), "Target answered probe");
                true
            }
            Err(e) => {
                info!(url, "Target did not answer probe: {}", e);
                false
            }
        }
    }
}

/// Extract the bare host from a target URL for host-oriented tools.
pub fn host_of(url: &str) -> Result<String> {
    let parsed = reqwest::Url::parse(url).map_err(|e| ProbeError::InvalidUrl(e.to_string()))?;
    parsed
        .host_str()
        .map(|h| h.to_string())
        .ok_or_else(|| ProbeError::InvalidUrl(format!("no host in {}", url)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn host_extraction() {
        assert_eq!(host_of("http://10.0.0.5:8080/app").unwrap(), "10.0.0.5");
        assert_eq!(host_of("https://example.test").unwrap(), "example.test");
        assert!(host_of("not a url").is_err());
    }

    #[tokio::test]
    async fn http_200_is_reachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let probe = ReachabilityProbe::new().unwrap();
        assert!(probe.is_reachable(&server.uri()).await);
    }

    #[tokio::test]
    async fn http_500_still_counts_as_reachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let probe = ReachabilityProbe::new().unwrap();
        assert!(probe.is_reachable(&server.uri()).await);
    }

    #[tokio::test]
    async fn refused_connection_is_unreachable() {
        let probe = ReachabilityProbe::new().unwrap();
        assert!(!probe.is_reachable("http://127.0.0.1:1").await);
    }
}
