// ABOUTME: E2B provider for remote cloud sandboxes
// ABOUTME: Implements the SandboxProvider trait over the E2B REST API with reqwest

use super::{ProviderError, Result, RunOutput, SandboxId, SandboxProvider};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_API_URL: &str = "https://api.e2b.dev";

// Slack added on top of the per-command timeout so the HTTP layer does not
// race the backend's own timeout handling.
const HTTP_TIMEOUT_SLACK: Duration = Duration::from_secs(15);

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSandboxRequest<'a> {
    template_id: &'a str,
    timeout: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSandboxResponse {
    sandbox_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunCommandRequest<'a> {
    cmd: &'a str,
    timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunCommandResponse {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    exit_code: i32,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    #[serde(default)]
    message: String,
}

/// E2B provider for remote cloud sandboxes.
pub struct E2bProvider {
    client: Client,
    api_key: String,
    api_url: String,
}

impl E2bProvider {
    /// Create a new E2B provider. The API key must already be validated by
    /// the configuration layer; an empty key is rejected here as a backstop.
    pub fn new(api_key: String, api_url: Option<String>) -> Result<Self> {
        if api_key.is_empty() {
            return Err(ProviderError::Unauthorized(
                "E2B API key is required".to_string(),
            ));
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            api_url: api_url.unwrap_or_else(|| DEFAULT_API_URL.to_string()),
        })
    }

    fn map_transport_error(e: reqwest::Error) -> ProviderError {
        if e.is_timeout() || e.is_connect() {
            ProviderError::Connection(e.to_string())
        } else {
            ProviderError::Api(e.to_string())
        }
    }

    /// Map a non-success HTTP status to the provider error taxonomy.
    async fn error_from_response(response: Response) -> ProviderError {
        let status = response.status();
        let message = match response.json::<ApiErrorResponse>().await {
            Ok(body) if !body.message.is_empty() => body.message,
            _ => format!("HTTP {}", status),
        };

        match status {
            StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(message),
            StatusCode::PAYMENT_REQUIRED => ProviderError::QuotaExceeded(message),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                ProviderError::Unauthorized(message)
            }
            StatusCode::NOT_FOUND => ProviderError::NotFound(message),
            _ => ProviderError::Api(format!("{}: {}", status, message)),
        }
    }
}

#[async_trait]
impl SandboxProvider for E2bProvider {
    async fn create_sandbox(&self, template: &str, keepalive: Duration) -> Result<SandboxId> {
        let url = format!("{}/sandboxes", self.api_url);
        let request = CreateSandboxRequest {
            template_id: template,
            timeout: keepalive.as_secs(),
        };

        info!(template, keepalive_secs = keepalive.as_secs(), "Creating sandbox");

        let response = self
            .client
            .post(&url)
            .header("X-API-Key", &self.api_key)
            .json(&request)
            .timeout(Duration::from_secs(60))
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let body: CreateSandboxResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Api(format!("malformed create response: {}", e)))?;

        let id = SandboxId(body.sandbox_id);
        info!(sandbox = %id.short(), "Sandbox created");
        Ok(id)
    }

    async fn run_command(
        &self,
        sandbox: &SandboxId,
        command: &str,
        timeout: Duration,
    ) -> Result<RunOutput> {
        let url = format!("{}/sandboxes/{}/commands", self.api_url, sandbox);
        let request = RunCommandRequest {
            cmd: command,
            timeout_ms: timeout.as_millis() as u64,
        };

        debug!(sandbox = %sandbox.short(), timeout_secs = timeout.as_secs(), "Dispatching command");

        let response = self
            .client
            .post(&url)
            .header("X-API-Key", &self.api_key)
            .json(&request)
            .timeout(timeout + HTTP_TIMEOUT_SLACK)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let body: RunCommandResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Api(format!("malformed command response: {}", e)))?;

        Ok(RunOutput {
            stdout: body.stdout,
            stderr: body.stderr,
            exit_code: body.exit_code,
        })
    }

    async fn close_sandbox(&self, sandbox: &SandboxId) -> Result<()> {
        let url = format!("{}/sandboxes/{}", self.api_url, sandbox);

        let response = self
            .client
            .delete(&url)
            .header("X-API-Key", &self.api_key)
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        info!(sandbox = %sandbox.short(), "Sandbox closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> E2bProvider {
        E2bProvider::new("test-key".to_string(), Some(server.uri())).unwrap()
    }

    #[test]
    fn rejects_empty_api_key() {
        let result = E2bProvider::new(String::new(), None);
        assert!(matches!(result, Err(ProviderError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn create_sandbox_returns_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sandboxes"))
            .and(header("X-API-Key", "test-key"))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"sandboxId": "sbx-abc123"})),
            )
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let id = provider
            .create_sandbox("base", Duration::from_secs(900))
            .await
            .unwrap();
        assert_eq!(id.as_str(), "sbx-abc123");
    }

    #[tokio::test]
    async fn run_command_parses_output() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sandboxes/sbx-1/commands"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "stdout": "hello\n",
                "stderr": "",
                "exitCode": 0
            })))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let output = provider
            .run_command(&SandboxId("sbx-1".into()), "echo hello", Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(output.stdout, "hello\n");
        assert_eq!(output.exit_code, 0);
    }

    #[tokio::test]
    async fn rate_limit_maps_to_transient_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sandboxes"))
            .respond_with(
                ResponseTemplate::new(429).set_body_json(json!({"message": "slow down"})),
            )
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider
            .create_sandbox("base", Duration::from_secs(900))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn quota_maps_to_transient_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sandboxes"))
            .respond_with(
                ResponseTemplate::new(402).set_body_json(json!({"message": "quota exceeded"})),
            )
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider
            .create_sandbox("base", Duration::from_secs(900))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::QuotaExceeded(_)));
    }

    #[tokio::test]
    async fn unauthorized_is_not_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sandboxes"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({"message": "bad key"})))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        let err = provider
            .create_sandbox("base", Duration::from_secs(900))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unauthorized(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn close_sandbox_tolerates_success() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/sandboxes/sbx-9"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let provider = provider_for(&server);
        provider
            .close_sandbox(&SandboxId("sbx-9".into()))
            .await
            .unwrap();
    }
}
