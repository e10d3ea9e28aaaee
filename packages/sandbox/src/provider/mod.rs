// ABOUTME: Provider trait for remote sandbox backends
// ABOUTME: Defines abstract interface for sandbox lifecycle and command dispatch

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub mod e2b;

pub use e2b::E2bProvider;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Sandbox not found: {0}")]
    NotFound(String),

    #[error("API error: {0}")]
    Api(String),
}

impl ProviderError {
    /// Transient failures are retried with backoff; everything else is not
    /// worth retrying (bad credentials, missing sandbox, malformed request).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::RateLimited(_) | Self::QuotaExceeded(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Provider-assigned identifier for one remote sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SandboxId(pub String);

impl SandboxId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form for log lines.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(12);
        &self.0[..end]
    }
}

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw outcome of one command run inside a sandbox, before classification.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Provider trait for remote sandbox backends.
///
/// All remote I/O for the lifecycle layer goes through this seam, which keeps
/// the lease manager, provisioner and executor testable against an in-process
/// mock.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Create a new sandbox from a template. `keepalive` is the remote-side
    /// idle timeout after which the backend reclaims the sandbox on its own.
    async fn create_sandbox(&self, template: &str, keepalive: Duration) -> Result<SandboxId>;

    /// Run a shell command inside the sandbox. The timeout is forwarded to
    /// the backend; callers additionally enforce it locally.
    async fn run_command(
        &self,
        sandbox: &SandboxId,
        command: &str,
        timeout: Duration,
    ) -> Result<RunOutput>;

    /// Tear down a sandbox. Backends reclaim expired sandboxes on their own,
    /// so this is best-effort cleanup.
    async fn close_sandbox(&self, sandbox: &SandboxId) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ProviderError::Connection("reset".into()).is_transient());
        assert!(ProviderError::RateLimited("429".into()).is_transient());
        assert!(ProviderError::QuotaExceeded("402".into()).is_transient());
        assert!(!ProviderError::Unauthorized("401".into()).is_transient());
        assert!(!ProviderError::NotFound("gone".into()).is_transient());
        assert!(!ProviderError::Api("500".into()).is_transient());
    }

    #[test]
    fn sandbox_id_short_form() {
        let id = SandboxId("sbx-0123456789abcdef".to_string());
        assert_eq!(id.short(), "sbx-01234567");
        let tiny = SandboxId("sbx".to_string());
        assert_eq!(tiny.short(), "sbx");
    }
}
