// ABOUTME: Sandbox lifecycle and resilient command execution for pentest runs
// ABOUTME: Lease management, tool provisioning, and failure-classifying dispatch

pub mod config;
pub mod executor;
pub mod lease;
pub mod provider;
pub mod provision;
pub mod retry;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{ConfigError, SandboxConfig};
pub use executor::{
    CommandExecutor, ExecutionResult, ExecutorError, LOCAL_FAILURE_EXIT, TOOL_MISSING_EXIT,
};
pub use lease::{HandleStatus, LeaseError, LeaseInfo, SandboxHandle, SandboxLeaseManager};
pub use provider::{E2bProvider, ProviderError, RunOutput, SandboxId, SandboxProvider};
pub use provision::{ProvisionError, ProvisionReport, Tool, ToolProvisioner, ToolSet};
pub use retry::{retry_with_backoff, RetryPolicy};
