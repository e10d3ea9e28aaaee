// ABOUTME: Resilient command executor running shell commands in the leased sandbox
// ABOUTME: Classifies failures into repairable, retryable, timeout, and plain-data exits

use crate::lease::{LeaseError, SandboxHandle, SandboxLeaseManager};
use crate::provider::{ProviderError, RunOutput, SandboxId, SandboxProvider};
use crate::provision::ToolProvisioner;
use crate::retry::{retry_with_backoff, RetryPolicy};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Shell exit code for "command not found".
pub const TOOL_MISSING_EXIT: i32 = 127;

/// Synthetic exit code for failures that happened on our side of the wire:
/// local timeouts and exhausted infrastructure retries.
pub const LOCAL_FAILURE_EXIT: i32 = -1;

const KILL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Error, Debug)]
pub enum ExecutorError {
    #[error(transparent)]
    Lease(#[from] LeaseError),

    #[error("Tool '{tool}' unavailable even after reinstalling the tool set")]
    ToolUnavailable { tool: String },
}

pub type Result<T> = std::result::Result<T, ExecutorError>;

/// Outcome of one executed command. A non-zero exit code is data, not an
/// error; recon tools routinely exit non-zero on perfectly useful scans.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    fn from_output(output: RunOutput, duration: Duration) -> Self {
        Self {
            stdout: output.stdout,
            stderr: output.stderr,
            exit_code: output.exit_code,
            duration,
        }
    }

    fn local_failure(message: String, duration: Duration) -> Self {
        Self {
            stdout: String::new(),
            stderr: message,
            exit_code: LOCAL_FAILURE_EXIT,
            duration,
        }
    }
}

enum Dispatch {
    Finished(RunOutput),
    TimedOut,
    InfraFailed(ProviderError),
}

/// Runs shell commands in whatever sandbox the lease manager currently
/// holds, absorbing the failure modes the scan pipeline must survive.
///
/// Failure taxonomy:
/// - exit 127 triggers one provision-and-retry cycle, then `ToolUnavailable`
/// - transient infrastructure errors get bounded backoff; exhaustion yields
///   a failure result, not an error
/// - local timeouts yield a synthetic exit of -1 and a best-effort remote kill
/// - lease failures propagate, nothing can run without a sandbox
pub struct CommandExecutor {
    lease: Arc<SandboxLeaseManager>,
    provider: Arc<dyn SandboxProvider>,
    provisioner: Arc<ToolProvisioner>,
    retry: RetryPolicy,
}

impl CommandExecutor {
    pub fn new(
        lease: Arc<SandboxLeaseManager>,
        provider: Arc<dyn SandboxProvider>,
        provisioner: Arc<ToolProvisioner>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            lease,
            provider,
            provisioner,
            retry,
        }
    }

    /// Execute one shell command with the given wall-clock timeout.
    ///
    /// Counts exactly one dispatch against the sandbox's command budget,
    /// whatever the outcome; the 127 repair retry belongs to the same
    /// dispatch.
    pub async fn execute(&self, command: &str, timeout: Duration) -> Result<ExecutionResult> {
        let handle = self.lease.lease().await?;
        let dispatch_number = handle.record_dispatch();
        info!(
            sandbox = %handle.id().short(),
            dispatch_number,
            command = %truncate(command, 120),
            "Executing command"
        );

        let started = Instant::now();
        let outcome = self.dispatch(handle.id(), command, timeout).await;

        if let Dispatch::Finished(output) = &outcome {
            if output.exit_code == TOOL_MISSING_EXIT {
                return self.repair_and_retry(&handle, command, timeout, started).await;
            }
        }

        Ok(self.resolve(outcome, command, timeout, started))
    }

    /// One provision-and-retry cycle for a command whose binary is missing.
    /// A second 127 means the tool genuinely cannot be installed.
    async fn repair_and_retry(
        &self,
        handle: &Arc<SandboxHandle>,
        command: &str,
        timeout: Duration,
        started: Instant,
    ) -> Result<ExecutionResult> {
        let tool = argv0(command);
        warn!(
            sandbox = %handle.id().short(),
            tool = %tool,
            "Command not found in sandbox, reinstalling tool set"
        );

        if let Err(e) = self.provisioner.provision(handle.id()).await {
            warn!("Repair provisioning failed: {}", e);
        }

        match self.dispatch(handle.id(), command, timeout).await {
            Dispatch::Finished(output) if output.exit_code == TOOL_MISSING_EXIT => {
                Err(ExecutorError::ToolUnavailable { tool })
            }
            outcome => Ok(self.resolve(outcome, command, timeout, started)),
        }
    }

    /// Run the command remotely under a local wall-clock timeout, retrying
    /// transient infrastructure errors. A timeout is never retried; the
    /// command may have side effects already.
    async fn dispatch(&self, sandbox: &SandboxId, command: &str, timeout: Duration) -> Dispatch {
        let attempt = retry_with_backoff(&self.retry, ProviderError::is_transient, || async {
            match tokio::time::timeout(timeout, self.provider.run_command(sandbox, command, timeout))
                .await
            {
                Ok(Ok(output)) => Ok(Some(output)),
                Ok(Err(e)) => Err(e),
                Err(_elapsed) => Ok(None),
            }
        })
        .await;

        match attempt {
            Ok(Some(output)) => Dispatch::Finished(output),
            Ok(None) => Dispatch::TimedOut,
            Err(e) => Dispatch::InfraFailed(e),
        }
    }

    fn resolve(
        &self,
        outcome: Dispatch,
        command: &str,
        timeout: Duration,
        started: Instant,
    ) -> ExecutionResult {
        let duration = started.elapsed();
        match outcome {
            Dispatch::Finished(output) => {
                if output.exit_code != 0 {
                    debug!(
                        exit_code = output.exit_code,
                        stderr = %truncate(&output.stderr, 200),
                        "Command exited non-zero"
                    );
                }
                ExecutionResult::from_output(output, duration)
            }
            Dispatch::TimedOut => {
                warn!(
                    timeout_secs = timeout.as_secs(),
                    command = %truncate(command, 120),
                    "Command timed out, requesting remote kill"
                );
                self.request_kill(command);
                ExecutionResult::local_failure(
                    format!("command timed out after {}s", timeout.as_secs()),
                    duration,
                )
            }
            Dispatch::InfraFailed(e) => {
                warn!(
                    command = %truncate(command, 120),
                    "Infrastructure retries exhausted: {}",
                    e
                );
                ExecutionResult::local_failure(format!("infrastructure failure: {}", e), duration)
            }
        }
    }

    /// Best-effort kill of a timed-out remote process. Fire and forget; the
    /// sandbox gets recycled eventually regardless.
    fn request_kill(&self, command: &str) {
        let tool = argv0(command);
        if tool.is_empty() {
            return;
        }
        let provider = Arc::clone(&self.provider);
        let lease = Arc::clone(&self.lease);
        tokio::spawn(async move {
            let info = lease.info().await;
            let Some(sandbox_id) = info.sandbox_id else {
                return;
            };
            let kill = format!("pkill -f {} || true", shell_quote(&tool));
            let sandbox = SandboxId(sandbox_id);
            if let Err(e) = provider.run_command(&sandbox, &kill, KILL_TIMEOUT).await {
                debug!(sandbox = %sandbox.short(), "Remote kill failed: {}", e);
            }
        });
    }
}

fn argv0(command: &str) -> String {
    command
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string()
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
