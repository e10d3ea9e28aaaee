// ABOUTME: In-crate mock sandbox provider for lease and executor tests
// ABOUTME: Answers tool-verification probes and plays back scripted command outcomes

use crate::provider::{ProviderError, Result, RunOutput, SandboxId, SandboxProvider};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type FailureFactory = Box<dyn Fn() -> ProviderError + Send + Sync>;

/// Scripted outcome for one non-infrastructure command.
pub(crate) enum Scripted {
    Output(RunOutput),
    Fail(ProviderError),
    /// Never completes; forces the caller's local timeout.
    Hang,
}

/// Mock provider covering the whole lifecycle. Provisioning probes
/// (`command -v`, apt, pkill) are answered structurally; everything else
/// plays back the scripted response queue, defaulting to a clean exit.
pub(crate) struct MockProvider {
    create_count: AtomicU32,
    close_count: AtomicU32,
    kill_count: AtomicU32,
    install_count: AtomicU32,
    verify_count: AtomicU32,
    create_delay: Mutex<Duration>,
    create_failure: Mutex<Option<FailureFactory>>,
    fail_closes: AtomicBool,
    missing_tools: Mutex<Vec<String>>,
    responses: Mutex<VecDeque<Scripted>>,
    commands: Mutex<Vec<String>>,
}

impl MockProvider {
    pub(crate) fn new() -> Self {
        Self {
            create_count: AtomicU32::new(0),
            close_count: AtomicU32::new(0),
            kill_count: AtomicU32::new(0),
            install_count: AtomicU32::new(0),
            verify_count: AtomicU32::new(0),
            create_delay: Mutex::new(Duration::ZERO),
            create_failure: Mutex::new(None),
            fail_closes: AtomicBool::new(false),
            missing_tools: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn create_count(&self) -> u32 {
        self.create_count.load(Ordering::SeqCst)
    }

    pub(crate) fn close_count(&self) -> u32 {
        self.close_count.load(Ordering::SeqCst)
    }

    pub(crate) fn kill_count(&self) -> u32 {
        self.kill_count.load(Ordering::SeqCst)
    }

    pub(crate) fn install_count(&self) -> u32 {
        self.install_count.load(Ordering::SeqCst)
    }

    pub(crate) fn verify_count(&self) -> u32 {
        self.verify_count.load(Ordering::SeqCst)
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub(crate) fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock().unwrap() = delay;
    }

    pub(crate) fn fail_creates_with<F>(&self, factory: F)
    where
        F: Fn() -> ProviderError + Send + Sync + 'static,
    {
        *self.create_failure.lock().unwrap() = Some(Box::new(factory));
    }

    pub(crate) fn fail_closes(&self) {
        self.fail_closes.store(true, Ordering::SeqCst);
    }

    pub(crate) fn set_missing_tools(&self, tools: &[&str]) {
        *self.missing_tools.lock().unwrap() = tools.iter().map(|t| t.to_string()).collect();
    }

    pub(crate) fn script_output(&self, exit_code: i32, stdout: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Scripted::Output(RunOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                exit_code,
            }));
    }

    pub(crate) fn script_failure(&self, error: ProviderError) {
        self.responses.lock().unwrap().push_back(Scripted::Fail(error));
    }

    pub(crate) fn script_hang(&self) {
        self.responses.lock().unwrap().push_back(Scripted::Hang);
    }

    pub(crate) fn pending_responses(&self) -> usize {
        self.responses.lock().unwrap().len()
    }
}

fn ok_output(exit_code: i32) -> RunOutput {
    RunOutput {
        stdout: String::new(),
        stderr: String::new(),
        exit_code,
    }
}

#[async_trait]
impl SandboxProvider for MockProvider {
    async fn create_sandbox(&self, _template: &str, _keepalive: Duration) -> Result<SandboxId> {
        let delay = *self.create_delay.lock().unwrap();
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }
        let n = self.create_count.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(factory) = self.create_failure.lock().unwrap().as_ref() {
            return Err(factory());
        }
        Ok(SandboxId(format!("sbx-mock-{}", n)))
    }

    async fn run_command(
        &self,
        _sandbox: &SandboxId,
        command: &str,
        _timeout: Duration,
    ) -> Result<RunOutput> {
        self.commands.lock().unwrap().push(command.to_string());

        if let Some(rest) = command.strip_prefix("command -v ") {
            self.verify_count.fetch_add(1, Ordering::SeqCst);
            let binary = rest.split_whitespace().next().unwrap_or("");
            let missing = self
                .missing_tools
                .lock()
                .unwrap()
                .iter()
                .any(|t| t == binary);
            return Ok(ok_output(if missing { 1 } else { 0 }));
        }
        if command.contains("apt-get install") {
            self.install_count.fetch_add(1, Ordering::SeqCst);
            return Ok(ok_output(0));
        }
        if command.contains("apt-get update") {
            return Ok(ok_output(0));
        }
        if command.starts_with("pkill") {
            self.kill_count.fetch_add(1, Ordering::SeqCst);
            return Ok(ok_output(0));
        }

        let next = self.responses.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Output(output)) => Ok(output),
            Some(Scripted::Fail(error)) => Err(error),
            Some(Scripted::Hang) => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(ok_output(0))
            }
            None => Ok(ok_output(0)),
        }
    }

    async fn close_sandbox(&self, _sandbox: &SandboxId) -> Result<()> {
        self.close_count.fetch_add(1, Ordering::SeqCst);
        if self.fail_closes.load(Ordering::SeqCst) {
            return Err(ProviderError::Api("delete failed".to_string()));
        }
        Ok(())
    }
}
