// ABOUTME: Concurrent recon dispatch with per-command fault isolation
// ABOUTME: Aggregates outputs into a report ordered by batch declaration

use crate::batch::{BatchKind, ReconBatch};
use crate::probe::{host_of, ProbeError, ReachabilityProbe};
use futures::future::join_all;
use pentra_sandbox::{CommandExecutor, ExecutorError, LOCAL_FAILURE_EXIT};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Output of one finished recon command, non-zero exits included.
#[derive(Debug, Clone)]
pub struct ReconSection {
    pub label: &'static str,
    pub command: String,
    pub output: String,
    pub exit_code: i32,
    pub duration: Duration,
}

/// A command that produced nothing usable.
#[derive(Debug, Clone)]
pub struct FailedCommand {
    pub label: &'static str,
    pub reason: String,
}

/// Aggregated recon results. Sections keep the batch's declaration order
/// regardless of completion order; failures are tracked separately and never
/// rendered into the report text.
#[derive(Debug, Clone, Default)]
pub struct ReconReport {
    sections: Vec<ReconSection>,
    failed: Vec<FailedCommand>,
    infrastructure_failure: bool,
}

impl ReconReport {
    pub fn sections(&self) -> &[ReconSection] {
        &self.sections
    }

    pub fn failed(&self) -> &[FailedCommand] {
        &self.failed
    }

    /// True when every command in the batch died on sandbox infrastructure,
    /// meaning the run produced no signal at all and should be marked failed.
    pub fn infrastructure_failure(&self) -> bool {
        self.infrastructure_failure
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    /// Render the successful sections as the text fed to vulnerability
    /// analysis.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for section in &self.sections {
            out.push_str(&format!("## {}\n", section.label));
            out.push_str(&format!("$ {}\n", section.command));
            out.push_str(section.output.trim_end());
            out.push_str("\n\n");
        }
        out
    }
}

/// Dispatches a recon batch concurrently and folds the outcomes into a
/// `ReconReport`. One slow or broken tool never blocks the others; the
/// executor underneath serializes nothing but sandbox creation.
pub struct ReconOrchestrator {
    executor: Arc<CommandExecutor>,
    probe: ReachabilityProbe,
}

impl ReconOrchestrator {
    pub fn new(executor: Arc<CommandExecutor>) -> Result<Self, ProbeError> {
        Ok(Self {
            executor,
            probe: ReachabilityProbe::new()?,
        })
    }

    /// Probe the target, pick the batch, and run it.
    pub async fn scan(&self, url: &str) -> Result<ReconReport, ProbeError> {
        let host = host_of(url)?;
        let batch = if self.probe.is_reachable(url).await {
            info!(url, "Target reachable, running full recon");
            ReconBatch::full(url, &host)
        } else {
            warn!(url, "Target unreachable, falling back to passive recon");
            ReconBatch::lightweight(&host)
        };
        Ok(self.run_batch(&batch).await)
    }

    /// Run every command in the batch concurrently. Results are folded in
    /// declaration order whatever order they complete in.
    pub async fn run_batch(&self, batch: &ReconBatch) -> ReconReport {
        let kind = match batch.kind() {
            BatchKind::Full => "full",
            BatchKind::Lightweight => "lightweight",
        };
        info!(kind, commands = batch.len(), "Dispatching recon batch");

        let dispatches = batch.commands().iter().map(|spec| {
            let executor = Arc::clone(&self.executor);
            async move {
                let outcome = executor.execute(&spec.command, spec.timeout).await;
                (spec, outcome)
            }
        });
        let outcomes = join_all(dispatches).await;

        let mut report = ReconReport::default();
        let mut lease_failures = 0usize;

        for (spec, outcome) in outcomes {
            match outcome {
                Ok(result) if result.exit_code == LOCAL_FAILURE_EXIT => {
                    warn!(label = spec.label, reason = %result.stderr, "Recon command failed");
                    report.failed.push(FailedCommand {
                        label: spec.label,
                        reason: result.stderr,
                    });
                }
                Ok(result) => {
                    report.sections.push(ReconSection {
                        label: spec.label,
                        command: spec.command.clone(),
                        output: result.combined_output(),
                        exit_code: result.exit_code,
                        duration: result.duration,
                    });
                }
                Err(e) => {
                    if matches!(e, ExecutorError::Lease(_)) {
                        lease_failures += 1;
                    }
                    warn!(label = spec.label, "Recon command failed: {}", e);
                    report.failed.push(FailedCommand {
                        label: spec.label,
                        reason: e.to_string(),
                    });
                }
            }
        }

        report.infrastructure_failure = !batch.is_empty() && lease_failures == batch.len();
        info!(
            sections = report.sections.len(),
            failed = report.failed.len(),
            "Recon batch complete"
        );
        report
    }
}
