// ABOUTME: Pipeline runner driving one pentest run end to end
// ABOUTME: Recon, analysis, bounded exploitation, and patch PRs, all fault-tolerant

use crate::analyze::VulnAnalyzer;
use crate::exploit::SqliExploiter;
use crate::github::{PatchSubmission, PullRequestClient};
use pentra_models::{is_sqli_type, PatchStatus, RunStatus, Target, Vulnerability};
use pentra_recon::{ProbeError, ReconOrchestrator};
use pentra_sandbox::ExecutorError;
use pentra_storage::{RunStore, StorageError};
use thiserror::Error;
use tracing::{info, warn};

/// Exploitation is the slowest phase; cap it per run.
const MAX_EXPLOITS_PER_RUN: usize = 3;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Probe(#[from] ProbeError),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: i64,
    pub status: RunStatus,
    pub findings: usize,
    pub exploited: usize,
    pub pr_urls: Vec<String>,
}

/// Drives one pentest run: recon the target, analyze the output, exploit
/// confirmed SQL injection, and open patch PRs for what was proven.
///
/// Phase failures degrade rather than abort: a run only goes to `Failed`
/// when sandbox infrastructure is down across the whole recon batch.
/// Everything learned up to any failure point is persisted.
pub struct PentestPipeline {
    store: RunStore,
    orchestrator: ReconOrchestrator,
    analyzer: VulnAnalyzer,
    exploiter: SqliExploiter,
    pr_client: Option<PullRequestClient>,
}

impl PentestPipeline {
    pub fn new(
        store: RunStore,
        orchestrator: ReconOrchestrator,
        analyzer: VulnAnalyzer,
        exploiter: SqliExploiter,
        pr_client: Option<PullRequestClient>,
    ) -> Self {
        Self {
            store,
            orchestrator,
            analyzer,
            exploiter,
            pr_client,
        }
    }

    pub async fn run(&self, target: &Target) -> Result<RunSummary> {
        let run = self.store.create_run(target.id).await?;
        info!(run_id = run.id, target = %target.url, "Starting pentest run");
        self.store
            .update_run_status(run.id, RunStatus::Running)
            .await?;

        let report = match self.orchestrator.scan(&target.url).await {
            Ok(report) => report,
            Err(e) => {
                self.store.mark_run_failed(run.id, &e.to_string()).await?;
                return Err(e.into());
            }
        };

        if report.infrastructure_failure() {
            let message = "sandbox infrastructure unavailable during recon";
            warn!(run_id = run.id, message);
            self.store.mark_run_failed(run.id, message).await?;
            return Ok(RunSummary {
                run_id: run.id,
                status: RunStatus::Failed,
                findings: 0,
                exploited: 0,
                pr_urls: Vec::new(),
            });
        }

        let rendered = report.render();
        self.store.set_recon_output(run.id, &rendered).await?;

        let findings = self.analyzer.analyze(&rendered).await;
        let vulns = self.store.insert_findings(run.id, &findings).await?;
        info!(run_id = run.id, count = vulns.len(), "Findings recorded");

        let (exploited, pr_urls) = self.exploit_phase(target, &vulns).await?;

        self.store
            .update_run_status(run.id, RunStatus::Completed)
            .await?;
        info!(run_id = run.id, exploited, "Pentest run complete");

        Ok(RunSummary {
            run_id: run.id,
            status: RunStatus::Completed,
            findings: vulns.len(),
            exploited,
            pr_urls,
        })
    }

    async fn exploit_phase(
        &self,
        target: &Target,
        vulns: &[Vulnerability],
    ) -> Result<(usize, Vec<String>)> {
        let mut exploited = 0;
        let mut pr_urls = Vec::new();

        let candidates = vulns
            .iter()
            .filter(|v| is_sqli_type(&v.vuln_type))
            .take(MAX_EXPLOITS_PER_RUN);

        for vuln in candidates {
            match self.exploiter.exploit(&target.url, vuln).await {
                Ok(outcome) => {
                    self.store
                        .record_exploit(vuln.id, outcome.success, &outcome.evidence)
                        .await?;
                    if outcome.success {
                        exploited += 1;
                        if let Some(url) = self.patch_phase(vuln).await? {
                            pr_urls.push(url);
                        }
                    }
                }
                Err(e) => {
                    self.store
                        .record_exploit(vuln.id, false, &format!("exploit error: {}", e))
                        .await?;
                    if matches!(e, ExecutorError::Lease(_)) {
                        // No sandbox, no point attempting the rest.
                        warn!("Sandbox lost during exploitation, skipping remaining attempts");
                        break;
                    }
                    warn!(endpoint = %vuln.endpoint, "Exploit attempt errored: {}", e);
                }
            }
        }

        Ok((exploited, pr_urls))
    }

    /// Turn one proven vulnerability into a patch PR. Failures here are
    /// warnings; the exploit evidence is already persisted.
    async fn patch_phase(&self, vuln: &Vulnerability) -> Result<Option<String>> {
        let Some(pr_client) = &self.pr_client else {
            return Ok(None);
        };

        let Some(suggestion) = self
            .analyzer
            .suggest_patch(
                &vuln.vuln_type,
                &vuln.endpoint,
                vuln.param.as_deref(),
                vuln.description.as_deref(),
            )
            .await
        else {
            warn!(endpoint = %vuln.endpoint, "No usable patch suggestion, skipping PR");
            return Ok(None);
        };

        let submission = PatchSubmission {
            branch: format!("pentra/fix-{}-{}", slug(&vuln.vuln_type), vuln.id),
            file_path: suggestion.file_path.clone(),
            content: suggestion.content,
            title: format!("Fix {} in {}", vuln.vuln_type, vuln.endpoint),
            body: format!(
                "Automated patch for a confirmed {} vulnerability at `{}`.\n\n{}",
                vuln.vuln_type, vuln.endpoint, suggestion.summary
            ),
        };

        match pr_client.open_patch_pr(&submission).await {
            Ok(url) => {
                self.store
                    .record_patch(
                        vuln.id,
                        &suggestion.file_path,
                        Some(&url),
                        PatchStatus::Created,
                    )
                    .await?;
                Ok(Some(url))
            }
            Err(e) => {
                warn!(endpoint = %vuln.endpoint, "Failed to open patch PR: {}", e);
                self.store
                    .record_patch(vuln.id, &suggestion.file_path, None, PatchStatus::Pending)
                    .await?;
                Ok(None)
            }
        }
    }
}

fn slug(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect::<String>()
        .trim_matches('-')
        .to_string()
}
