// ABOUTME: SQL injection exploitation via sqlmap in the leased sandbox
// ABOUTME: Success detection is marker-based over sqlmap's stdout

use pentra_models::Vulnerability;
use pentra_sandbox::{CommandExecutor, ExecutorError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const SQLMAP_TIMEOUT: Duration = Duration::from_secs(600);
const EVIDENCE_TAIL_CHARS: usize = 2_000;

/// sqlmap prints these when injection is confirmed.
const SUCCESS_MARKERS: &[&str] = &[
    "is vulnerable",
    "available databases",
    "sqlmap identified the following injection point",
];

#[derive(Debug, Clone)]
pub struct ExploitOutcome {
    pub success: bool,
    /// Tail of sqlmap's output, enough to show the injection point.
    pub evidence: String,
}

/// Runs sqlmap against confirmed SQL injection findings. Non-SQLi
/// vulnerability types are reported, never exploited.
pub struct SqliExploiter {
    executor: Arc<CommandExecutor>,
}

impl SqliExploiter {
    pub fn new(executor: Arc<CommandExecutor>) -> Self {
        Self { executor }
    }

    /// Attempt exploitation of one vulnerability. A failed attempt is an
    /// outcome, not an error; only sandbox-level failures propagate.
    pub async fn exploit(
        &self,
        target_url: &str,
        vuln: &Vulnerability,
    ) -> Result<ExploitOutcome, ExecutorError> {
        let command = build_sqlmap_command(target_url, vuln);
        info!(endpoint = %vuln.endpoint, "Attempting SQL injection exploit");

        let result = self.executor.execute(&command, SQLMAP_TIMEOUT).await?;
        let output = result.combined_output();
        let success =
            result.exit_code >= 0 && SUCCESS_MARKERS.iter().any(|m| output.contains(m));

        if success {
            info!(endpoint = %vuln.endpoint, "Injection confirmed");
        } else {
            warn!(
                endpoint = %vuln.endpoint,
                exit_code = result.exit_code,
                "Exploit attempt did not confirm injection"
            );
        }

        Ok(ExploitOutcome {
            success,
            evidence: tail(&output, EVIDENCE_TAIL_CHARS).to_string(),
        })
    }
}

fn build_sqlmap_command(target_url: &str, vuln: &Vulnerability) -> String {
    let url = format!(
        "{}/{}",
        target_url.trim_end_matches('/'),
        vuln.endpoint.trim_start_matches('/')
    );
    let mut command = format!("sqlmap -u '{}' --batch --level=2 --risk=2 --dbs", url);
    if let Some(param) = &vuln.param {
        command.push_str(&format!(" -p '{}'", param.replace('\'', "")));
    }
    command
}

fn tail(s: &str, max: usize) -> &str {
    let count = s.chars().count();
    if count <= max {
        return s;
    }
    match s.char_indices().nth(count - max) {
        Some((idx, _)) => &s[idx..],
        None => s,
    }
}
