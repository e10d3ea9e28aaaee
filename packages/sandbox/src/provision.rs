// ABOUTME: Idempotent security-tool provisioning for sandboxes
// ABOUTME: Installs the fixed tool set via apt and verifies each binary by exit code

use crate::provider::{ProviderError, SandboxId, SandboxProvider};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const UPDATE_TIMEOUT: Duration = Duration::from_secs(120);
const INSTALL_TIMEOUT: Duration = Duration::from_secs(300);
const VERIFY_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum ProvisionError {
    #[error("Provider error during provisioning: {0}")]
    Provider(#[from] ProviderError),
}

pub type Result<T> = std::result::Result<T, ProvisionError>;

/// One tool in the required set. `binary` is what gets verified, `package`
/// is what apt installs (dnsutils ships `dig`, for example).
#[derive(Debug, Clone)]
pub struct Tool {
    pub binary: &'static str,
    pub package: &'static str,
    pub critical: bool,
}

/// Ordered set of required tools plus the critical subset the recon phase
/// cannot meaningfully run without.
#[derive(Debug, Clone)]
pub struct ToolSet {
    tools: Vec<Tool>,
}

impl ToolSet {
    pub fn new(tools: Vec<Tool>) -> Self {
        Self { tools }
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn packages(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.package).collect()
    }
}

impl Default for ToolSet {
    fn default() -> Self {
        Self::new(vec![
            Tool { binary: "nmap", package: "nmap", critical: true },
            Tool { binary: "nikto", package: "nikto", critical: false },
            Tool { binary: "gobuster", package: "gobuster", critical: false },
            Tool { binary: "sqlmap", package: "sqlmap", critical: true },
            Tool { binary: "curl", package: "curl", critical: true },
            Tool { binary: "wget", package: "wget", critical: false },
            Tool { binary: "whois", package: "whois", critical: false },
            Tool { binary: "dig", package: "dnsutils", critical: false },
        ])
    }
}

/// Outcome of one provisioning pass.
#[derive(Debug, Clone)]
pub struct ProvisionReport {
    /// Per-binary presence, keyed by binary name. BTreeMap keeps log output
    /// and test assertions deterministic.
    pub tools: BTreeMap<String, bool>,
    /// Set when any critical tool is missing after installation. The caller
    /// keeps going but should trim its command set accordingly.
    pub degraded: bool,
    pub missing_critical: Vec<String>,
}

impl ProvisionReport {
    pub fn all_present(&self) -> bool {
        self.tools.values().all(|present| *present)
    }
}

/// Installs and verifies the fixed tool set inside a sandbox.
///
/// Provisioning is idempotent: a verification pre-pass short-circuits the apt
/// work when every binary already resolves, which keeps the executor's
/// repair path cheap.
pub struct ToolProvisioner {
    provider: Arc<dyn SandboxProvider>,
    toolset: ToolSet,
}

impl ToolProvisioner {
    pub fn new(provider: Arc<dyn SandboxProvider>, toolset: ToolSet) -> Self {
        Self { provider, toolset }
    }

    /// Check each required binary with `command -v`, exit-code driven.
    pub async fn verify(&self, sandbox: &SandboxId) -> Result<ProvisionReport> {
        let mut tools = BTreeMap::new();
        let mut missing_critical = Vec::new();

        for tool in self.toolset.tools() {
            let check = format!("command -v {} >/dev/null 2>&1", tool.binary);
            let output = self
                .provider
                .run_command(sandbox, &check, VERIFY_TIMEOUT)
                .await?;
            let present = output.exit_code == 0;
            if !present && tool.critical {
                missing_critical.push(tool.binary.to_string());
            }
            tools.insert(tool.binary.to_string(), present);
        }

        let degraded = !missing_critical.is_empty();
        Ok(ProvisionReport {
            tools,
            degraded,
            missing_critical,
        })
    }

    /// Refresh the package index, install the tool set, and verify it.
    ///
    /// Installation failures for non-critical tools are downgraded to
    /// warnings; missing critical tools mark the report degraded but never
    /// abort. Only transport failures surface as errors.
    pub async fn provision(&self, sandbox: &SandboxId) -> Result<ProvisionReport> {
        let pre = self.verify(sandbox).await?;
        if pre.all_present() {
            debug!(sandbox = %sandbox.short(), "All tools already present, skipping install");
            return Ok(pre);
        }

        info!(sandbox = %sandbox.short(), "Installing security tools");

        let update_cmd = "export DEBIAN_FRONTEND=noninteractive && sudo apt-get update -qq";
        let update = self
            .provider
            .run_command(sandbox, update_cmd, UPDATE_TIMEOUT)
            .await?;
        if update.exit_code != 0 {
            warn!(
                exit_code = update.exit_code,
                "Package index refresh failed, continuing anyway"
            );
        }

        let install_cmd = format!(
            "export DEBIAN_FRONTEND=noninteractive && sudo apt-get install -y -qq {}",
            self.toolset.packages().join(" ")
        );
        let install = self
            .provider
            .run_command(sandbox, &install_cmd, INSTALL_TIMEOUT)
            .await?;
        if install.exit_code != 0 {
            warn!(
                exit_code = install.exit_code,
                stderr = %truncate(&install.stderr, 200),
                "Some tools may not have installed"
            );
        }

        let report = self.verify(sandbox).await?;
        if report.degraded {
            warn!(
                missing = ?report.missing_critical,
                "Critical tools missing after install; scans will run degraded"
            );
        } else if report.all_present() {
            info!(sandbox = %sandbox.short(), "Security tools installed and verified");
        } else {
            let missing: Vec<&String> = report
                .tools
                .iter()
                .filter(|(_, present)| !**present)
                .map(|(name, _)| name)
                .collect();
            warn!(?missing, "Non-critical tools missing after install");
        }

        Ok(report)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::RunOutput;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Mock provider that answers `command -v` checks from a scripted set of
    /// present binaries and records every apt invocation.
    struct ScriptedProvider {
        present: Mutex<Vec<&'static str>>,
        install_calls: Mutex<u32>,
        install_makes_present: Vec<&'static str>,
    }

    impl ScriptedProvider {
        fn with_present(present: Vec<&'static str>, after_install: Vec<&'static str>) -> Self {
            Self {
                present: Mutex::new(present),
                install_calls: Mutex::new(0),
                install_makes_present: after_install,
            }
        }

        fn install_count(&self) -> u32 {
            *self.install_calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl SandboxProvider for ScriptedProvider {
        async fn create_sandbox(
            &self,
            _template: &str,
            _keepalive: Duration,
        ) -> crate::provider::Result<SandboxId> {
            Ok(SandboxId("sbx-test".to_string()))
        }

        async fn run_command(
            &self,
            _sandbox: &SandboxId,
            command: &str,
            _timeout: Duration,
        ) -> crate::provider::Result<RunOutput> {
            if command.starts_with("command -v ") {
                let binary = command
                    .trim_start_matches("command -v ")
                    .split_whitespace()
                    .next()
                    .unwrap_or("");
                let present = self.present.lock().unwrap().contains(&binary);
                return Ok(RunOutput {
                    stdout: String::new(),
                    stderr: String::new(),
                    exit_code: if present { 0 } else { 1 },
                });
            }
            if command.contains("apt-get install") {
                *self.install_calls.lock().unwrap() += 1;
                *self.present.lock().unwrap() = self.install_makes_present.clone();
            }
            Ok(RunOutput {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
            })
        }

        async fn close_sandbox(&self, _sandbox: &SandboxId) -> crate::provider::Result<()> {
            Ok(())
        }
    }

    const ALL: &[&str] = &[
        "nmap", "nikto", "gobuster", "sqlmap", "curl", "wget", "whois", "dig",
    ];

    #[tokio::test]
    async fn verification_short_circuits_reinstall() {
        let provider = Arc::new(ScriptedProvider::with_present(ALL.to_vec(), ALL.to_vec()));
        let provisioner = ToolProvisioner::new(provider.clone(), ToolSet::default());

        let report = provisioner
            .provision(&SandboxId("sbx-test".into()))
            .await
            .unwrap();
        assert!(report.all_present());
        assert!(!report.degraded);
        assert_eq!(provider.install_count(), 0);
    }

    #[tokio::test]
    async fn installs_when_tools_missing() {
        let provider = Arc::new(ScriptedProvider::with_present(
            vec!["curl", "wget"],
            ALL.to_vec(),
        ));
        let provisioner = ToolProvisioner::new(provider.clone(), ToolSet::default());

        let report = provisioner
            .provision(&SandboxId("sbx-test".into()))
            .await
            .unwrap();
        assert!(report.all_present());
        assert_eq!(provider.install_count(), 1);
    }

    #[tokio::test]
    async fn missing_critical_tool_marks_degraded() {
        // sqlmap never becomes installable
        let after: Vec<&str> = ALL.iter().copied().filter(|t| *t != "sqlmap").collect();
        let provider = Arc::new(ScriptedProvider::with_present(vec!["curl"], after));
        let provisioner = ToolProvisioner::new(provider, ToolSet::default());

        let report = provisioner
            .provision(&SandboxId("sbx-test".into()))
            .await
            .unwrap();
        assert!(report.degraded);
        assert_eq!(report.missing_critical, vec!["sqlmap".to_string()]);
        assert_eq!(report.tools.get("sqlmap"), Some(&false));
        assert_eq!(report.tools.get("nmap"), Some(&true));
    }

    #[tokio::test]
    async fn missing_non_critical_tool_is_not_degraded() {
        let after: Vec<&str> = ALL.iter().copied().filter(|t| *t != "nikto").collect();
        let provider = Arc::new(ScriptedProvider::with_present(vec![], after));
        let provisioner = ToolProvisioner::new(provider, ToolSet::default());

        let report = provisioner
            .provision(&SandboxId("sbx-test".into()))
            .await
            .unwrap();
        assert!(!report.degraded);
        assert!(report.missing_critical.is_empty());
        assert_eq!(report.tools.get("nikto"), Some(&false));
    }
}
