// ABOUTME: Recon command batches, full and lightweight, with per-tool timeouts
// ABOUTME: Declaration order here is the order sections appear in the report

use std::time::Duration;

/// One recon command with a stable label and its own wall-clock budget.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub label: &'static str,
    pub command: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    /// Aggressive scanning for a target that answered an HTTP probe.
    Full,
    /// Passive lookups for a target that did not.
    Lightweight,
}

/// An ordered set of recon commands for one target.
#[derive(Debug, Clone)]
pub struct ReconBatch {
    kind: BatchKind,
    commands: Vec<CommandSpec>,
}

impl ReconBatch {
    /// Active scan batch: port scan, directory enumeration, web server scan,
    /// and response headers.
    pub fn full(url: &str, host: &str) -> Self {
        Self {
            kind: BatchKind::Full,
            commands: vec![
                CommandSpec {
                    label: "port_scan",
                    command: format!("nmap -A -T4 {}", host),
                    timeout: Duration::from_secs(600),
                },
                CommandSpec {
                    label: "dir_enum",
                    command: format!(
                        "gobuster dir -u {} -w /usr/share/wordlists/dirb/common.txt -q",
                        url
                    ),
                    timeout: Duration::from_secs(300),
                },
                CommandSpec {
                    label: "web_scan",
                    command: format!("nikto -h {}", url),
                    timeout: Duration::from_secs(600),
                },
                CommandSpec {
                    label: "http_headers",
                    command: format!("curl -sI {}", url),
                    timeout: Duration::from_secs(30),
                },
            ],
        }
    }

    /// Passive batch for unreachable targets. DNS and registration data can
    /// still inform the report when the host itself refuses connections.
    pub fn lightweight(host: &str) -> Self {
        Self {
            kind: BatchKind::Lightweight,
            commands: vec![
                CommandSpec {
                    label: "dns",
                    command: format!("dig +short {}", host),
                    timeout: Duration::from_secs(30),
                },
                CommandSpec {
                    label: "whois",
                    command: format!("whois {}", host),
                    timeout: Duration::from_secs(60),
                },
            ],
        }
    }

    #[cfg(test)]
    pub(crate) fn from_commands(kind: BatchKind, commands: Vec<CommandSpec>) -> Self {
        Self { kind, commands }
    }

    pub fn kind(&self) -> BatchKind {
        self.kind
    }

    pub fn commands(&self) -> &[CommandSpec] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
