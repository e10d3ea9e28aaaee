// ABOUTME: Shared domain records for targets, pentest runs, vulnerabilities and patches
// ABOUTME: Status enums carry as_str/from_str helpers for database round-trips

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Invalid run status: {0}")]
    InvalidRunStatus(String),
    #[error("Invalid severity: {0}")]
    InvalidSeverity(String),
    #[error("Invalid patch status: {0}")]
    InvalidPatchStatus(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;

/// A system under test: a live URL, optionally with a resolved IP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(ModelError::InvalidRunStatus(s.to_string())),
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// One pentest execution against a target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PentestRun {
    pub id: i64,
    pub target_id: i64,
    pub status: RunStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub recon_output: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "info" => Ok(Self::Info),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(ModelError::InvalidSeverity(s.to_string())),
        }
    }
}

impl Default for Severity {
    fn default() -> Self {
        Self::Medium
    }
}

/// A finding as reported by the vulnerability analyzer.
///
/// The analyzer is a language model behind an HTTP boundary; every field the
/// model might omit carries a serde default so partially-formed output
/// degrades instead of failing deserialization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    #[serde(rename = "type", default)]
    pub vuln_type: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub param: Option<String>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub description: Option<String>,
}

impl Finding {
    /// SQL injection findings are the only ones the exploit phase acts on.
    pub fn is_sqli(&self) -> bool {
        is_sqli_type(&self.vuln_type)
    }
}

/// Loose matching over analyzer-reported type labels.
pub fn is_sqli_type(vuln_type: &str) -> bool {
    let t = vuln_type.to_lowercase();
    t == "sqli" || t.contains("sql injection")
}

/// A persisted vulnerability record, created from a `Finding`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vulnerability {
    pub id: i64,
    pub run_id: i64,
    pub vuln_type: String,
    pub severity: Severity,
    pub endpoint: String,
    pub param: Option<String>,
    pub description: Option<String>,
    pub exploited: bool,
    pub exploit_output: Option<String>,
    pub patched: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PatchStatus {
    Pending,
    Created,
    Merged,
    Rejected,
}

impl PatchStatus {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Created => "created",
            Self::Merged => "merged",
            Self::Rejected => "rejected",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "created" => Ok(Self::Created),
            "merged" => Ok(Self::Merged),
            "rejected" => Ok(Self::Rejected),
            _ => Err(ModelError::InvalidPatchStatus(s.to_string())),
        }
    }
}

/// A generated patch tied to one vulnerability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patch {
    pub id: i64,
    pub vuln_id: i64,
    pub file_path: String,
    pub pr_url: Option<String>,
    pub status: PatchStatus,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn run_status_round_trips() {
        for status in [
            RunStatus::Queued,
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(RunStatus::from_str(status.as_str()).unwrap(), status);
        }
        assert!(RunStatus::from_str("exploded").is_err());
    }

    #[test]
    fn terminal_states() {
        assert!(!RunStatus::Queued.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn finding_tolerates_sparse_json() {
        let finding: Finding =
            serde_json::from_str(r#"{"type": "SQLi", "endpoint": "/login.php"}"#).unwrap();
        assert_eq!(finding.vuln_type, "SQLi");
        assert_eq!(finding.severity, Severity::Medium);
        assert_eq!(finding.param, None);
        assert!(finding.is_sqli());
    }

    #[test]
    fn finding_type_matching() {
        let mut finding = Finding {
            vuln_type: "SQL Injection".to_string(),
            endpoint: "/search".to_string(),
            param: Some("q".to_string()),
            severity: Severity::High,
            description: None,
        };
        assert!(finding.is_sqli());
        finding.vuln_type = "XSS".to_string();
        assert!(!finding.is_sqli());
    }

    #[test]
    fn severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert_eq!(Severity::from_str("critical").unwrap(), Severity::Critical);
        assert!(Severity::from_str("apocalyptic").is_err());
    }
}
