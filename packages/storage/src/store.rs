// ABOUTME: RunStore, the query facade over targets, runs, vulnerabilities, patches
// ABOUTME: Manual row mapping with rfc3339 timestamps written from Rust

use crate::{Result, StorageError};
use chrono::{DateTime, Utc};
use pentra_models::{
    Finding, Patch, PatchStatus, PentestRun, RunStatus, Severity, Target, Vulnerability,
};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

/// Query facade for the pentest schema.
#[derive(Clone)]
pub struct RunStore {
    pool: SqlitePool,
}

impl RunStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_target(
        &self,
        name: &str,
        url: &str,
        ip_address: Option<&str>,
    ) -> Result<Target> {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO targets (name, url, ip_address, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(name)
        .bind(url)
        .bind(ip_address)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        debug!(id, name, "Target created");
        self.get_target(id).await
    }

    pub async fn get_target(&self, id: i64) -> Result<Target> {
        let row = sqlx::query("SELECT * FROM targets WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("target {}", id)))?;
        target_from_row(&row)
    }

    pub async fn create_run(&self, target_id: i64) -> Result<PentestRun> {
        let result = sqlx::query(
            r#"
            INSERT INTO pentest_runs (target_id, status)
            VALUES (?, 'queued')
            "#,
        )
        .bind(target_id)
        .execute(&self.pool)
        .await?;

        self.get_run(result.last_insert_rowid()).await
    }

    pub async fn get_run(&self, id: i64) -> Result<PentestRun> {
        let row = sqlx::query("SELECT * FROM pentest_runs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("run {}", id)))?;
        run_from_row(&row)
    }

    /// Update a run's status. Entering `Running` stamps `started_at`; any
    /// terminal status stamps `completed_at`.
    pub async fn update_run_status(&self, id: i64, status: RunStatus) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        if status == RunStatus::Running {
            sqlx::query(
                r#"
                UPDATE pentest_runs
                SET status = ?, started_at = COALESCE(started_at, ?)
                WHERE id = ?
                "#,
            )
            .bind(status.as_str())
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        } else if status.is_terminal() {
            sqlx::query(
                r#"
                UPDATE pentest_runs
                SET status = ?, completed_at = ?
                WHERE id = ?
                "#,
            )
            .bind(status.as_str())
            .bind(&now)
            .bind(id)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query("UPDATE pentest_runs SET status = ? WHERE id = ?")
                .bind(status.as_str())
                .bind(id)
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    pub async fn mark_run_failed(&self, id: i64, message: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE pentest_runs
            SET status = 'failed', error_message = ?, completed_at = ?
            WHERE id = ?
            "#,
        )
        .bind(message)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_recon_output(&self, id: i64, output: &str) -> Result<()> {
        sqlx::query("UPDATE pentest_runs SET recon_output = ? WHERE id = ?")
            .bind(output)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Persist analyzer findings as vulnerability records for a run.
    pub async fn insert_findings(
        &self,
        run_id: i64,
        findings: &[Finding],
    ) -> Result<Vec<Vulnerability>> {
        let mut stored = Vec::with_capacity(findings.len());
        for finding in findings {
            let result = sqlx::query(
                r#"
                INSERT INTO vulnerabilities (
                    run_id, vuln_type, severity, endpoint, param, description, created_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(run_id)
            .bind(&finding.vuln_type)
            .bind(finding.severity.as_str())
            .bind(&finding.endpoint)
            .bind(finding.param.as_deref())
            .bind(finding.description.as_deref())
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
            stored.push(self.get_vulnerability(result.last_insert_rowid()).await?);
        }
        debug!(run_id, count = stored.len(), "Findings persisted");
        Ok(stored)
    }

    pub async fn get_vulnerability(&self, id: i64) -> Result<Vulnerability> {
        let row = sqlx::query("SELECT * FROM vulnerabilities WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("vulnerability {}", id)))?;
        vulnerability_from_row(&row)
    }

    pub async fn list_vulnerabilities(&self, run_id: i64) -> Result<Vec<Vulnerability>> {
        let rows = sqlx::query("SELECT * FROM vulnerabilities WHERE run_id = ? ORDER BY id")
            .bind(run_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(vulnerability_from_row).collect()
    }

    pub async fn record_exploit(&self, vuln_id: i64, success: bool, output: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE vulnerabilities
            SET exploited = ?, exploit_output = ?
            WHERE id = ?
            "#,
        )
        .bind(success)
        .bind(output)
        .bind(vuln_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn record_patch(
        &self,
        vuln_id: i64,
        file_path: &str,
        pr_url: Option<&str>,
        status: PatchStatus,
    ) -> Result<Patch> {
        let result = sqlx::query(
            r#"
            INSERT INTO patches (vuln_id, file_path, pr_url, status, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(vuln_id)
        .bind(file_path)
        .bind(pr_url)
        .bind(status.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        if pr_url.is_some() {
            sqlx::query("UPDATE vulnerabilities SET patched = 1 WHERE id = ?")
                .bind(vuln_id)
                .execute(&self.pool)
                .await?;
        }

        let id = result.last_insert_rowid();
        let row = sqlx::query("SELECT * FROM patches WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        patch_from_row(&row)
    }
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidValue(format!("bad timestamp '{}': {}", value, e)))
}

fn parse_optional_timestamp(value: Option<String>) -> Result<Option<DateTime<Utc>>> {
    value.as_deref().map(parse_timestamp).transpose()
}

fn target_from_row(row: &SqliteRow) -> Result<Target> {
    Ok(Target {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        url: row.try_get("url")?,
        ip_address: row.try_get("ip_address")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn run_from_row(row: &SqliteRow) -> Result<PentestRun> {
    Ok(PentestRun {
        id: row.try_get("id")?,
        target_id: row.try_get("target_id")?,
        status: RunStatus::from_str(&row.try_get::<String, _>("status")?)?,
        started_at: parse_optional_timestamp(row.try_get("started_at")?)?,
        completed_at: parse_optional_timestamp(row.try_get("completed_at")?)?,
        recon_output: row.try_get("recon_output")?,
        error_message: row.try_get("error_message")?,
    })
}

fn vulnerability_from_row(row: &SqliteRow) -> Result<Vulnerability> {
    Ok(Vulnerability {
        id: row.try_get("id")?,
        run_id: row.try_get("run_id")?,
        vuln_type: row.try_get("vuln_type")?,
        severity: Severity::from_str(&row.try_get::<String, _>("severity")?)?,
        endpoint: row.try_get("endpoint")?,
        param: row.try_get("param")?,
        description: row.try_get("description")?,
        exploited: row.try_get("exploited")?,
        exploit_output: row.try_get("exploit_output")?,
        patched: row.try_get("patched")?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
    })
}

fn patch_from_row(row: &SqliteRow) -> Result<Patch> {
    Ok(Patch {
        id: row.try_get("id")?,
        vuln_id: row.try_get("vuln_id")?,
        file_path: row.try_get("file_path")?,
        pr_url: row.try_get("pr_url")?,
        status: PatchStatus::from_str(&row.try_get::<String, _>("status")?)?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
    })
}
