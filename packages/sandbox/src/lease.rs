// ABOUTME: Sandbox lease manager owning the single live sandbox handle
// ABOUTME: Recycles on age or command budget, single-flight recreation, provision before return

use crate::config::SandboxConfig;
use crate::provider::{ProviderError, SandboxId, SandboxProvider};
use crate::provision::{ProvisionError, ToolProvisioner};
use crate::retry::retry_with_backoff;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum LeaseError {
    #[error("Sandbox infrastructure unavailable: {0}")]
    InfrastructureUnavailable(String),
}

pub type Result<T> = std::result::Result<T, LeaseError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleStatus {
    Uninitialized,
    Provisioning,
    Active,
    Stale,
    Closed,
}

/// One leased sandbox. Identity never changes; the manager replaces the
/// whole handle when the sandbox is recycled.
#[derive(Debug)]
pub struct SandboxHandle {
    id: SandboxId,
    created_at: Instant,
    created_utc: DateTime<Utc>,
    command_count: AtomicU32,
    status: RwLock<HandleStatus>,
    degraded: AtomicBool,
}

impl SandboxHandle {
    fn new(id: SandboxId) -> Self {
        Self {
            id,
            created_at: Instant::now(),
            created_utc: Utc::now(),
            command_count: AtomicU32::new(0),
            status: RwLock::new(HandleStatus::Uninitialized),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &SandboxId {
        &self.id
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_utc
    }

    pub fn command_count(&self) -> u32 {
        self.command_count.load(Ordering::SeqCst)
    }

    /// Count a dispatched command against this handle's budget. Returns the
    /// new total. Called exactly once per executor dispatch, whatever the
    /// command's outcome.
    pub fn record_dispatch(&self) -> u32 {
        self.command_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn status(&self) -> HandleStatus {
        *self.status.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_status(&self, status: HandleStatus) {
        *self.status.write().unwrap_or_else(|e| e.into_inner()) = status;
    }

    /// Set when provisioning reported missing critical tools.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    fn set_degraded(&self) {
        self.degraded.store(true, Ordering::SeqCst);
    }
}

/// Point-in-time view of the current lease for diagnostics.
#[derive(Debug, Clone)]
pub struct LeaseInfo {
    pub active: bool,
    pub sandbox_id: Option<String>,
    pub age: Duration,
    pub command_count: u32,
    pub degraded: bool,
}

/// Owns the single live sandbox handle and decides when to create, reuse, or
/// recycle it.
///
/// The current-handle slot lives behind one async mutex, which doubles as the
/// single-flight guard: concurrent callers that observe a stale or absent
/// handle queue on the lock, and exactly one of them performs the recreation
/// while the rest receive the replacement handle.
pub struct SandboxLeaseManager {
    provider: Arc<dyn SandboxProvider>,
    provisioner: Arc<ToolProvisioner>,
    config: SandboxConfig,
    current: tokio::sync::Mutex<Option<Arc<SandboxHandle>>>,
}

impl SandboxLeaseManager {
    pub fn new(
        provider: Arc<dyn SandboxProvider>,
        provisioner: Arc<ToolProvisioner>,
        config: SandboxConfig,
    ) -> Self {
        Self {
            provider,
            provisioner,
            config,
            current: tokio::sync::Mutex::new(None),
        }
    }

    /// Return a valid, non-expired, non-exhausted handle, creating or
    /// recycling as needed. A handle is never returned before provisioning
    /// has succeeded or explicitly marked it degraded.
    pub async fn lease(&self) -> Result<Arc<SandboxHandle>> {
        let mut slot = self.current.lock().await;

        if let Some(handle) = slot.as_ref() {
            let expired = handle.age() >= self.config.max_age;
            let exhausted = handle.command_count() >= self.config.max_commands;
            if !expired && !exhausted {
                return Ok(Arc::clone(handle));
            }
        }

        if let Some(old) = slot.take() {
            let reason = if old.age() >= self.config.max_age {
                "max age exceeded"
            } else {
                "command budget exhausted"
            };
            info!(sandbox = %old.id().short(), reason, "Recycling sandbox");
            self.teardown(&old).await;
        } else {
            info!("No sandbox exists, creating one");
        }

        let handle = Arc::new(self.create_provisioned().await?);
        *slot = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// Single-resource design: releasing only marks intent to reuse.
    pub fn release(&self, handle: &Arc<SandboxHandle>) {
        debug!(sandbox = %handle.id().short(), "Lease released");
    }

    /// Tear down the current handle unconditionally. The next `lease` call
    /// creates a replacement.
    pub async fn close(&self) {
        let mut slot = self.current.lock().await;
        if let Some(old) = slot.take() {
            info!(sandbox = %old.id().short(), "Closing sandbox");
            self.teardown(&old).await;
        }
    }

    /// Diagnostics snapshot of the current lease.
    pub async fn info(&self) -> LeaseInfo {
        let slot = self.current.lock().await;
        match slot.as_ref() {
            Some(handle) => LeaseInfo {
                active: true,
                sandbox_id: Some(handle.id().to_string()),
                age: handle.age(),
                command_count: handle.command_count(),
                degraded: handle.is_degraded(),
            },
            None => LeaseInfo {
                active: false,
                sandbox_id: None,
                age: Duration::ZERO,
                command_count: 0,
                degraded: false,
            },
        }
    }

    /// Best-effort remote teardown. Failures are logged, never propagated;
    /// the backend reclaims expired sandboxes on its own.
    async fn teardown(&self, handle: &Arc<SandboxHandle>) {
        handle.set_status(HandleStatus::Stale);
        if let Err(e) = self.provider.close_sandbox(handle.id()).await {
            warn!(sandbox = %handle.id().short(), "Sandbox cleanup failed: {}", e);
        }
        handle.set_status(HandleStatus::Closed);
    }

    async fn create_provisioned(&self) -> Result<SandboxHandle> {
        let id = retry_with_backoff(&self.config.retry, ProviderError::is_transient, || {
            self.provider
                .create_sandbox(&self.config.template, self.config.keepalive)
        })
        .await
        .map_err(|e| {
            LeaseError::InfrastructureUnavailable(format!("sandbox creation failed: {}", e))
        })?;

        let handle = SandboxHandle::new(id);
        handle.set_status(HandleStatus::Provisioning);

        let provision_transient =
            |e: &ProvisionError| matches!(e, ProvisionError::Provider(p) if p.is_transient());
        let report = match retry_with_backoff(&self.config.retry, provision_transient, || {
            self.provisioner.provision(handle.id())
        })
        .await
        {
            Ok(report) => report,
            Err(e) => {
                // Never hand out a half-initialized sandbox.
                self.teardown_unprovisioned(&handle).await;
                return Err(LeaseError::InfrastructureUnavailable(format!(
                    "provisioning failed: {}",
                    e
                )));
            }
        };

        if report.degraded {
            warn!(
                sandbox = %handle.id().short(),
                missing = ?report.missing_critical,
                "Sandbox provisioned in degraded mode"
            );
            handle.set_degraded();
        }

        handle.set_status(HandleStatus::Active);
        Ok(handle)
    }

    async fn teardown_unprovisioned(&self, handle: &SandboxHandle) {
        if let Err(e) = self.provider.close_sandbox(handle.id()).await {
            warn!(sandbox = %handle.id().short(), "Cleanup of unprovisioned sandbox failed: {}", e);
        }
        handle.set_status(HandleStatus::Closed);
    }
}
