use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ScanConfig;
use crate::error::ScanError;
use crate::scanner::{self, ScanObserver};
use crate::types::{ScanReport, ScanTarget};

/// Caller-owned registry of deep scans, at most one per IP.
///
/// Independent managers do not see each other's scans. Cloning shares the registry.
#[derive(Clone, Default)]
pub struct ScanManager {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    config: ScanConfig,
    active: Mutex<HashMap<IpAddr, ActiveScan>>,
    next_id: AtomicU64,
}

struct ActiveScan {
    id: u64,
    cancel: CancellationToken,
}

/// Keeps an IP registered while its scan runs. Dropping it deregisters the IP,
/// unless a newer scan of the same IP has taken the slot.
struct SessionGuard {
    inner: Arc<Inner>,
    ip: IpAddr,
    id: u64,
    cancel: CancellationToken,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let mut active = lock(&self.inner.active);
        if active.get(&self.ip).is_some_and(|s| s.id == self.id) {
            active.remove(&self.ip);
        }
    }
}

impl ScanManager {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                active: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &ScanConfig {
        &self.inner.config
    }

    /// Run a deep scan of `target` to completion or cancellation.
    ///
    /// Fails fast with [`ScanError::AlreadyRunning`] if the IP is already being scanned.
    pub async fn run(
        &self,
        target: ScanTarget,
        observer: Arc<dyn ScanObserver>,
    ) -> Result<ScanReport, ScanError> {
        let guard = self.register(target.ip)?;
        Ok(execute(guard, target, observer).await)
    }

    /// Like [`ScanManager::run`] but on a background task. The IP is registered
    /// before this returns.
    pub fn spawn(
        &self,
        target: ScanTarget,
        observer: Arc<dyn ScanObserver>,
    ) -> Result<JoinHandle<ScanReport>, ScanError> {
        let guard = self.register(target.ip)?;
        Ok(tokio::spawn(execute(guard, target, observer)))
    }

    /// Ask the scan of `ip` to stop at its next chunk boundary.
    ///
    /// Returns whether a running scan was signalled. Unknown or finished IPs are a no-op.
    pub fn cancel(&self, ip: IpAddr) -> bool {
        match lock(&self.inner.active).remove(&ip) {
            Some(scan) => {
                info!(%ip, "cancelling deep scan");
                scan.cancel.cancel();
                true
            }
            None => {
                debug!(%ip, "cancel requested for inactive scan");
                false
            }
        }
    }

    /// Cancel every running scan.
    pub fn cancel_all(&self) {
        for (_, scan) in lock(&self.inner.active).drain() {
            scan.cancel.cancel();
        }
    }

    pub fn is_active(&self, ip: IpAddr) -> bool {
        lock(&self.inner.active).contains_key(&ip)
    }

    pub fn active(&self) -> Vec<IpAddr> {
        let mut ips: Vec<IpAddr> = lock(&self.inner.active).keys().copied().collect();
        ips.sort();
        ips
    }

    fn register(&self, ip: IpAddr) -> Result<SessionGuard, ScanError> {
        let mut active = lock(&self.inner.active);
        if active.contains_key(&ip) {
            return Err(ScanError::AlreadyRunning(ip));
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        active.insert(
            ip,
            ActiveScan {
                id,
                cancel: cancel.clone(),
            },
        );
        Ok(SessionGuard {
            inner: self.inner.clone(),
            ip,
            id,
            cancel,
        })
    }
}

async fn execute(
    guard: SessionGuard,
    target: ScanTarget,
    observer: Arc<dyn ScanObserver>,
) -> ScanReport {
    let report =
        scanner::run_deep_scan(target, &guard.inner.config, guard.cancel.clone(), observer.clone())
            .await;
    drop(guard);
    observer.on_finished(&report);
    report
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
