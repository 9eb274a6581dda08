use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classifier::{self, FTP_SERVICE, HTTP_SERVICE, TLS_SERVICE, WEB_FALLBACK_SERVICE};
use crate::config::ScanConfig;
use crate::forensics::{self, ForensicOutcome};
use crate::prober;
use crate::tls::{self, TLS_PORTS};
use crate::types::{
    Identification, PortFinding, ScanProgress, ScanReport, ScanState, ScanTarget, Severity,
};

/// Receives the stream of results from a running deep scan.
///
/// Findings of a chunk may arrive in any port order, but always before that
/// chunk's progress update.
pub trait ScanObserver: Send + Sync {
    fn on_port_found(&self, finding: PortFinding);
    fn on_progress(&self, progress: ScanProgress);
    /// Called once the scan has quiesced.
    fn on_finished(&self, _report: &ScanReport) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Finding(PortFinding),
    Progress(ScanProgress),
    Finished(ScanReport),
}

impl ScanObserver for mpsc::UnboundedSender<ScanEvent> {
    fn on_port_found(&self, finding: PortFinding) {
        let _ = self.send(ScanEvent::Finding(finding));
    }

    fn on_progress(&self, progress: ScanProgress) {
        let _ = self.send(ScanEvent::Progress(progress));
    }

    fn on_finished(&self, report: &ScanReport) {
        let _ = self.send(ScanEvent::Finished(report.clone()));
    }
}

/// Probe every port of `target` in sequential chunks until the range is covered
/// or `cancel` fires.
///
/// - All ports of a chunk are probed concurrently, gated by a `Semaphore` of chunk width.
/// - The next chunk starts only after every task of the current one has finished.
/// - `cancel` is checked at chunk boundaries; in-flight probes run to completion.
/// - A progress update follows each chunk, then a short pause for fragile targets.
pub async fn run_deep_scan(
    target: ScanTarget,
    config: &ScanConfig,
    cancel: CancellationToken,
    observer: Arc<dyn ScanObserver>,
) -> ScanReport {
    let ip = target.ip;
    let started = Instant::now();
    let chunk_size = config.chunk_size();
    let config = Arc::new(config.clone());
    let sem = Arc::new(Semaphore::new(usize::from(chunk_size)));
    let findings = Arc::new(AtomicU64::new(0));
    let mut last_percent = 0u8;
    let mut state = ScanState::Completed;

    info!(%ip, ports = %target.ports, chunk_size, "starting deep scan");

    for chunk in target.ports.chunks(chunk_size) {
        if cancel.is_cancelled() {
            info!(%ip, "deep scan manually cancelled");
            state = ScanState::Cancelled;
            break;
        }

        let chunk_end = *chunk.end();
        let mut set = JoinSet::new();
        for port in chunk {
            let Ok(permit) = sem.clone().acquire_owned().await else {
                break;
            };
            let config = config.clone();
            let cancel = cancel.clone();
            let observer = observer.clone();
            let findings = findings.clone();

            set.spawn(async move {
                let _permit = permit;
                if let Some(finding) = probe_port(ip, port, &config, &cancel).await {
                    findings.fetch_add(1, Ordering::Relaxed);
                    observer.on_port_found(finding);
                }
            });
        }

        while let Some(res) = set.join_next().await {
            if let Err(e) = res {
                warn!(%ip, error = %e, "port task aborted");
            }
        }

        last_percent = last_percent.max(target.ports.percent_through(chunk_end));
        observer.on_progress(ScanProgress {
            ip,
            percent: last_percent,
        });

        time::sleep(config.inter_chunk_delay()).await;
    }

    let report = ScanReport {
        ip,
        state,
        findings: findings.load(Ordering::Relaxed),
        last_percent,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    info!(
        %ip,
        state = ?report.state,
        findings = report.findings,
        elapsed_ms = report.elapsed_ms,
        "deep scan finished"
    );
    report
}

/// Full pipeline for one port: open check, banner, TLS, classification, forensics.
///
/// Returns `None` when the port did not accept a connection.
pub async fn probe_port(
    ip: IpAddr,
    port: u16,
    config: &ScanConfig,
    cancel: &CancellationToken,
) -> Option<PortFinding> {
    if cancel.is_cancelled() {
        return None;
    }
    // The open-check socket is closed before anything else touches the port.
    if !prober::is_open(SocketAddr::new(ip, port), config.connect_timeout()).await {
        return None;
    }
    debug!(%ip, port, "port open");

    let banner =
        prober::probe_banner(ip, port, config.banner_timeout(), config.fallback_grace()).await;

    let undecodable = banner.as_deref().is_some_and(|b| b.contains('\u{FFFD}'));
    let cert = if banner.is_none() || undecodable || TLS_PORTS.contains(&port) {
        tls::probe_tls_cert(ip, port, config.tls_timeout()).await
    } else {
        None
    };

    let mut id = classifier::classify(port, banner.as_deref(), cert.as_ref());
    if config.forensics {
        run_forensics(&mut id, ip, port, cert.is_some(), config).await;
    }

    Some(PortFinding::new(port, id, banner.as_deref()))
}

/// Escalate `id` when a forensic probe finds exposure. Failures only get logged.
async fn run_forensics(
    id: &mut Identification,
    ip: IpAddr,
    port: u16,
    has_cert: bool,
    config: &ScanConfig,
) {
    let timeout = config.forensic_timeout();
    let handle = match id.service_name.as_str() {
        FTP_SERVICE => tokio::spawn(forensics::check_anonymous_ftp(ip, port, timeout)),
        HTTP_SERVICE | WEB_FALLBACK_SERVICE | TLS_SERVICE => {
            let use_tls = has_cert || TLS_PORTS.contains(&port);
            tokio::spawn(forensics::check_sensitive_web_files(ip, port, use_tls, timeout))
        }
        _ => return,
    };

    match handle.await {
        Ok(ForensicOutcome::Exposed(details)) => {
            warn!(%ip, port, %details, "forensic probe found exposure");
            id.vulnerable = true;
            id.severity = Severity::Critical;
            id.details = format!("{} | {}", id.details, details);
        }
        Ok(ForensicOutcome::NotExposed(details)) => {
            debug!(%ip, port, %details, "forensic probe clean")
        }
        Ok(ForensicOutcome::Inconclusive(e)) => {
            debug!(%ip, port, error = %e, "forensic probe inconclusive")
        }
        Err(e) => warn!(%ip, port, error = %e, "forensic probe task failed"),
    }
}
