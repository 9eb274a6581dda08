use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::{
    ports::PortRange,
    scanner::ScanEvent,
    session::ScanManager,
    types::{PortFinding, ScanState, ScanTarget},
};

#[derive(Clone)]
pub struct AppState {
    manager: ScanManager,
    scans: Arc<RwLock<HashMap<IpAddr, ScanView>>>, // latest scan per IP
    generation: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(manager: ScanManager) -> Self {
        Self {
            manager,
            scans: Arc::new(RwLock::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }
}

/// What the UI sees of one IP's most recent deep scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScanView {
    pub ip: IpAddr,
    pub ports: PortRange,
    pub state: ScanState,
    pub percent: u8,
    pub findings: Vec<PortFinding>,
    #[serde(skip)]
    generation: u64,
}

#[derive(Debug, Deserialize)]
pub struct DeepScanRequest {
    pub ip: String,
    #[serde(default)]
    pub ports: Option<String>,
}

#[derive(Debug, Serialize)]
struct ActiveList {
    active: Vec<IpAddr>,
}

#[derive(Debug, Serialize)]
struct CancelResponse {
    ip: IpAddr,
    cancelled: bool,
}

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/deep-scan", get(list_active).post(start_scan))
        .route("/deep-scan/{ip}", get(get_scan))
        .route("/deep-scan/{ip}/cancel", post(cancel_scan))
        .with_state(state);

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
}

pub async fn spawn_server(bind: &str, manager: ScanManager) -> Result<()> {
    let app = build_router(AppState::new(manager));
    info!(%bind, "serving deep-scan API");
    axum::serve(tokio::net::TcpListener::bind(bind).await?, app).await?;
    Ok(())
}

async fn list_active(State(app): State<AppState>) -> impl IntoResponse {
    Json(ActiveList {
        active: app.manager.active(),
    })
}

async fn get_scan(State(app): State<AppState>, Path(ip): Path<IpAddr>) -> impl IntoResponse {
    let scans = app.scans.read().await;
    match scans.get(&ip) {
        Some(view) => (StatusCode::OK, Json(view.clone())).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn cancel_scan(State(app): State<AppState>, Path(ip): Path<IpAddr>) -> impl IntoResponse {
    let cancelled = app.manager.cancel(ip);
    (StatusCode::OK, Json(CancelResponse { ip, cancelled }))
}

async fn start_scan(
    State(app): State<AppState>,
    Json(req): Json<DeepScanRequest>,
) -> impl IntoResponse {
    let ip = match req.ip.trim().parse::<IpAddr>() {
        Ok(ip) => ip,
        Err(e) => return (StatusCode::BAD_REQUEST, format!("invalid IP: {e}")).into_response(),
    };
    let ports = match req.ports.as_deref() {
        Some(p) => match p.parse::<PortRange>() {
            Ok(r) => r,
            Err(e) => {
                return (StatusCode::BAD_REQUEST, format!("invalid ports: {e:#}")).into_response()
            }
        },
        None => PortRange::FULL,
    };

    let target = ScanTarget::new(ip).with_ports(ports);
    let (tx, rx) = mpsc::unbounded_channel();
    if let Err(e) = app.manager.spawn(target, Arc::new(tx)) {
        return (StatusCode::CONFLICT, e.to_string()).into_response();
    }

    let generation = app.generation.fetch_add(1, Ordering::Relaxed);
    let view = ScanView {
        ip,
        ports,
        state: ScanState::Running,
        percent: 0,
        findings: Vec::new(),
        generation,
    };
    app.scans.write().await.insert(ip, view.clone());
    tokio::spawn(record_events(app.scans.clone(), ip, generation, rx));

    (StatusCode::ACCEPTED, Json(view)).into_response()
}

/// Fold scan events into the stored view, ignoring events from superseded scans.
async fn record_events(
    scans: Arc<RwLock<HashMap<IpAddr, ScanView>>>,
    ip: IpAddr,
    generation: u64,
    mut rx: mpsc::UnboundedReceiver<ScanEvent>,
) {
    while let Some(event) = rx.recv().await {
        let mut scans = scans.write().await;
        let Some(view) = scans.get_mut(&ip).filter(|v| v.generation == generation) else {
            warn!(%ip, "dropping events of superseded scan");
            return;
        };
        match event {
            ScanEvent::Finding(f) => view.findings.push(f),
            ScanEvent::Progress(p) => view.percent = view.percent.max(p.percent),
            ScanEvent::Finished(report) => {
                view.state = report.state;
                view.percent = report.last_percent;
                view.findings.sort_by_key(|f| f.port);
            }
        }
    }
}
