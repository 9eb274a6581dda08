use std::fs::File;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use lan_deepscan::config::ScanConfig;
use lan_deepscan::ports::PortRange;
use lan_deepscan::scanner::ScanEvent;
use lan_deepscan::session::ScanManager;
use lan_deepscan::server;
use lan_deepscan::types::{PortFinding, ScanReport, ScanTarget};

/// lan-deepscan: deep TCP port scan and service fingerprinting of a host on your own LAN.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "lan-deepscan",
    version,
    about = "Deep TCP port scan with banner, TLS and forensic fingerprinting of a LAN host.",
    long_about = None
)]
struct Cli {
    /// Host to scan (already known to be alive).
    #[arg(long)]
    target: Option<IpAddr>,

    /// Inclusive port range, e.g. 1-1024 or 8080.
    #[arg(long, default_value = "1-65535")]
    ports: PortRange,

    /// JSON file with scan settings; CLI flags override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Ports probed concurrently per chunk.
    #[arg(long = "chunk-size")]
    chunk_size: Option<u16>,

    /// Open-port connect timeout in milliseconds.
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// Skip anonymous-FTP and sensitive web file probes.
    #[arg(long = "no-forensics", default_value_t = false)]
    no_forensics: bool,

    /// Write findings as pretty JSON to this path (optional).
    #[arg(long)]
    output: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set.
    #[arg(long = "log-level", default_value = "info")]
    log_level: String,

    /// Serve the deep-scan JSON API.
    #[arg(long = "serve-ui", default_value_t = false)]
    serve_ui: bool,

    /// Address for the API server.
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if cli.target.is_none() && !cli.serve_ui {
        bail!("nothing to do: pass --target <ip> and/or --serve-ui");
    }

    let config = build_config(&cli)?;

    println!("lan-deepscan configuration:");
    println!(
        "  target       : {}",
        cli.target
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "<none>".to_string())
    );
    println!("  ports        : {}", cli.ports);
    println!("  chunk_size   : {}", config.chunk_size());
    println!("  timeout_ms   : {}", config.connect_timeout_ms);
    println!("  forensics    : {}", config.forensics);
    println!(
        "  output       : {}",
        cli.output
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<none>".to_string())
    );
    println!("  serve_ui     : {}", cli.serve_ui);

    let manager = ScanManager::new(config);

    if cli.serve_ui {
        let bind = cli.bind.clone();
        let manager = manager.clone();
        tokio::spawn(async move {
            if let Err(e) = server::spawn_server(&bind, manager).await {
                tracing::error!(error = %e, "API server error");
            }
        });
        println!("API server starting at http://{} (Ctrl+C to stop)", cli.bind);
    }

    if let Some(ip) = cli.target {
        let target = ScanTarget::new(ip).with_ports(cli.ports);
        let (findings, report) = scan_interactive(&manager, target).await?;
        print_results_table(&findings, &report);
        if let Some(path) = cli.output.as_deref() {
            if let Err(e) = write_findings_json(path, &findings) {
                eprintln!("Failed to write JSON to {}: {}", path.display(), e);
            } else {
                println!("Wrote JSON findings to {}", path.display());
            }
        }
    }

    if cli.serve_ui {
        println!("Press Ctrl+C to stop the server...");
        let _ = tokio::signal::ctrl_c().await;
        manager.cancel_all();
    }

    Ok(())
}

fn build_config(cli: &Cli) -> Result<ScanConfig> {
    let mut config = match cli.config.as_deref() {
        Some(path) => ScanConfig::load(path)?,
        None => ScanConfig::default(),
    };
    if let Some(n) = cli.chunk_size {
        config.chunk_size = n;
    }
    if let Some(ms) = cli.timeout_ms {
        config.connect_timeout_ms = ms;
    }
    if cli.no_forensics {
        config.forensics = false;
    }
    Ok(config)
}

/// Run one scan, streaming findings and progress to stdout. Ctrl-C cancels it.
async fn scan_interactive(
    manager: &ScanManager,
    target: ScanTarget,
) -> Result<(Vec<PortFinding>, ScanReport)> {
    let ip = target.ip;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = manager.spawn(target, Arc::new(tx))?;

    let ctrlc_manager = manager.clone();
    let ctrlc = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nCancelling scan of {ip} after the current chunk...");
            ctrlc_manager.cancel(ip);
        }
    });

    let mut findings = Vec::new();
    let mut last_decade = 0u8;
    while let Some(event) = rx.recv().await {
        match event {
            ScanEvent::Finding(f) => {
                let flag = if f.vulnerable { "!" } else { "+" };
                println!(
                    "[{flag}] {}:{:<5} {} - {}",
                    ip, f.port, f.service_name, f.details
                );
                findings.push(f);
            }
            ScanEvent::Progress(p) => {
                if p.percent / 10 > last_decade {
                    last_decade = p.percent / 10;
                    println!("    progress {}%", p.percent);
                }
            }
            ScanEvent::Finished(_) => break,
        }
    }

    let report = handle.await.context("scan task failed")?;
    ctrlc.abort();
    findings.sort_by_key(|f| f.port);
    Ok((findings, report))
}

fn print_results_table(findings: &[PortFinding], report: &ScanReport) {
    let port_w = 5usize.max("port".len());
    let sev_w = "critical".len();
    let mut svc_w = "service".len();
    for f in findings {
        svc_w = svc_w.max(f.service_name.len());
    }

    println!(
        "\nScan of {} {:?}: {} finding(s), {}% covered in {} ms",
        report.ip, report.state, report.findings, report.last_percent, report.elapsed_ms
    );
    println!(
        "{:>port_w$}  {:<svc_w$}  {:<sev_w$}  details",
        "port",
        "service",
        "severity",
        port_w = port_w,
        svc_w = svc_w,
        sev_w = sev_w
    );
    println!(
        "{:-<port_w$}  {:-<svc_w$}  {:-<sev_w$}  {:-<7}",
        "",
        "",
        "",
        "",
        port_w = port_w,
        svc_w = svc_w,
        sev_w = sev_w
    );
    for f in findings {
        let mut details = f.details.clone();
        if details.len() > 80 {
            details = lan_deepscan::types::truncate_chars(&details, 80);
        }
        println!(
            "{:>port_w$}  {:<svc_w$}  {:<sev_w$}  {}",
            f.port,
            f.service_name,
            f.severity.as_str(),
            details,
            port_w = port_w,
            svc_w = svc_w,
            sev_w = sev_w
        );
    }
}

fn write_findings_json(path: &std::path::Path, findings: &[PortFinding]) -> anyhow::Result<()> {
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, findings)?;
    Ok(())
}
