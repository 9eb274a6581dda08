//! Follow-up checks against services the classifier flagged as FTP or web.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use reqwest::{redirect, Client, StatusCode};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{self, Instant};
use tracing::{debug, trace};

use crate::error::ProbeError;
use crate::prober::host_header;

/// Files that should never be served by a web root.
pub const SENSITIVE_PATHS: &[&str] = &["/.env", "/.git/config", "/wp-config.php.bak"];

const FTP_USER: &str = "anonymous";
const FTP_PASS: &str = "anonymous@domain.com";
/// Greeting, USER and PASS replies.
const FTP_ROUNDS: u32 = 3;
const REPLY_MAX: usize = 8 * 1024;
const USER_AGENT: &str = "lan-deepscan";

/// Result of a forensic probe. `Inconclusive` must not be read as safe.
#[derive(Debug)]
pub enum ForensicOutcome {
    Exposed(String),
    NotExposed(String),
    Inconclusive(ProbeError),
}

impl ForensicOutcome {
    pub fn is_exposed(&self) -> bool {
        matches!(self, ForensicOutcome::Exposed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FtpState {
    AwaitBanner,
    AwaitUserReply,
    AwaitFinal,
}

/// Try `USER anonymous` / `PASS anonymous@domain.com` against `ip:port`.
pub async fn check_anonymous_ftp(ip: IpAddr, port: u16, timeout: Duration) -> ForensicOutcome {
    let addr = SocketAddr::new(ip, port);
    let mut stream = match time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(s)) => s,
        Ok(Err(source)) => {
            return ForensicOutcome::Inconclusive(ProbeError::Connect { addr, source })
        }
        Err(_) => {
            return ForensicOutcome::Inconclusive(ProbeError::timeout("connecting", timeout))
        }
    };
    let outcome = ftp_anonymous_login(&mut stream, timeout).await;
    trace!(%addr, ?outcome, "anonymous ftp check finished");
    outcome
}

/// Drive the anonymous login dialog over an already connected stream.
///
/// Each reply must arrive within `timeout`, and the whole exchange within
/// `FTP_ROUNDS * timeout`, however slowly the server trickles bytes.
pub async fn ftp_anonymous_login<S>(stream: &mut S, timeout: Duration) -> ForensicOutcome
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let budget = timeout * FTP_ROUNDS;
    let deadline = Instant::now() + budget;
    let result = match time::timeout_at(deadline, ftp_dialog(stream, timeout)).await {
        Ok(result) => result,
        Err(_) => Err(ProbeError::timeout("anonymous ftp login", budget)),
    };

    match result {
        Ok(allowed) => {
            let _ = time::timeout_at(deadline, send_line(stream, "QUIT", timeout)).await;
            if allowed {
                ForensicOutcome::Exposed(
                    "CRITICAL: Anonymous FTP Login Allowed. File system is exposed.".to_string(),
                )
            } else {
                ForensicOutcome::NotExposed("Anonymous FTP Login Rejected.".to_string())
            }
        }
        Err(e) => ForensicOutcome::Inconclusive(e),
    }
}

async fn ftp_dialog<S>(stream: &mut S, timeout: Duration) -> Result<bool, ProbeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut state = FtpState::AwaitBanner;
    loop {
        let reply = read_ftp_reply(stream, timeout).await?;
        state = match state {
            FtpState::AwaitBanner if reply.starts_with("220") => {
                send_line(stream, &format!("USER {FTP_USER}"), timeout).await?;
                FtpState::AwaitUserReply
            }
            FtpState::AwaitUserReply if reply.starts_with("331") || reply.starts_with("230") => {
                send_line(stream, &format!("PASS {FTP_PASS}"), timeout).await?;
                FtpState::AwaitFinal
            }
            FtpState::AwaitFinal => return Ok(reply.starts_with("230")),
            FtpState::AwaitBanner => {
                return Err(ProbeError::UnexpectedReply {
                    stage: "awaiting ftp greeting",
                    reply,
                })
            }
            FtpState::AwaitUserReply => {
                return Err(ProbeError::UnexpectedReply {
                    stage: "sending ftp user",
                    reply,
                })
            }
        };
    }
}

async fn send_line<S>(stream: &mut S, line: &str, timeout: Duration) -> Result<(), ProbeError>
where
    S: AsyncWrite + Unpin,
{
    let data = format!("{line}\r\n");
    time::timeout(timeout, stream.write_all(data.as_bytes()))
        .await
        .map_err(|_| ProbeError::timeout("writing ftp command", timeout))??;
    Ok(())
}

/// Read one complete FTP reply, including multi-line `xyz-` continuations.
///
/// The reply as a whole must arrive within `timeout`.
async fn read_ftp_reply<S>(stream: &mut S, timeout: Duration) -> Result<String, ProbeError>
where
    S: AsyncRead + Unpin,
{
    let deadline = Instant::now() + timeout;
    let mut acc = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = time::timeout_at(deadline, stream.read(&mut buf))
            .await
            .map_err(|_| ProbeError::timeout("reading ftp reply", timeout))??;
        if n == 0 {
            return Err(ProbeError::Closed("reading ftp reply"));
        }
        acc.extend_from_slice(&buf[..n]);
        let text = String::from_utf8_lossy(&acc);
        if reply_complete(&text) {
            return Ok(text.trim().to_string());
        }
        if acc.len() > REPLY_MAX {
            return Err(ProbeError::UnexpectedReply {
                stage: "reading ftp reply",
                reply: text.chars().take(80).collect(),
            });
        }
    }
}

/// A reply is complete once a terminated line reads `ddd ` (or just `ddd`).
fn reply_complete(text: &str) -> bool {
    let Some(body) = text.strip_suffix('\n') else {
        return false;
    };
    body.split('\n').any(|line| {
        let line = line.trim_end_matches('\r');
        let b = line.as_bytes();
        b.len() >= 3
            && b[..3].iter().all(u8::is_ascii_digit)
            && (b.len() == 3 || b[3] == b' ')
    })
}

/// GET every sensitive path in turn; a `200` marks that path exposed.
///
/// Paths are tried one by one. A failed request only counts against its own path.
pub async fn check_sensitive_web_files(
    ip: IpAddr,
    port: u16,
    use_tls: bool,
    timeout: Duration,
) -> ForensicOutcome {
    let client = match web_client(timeout) {
        Ok(client) => client,
        Err(e) => return ForensicOutcome::Inconclusive(e),
    };
    let scheme = if use_tls { "https" } else { "http" };
    let base = format!("{scheme}://{}:{port}", host_header(ip));

    let mut exposed = Vec::new();
    for path in SENSITIVE_PATHS {
        match fetch_status(&client, &format!("{base}{path}")).await {
            Ok(StatusCode::OK) => exposed.push(*path),
            Ok(status) => {
                trace!(%ip, port, path, status = status.as_u16(), "sensitive path not served")
            }
            Err(e) => debug!(%ip, port, path, error = %e, "sensitive path request failed"),
        }
    }

    if exposed.is_empty() {
        ForensicOutcome::NotExposed("No common sensitive web files detected.".to_string())
    } else {
        ForensicOutcome::Exposed(format!(
            "CRITICAL: Exposed sensitive web files found: {}",
            exposed.join(", ")
        ))
    }
}

/// Client for LAN targets: any certificate, no redirects, no proxy.
fn web_client(timeout: Duration) -> Result<Client, ProbeError> {
    let client = Client::builder()
        .user_agent(USER_AGENT)
        .danger_accept_invalid_certs(true)
        .redirect(redirect::Policy::none())
        .no_proxy()
        .timeout(timeout)
        .build()?;
    Ok(client)
}

async fn fetch_status(client: &Client, url: &str) -> Result<StatusCode, ProbeError> {
    let resp = client.get(url).send().await?;
    Ok(resp.status())
}
