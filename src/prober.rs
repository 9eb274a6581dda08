use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{self, Instant};
use tracing::trace;

use crate::error::ProbeError;

/// Ports that get an HTTP request on connect to coax servers that don't speak first.
pub const HTTP_NUDGE_PORTS: &[u16] = &[80, 443, 8080, 8443, 8000, 5000];

const BANNER_BUF: usize = 4096;

/// Open-port check: a bare connect bounded by `timeout`. The socket is dropped either way.
pub async fn is_open(addr: SocketAddr, timeout: Duration) -> bool {
    match time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(e)) => {
            trace!(%addr, error = %e, "connect failed");
            false
        }
        Err(_) => false,
    }
}

/// Grab the first chunk a service sends on a fresh connection.
///
/// Connect and read share one `timeout` budget. The whole attempt is also
/// wrapped in a hard ceiling of `timeout + grace` in case neither fires.
/// Any failure yields `None`; the socket is released on every path.
pub async fn probe_banner(
    ip: IpAddr,
    port: u16,
    timeout: Duration,
    grace: Duration,
) -> Option<String> {
    let addr = SocketAddr::new(ip, port);
    match time::timeout(timeout + grace, grab(addr, timeout)).await {
        Ok(Ok(banner)) => banner,
        Ok(Err(e)) => {
            trace!(%addr, error = %e, "banner grab failed");
            None
        }
        Err(_) => {
            trace!(%addr, "banner grab hit fallback ceiling");
            None
        }
    }
}

async fn grab(addr: SocketAddr, timeout: Duration) -> Result<Option<String>, ProbeError> {
    let deadline = Instant::now() + timeout;

    let mut stream = time::timeout_at(deadline, TcpStream::connect(addr))
        .await
        .map_err(|_| ProbeError::timeout("connecting", timeout))?
        .map_err(|source| ProbeError::Connect { addr, source })?;

    if HTTP_NUDGE_PORTS.contains(&addr.port()) {
        let req = http_nudge(addr.ip());
        time::timeout_at(deadline, stream.write_all(req.as_bytes()))
            .await
            .map_err(|_| ProbeError::timeout("sending http nudge", timeout))??;
    }

    let mut buf = vec![0u8; BANNER_BUF];
    let n = time::timeout_at(deadline, stream.read(&mut buf))
        .await
        .map_err(|_| ProbeError::timeout("reading banner", timeout))??;
    if n == 0 {
        return Err(ProbeError::Closed("reading banner"));
    }

    let text = String::from_utf8_lossy(&buf[..n]).trim().to_string();
    Ok((!text.is_empty()).then_some(text))
}

/// Minimal HTTP/1.0 `GET /` with a Host header.
fn http_nudge(ip: IpAddr) -> String {
    format!(
        "GET / HTTP/1.0\r\nHost: {}\r\nUser-Agent: lan-deepscan\r\nConnection: close\r\n\r\n",
        host_header(ip)
    )
}

pub(crate) fn host_header(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => v4.to_string(),
        IpAddr::V6(v6) => format!("[{v6}]"),
    }
}
