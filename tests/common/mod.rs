#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_native_tls::TlsAcceptor;

use lan_deepscan::config::ScanConfig;

/// Settings that keep loopback tests fast.
pub fn fast_config() -> ScanConfig {
    ScanConfig {
        chunk_size: 64,
        connect_timeout_ms: 200,
        banner_timeout_ms: 500,
        fallback_grace_ms: 100,
        tls_timeout_ms: 300,
        forensic_timeout_ms: 500,
        inter_chunk_delay_ms: 0,
        forensics: true,
    }
}

/// Serve every connection with `handler` on its own task.
pub async fn serve<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(TcpStream) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(handler(stream));
        }
    });
    addr
}

/// A service that greets every connection with `banner`.
pub async fn greeter(banner: &'static str) -> SocketAddr {
    serve(move |mut s| async move {
        let _ = s.write_all(banner.as_bytes()).await;
        let mut buf = [0u8; 64];
        let _ = tokio::time::timeout(Duration::from_secs(2), s.read(&mut buf)).await;
    })
    .await
}

/// A service that accepts and never says anything.
pub async fn silent() -> SocketAddr {
    serve(|mut s| async move {
        let mut buf = [0u8; 1024];
        let _ = tokio::time::timeout(Duration::from_secs(3), s.read(&mut buf)).await;
    })
    .await
}

/// FTP server that accepts the anonymous login when `allow` is set.
pub async fn ftp_server(allow: bool) -> SocketAddr {
    serve(move |mut s| async move {
        if s.write_all(b"220 ProFTPD 1.3.6 Ready\r\n").await.is_err() {
            return;
        }
        let mut buf = [0u8; 256];
        match s.read(&mut buf).await {
            Ok(n) if n > 0 && buf[..n].starts_with(b"USER") => {}
            _ => return,
        }
        let _ = s.write_all(b"331 Anonymous login ok, send your email as password.\r\n").await;
        match s.read(&mut buf).await {
            Ok(n) if n > 0 && buf[..n].starts_with(b"PASS") => {}
            _ => return,
        }
        let reply: &[u8] = if allow {
            b"230 Anonymous access granted.\r\n"
        } else {
            b"530 Login incorrect.\r\n"
        };
        let _ = s.write_all(reply).await;
        let _ = s.read(&mut buf).await;
    })
    .await
}

/// Web server answering `200` for `exposed` paths and `404` otherwise.
///
/// Connections that send nothing for 100ms get a speak-first HTTP banner,
/// so the banner grab sees a `Server:` header on any port.
pub async fn web_server(exposed: &'static [&'static str]) -> SocketAddr {
    serve(move |mut s| async move {
        let mut buf = [0u8; 1024];
        match tokio::time::timeout(Duration::from_millis(100), s.read(&mut buf)).await {
            Ok(Ok(n)) if n > 0 => answer_get(&mut s, &buf[..n], exposed).await,
            Ok(_) => {}
            Err(_) => {
                let _ = s
                    .write_all(b"HTTP/1.0 200 OK\r\nServer: TestHTTP/1.0\r\n\r\n")
                    .await;
                let _ = tokio::time::timeout(Duration::from_secs(1), s.read(&mut buf)).await;
            }
        }
    })
    .await
}

async fn answer_get<S>(s: &mut S, request: &[u8], exposed: &[&str])
where
    S: AsyncWrite + Unpin,
{
    let req = String::from_utf8_lossy(request);
    let path = req.split_whitespace().nth(1).unwrap_or("/");
    let status = if exposed.contains(&path) {
        "200 OK"
    } else {
        "404 Not Found"
    };
    let resp =
        format!("HTTP/1.0 {status}\r\nServer: TestHTTP/1.0\r\nContent-Length: 0\r\n\r\n");
    let _ = s.write_all(resp.as_bytes()).await;
    let _ = s.flush().await;
}

pub const TLS_CERT_PEM: &[u8] = include_bytes!("../fixtures/cert.pem");
const TLS_KEY_PEM: &[u8] = include_bytes!("../fixtures/key.pem");

/// Subject and issuer CN of the self-signed fixture certificate.
pub const TLS_CERT_CN: &str = "printer.deepscan.test";

pub fn tls_acceptor() -> TlsAcceptor {
    let identity = native_tls::Identity::from_pkcs8(TLS_CERT_PEM, TLS_KEY_PEM).unwrap();
    TlsAcceptor::from(native_tls::TlsAcceptor::new(identity).unwrap())
}

/// HTTPS server with the fixture certificate, answering like `web_server` once
/// the handshake is done. It never speaks first.
pub async fn tls_web_server(exposed: &'static [&'static str]) -> SocketAddr {
    let acceptor = Arc::new(tls_acceptor());
    serve(move |s| {
        let acceptor = acceptor.clone();
        async move {
            let Ok(Ok(mut tls)) =
                tokio::time::timeout(Duration::from_secs(2), acceptor.accept(s)).await
            else {
                return;
            };
            let mut buf = [0u8; 2048];
            if let Some(n) = read_some(&mut tls, &mut buf).await {
                answer_get(&mut tls, &buf[..n], exposed).await;
                let _ = tls.shutdown().await;
            }
        }
    })
    .await
}

async fn read_some<S>(s: &mut S, buf: &mut [u8]) -> Option<usize>
where
    S: AsyncRead + Unpin,
{
    match tokio::time::timeout(Duration::from_secs(1), s.read(buf)).await {
        Ok(Ok(n)) if n > 0 => Some(n),
        _ => None,
    }
}

/// A loopback port with nothing listening on it.
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}
