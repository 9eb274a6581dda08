mod common;

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use lan_deepscan::prober::{is_open, probe_banner};
use lan_deepscan::tls::probe_tls_cert;

const LOCAL: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

#[tokio::test]
async fn grabs_speak_first_banner() {
    let addr = common::greeter("SSH-2.0-OpenSSH_9.6\r\n").await;
    let banner = probe_banner(
        LOCAL,
        addr.port(),
        Duration::from_millis(500),
        Duration::from_millis(100),
    )
    .await;
    assert_eq!(banner.as_deref(), Some("SSH-2.0-OpenSSH_9.6"));
}

#[tokio::test]
async fn silent_service_yields_none_within_budget() {
    let addr = common::silent().await;
    let start = Instant::now();
    let banner = probe_banner(
        LOCAL,
        addr.port(),
        Duration::from_millis(200),
        Duration::from_millis(100),
    )
    .await;
    assert!(banner.is_none());
    assert!(start.elapsed() < Duration::from_millis(1000));
}

#[tokio::test]
async fn closed_port_is_not_open_and_has_no_banner() {
    let port = common::closed_port().await;
    assert!(!is_open(SocketAddr::new(LOCAL, port), Duration::from_millis(200)).await);
    assert!(probe_banner(LOCAL, port, Duration::from_millis(200), Duration::from_millis(100))
        .await
        .is_none());
}

#[tokio::test]
async fn listening_port_is_open() {
    let addr = common::silent().await;
    assert!(is_open(addr, Duration::from_millis(200)).await);
}

#[tokio::test]
async fn tls_probe_against_plain_service_yields_none() {
    let plain = common::greeter("220 mail.lan ESMTP\r\n").await;
    assert!(probe_tls_cert(LOCAL, plain.port(), Duration::from_millis(300)).await.is_none());

    let silent = common::silent().await;
    assert!(probe_tls_cert(LOCAL, silent.port(), Duration::from_millis(300)).await.is_none());

    let closed = common::closed_port().await;
    assert!(probe_tls_cert(LOCAL, closed, Duration::from_millis(300)).await.is_none());
}

#[tokio::test]
async fn tls_inspection_reads_served_certificate() {
    let addr = common::tls_web_server(&[]).await;
    let cert = probe_tls_cert(LOCAL, addr.port(), Duration::from_secs(2))
        .await
        .expect("certificate");
    assert_eq!(cert.subject, common::TLS_CERT_CN);
    assert_eq!(cert.issuer, common::TLS_CERT_CN);
    assert_eq!(cert.valid_from, "2024-01-01T00:00:00Z");
    assert_eq!(cert.valid_to, "2049-12-31T23:59:59Z");
}
