mod common;

use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};

use tokio::io::AsyncWriteExt;

use lan_deepscan::error::ProbeError;
use lan_deepscan::forensics::{check_anonymous_ftp, check_sensitive_web_files, ForensicOutcome};

const LOCAL: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);
const T: Duration = Duration::from_millis(500);

#[tokio::test]
async fn anonymous_ftp_allowed_over_tcp() {
    let addr = common::ftp_server(true).await;
    match check_anonymous_ftp(LOCAL, addr.port(), T).await {
        ForensicOutcome::Exposed(details) => {
            assert!(details.contains("Anonymous FTP Login Allowed"))
        }
        other => panic!("expected exposure, got {other:?}"),
    }
}

#[tokio::test]
async fn anonymous_ftp_rejected_over_tcp() {
    let addr = common::ftp_server(false).await;
    let outcome = check_anonymous_ftp(LOCAL, addr.port(), T).await;
    assert!(matches!(outcome, ForensicOutcome::NotExposed(_)), "{outcome:?}");
}

#[tokio::test]
async fn ftp_against_closed_port_is_inconclusive() {
    let port = common::closed_port().await;
    let outcome = check_anonymous_ftp(LOCAL, port, T).await;
    assert!(matches!(outcome, ForensicOutcome::Inconclusive(_)), "{outcome:?}");
}

#[tokio::test]
async fn ftp_against_ssh_is_inconclusive() {
    let addr = common::greeter("SSH-2.0-OpenSSH_9.6\r\n").await;
    let outcome = check_anonymous_ftp(LOCAL, addr.port(), T).await;
    assert!(matches!(outcome, ForensicOutcome::Inconclusive(_)), "{outcome:?}");
}

#[tokio::test]
async fn trickling_ftp_server_cannot_hold_the_check() {
    let addr = common::serve(|mut s| async move {
        if s.write_all(b"220-").await.is_err() {
            return;
        }
        loop {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if s.write_all(b"x").await.is_err() {
                return;
            }
        }
    })
    .await;

    let start = Instant::now();
    let outcome = check_anonymous_ftp(LOCAL, addr.port(), T).await;
    let elapsed = start.elapsed();
    assert!(
        matches!(outcome, ForensicOutcome::Inconclusive(ProbeError::Timeout { .. })),
        "{outcome:?}"
    );
    assert!(elapsed < Duration::from_secs(2), "took {elapsed:?}");
}

#[tokio::test]
async fn lists_every_exposed_web_file() {
    let addr = common::web_server(&["/.env", "/wp-config.php.bak"]).await;
    match check_sensitive_web_files(LOCAL, addr.port(), false, T).await {
        ForensicOutcome::Exposed(details) => {
            assert!(details.contains("/.env"));
            assert!(details.contains("/wp-config.php.bak"));
            assert!(!details.contains("/.git/config"));
        }
        other => panic!("expected exposure, got {other:?}"),
    }
}

#[tokio::test]
async fn no_exposed_web_files() {
    let addr = common::web_server(&[]).await;
    let outcome = check_sensitive_web_files(LOCAL, addr.port(), false, T).await;
    assert!(matches!(outcome, ForensicOutcome::NotExposed(_)), "{outcome:?}");
}

#[tokio::test]
async fn unreachable_web_host_counts_as_not_exposed() {
    let port = common::closed_port().await;
    let outcome = check_sensitive_web_files(LOCAL, port, false, T).await;
    assert!(matches!(outcome, ForensicOutcome::NotExposed(_)));

    let outcome = check_sensitive_web_files(LOCAL, port, true, T).await;
    assert!(matches!(outcome, ForensicOutcome::NotExposed(_)));
}

#[tokio::test]
async fn exposed_web_file_over_https() {
    let addr = common::tls_web_server(&["/.git/config"]).await;
    match check_sensitive_web_files(LOCAL, addr.port(), true, Duration::from_secs(2)).await {
        ForensicOutcome::Exposed(details) => {
            assert!(details.contains("/.git/config"));
            assert!(!details.contains("/.env"));
        }
        other => panic!("expected exposure, got {other:?}"),
    }
}

#[tokio::test]
async fn plain_http_against_tls_only_server_is_not_exposed() {
    let addr = common::tls_web_server(&["/.env"]).await;
    let outcome = check_sensitive_web_files(LOCAL, addr.port(), false, T).await;
    assert!(matches!(outcome, ForensicOutcome::NotExposed(_)), "{outcome:?}");
}
