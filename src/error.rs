use std::net::{IpAddr, SocketAddr};
use thiserror::Error;

/// Why a single probe against one port gave up.
///
/// These never reach the scan caller; probes turn them into "no finding"
/// or an inconclusive forensic verdict and log them.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("{stage} timed out after {timeout_ms}ms")]
    Timeout { stage: &'static str, timeout_ms: u64 },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("tls error: {0}")]
    Tls(#[from] native_tls::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected reply while {stage}: {reply}")]
    UnexpectedReply { stage: &'static str, reply: String },

    #[error("peer closed the connection while {0}")]
    Closed(&'static str),
}

impl ProbeError {
    pub fn timeout(stage: &'static str, timeout: std::time::Duration) -> Self {
        ProbeError::Timeout {
            stage,
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

/// Misuse of the scan manager that the caller must hear about.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error("a deep scan of {0} is already running")]
    AlreadyRunning(IpAddr),
}
