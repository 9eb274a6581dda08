use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

use crate::ports::PortRange;

/// Longest raw banner kept on a finding, in bytes.
pub const RAW_BANNER_MAX: usize = 100;

/// The host and port range of one deep scan. Never mutated once the scan starts.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanTarget {
    pub ip: IpAddr,
    #[serde(default)]
    pub ports: PortRange,
}

impl ScanTarget {
    /// Target covering the full 1-65535 range.
    pub fn new(ip: IpAddr) -> Self {
        Self {
            ip,
            ports: PortRange::FULL,
        }
    }

    pub fn with_ports(mut self, ports: PortRange) -> Self {
        self.ports = ports;
        self
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the classifier concluded about one port.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identification {
    pub service_name: String,
    pub details: String,
    pub vulnerable: bool,
    pub severity: Severity,
}

impl Identification {
    pub fn info(service_name: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            details: details.into(),
            vulnerable: false,
            severity: Severity::Info,
        }
    }

    pub fn critical(service_name: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            details: details.into(),
            vulnerable: true,
            severity: Severity::Critical,
        }
    }
}

/// Peer certificate fields pulled out of a TLS handshake.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CertInfo {
    pub subject: String,
    pub issuer: String,
    pub valid_from: String,
    pub valid_to: String,
}

/// One discovered service on a port.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PortFinding {
    pub port: u16,
    pub service_name: String,
    pub details: String,
    pub vulnerable: bool,
    pub severity: Severity,
    pub raw_banner: Option<String>,
}

impl PortFinding {
    pub fn new(port: u16, id: Identification, banner: Option<&str>) -> Self {
        Self {
            port,
            service_name: id.service_name,
            details: id.details,
            vulnerable: id.vulnerable,
            severity: id.severity,
            raw_banner: banner.map(|b| truncate_bytes(b, RAW_BANNER_MAX)),
        }
    }
}

/// Progress after one chunk of ports has fully completed.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanProgress {
    pub ip: IpAddr,
    pub percent: u8,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScanState {
    Running,
    Completed,
    Cancelled,
}

/// Terminal summary returned once a scan quiesces.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub ip: IpAddr,
    pub state: ScanState,
    pub findings: u64,
    pub last_percent: u8,
    pub elapsed_ms: u64,
}

/// Keep at most `max` bytes, cutting back to the previous char boundary.
pub fn truncate_bytes(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// Keep at most `max` characters, never splitting a UTF-8 sequence.
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
