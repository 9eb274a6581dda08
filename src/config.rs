use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Timing and concurrency knobs for a deep scan.
///
/// Every timeout is enforced with a floor of 1ms, so none can be switched off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Ports probed concurrently before the next chunk may start.
    pub chunk_size: u16,
    /// Fast open-port check.
    pub connect_timeout_ms: u64,
    /// Connect + first-read ceiling for banner grabbing.
    pub banner_timeout_ms: u64,
    /// Extra time given to the hard fallback timer around a banner grab.
    pub fallback_grace_ms: u64,
    /// TLS handshake ceiling; handshakes need more round trips than a banner.
    pub tls_timeout_ms: u64,
    /// Per-round ceiling for FTP and HTTP forensic probes.
    pub forensic_timeout_ms: u64,
    /// Pause between chunks.
    pub inter_chunk_delay_ms: u64,
    /// Run forensic probes against FTP and web services.
    pub forensics: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            connect_timeout_ms: 1000,
            banner_timeout_ms: 1000,
            fallback_grace_ms: 200,
            tls_timeout_ms: 1400,
            forensic_timeout_ms: 1500,
            inter_chunk_delay_ms: 15,
            forensics: true,
        }
    }
}

impl ScanConfig {
    /// Load a JSON config file; missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("invalid config file: {}", path.display()))
    }

    pub fn chunk_size(&self) -> u16 {
        self.chunk_size.max(1)
    }

    pub fn connect_timeout(&self) -> Duration {
        millis(self.connect_timeout_ms)
    }

    pub fn banner_timeout(&self) -> Duration {
        millis(self.banner_timeout_ms)
    }

    pub fn fallback_grace(&self) -> Duration {
        Duration::from_millis(self.fallback_grace_ms)
    }

    pub fn tls_timeout(&self) -> Duration {
        millis(self.tls_timeout_ms)
    }

    pub fn forensic_timeout(&self) -> Duration {
        millis(self.forensic_timeout_ms)
    }

    pub fn inter_chunk_delay(&self) -> Duration {
        Duration::from_millis(self.inter_chunk_delay_ms)
    }
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms.max(1))
}
