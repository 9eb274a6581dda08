use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

pub const MAX_PORT: u16 = 65535;

/// Inclusive TCP port range inside 1..=65535.
///
/// Parses from and serializes to `"start-end"` (or a single `"port"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortRange {
    start: u16,
    end: u16,
}

impl PortRange {
    pub const FULL: PortRange = PortRange {
        start: 1,
        end: MAX_PORT,
    };

    pub fn new(start: u16, end: u16) -> Result<Self> {
        if start == 0 {
            bail!("port out of range: 0");
        }
        if start > end {
            bail!("invalid range {start}-{end} (start > end)");
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> u16 {
        self.start
    }

    pub fn end(&self) -> u16 {
        self.end
    }

    pub fn len(&self) -> u32 {
        u32::from(self.end) - u32::from(self.start) + 1
    }

    /// A valid range always holds at least one port.
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.start..=self.end).contains(&port)
    }

    /// Split into sequential inclusive chunks of at most `size` ports.
    pub fn chunks(&self, size: u16) -> Chunks {
        Chunks {
            next: Some(self.start),
            end: self.end,
            size: size.max(1),
        }
    }

    /// Share of the range covered once every port up to `port` has been scanned.
    ///
    /// For the full range this is `port / 65535`.
    pub fn percent_through(&self, port: u16) -> u8 {
        let port = port.clamp(self.start, self.end);
        let done = f64::from(u32::from(port) - u32::from(self.start) + 1);
        (done * 100.0 / f64::from(self.len())).round() as u8
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::FULL
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

impl FromStr for PortRange {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some((a, b)) = s.split_once('-') {
            let start = parse_port_str(a.trim())
                .with_context(|| format!("invalid start in range: {a}"))?;
            let end =
                parse_port_str(b.trim()).with_context(|| format!("invalid end in range: {b}"))?;
            return PortRange::new(start, end);
        }
        let p = parse_port_str(s).with_context(|| format!("invalid port value: {s}"))?;
        PortRange::new(p, p)
    }
}

impl TryFrom<String> for PortRange {
    type Error = anyhow::Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<PortRange> for String {
    fn from(r: PortRange) -> String {
        r.to_string()
    }
}

/// Iterator returned by [`PortRange::chunks`].
#[derive(Debug, Clone)]
pub struct Chunks {
    next: Option<u16>,
    end: u16,
    size: u16,
}

impl Iterator for Chunks {
    type Item = RangeInclusive<u16>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.next?;
        let last = start.saturating_add(self.size - 1).min(self.end);
        self.next = if last >= self.end { None } else { Some(last + 1) };
        Some(start..=last)
    }
}

fn parse_port_str(s: &str) -> Result<u16> {
    let val: u32 = s.parse::<u32>().map_err(|e| anyhow::anyhow!(e))?;
    if val == 0 || val > u32::from(MAX_PORT) {
        bail!("port out of range: {val}");
    }
    Ok(val as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_single_and_range() {
        assert_eq!("80".parse::<PortRange>().unwrap(), PortRange::new(80, 80).unwrap());
        let r: PortRange = " 8000 - 8010 ".parse().unwrap();
        assert_eq!((r.start(), r.end()), (8000, 8010));
        assert_eq!(r.len(), 11);
    }

    #[test]
    fn invalid_values_error() {
        assert!("70000".parse::<PortRange>().is_err());
        assert!("0-10".parse::<PortRange>().is_err());
        assert!("20-10".parse::<PortRange>().is_err());
        assert!("http".parse::<PortRange>().is_err());
    }

    #[test]
    fn full_range_chunks_cover_every_port() {
        let chunks: Vec<_> = PortRange::FULL.chunks(1000).collect();
        assert_eq!(chunks.len(), 66);
        assert_eq!(chunks[0], 1..=1000);
        assert_eq!(chunks[65], 65001..=65535);
        let total: u32 = chunks.iter().map(|c| u32::from(c.end() - c.start()) + 1).sum();
        assert_eq!(total, 65535);
    }

    #[test]
    fn chunk_size_larger_than_range() {
        let r = PortRange::new(65530, 65535).unwrap();
        let chunks: Vec<_> = r.chunks(u16::MAX).collect();
        assert_eq!(chunks, vec![65530..=65535]);
    }

    #[test]
    fn percent_matches_highest_port_over_max() {
        assert_eq!(PortRange::FULL.percent_through(1000), 2);
        assert_eq!(PortRange::FULL.percent_through(32768), 50);
        assert_eq!(PortRange::FULL.percent_through(65535), 100);
        let r = PortRange::new(100, 199).unwrap();
        assert_eq!(r.percent_through(149), 50);
    }

    #[test]
    fn serde_uses_string_form() {
        let r = PortRange::new(1, 1024).unwrap();
        assert_eq!(serde_json::to_string(&r).unwrap(), "\"1-1024\"");
        let back: PortRange = serde_json::from_str("\"22\"").unwrap();
        assert_eq!(back, PortRange::new(22, 22).unwrap());
    }
}
