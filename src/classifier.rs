//! Heuristic service identification from a banner, a certificate and the port number.
//!
//! Rules are ordered tables; the first one that matches wins. Nothing here does I/O.

use ::time::macros::format_description;
use ::time::format_description::well_known::Rfc3339;
use ::time::{Date, OffsetDateTime, PrimitiveDateTime, UtcOffset};

use crate::types::{CertInfo, Identification};

pub const TLS_SERVICE: &str = "TLS/SSL Service";
pub const HTTP_SERVICE: &str = "HTTP Web Server";
pub const SSH_SERVICE: &str = "SSH Server";
pub const SMTP_SERVICE: &str = "SMTP Mail Server";
pub const FTP_SERVICE: &str = "FTP Server";
pub const WEB_FALLBACK_SERVICE: &str = "Web Service (Unrecognized)";
pub const CUSTOM_SERVICE: &str = "Custom Service";
pub const UNKNOWN_SERVICE: &str = "Unknown TCP Service";

const FTP_WORDS: &[&str] = &["ftp", "vsftpd", "proftpd"];
const SMTP_WORDS: &[&str] = &["smtp"];

/// Banner rules in priority order.
#[derive(Debug, Clone, Copy)]
enum BannerRule {
    /// An HTTP-style `Name: value` header anywhere in the banner.
    Header {
        name: &'static str,
        service: &'static str,
        label: &'static str,
    },
    /// Banner starts with `prefix`. One that mentions any of `yield_to` is left
    /// to a later rule, unless it also mentions one of `keep`.
    Prefix {
        prefix: &'static str,
        yield_to: &'static [&'static str],
        keep: &'static [&'static str],
        service: &'static str,
    },
    /// Banner mentions any of `words`, ignoring case.
    Keywords {
        words: &'static [&'static str],
        service: &'static str,
    },
    /// Looks like HTML or an HTTP response without a Server header.
    WebFallback,
    /// Anything else that sent text.
    Snippet,
}

const BANNER_RULES: &[BannerRule] = &[
    BannerRule::Header {
        name: "server:",
        service: HTTP_SERVICE,
        label: "Server Header",
    },
    BannerRule::Prefix {
        prefix: "SSH-",
        yield_to: &[],
        keep: &[],
        service: SSH_SERVICE,
    },
    // FTP greetings also start with "220 "; leave those to the FTP rule.
    BannerRule::Prefix {
        prefix: "220 ",
        yield_to: FTP_WORDS,
        keep: SMTP_WORDS,
        service: SMTP_SERVICE,
    },
    BannerRule::Keywords {
        words: FTP_WORDS,
        service: FTP_SERVICE,
    },
    BannerRule::WebFallback,
    BannerRule::Snippet,
];

impl BannerRule {
    fn apply(&self, banner: &str) -> Option<Identification> {
        match *self {
            BannerRule::Header {
                name,
                service,
                label,
            } => header_value(banner, name)
                .map(|value| Identification::info(service, format!("{label}: {value}"))),
            BannerRule::Prefix {
                prefix,
                yield_to,
                keep,
                service,
            } => (banner.starts_with(prefix)
                && (!contains_any_ci(banner, yield_to) || contains_any_ci(banner, keep)))
            .then(|| Identification::info(service, first_line(banner))),
            BannerRule::Keywords { words, service } => contains_any_ci(banner, words)
                .then(|| Identification::info(service, first_line(banner))),
            BannerRule::WebFallback => web_fallback(banner),
            BannerRule::Snippet => {
                let snippet: String = banner
                    .chars()
                    .take(40)
                    .map(|c| if c == '\r' || c == '\n' { ' ' } else { c })
                    .collect();
                Some(Identification::info(
                    CUSTOM_SERVICE,
                    format!("Banner: {snippet}..."),
                ))
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum HintKind {
    Guessed,
    /// Silent but dangerous to leave open at all.
    RiskyGuess(&'static str),
    /// A data store reachable from the subnet.
    ExposedStore,
}

#[derive(Debug, Clone, Copy)]
struct PortHint {
    port: u16,
    service: &'static str,
    kind: HintKind,
}

const PORT_HINTS: &[PortHint] = &[
    PortHint {
        port: 22,
        service: "SSH (Guessed)",
        kind: HintKind::Guessed,
    },
    PortHint {
        port: 23,
        service: "Telnet (Guessed)",
        kind: HintKind::RiskyGuess("Telnet is open and sends credentials in cleartext."),
    },
    PortHint {
        port: 3389,
        service: "RDP (Guessed)",
        kind: HintKind::Guessed,
    },
    PortHint {
        port: 53,
        service: "DNS (Guessed)",
        kind: HintKind::Guessed,
    },
    PortHint {
        port: 3306,
        service: "MySQL Database",
        kind: HintKind::ExposedStore,
    },
    PortHint {
        port: 1433,
        service: "MSSQL Database",
        kind: HintKind::ExposedStore,
    },
    PortHint {
        port: 27017,
        service: "MongoDB Database",
        kind: HintKind::ExposedStore,
    },
    PortHint {
        port: 6379,
        service: "Redis Cache",
        kind: HintKind::ExposedStore,
    },
    PortHint {
        port: 5432,
        service: "PostgreSQL Database",
        kind: HintKind::ExposedStore,
    },
];

impl PortHint {
    fn identify(&self) -> Identification {
        match self.kind {
            HintKind::Guessed => Identification::info(self.service, "No banner replied"),
            HintKind::RiskyGuess(why) => {
                Identification::critical(self.service, format!("No banner replied. {why}"))
            }
            HintKind::ExposedStore => Identification::critical(
                self.service,
                format!("{} exposed to local subnet (no banner replied)", self.service),
            ),
        }
    }
}

/// Identify the service on `port` from whatever the probes captured.
///
/// A certificate beats a banner, and a banner beats the port number.
pub fn classify(port: u16, banner: Option<&str>, cert: Option<&CertInfo>) -> Identification {
    if let Some(cert) = cert {
        return classify_cert(cert);
    }

    if let Some(banner) = banner.filter(|b| !b.is_empty()) {
        if let Some(id) = BANNER_RULES.iter().find_map(|rule| rule.apply(banner)) {
            return id;
        }
    }

    match PORT_HINTS.iter().find(|h| h.port == port) {
        Some(hint) => hint.identify(),
        None => Identification::info(
            UNKNOWN_SERVICE,
            "Port is open, but dropped connection before sending data.",
        ),
    }
}

fn classify_cert(cert: &CertInfo) -> Identification {
    let expires = expiration_date(&cert.valid_to)
        .map(|d| format!(" | Expiration: {d}"))
        .unwrap_or_default();
    Identification::info(
        TLS_SERVICE,
        format!(
            "Cert Subject: {} | Issuer: {}{expires}",
            cert.subject, cert.issuer
        ),
    )
}

/// Render a certificate timestamp as a UTC `YYYY-MM-DD` date.
pub fn expiration_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let date = parse_timestamp(raw)?;
    date.format(format_description!("[year]-[month]-[day]")).ok()
}

fn parse_timestamp(raw: &str) -> Option<Date> {
    if let Ok(dt) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(dt.to_offset(UtcOffset::UTC).date());
    }
    // OpenSSL style, e.g. "Dec 31 23:59:59 2026 GMT".
    let openssl = format_description!(
        "[month repr:short] [day padding:space] [hour]:[minute]:[second] [year] GMT"
    );
    if let Ok(dt) = PrimitiveDateTime::parse(raw, openssl) {
        return Some(dt.date());
    }
    // Bare ISO date, with or without a time part.
    let head = raw.get(..10)?;
    Date::parse(head, format_description!("[year]-[month]-[day]")).ok()
}

fn web_fallback(banner: &str) -> Option<Identification> {
    let head: String = banner
        .chars()
        .take(100)
        .filter(|c| *c != '\r' && *c != '\n')
        .collect();
    if !(head.to_ascii_lowercase().contains("<html") || head.contains("HTTP/")) {
        return None;
    }

    let details = match header_value(banner, "location:") {
        Some(target) => format!("Redirects to: {target}"),
        None => format!("HTTP Status: {}", http_status(banner).unwrap_or("unknown")),
    };
    Some(Identification::info(WEB_FALLBACK_SERVICE, details))
}

/// Status code token following the first `HTTP/x.y` in the text.
pub(crate) fn http_status(text: &str) -> Option<&str> {
    let idx = text.find("HTTP/")?;
    let mut parts = text[idx..].split_whitespace();
    parts.next()?;
    parts.next()
}

/// Value of the first `name` header (ASCII case-insensitive, `name` given lowercase with colon).
fn header_value<'a>(text: &'a str, name: &str) -> Option<&'a str> {
    let idx = text.to_ascii_lowercase().find(name)?;
    let rest = &text[idx + name.len()..];
    let value = rest.split(['\r', '\n']).next().unwrap_or("").trim();
    (!value.is_empty()).then_some(value)
}

fn first_line(banner: &str) -> String {
    banner.split(['\r', '\n']).next().unwrap_or("").to_string()
}

fn contains_any_ci(text: &str, words: &[&str]) -> bool {
    if words.is_empty() {
        return false;
    }
    let lower = text.to_ascii_lowercase();
    words.iter().any(|w| lower.contains(w))
}
