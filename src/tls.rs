use ::time::format_description::well_known::Rfc3339;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time;
use tokio_native_tls::TlsConnector;
use tracing::trace;
use x509_parser::parse_x509_certificate;
use x509_parser::prelude::*;

use crate::error::ProbeError;
use crate::types::CertInfo;

/// Ports where TLS inspection runs even when a plain banner came back.
pub const TLS_PORTS: &[u16] = &[443, 8443];

/// A connector that accepts any certificate and hostname.
///
/// Targets are mostly self-signed internal devices; nothing here is a trust decision.
pub fn insecure_connector() -> Result<TlsConnector, native_tls::Error> {
    let inner = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .use_sni(false)
        .build()?;
    Ok(TlsConnector::from(inner))
}

/// Handshake with `ip:port` and read the peer certificate, if any.
pub async fn probe_tls_cert(ip: IpAddr, port: u16, timeout: Duration) -> Option<CertInfo> {
    let addr = SocketAddr::new(ip, port);
    match time::timeout(timeout, handshake(addr)).await {
        Ok(Ok(cert)) => cert,
        Ok(Err(e)) => {
            trace!(%addr, error = %e, "tls inspection failed");
            None
        }
        Err(_) => {
            trace!(%addr, "tls handshake timed out");
            None
        }
    }
}

async fn handshake(addr: SocketAddr) -> Result<Option<CertInfo>, ProbeError> {
    let connector = insecure_connector()?;
    let tcp = TcpStream::connect(addr)
        .await
        .map_err(|source| ProbeError::Connect { addr, source })?;
    let stream = connector.connect(&addr.ip().to_string(), tcp).await?;

    let der = match stream.get_ref().peer_certificate()? {
        Some(cert) => cert.to_der()?,
        None => return Ok(None),
    };
    Ok(cert_info_from_der(&der))
}

/// Extract subject/issuer common names and the validity window from a DER certificate.
pub fn cert_info_from_der(der: &[u8]) -> Option<CertInfo> {
    if der.is_empty() {
        return None;
    }
    let (_, cert) = parse_x509_certificate(der).ok()?;
    let validity = cert.validity();
    Some(CertInfo {
        subject: common_name(cert.subject()),
        issuer: common_name(cert.issuer()),
        valid_from: format_asn1_time(&validity.not_before),
        valid_to: format_asn1_time(&validity.not_after),
    })
}

fn common_name(name: &X509Name<'_>) -> String {
    name.iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| String::from("Unknown"))
}

fn format_asn1_time(t: &ASN1Time) -> String {
    t.to_datetime()
        .format(&Rfc3339)
        .unwrap_or_else(|_| t.to_string())
}
