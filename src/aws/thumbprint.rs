//! # Provider Thumbprint
//!
//! IAM pins trust for an OIDC provider registration to the SHA-1 of the
//! provider's TLS leaf certificate, formatted as 40 uppercase hex characters
//! with no separators. This is a trust-establishment fingerprint over the DER
//! bytes as served, not a content hash, so the handshake has to be made
//! directly rather than through an HTTP client that hides the certificate.

use std::fmt::Write as _;
use std::sync::Arc;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

const HTTPS_PORT: u16 = 443;

/// Connect to the URL's host and return the leaf certificate thumbprint in
/// IAM's registration format.
pub async fn fetch(provider_url: &str) -> Result<String> {
    let url = Url::parse(provider_url)
        .map_err(|e| Error::Config(format!("invalid provider URL {provider_url}: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| Error::Config(format!("provider URL {provider_url} has no host")))?
        .to_string();
    let port = url.port().unwrap_or(HTTPS_PORT);
    debug!(%host, port, "fetching provider thumbprint");

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(tls_config));

    let tcp = TcpStream::connect((host.as_str(), port))
        .await
        .map_err(|e| Error::Transport(format!("failed to connect to {host}:{port}: {e}")))?;
    let server_name = ServerName::try_from(host.clone())
        .map_err(|e| Error::Config(format!("invalid TLS server name {host}: {e}")))?;
    let stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| Error::Transport(format!("TLS handshake with {host}:{port} failed: {e}")))?;

    let (_, session) = stream.get_ref();
    let leaf = session
        .peer_certificates()
        .and_then(|certs| certs.first())
        .ok_or_else(|| Error::Transport(format!("{host}:{port} presented no certificate")))?;

    Ok(sha1_hex(leaf.as_ref()))
}

/// SHA-1 over the DER bytes, uppercase hex, no separators.
fn sha1_hex(der: &[u8]) -> String {
    use sha1::{Digest, Sha1};

    let digest = Sha1::digest(der);
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(out, "{byte:02X}");
    }
    out
}
