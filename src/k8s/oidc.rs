//! # OIDC Discovery Client
//!
//! Fetches the cluster's OIDC discovery document and JWKS straight from the
//! API server. These endpoints sit outside the regular API machinery, so the
//! fetch is a plain HTTPS GET: bearer-token authenticated, with the cluster CA
//! bundle pinned as the sole trust root (no system trust store fallback) and a
//! bounded timeout.
//!
//! Non-2xx answers are a transport error. The API server will happily serve an
//! error page here; passing it on as if it were a discovery document only
//! moves the failure somewhere harder to diagnose.

use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::k8s::client::ClusterConnection;

/// Discovery document path, relative to the issuer or API server root.
pub const DISCOVERY_PATH: &str = ".well-known/openid-configuration";
/// JWKS path, relative to the issuer or API server root.
pub const JWKS_PATH: &str = "openid/v1/jwks";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// The two discovery document fields this tool acts on. Everything else in
/// the document is carried through verbatim as bytes.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub jwks_uri: String,
}

/// Parse just enough of a discovery document to read `issuer` and `jwks_uri`.
pub fn parse_discovery(bytes: &[u8]) -> Result<DiscoveryDocument> {
    serde_json::from_slice(bytes)
        .map_err(|e| Error::Schema(format!("discovery document is not valid JSON: {e}")))
}

/// CA-pinned, token-bearing HTTP client for the discovery endpoints of one
/// API server.
pub struct OidcClient {
    http: reqwest::Client,
    server: String,
    token: Option<String>,
}

impl OidcClient {
    /// Build a client for the given cluster connection. Fails when the CA
    /// bundle cannot be parsed.
    pub fn new(conn: &ClusterConnection) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .tls_built_in_root_certs(false)
            .timeout(REQUEST_TIMEOUT);
        for der in &conn.ca_certs {
            let cert = reqwest::Certificate::from_der(der)
                .map_err(|e| Error::Config(format!("invalid CA certificate in cluster config: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        let http = builder
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            server: conn.server.clone(),
            token: conn.token.clone(),
        })
    }

    /// GET `/.well-known/openid-configuration` from the API server.
    pub async fn fetch_discovery(&self) -> Result<Vec<u8>> {
        self.get(DISCOVERY_PATH).await
    }

    /// GET `/openid/v1/jwks` from the API server.
    pub async fn fetch_jwks(&self) -> Result<Vec<u8>> {
        self.get(JWKS_PATH).await
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let url = format!("{}/{path}", self.server);
        debug!(%url, "fetching");

        let mut request = self.http.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Transport(format!("GET {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(format!("GET {url} returned HTTP {status}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("GET {url}: {e}")))?;
        Ok(body.to_vec())
    }
}
