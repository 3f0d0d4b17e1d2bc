//! # Cluster Config Resolution
//!
//! Resolves the Kubernetes connection exactly the way kubectl plugins are
//! expected to: an explicit `--kubeconfig` path wins; otherwise in-cluster
//! configuration is tried first, falling back to the default local kubeconfig
//! chain.
//!
//! The raw connection parameters (API server URL, bearer token, CA bundle) are
//! also exposed separately because the OIDC discovery endpoints are not served
//! through the regular API machinery and have to be fetched with a plain
//! CA-pinned HTTP client (see [`crate::k8s::oidc`]).

use std::path::Path;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use secrecy::ExposeSecret;
use tracing::debug;

use crate::error::{Error, Result};

/// Raw connection parameters for talking to the API server outside of the
/// typed client: server URL (no trailing slash), optional bearer token, and
/// the cluster CA bundle as DER certificates.
#[derive(Debug, Clone)]
pub struct ClusterConnection {
    pub server: String,
    pub token: Option<String>,
    pub ca_certs: Vec<Vec<u8>>,
}

/// Load the cluster config from an explicit kubeconfig path, or auto-detect
/// (in-cluster first, local kubeconfig as fallback) when no path is given.
pub async fn load_config(kubeconfig: Option<&Path>) -> Result<Config> {
    match kubeconfig {
        Some(path) => {
            debug!(path = %path.display(), "loading kubeconfig");
            let kc = Kubeconfig::read_from(path)
                .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
            Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default())
                .await
                .map_err(|e| Error::Config(format!("failed to load {}: {e}", path.display())))
        }
        None => Config::infer()
            .await
            .map_err(|e| Error::Config(format!("could not resolve cluster config: {e}"))),
    }
}

/// Build a typed API client from a resolved config.
pub fn kube_client(config: Config) -> Result<Client> {
    Client::try_from(config).map_err(Error::from)
}

/// Extract the raw connection parameters from a resolved config.
///
/// The bearer token comes from the auth info's inline token or its token
/// file; exec-plugin credentials are not resolved here.
pub fn cluster_connection(config: &Config) -> Result<ClusterConnection> {
    let server = config.cluster_url.to_string();
    let server = server.trim_end_matches('/').to_string();

    let token = match (&config.auth_info.token, &config.auth_info.token_file) {
        (Some(token), _) => Some(token.expose_secret().to_string()),
        (None, Some(file)) => {
            let raw = std::fs::read_to_string(file)
                .map_err(|e| Error::Config(format!("failed to read token file {file}: {e}")))?;
            Some(raw.trim().to_string())
        }
        (None, None) => None,
    };

    Ok(ClusterConnection {
        server,
        token,
        ca_certs: config.root_cert.clone().unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config::new("https://cluster.example:6443/".parse().expect("uri"))
    }

    #[test]
    fn server_url_has_no_trailing_slash() {
        let conn = cluster_connection(&base_config()).expect("connection");
        assert_eq!(conn.server, "https://cluster.example:6443");
    }

    #[test]
    fn inline_token_wins_over_token_file() {
        let mut config = base_config();
        config.auth_info.token = Some("sekret".to_string().into());
        config.auth_info.token_file = Some("/does/not/exist".into());

        let conn = cluster_connection(&config).expect("connection");
        assert_eq!(conn.token.as_deref(), Some("sekret"));
    }

    #[test]
    fn missing_token_is_not_an_error() {
        let conn = cluster_connection(&base_config()).expect("connection");
        assert!(conn.token.is_none());
        assert!(conn.ca_certs.is_empty());
    }
}
