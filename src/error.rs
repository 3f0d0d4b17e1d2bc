//! # Error Types
//!
//! One typed error per failure class the tool can hit. Every command aborts on
//! the first error; nothing is retried automatically. The only conditions
//! deliberately treated as success are the "already exists" answers from AWS
//! and the cluster (see `aws::iam`, `aws::s3` and `k8s::sa`), which keep
//! re-runs of `create-role` and `deploy-webhook` idempotent.

use thiserror::Error;

/// Errors surfaced to the operator, one variant per failure class.
#[derive(Debug, Error)]
pub enum Error {
    /// Flag or kubeconfig resolution failure, or an issuer that cannot be
    /// published (e.g. not an S3 host). Raised before any remote call.
    #[error("configuration error: {0}")]
    Config(String),

    /// Network or TLS failure reaching the cluster or AWS, including non-2xx
    /// answers from the OIDC discovery endpoints.
    #[error("transport error: {0}")]
    Transport(String),

    /// A manifest document that cannot be decoded.
    #[error("undecodable manifest document: {0}")]
    Schema(String),

    /// A document kind that is not in the schema registry, or that the target
    /// cluster's API discovery does not serve.
    #[error("unknown resource kind: {gvk}")]
    UnknownResourceKind { gvk: String },

    /// A policy or OIDC provider lookup with zero matches.
    #[error("{0} not found")]
    NotFound(String),

    /// A policy or OIDC provider lookup with several matches. Listing order is
    /// not stable, so picking the first silently is never correct.
    #[error("{what} matches {count} entries; refusing to pick one")]
    Ambiguous { what: String, count: usize },

    /// The cluster or AWS API rejected a request. Carries the provider's raw
    /// code and message; formatting is up to the caller.
    #[error("remote API error [{code}]: {message}")]
    RemoteApi { code: String, message: String },

    /// A manifest batch aborted partway through. Documents already applied
    /// stay applied; re-running the command is safe.
    #[error("apply aborted after {applied} document(s), failed on {name}: {source}")]
    PartialApply {
        applied: usize,
        name: String,
        #[source]
        source: Box<Error>,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Process exit code for this error kind. Distinct per kind so scripted
    /// callers can branch without parsing messages.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Config(_) => 2,
            Error::Transport(_) => 3,
            Error::Schema(_) => 4,
            Error::UnknownResourceKind { .. } => 5,
            Error::NotFound(_) => 6,
            Error::Ambiguous { .. } => 7,
            Error::RemoteApi { .. } => 8,
            Error::PartialApply { .. } => 9,
        }
    }
}

impl From<kube::Error> for Error {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(resp) => Error::RemoteApi {
                code: resp.reason,
                message: resp.message,
            },
            other => Error::Transport(other.to_string()),
        }
    }
}
