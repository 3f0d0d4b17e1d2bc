//! # irsactl
//!
//! A CLI plugin that wires a Kubernetes cluster's OIDC discovery to AWS IAM
//! for workload identity federation (the IRSA pattern).
//!
//! ## Overview
//!
//! The tool covers the manual steps of enabling IRSA on a self-managed
//! cluster:
//!
//! 1. **Discovery retrieval** - Fetches `/.well-known/openid-configuration`
//!    and the JWKS straight from the API server over a CA-pinned channel
//! 2. **Publishing** - Pushes both documents to the issuer's S3 bucket as
//!    public-read objects so AWS can resolve them
//! 3. **Provider registration** - Registers the issuer as an IAM OIDC
//!    identity provider, thumbprinting its TLS certificate
//! 4. **Role wiring** - Creates IAM roles with a federated trust policy and
//!    annotated Kubernetes service accounts to match
//! 5. **Webhook deployment** - Applies the cert-manager and pod identity
//!    webhook manifests through an idempotent create-or-replace engine
//!
//! Everything is sequential and blocking per call; each CLI invocation is a
//! fresh process with no state carried across commands.
//!
//! See the [README.md](../README.md) for usage examples.

pub mod aws;
pub mod cli;
pub mod error;
pub mod k8s;

pub use error::{Error, Result};
