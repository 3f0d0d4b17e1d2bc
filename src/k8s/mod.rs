//! Kubernetes-facing half of the tool: cluster config resolution, the OIDC
//! discovery client, the manifest decoder, the apply engine, and service
//! account creation.

pub mod apply;
pub mod client;
pub mod manifest;
pub mod oidc;
pub mod sa;
