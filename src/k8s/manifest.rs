//! # Manifest Decoder
//!
//! Splits a multi-document YAML blob into documents and decodes each one into
//! a [`DynamicObject`], validated against an explicit [`SchemaRegistry`] of
//! supported (group, kind) pairs. Decoding is pure; nothing here talks to a
//! cluster.
//!
//! The registry is an ordinary immutable value built once at startup and
//! passed in, so the set of accepted kinds is visible at the call site and can
//! be extended per invocation without process-global state.

use std::collections::BTreeSet;
use std::time::Duration;

use kube::core::{DynamicObject, GroupVersionKind};
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// The set of (group, kind) pairs the decoder accepts.
///
/// Versions are deliberately not part of the key: which version a cluster
/// serves is the resource mapper's concern, resolved from live discovery data
/// at apply time.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    kinds: BTreeSet<(String, String)>,
}

impl SchemaRegistry {
    /// An empty registry. Useful in tests; most callers want
    /// [`SchemaRegistry::with_defaults`].
    pub fn new() -> Self {
        Self::default()
    }

    /// The kinds the deploy-webhook manifests are made of: core workload and
    /// RBAC kinds, admission webhook registrations, CRDs, and the
    /// cert-manager resource kinds.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry
            // core
            .register("", "Namespace")
            .register("", "ServiceAccount")
            .register("", "ConfigMap")
            .register("", "Secret")
            .register("", "Service")
            // workloads
            .register("apps", "Deployment")
            .register("apps", "DaemonSet")
            .register("apps", "StatefulSet")
            // RBAC
            .register("rbac.authorization.k8s.io", "Role")
            .register("rbac.authorization.k8s.io", "ClusterRole")
            .register("rbac.authorization.k8s.io", "RoleBinding")
            .register("rbac.authorization.k8s.io", "ClusterRoleBinding")
            // admission webhooks
            .register("admissionregistration.k8s.io", "MutatingWebhookConfiguration")
            .register("admissionregistration.k8s.io", "ValidatingWebhookConfiguration")
            // API extensions
            .register("apiextensions.k8s.io", "CustomResourceDefinition")
            // cert-manager
            .register("cert-manager.io", "Certificate")
            .register("cert-manager.io", "CertificateRequest")
            .register("cert-manager.io", "Issuer")
            .register("cert-manager.io", "ClusterIssuer")
            .register("acme.cert-manager.io", "Order")
            .register("acme.cert-manager.io", "Challenge")
    }

    /// Add a (group, kind) pair. Core kinds use the empty group.
    #[must_use]
    pub fn register(mut self, group: &str, kind: &str) -> Self {
        self.kinds.insert((group.to_string(), kind.to_string()));
        self
    }

    pub fn contains(&self, group: &str, kind: &str) -> bool {
        self.kinds
            .contains(&(group.to_string(), kind.to_string()))
    }
}

/// Decode a multi-document manifest blob into dynamic objects, in document
/// order. Empty documents (consecutive `---` separators, whitespace-only
/// documents) are skipped. A document whose kind is not in the registry fails
/// the whole decode.
pub fn decode_manifest(registry: &SchemaRegistry, blob: &[u8]) -> Result<Vec<DynamicObject>> {
    let mut objects = Vec::new();

    for document in serde_yaml::Deserializer::from_slice(blob) {
        let value = serde_yaml::Value::deserialize(document)
            .map_err(|e| Error::Schema(format!("document {}: {e}", objects.len() + 1)))?;
        if value.is_null() {
            continue;
        }

        let object: DynamicObject = serde_yaml::from_value(value)
            .map_err(|e| Error::Schema(format!("document {}: {e}", objects.len() + 1)))?;

        let types = object.types.as_ref().ok_or_else(|| {
            Error::Schema(format!(
                "document {} is missing apiVersion/kind",
                objects.len() + 1
            ))
        })?;
        let gvk = GroupVersionKind::try_from(types)
            .map_err(|e| Error::Schema(format!("document {}: {e}", objects.len() + 1)))?;

        if !registry.contains(&gvk.group, &gvk.kind) {
            return Err(Error::UnknownResourceKind {
                gvk: format!("{}/{}", gvk.api_version(), gvk.kind),
            });
        }

        objects.push(object);
    }

    debug!(count = objects.len(), "decoded manifest");
    Ok(objects)
}

/// Download a manifest over HTTPS with a bounded timeout. Non-2xx answers are
/// a transport error, same policy as the discovery client.
pub async fn fetch_manifest(url: &str) -> Result<Vec<u8>> {
    let http = reqwest::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

    let response = http
        .get(url)
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

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_DOCS: &str = "\
apiVersion: v1
kind: ServiceAccount
metadata:
  name: pod-identity-webhook
  namespace: kube-system
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: pod-identity-webhook
  namespace: kube-system
spec:
  replicas: 1
";

    #[test]
    fn decodes_one_object_per_document_in_order() {
        let objects =
            decode_manifest(&SchemaRegistry::with_defaults(), TWO_DOCS.as_bytes()).expect("decode");
        assert_eq!(objects.len(), 2);
        assert_eq!(
            objects[0].types.as_ref().map(|t| t.kind.as_str()),
            Some("ServiceAccount")
        );
        assert_eq!(
            objects[1].types.as_ref().map(|t| t.kind.as_str()),
            Some("Deployment")
        );
    }

    #[test]
    fn empty_documents_are_skipped() {
        let blob = format!("---\n{TWO_DOCS}---\n---\n");
        let objects =
            decode_manifest(&SchemaRegistry::with_defaults(), blob.as_bytes()).expect("decode");
        assert_eq!(objects.len(), 2);
    }

    #[test]
    fn empty_manifest_decodes_to_nothing() {
        let objects =
            decode_manifest(&SchemaRegistry::with_defaults(), b"").expect("decode");
        assert!(objects.is_empty());
    }

    #[test]
    fn unknown_kind_fails_with_the_gvk_named() {
        let blob = "apiVersion: example.com/v1\nkind: Gadget\nmetadata:\n  name: g\n";
        let err = decode_manifest(&SchemaRegistry::with_defaults(), blob.as_bytes())
            .expect_err("must fail");
        match err {
            Error::UnknownResourceKind { gvk } => {
                assert_eq!(gvk, "example.com/v1/Gadget");
            }
            other => panic!("expected UnknownResourceKind, got {other:?}"),
        }
    }

    #[test]
    fn registry_can_be_extended_before_decoding() {
        let blob = "apiVersion: example.com/v1\nkind: Gadget\nmetadata:\n  name: g\n";
        let registry = SchemaRegistry::with_defaults().register("example.com", "Gadget");
        let objects = decode_manifest(&registry, blob.as_bytes()).expect("decode");
        assert_eq!(objects.len(), 1);
    }

    #[test]
    fn document_without_kind_is_a_schema_error() {
        let blob = "metadata:\n  name: nameless\n";
        let err = decode_manifest(&SchemaRegistry::with_defaults(), blob.as_bytes())
            .expect_err("must fail");
        assert!(matches!(err, Error::Schema(_)));
    }

    #[test]
    fn cluster_scoped_documents_have_no_namespace() {
        let blob = "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: cert-manager\n";
        let objects =
            decode_manifest(&SchemaRegistry::with_defaults(), blob.as_bytes()).expect("decode");
        assert_eq!(objects[0].metadata.namespace, None);
    }
}
