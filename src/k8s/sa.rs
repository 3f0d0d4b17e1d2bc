//! # Service Account Creation
//!
//! Creates the service account that binds workloads to an IAM role, annotated
//! the way the pod identity webhook expects. An already-existing service
//! account is success, so re-running `create-role --create-sa` after a
//! partial failure never trips over its own earlier progress.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ServiceAccount;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, PostParams};
use kube::Client;
use tracing::info;

use crate::error::Result;

/// Annotation key carrying the IAM role to assume.
pub const ROLE_ARN_ANNOTATION: &str = "eks.amazonaws.com/role-arn";

/// Fixed annotations the pod identity webhook reads alongside the role ARN.
const WEBHOOK_ANNOTATIONS: [(&str, &str); 3] = [
    ("eks.amazonaws.com/audience", "sts.amazonaws.com"),
    ("eks.amazonaws.com/sts-regional-endpoints", "true"),
    ("eks.amazonaws.com/token-expiration", "86400"),
];

/// Create `namespace/name` annotated with `role_arn`. A 409 from the API
/// server (the account already exists) is treated as success.
pub async fn create_service_account(
    client: &Client,
    name: &str,
    namespace: &str,
    role_arn: &str,
) -> Result<()> {
    let mut annotations: BTreeMap<String, String> = WEBHOOK_ANNOTATIONS
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    annotations.insert(ROLE_ARN_ANNOTATION.to_string(), role_arn.to_string());

    let account = ServiceAccount {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            annotations: Some(annotations),
            ..ObjectMeta::default()
        },
        ..ServiceAccount::default()
    };

    let api: Api<ServiceAccount> = Api::namespaced(client.clone(), namespace);
    match api.create(&PostParams::default(), &account).await {
        Ok(_) => info!(%namespace, %name, %role_arn, "created service account"),
        Err(kube::Error::Api(resp)) if resp.code == 409 => {
            info!(%namespace, %name, "service account already exists");
        }
        Err(err) => return Err(err.into()),
    }
    Ok(())
}
