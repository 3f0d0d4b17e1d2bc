//! # IAM Adapter
//!
//! Provider registration, policy/provider lookup, and role creation for the
//! IRSA wiring. Lookups that come back with several matches are surfaced as
//! ambiguous rather than resolved by listing order, which AWS does not
//! guarantee to be stable.
//!
//! `create_role` followed by `attach_policy` is two calls with no atomicity:
//! a failure in between leaves a policy-less role behind. That is left to the
//! operator to observe and re-run — re-runs are safe because "already exists"
//! answers resolve to the existing entity's ARN instead of failing.

use aws_sdk_iam::error::SdkError;
use serde_json::json;
use tracing::{info, warn};
use url::Url;

use super::{sdk_error, thumbprint};
use crate::error::{Error, Result};

/// Client ID registered for the OIDC provider; the audience STS presents.
pub const STS_AUDIENCE: &str = "sts.amazonaws.com";

/// Generate the trust policy binding a federated provider to the service
/// accounts of one namespace. `service_account` may be `*` to admit every
/// account in the namespace. Deterministic in its inputs.
pub fn trust_policy(provider_arn: &str, namespace: &str, service_account: &str) -> Result<String> {
    let issuer = provider_arn
        .split_once("oidc-provider/")
        .map(|(_, issuer)| issuer)
        .ok_or_else(|| Error::Config(format!("malformed OIDC provider ARN: {provider_arn}")))?;

    let mut condition = serde_json::Map::new();
    condition.insert(
        format!("{issuer}:sub"),
        json!(format!("system:serviceaccount:{namespace}:{service_account}")),
    );

    let document = json!({
        "Version": "2012-10-17",
        "Statement": [{
            "Effect": "Allow",
            "Principal": { "Federated": provider_arn },
            "Action": "sts:AssumeRoleWithWebIdentity",
            "Condition": { "StringLike": condition },
        }]
    });

    serde_json::to_string_pretty(&document)
        .map_err(|e| Error::Schema(format!("failed to serialize trust policy: {e}")))
}

/// The `host/path` identifier a provider ARN ends with, derived from the
/// issuer URL. Matches IAM's `oidc-provider/<host><path>` ARN suffix.
pub fn issuer_identifier(issuer: &str) -> Result<String> {
    let url = Url::parse(issuer)
        .map_err(|e| Error::Config(format!("invalid issuer URL {issuer}: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| Error::Config(format!("issuer URL {issuer} has no host")))?;
    Ok(format!("{host}{}", url.path().trim_end_matches('/')))
}

pub struct IamClient {
    client: aws_sdk_iam::Client,
}

impl IamClient {
    pub fn new(client: aws_sdk_iam::Client) -> Self {
        Self { client }
    }

    pub async fn from_profile(profile: Option<&str>) -> Self {
        Self::new(aws_sdk_iam::Client::new(&super::sdk_config(profile).await))
    }

    /// Resolve a managed policy name to its ARN by exact name match over the
    /// full (paginated) policy listing.
    pub async fn find_policy_arn(&self, policy_name: &str) -> Result<String> {
        let mut pages = self.client.list_policies().into_paginator().items().send();
        let mut matches = Vec::new();
        while let Some(policy) = pages.next().await {
            let policy = policy.map_err(sdk_error)?;
            if policy.policy_name() == Some(policy_name) {
                if let Some(arn) = policy.arn() {
                    matches.push(arn.to_string());
                }
            }
        }
        resolve_unique(&format!("policy {policy_name}"), matches)
    }

    /// Resolve the provider ARN for an issuer by matching the ARN suffix
    /// against the issuer's `host/path` identifier.
    pub async fn find_provider_arn(&self, issuer_identifier: &str) -> Result<String> {
        let listing = self
            .client
            .list_open_id_connect_providers()
            .send()
            .await
            .map_err(sdk_error)?;

        let matches = listing
            .open_id_connect_provider_list()
            .iter()
            .filter_map(|entry| entry.arn())
            .filter(|arn| arn.ends_with(issuer_identifier))
            .map(str::to_string)
            .collect();
        resolve_unique(&format!("OIDC provider {issuer_identifier}"), matches)
    }

    /// Register the issuer as an OIDC identity provider, deriving the
    /// thumbprint from its live TLS certificate. An already-registered issuer
    /// resolves to the existing provider's ARN.
    pub async fn create_provider(&self, issuer: &str) -> Result<String> {
        let thumbprint = thumbprint::fetch(issuer).await?;
        info!(%issuer, %thumbprint, "registering OIDC provider");

        let created = self
            .client
            .create_open_id_connect_provider()
            .url(issuer)
            .client_id_list(STS_AUDIENCE)
            .thumbprint_list(thumbprint)
            .send()
            .await;

        match created {
            Ok(output) => output
                .open_id_connect_provider_arn()
                .map(str::to_string)
                .ok_or_else(|| Error::RemoteApi {
                    code: "Unknown".to_string(),
                    message: "CreateOpenIDConnectProvider returned no ARN".to_string(),
                }),
            Err(SdkError::ServiceError(context))
                if context.err().is_entity_already_exists_exception() =>
            {
                warn!(%issuer, "OIDC provider already registered");
                self.find_provider_arn(&issuer_identifier(issuer)?).await
            }
            Err(err) => Err(sdk_error(err)),
        }
    }

    /// Create a role with the given trust policy and return its ARN. An
    /// already-existing role resolves to its current ARN; whether its trust
    /// policy matches is not verified.
    pub async fn create_role(&self, role_name: &str, trust_policy: &str) -> Result<String> {
        let created = self
            .client
            .create_role()
            .role_name(role_name)
            .assume_role_policy_document(trust_policy)
            .send()
            .await;

        match created {
            Ok(output) => {
                let arn = output
                    .role()
                    .map(|role| role.arn().to_string())
                    .ok_or_else(|| Error::RemoteApi {
                        code: "Unknown".to_string(),
                        message: "CreateRole returned no role".to_string(),
                    })?;
                info!(%role_name, %arn, "created role");
                Ok(arn)
            }
            Err(SdkError::ServiceError(context))
                if context.err().is_entity_already_exists_exception() =>
            {
                warn!(%role_name, "role already exists, reusing it");
                self.client
                    .get_role()
                    .role_name(role_name)
                    .send()
                    .await
                    .map_err(sdk_error)?
                    .role()
                    .map(|role| role.arn().to_string())
                    .ok_or_else(|| Error::RemoteApi {
                        code: "Unknown".to_string(),
                        message: "GetRole returned no role".to_string(),
                    })
            }
            Err(err) => Err(sdk_error(err)),
        }
    }

    /// Attach a managed policy to a role. Attaching the same policy twice is
    /// a no-op on the AWS side.
    pub async fn attach_policy(&self, role_name: &str, policy_arn: &str) -> Result<()> {
        self.client
            .attach_role_policy()
            .role_name(role_name)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(sdk_error)?;
        info!(%role_name, %policy_arn, "attached policy");
        Ok(())
    }
}

fn resolve_unique(what: &str, mut matches: Vec<String>) -> Result<String> {
    match matches.len() {
        0 => Err(Error::NotFound(what.to_string())),
        1 => Ok(matches.remove(0)),
        count => Err(Error::Ambiguous {
            what: what.to_string(),
            count,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROVIDER_ARN: &str =
        "arn:aws:iam::123456789012:oidc-provider/mycluster.s3.amazonaws.com/cluster";

    #[test]
    fn trust_policy_pins_the_subject_claim() {
        let document = trust_policy(PROVIDER_ARN, "ns", "my-sa").expect("policy");
        let parsed: serde_json::Value = serde_json::from_str(&document).expect("json");

        let statement = &parsed["Statement"][0];
        assert_eq!(statement["Effect"], "Allow");
        assert_eq!(statement["Principal"]["Federated"], PROVIDER_ARN);
        assert_eq!(statement["Action"], "sts:AssumeRoleWithWebIdentity");
        assert_eq!(
            statement["Condition"]["StringLike"]["mycluster.s3.amazonaws.com/cluster:sub"],
            "system:serviceaccount:ns:my-sa"
        );
    }

    #[test]
    fn trust_policy_wildcard_admits_the_whole_namespace() {
        let document = trust_policy(PROVIDER_ARN, "ns", "*").expect("policy");
        let parsed: serde_json::Value = serde_json::from_str(&document).expect("json");
        assert_eq!(
            parsed["Statement"][0]["Condition"]["StringLike"]
                ["mycluster.s3.amazonaws.com/cluster:sub"],
            "system:serviceaccount:ns:*"
        );
    }

    #[test]
    fn trust_policy_rejects_a_malformed_provider_arn() {
        let err = trust_policy("arn:aws:iam::123456789012:role/nope", "ns", "sa")
            .expect_err("must fail");
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn issuer_identifier_joins_host_and_path() {
        assert_eq!(
            issuer_identifier("https://mycluster.s3.amazonaws.com/cluster").expect("identifier"),
            "mycluster.s3.amazonaws.com/cluster"
        );
        // a bare host issuer has no path component in its ARN
        assert_eq!(
            issuer_identifier("https://oidc.example.com").expect("identifier"),
            "oidc.example.com"
        );
    }

    #[test]
    fn lookup_with_zero_matches_is_not_found() {
        let err = resolve_unique("policy reader", Vec::new()).expect_err("must fail");
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn lookup_with_one_match_returns_its_arn() {
        let arn = resolve_unique("policy reader", vec!["arn:aws:iam::1:policy/reader".into()])
            .expect("unique");
        assert_eq!(arn, "arn:aws:iam::1:policy/reader");
    }

    #[test]
    fn lookup_with_several_matches_is_ambiguous() {
        let err = resolve_unique(
            "policy reader",
            vec!["arn:a".into(), "arn:b".into()],
        )
        .expect_err("must fail");
        match err {
            Error::Ambiguous { count, .. } => assert_eq!(count, 2),
            other => panic!("expected Ambiguous, got {other:?}"),
        }
    }
}
