//! # S3 Publishing
//!
//! Publishes the discovery document and JWKS as public-read objects, laid out
//! so the issuer URL itself serves them: the bucket is the issuer host's
//! first DNS label and the object keys live under the issuer path. Only
//! issuers hosted on S3 are publishable; anything else is rejected before a
//! single remote call is made.
//!
//! "Bucket already exists" and "bucket already owned by you" are success:
//! re-publishing after a partial failure must never trip over the bucket
//! created on the previous attempt.

use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{BucketCannedAcl, ObjectCannedAcl};
use tracing::info;
use url::Url;

use super::sdk_error;
use crate::error::{Error, Result};
use crate::k8s::oidc::{DISCOVERY_PATH, JWKS_PATH};

/// Host suffix of publishable issuers.
const S3_HOST_SUFFIX: &str = "s3.amazonaws.com";

/// Where an issuer's discovery content lives in S3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuerLocation {
    pub bucket: String,
    pub discovery_key: String,
    pub jwks_key: String,
}

/// Derive the bucket and object keys for an issuer URL. Fails without any
/// remote call when the issuer is not hosted on S3.
pub fn issuer_location(issuer: &str) -> Result<IssuerLocation> {
    let url = Url::parse(issuer)
        .map_err(|e| Error::Config(format!("invalid issuer URL {issuer}: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| Error::Config(format!("issuer URL {issuer} has no host")))?;

    if !host.ends_with(S3_HOST_SUFFIX) {
        return Err(Error::Config(format!(
            "issuer host {host} is not an S3 endpoint; refusing to upload"
        )));
    }

    let bucket = host
        .split('.')
        .next()
        .unwrap_or(host)
        .to_string();

    let prefix = url.path().trim_matches('/');
    let key = |suffix: &str| {
        if prefix.is_empty() {
            suffix.to_string()
        } else {
            format!("{prefix}/{suffix}")
        }
    };

    Ok(IssuerLocation {
        bucket,
        discovery_key: key(DISCOVERY_PATH),
        jwks_key: key(JWKS_PATH),
    })
}

pub struct ObjectStore {
    client: aws_sdk_s3::Client,
}

impl ObjectStore {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        Self { client }
    }

    pub async fn from_profile(profile: Option<&str>) -> Self {
        Self::new(aws_sdk_s3::Client::new(&super::sdk_config(profile).await))
    }

    /// Publish the discovery document and JWKS public-read, creating the
    /// bucket first when it does not exist yet.
    pub async fn publish(
        &self,
        location: &IssuerLocation,
        discovery: &[u8],
        jwks: &[u8],
    ) -> Result<()> {
        self.ensure_bucket(&location.bucket).await?;
        self.put_public_object(&location.bucket, &location.discovery_key, discovery)
            .await?;
        self.put_public_object(&location.bucket, &location.jwks_key, jwks)
            .await?;
        Ok(())
    }

    async fn ensure_bucket(&self, bucket: &str) -> Result<()> {
        let listing = self.client.list_buckets().send().await.map_err(sdk_error)?;
        let exists = listing
            .buckets()
            .iter()
            .any(|b| b.name() == Some(bucket));
        if exists {
            info!(%bucket, "bucket exists");
            return Ok(());
        }

        info!(%bucket, "bucket not found, creating it");
        let created = self
            .client
            .create_bucket()
            .bucket(bucket)
            .acl(BucketCannedAcl::PublicRead)
            .send()
            .await;

        match created {
            Ok(_) => Ok(()),
            Err(SdkError::ServiceError(context))
                if context.err().is_bucket_already_exists()
                    || context.err().is_bucket_already_owned_by_you() =>
            {
                info!(%bucket, "bucket appeared concurrently, continuing");
                Ok(())
            }
            Err(err) => Err(sdk_error(err)),
        }
    }

    async fn put_public_object(&self, bucket: &str, key: &str, content: &[u8]) -> Result<()> {
        info!(%bucket, %key, bytes = content.len(), "putting object");
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .acl(ObjectCannedAcl::PublicRead)
            .body(ByteStream::from(content.to_vec()))
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_is_the_first_dns_label_and_keys_follow_the_issuer_path() {
        let location =
            issuer_location("https://mycluster.s3.amazonaws.com/cluster").expect("location");
        assert_eq!(location.bucket, "mycluster");
        assert_eq!(
            location.discovery_key,
            "cluster/.well-known/openid-configuration"
        );
        assert_eq!(location.jwks_key, "cluster/openid/v1/jwks");
    }

    #[test]
    fn issuer_without_a_path_maps_keys_to_the_bucket_root() {
        let location = issuer_location("https://mycluster.s3.amazonaws.com").expect("location");
        assert_eq!(location.discovery_key, ".well-known/openid-configuration");
        assert_eq!(location.jwks_key, "openid/v1/jwks");
    }

    #[test]
    fn trailing_slash_does_not_double_up_keys() {
        let location =
            issuer_location("https://mycluster.s3.amazonaws.com/cluster/").expect("location");
        assert_eq!(
            location.discovery_key,
            "cluster/.well-known/openid-configuration"
        );
    }

    #[test]
    fn non_s3_issuer_is_rejected_without_remote_calls() {
        let err = issuer_location("https://oidc.example.com/cluster").expect_err("must fail");
        match err {
            Error::Config(message) => assert!(message.contains("not an S3 endpoint")),
            other => panic!("expected Config, got {other:?}"),
        }
    }

    #[test]
    fn invalid_issuer_url_is_rejected() {
        assert!(matches!(
            issuer_location("not a url"),
            Err(Error::Config(_))
        ));
    }
}
