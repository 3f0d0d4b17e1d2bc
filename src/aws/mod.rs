//! AWS-facing half of the tool: IAM provider/role/policy plumbing, S3
//! publishing, and OIDC provider thumbprint derivation.
//!
//! Every operation here is a single remote call with no cross-call
//! invariants beyond what AWS itself enforces. SDK rejections are folded into
//! one structured [`Error::RemoteApi`] carrying the provider's raw code and
//! message instead of being pattern-matched per code.

pub mod iam;
pub mod s3;
pub mod thumbprint;

use std::time::Duration;

use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_sdk_iam::error::{ProvideErrorMetadata, SdkError};

use crate::error::Error;

/// Upper bound for one AWS operation, connect through response. Explicit
/// rather than whatever the transport happens to default to.
const OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Load the shared AWS SDK config, honoring a named profile when given and
/// the default credential/region chain otherwise.
pub(crate) async fn sdk_config(profile: Option<&str>) -> aws_config::SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest()).timeout_config(
        TimeoutConfig::builder()
            .operation_timeout(OPERATION_TIMEOUT)
            .build(),
    );
    if let Some(profile) = profile {
        loader = loader.profile_name(profile);
    }
    loader.load().await
}

/// Fold an SDK error into the crate error taxonomy: service rejections become
/// [`Error::RemoteApi`] with the raw code and message, everything else
/// (timeouts, connection failures, response parsing) is transport.
pub(crate) fn sdk_error<E, R>(err: SdkError<E, R>) -> Error
where
    E: ProvideErrorMetadata,
    SdkError<E, R>: std::error::Error,
{
    match &err {
        SdkError::ServiceError(context) => {
            let meta = context.err();
            Error::RemoteApi {
                code: meta.code().unwrap_or("Unknown").to_string(),
                message: meta.message().unwrap_or("").to_string(),
            }
        }
        other => Error::Transport(other.to_string()),
    }
}
