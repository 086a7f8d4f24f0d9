//! AWS credential resolution through the `aws-config` provider chain.
//!
//! Order: the profile named by `AWS_PROFILE` (static keys, SSO,
//! `credential_process`, role assumption), then static keys from the
//! environment, then the SDK default chain.

use aws_config::profile::profile_file::{ProfileFileKind, ProfileFiles};
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::provider::{ProvideCredentials, SharedCredentialsProvider};
use aws_credential_types::Credentials;
use tracing::{debug, info};

use crate::backend::BackendError;
use crate::config::AwsSettings;

const STATIC_PROVIDER_NAME: &str = "hive-environment";

/// Build the credentials provider for `aws`. Nothing is resolved yet.
pub async fn provider(aws: &AwsSettings) -> Result<SharedCredentialsProvider, BackendError> {
    if aws.profile.is_none() {
        if let (Some(access_key_id), Some(secret_access_key)) =
            (aws.access_key_id.as_deref(), aws.secret_access_key.as_deref())
        {
            debug!("Using static AWS credentials from the environment");
            return Ok(SharedCredentialsProvider::new(Credentials::new(
                access_key_id,
                secret_access_key,
                aws.session_token.clone(),
                None,
                STATIC_PROVIDER_NAME,
            )));
        }
    }

    let mut loader = aws_config::defaults(BehaviorVersion::latest()).region(Region::new(aws.region.clone()));
    if let Some(ref profile) = aws.profile {
        debug!("Resolving AWS credentials from profile {}", profile);
        loader = loader.profile_name(profile);
    }
    if let Some(ref path) = aws.credentials_file {
        let files = ProfileFiles::builder()
            .include_default_config_file(true)
            .include_default_credentials_file(true)
            .with_file(ProfileFileKind::Credentials, path)
            .build();
        loader = loader.profile_files(files);
    }

    loader
        .load()
        .await
        .credentials_provider()
        .ok_or_else(|| BackendError::Config("No AWS credentials provider configured".to_string()))
}

/// Resolve credentials once. Used at construction, where failure is fatal.
pub async fn resolve(
    provider: &SharedCredentialsProvider,
    profile: Option<&str>,
) -> Result<Credentials, BackendError> {
    let creds = provider.provide_credentials().await.map_err(|e| {
        let message = e.to_string();
        match profile {
            Some(profile) if is_sso_error(&message) => BackendError::Config(format!(
                "AWS session for profile '{}' is not usable ({}); run `aws sso login --profile {}`",
                profile, message, profile
            )),
            Some(profile) => BackendError::Config(format!(
                "Failed to resolve AWS credentials for profile '{}': {}",
                profile, message
            )),
            None => BackendError::Config(format!("No AWS credentials found: {}", message)),
        }
    })?;
    info!("AWS credentials resolved");
    Ok(creds)
}

fn is_sso_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["expired", "sso", "token"].iter().any(|needle| lower.contains(needle))
}
