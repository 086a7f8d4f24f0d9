//! SigV4 signing of Bedrock Runtime requests.

use std::time::SystemTime;

use aws_credential_types::Credentials;
use aws_sigv4::http_request::{sign, SignableBody, SignableRequest, SigningParams, SigningSettings};
use aws_sigv4::sign::v4;

use crate::backend::BackendError;

/// Headers the signature covers in addition to `host`.
pub const SIGNED_HEADERS: [(&str, &str); 1] = [("content-type", "application/json")];

/// Sign a request and return the headers to add to it (`authorization`,
/// `x-amz-date`, and `x-amz-security-token` for temporary credentials).
pub fn sign_request(
    method: &str,
    url: &str,
    body: &[u8],
    creds: &Credentials,
    region: &str,
    service: &str,
    time: SystemTime,
) -> Result<Vec<(String, String)>, BackendError> {
    let identity = creds.clone().into();

    let signing_params = v4::SigningParams::builder()
        .identity(&identity)
        .region(region)
        .name(service)
        .time(time)
        .settings(SigningSettings::default())
        .build()
        .map_err(|e| BackendError::Config(format!("invalid SigV4 parameters: {}", e)))?;

    let signable = SignableRequest::new(
        method,
        url,
        SIGNED_HEADERS.iter().copied(),
        SignableBody::Bytes(body),
    )
    .map_err(|e| BackendError::Config(format!("request cannot be signed: {}", e)))?;

    let (instructions, _signature) = sign(signable, &SigningParams::V4(signing_params))
        .map_err(|e| BackendError::Config(format!("SigV4 signing failed: {}", e)))?
        .into_parts();

    Ok(instructions
        .headers()
        .map(|(name, value)| (name.to_string(), value.to_string()))
        .collect())
}
