//! SigV4 request signing
//!
//! Payloads are streamed, so the body is never hashed: requests carry
//! `x-amz-content-sha256: UNSIGNED-PAYLOAD`.

use super::{Credentials, S3ClientError};
use aws_sigv4::http_request::{
    sign, PayloadChecksumKind, PercentEncodingMode, SignableBody, SignableRequest,
    SigningSettings, UriPathNormalizationMode,
};
use aws_sigv4::sign::v4;
use aws_smithy_runtime_api::client::identity::Identity;
use std::time::SystemTime;

const SERVICE: &str = "s3";

/// Signs requests for one region with fixed credentials
#[derive(Debug)]
pub struct RequestSigner {
    identity: Identity,
    region: String,
}

impl RequestSigner {
    pub fn new(credentials: Credentials, region: impl Into<String>) -> Self {
        let credentials: aws_credential_types::Credentials = credentials.into();
        Self {
            identity: credentials.into(),
            region: region.into(),
        }
    }

    /// Compute the signing headers for a request.
    ///
    /// `headers` are the headers that will be sent; they become part of the
    /// signature. The returned headers must be added to the request as-is.
    pub fn sign(
        &self,
        method: &str,
        url: &str,
        headers: &[(&str, &str)],
        time: SystemTime,
    ) -> Result<Vec<(String, String)>, S3ClientError> {
        let mut settings = SigningSettings::default();
        settings.payload_checksum_kind = PayloadChecksumKind::XAmzSha256;
        // S3 signs the path exactly as sent: encoded once, never normalized.
        settings.percent_encoding_mode = PercentEncodingMode::Single;
        settings.uri_path_normalization_mode = UriPathNormalizationMode::Disabled;

        let params = v4::SigningParams::builder()
            .identity(&self.identity)
            .region(&self.region)
            .name(SERVICE)
            .time(time)
            .settings(settings)
            .build()
            .map_err(|e| S3ClientError::SigningError(e.to_string()))?
            .into();

        let signable = SignableRequest::new(
            method,
            url,
            headers.iter().copied(),
            SignableBody::UnsignedPayload,
        )
        .map_err(|e| S3ClientError::SigningError(e.to_string()))?;

        let (instructions, _signature) = sign(signable, &params)
            .map_err(|e| S3ClientError::SigningError(e.to_string()))?
            .into_parts();

        Ok(instructions
            .headers()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect())
    }
}
