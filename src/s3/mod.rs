//! S3 Client module
//!
//! Streams objects to S3-compatible HTTP storage, signed with SigV4 or
//! authorized with Google OAuth2 tokens.
//!
//! # Dialects
//!
//! The remote scheme picks the storage dialect. `gs://` targets Google Cloud
//! Storage's XML API; anything else is treated as plain S3. The dialects
//! differ in their default endpoint and in how the payload CRC32C is sent.
//!
//! | Dialect | Default endpoint | Checksum header |
//! |---------|------------------|-----------------|
//! | S3 | `https://s3.<region>.amazonaws.com` | `x-amz-checksum-crc32c` |
//! | GCS | `https://storage.googleapis.com` | `x-goog-hash: crc32c=...` |
//!
//! # Tracing
//!
//! | Operation | Span Name | Attributes |
//! |-----------|-----------|------------|
//! | Open writer | `s3.open_writer` | bucket, key, method |
//! | Close writer | `s3.put_object` | bucket, key, bytes, etag, status_code |

use crate::config::StorageConfig;
use crate::store::{ObjectStore, StorageError};
use crate::target::has_dot_segment;
use crate::upload::checksum::Crc32c;
use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::HeaderMap;
use std::time::Duration;
use thiserror::Error;

mod auth;
mod credentials;
mod signing;
mod writer;

pub use auth::Authorization;
pub use credentials::{Credentials, CredentialsError, CredentialsProvider};
pub use signing::RequestSigner;
pub use writer::S3ObjectWriter;

/// Characters left alone in a key: RFC 3986 unreserved plus `/`.
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~')
    .remove(b'/');

const BUCKET_ENCODE_SET: &AsciiSet = &KEY_ENCODE_SET.add(b'/');

/// S3 client errors
#[derive(Error, Debug)]
pub enum S3ClientError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Request error: {0}")]
    RequestError(String),

    #[error("Response error: {0}")]
    ResponseError(String),

    #[error("Signing error: {0}")]
    SigningError(String),
}

impl From<CredentialsError> for S3ClientError {
    fn from(err: CredentialsError) -> Self {
        S3ClientError::ConfigError(err.to_string())
    }
}

/// Storage API flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    S3,
    Gcs,
}

impl Dialect {
    /// `gs` selects GCS; every other scheme, or none, selects S3.
    pub fn from_scheme(scheme: Option<&str>) -> Self {
        match scheme {
            Some(s) if s.eq_ignore_ascii_case("gs") => Dialect::Gcs,
            _ => Dialect::S3,
        }
    }

    pub fn default_endpoint(&self, region: &str) -> String {
        match self {
            Dialect::S3 => format!("https://s3.{}.amazonaws.com", region),
            Dialect::Gcs => "https://storage.googleapis.com".to_string(),
        }
    }

    /// Request headers announcing the expected CRC32C
    pub fn checksum_headers(&self, crc: Crc32c) -> Vec<(&'static str, String)> {
        match self {
            Dialect::S3 => vec![
                ("x-amz-sdk-checksum-algorithm", "CRC32C".to_string()),
                ("x-amz-checksum-crc32c", crc.to_base64()),
            ],
            Dialect::Gcs => vec![("x-goog-hash", format!("crc32c={}", crc.to_base64()))],
        }
    }

    /// CRC32C the server reports for the stored object, if any
    pub fn echoed_crc32c(&self, headers: &HeaderMap) -> Option<Crc32c> {
        match self {
            Dialect::S3 => headers
                .get("x-amz-checksum-crc32c")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| Crc32c::from_base64(v.trim())),
            Dialect::Gcs => headers
                .get_all("x-goog-hash")
                .iter()
                .filter_map(|v| v.to_str().ok())
                .flat_map(|v| v.split(','))
                .find_map(|entry| entry.trim().strip_prefix("crc32c="))
                .and_then(Crc32c::from_base64),
        }
    }
}

/// S3 Client configuration
#[derive(Debug, Clone)]
pub struct S3ClientConfig {
    pub endpoint: String,
    pub region: String,
    pub dialect: Dialect,
    pub authorization: Authorization,
    pub connect_timeout: Duration,
}

/// S3 Client
///
/// Cheap to share; every writer holds its own handle to the HTTP pool.
pub struct S3Client {
    config: S3ClientConfig,
    http_client: reqwest::Client,
}

impl S3Client {
    /// Create a new S3 client
    pub fn new(config: S3ClientConfig) -> Result<Self, S3ClientError> {
        let endpoint = config.endpoint.trim_end_matches('/');
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(S3ClientError::ConfigError(format!(
                "endpoint must be an http(s) URL: {}",
                config.endpoint
            )));
        }

        let http_client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| S3ClientError::ConfigError(e.to_string()))?;

        Ok(Self {
            config: S3ClientConfig {
                endpoint: endpoint.to_string(),
                ..config
            },
            http_client,
        })
    }

    /// Resolve authorization and build a client for `dialect`.
    pub async fn connect(storage: &StorageConfig, dialect: Dialect) -> Result<Self, S3ClientError> {
        let authorization = Authorization::resolve(storage, dialect).await?;

        let client = Self::new(S3ClientConfig {
            endpoint: storage.endpoint_for(dialect),
            region: storage.region.clone(),
            dialect,
            authorization,
            connect_timeout: Duration::from_secs(storage.connect_timeout_seconds),
        })?;

        tracing::debug!(
            endpoint = %client.endpoint(),
            region = %client.region(),
            dialect = ?dialect,
            auth = client.config.authorization.kind(),
            "Storage client ready"
        );
        Ok(client)
    }

    pub fn region(&self) -> &str {
        &self.config.region
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    pub fn dialect(&self) -> Dialect {
        self.config.dialect
    }

    /// Path-style object URL
    pub fn object_url(&self, bucket: &str, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.config.endpoint,
            utf8_percent_encode(bucket, BUCKET_ENCODE_SET),
            utf8_percent_encode(key, KEY_ENCODE_SET)
        )
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    type Writer = S3ObjectWriter;

    #[tracing::instrument(
        name = "s3.open_writer",
        skip(self),
        fields(s3.bucket = %bucket, s3.key = %key, http.method = "PUT")
    )]
    async fn open_writer(&self, bucket: &str, key: &str) -> Result<S3ObjectWriter, StorageError> {
        if has_dot_segment(key) {
            return Err(StorageError::Request(format!(
                "refusing key '{}': '.' and '..' segments do not survive URL parsing",
                key
            )));
        }
        Ok(S3ObjectWriter::new(
            self.http_client.clone(),
            self.config.authorization.clone(),
            self.config.dialect,
            bucket,
            key,
            self.object_url(bucket, key),
        ))
    }
}
