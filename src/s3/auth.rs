//! Request authorization
//!
//! Static keys always sign with SigV4, for both dialects. A `gs://` target
//! without keys uses OAuth2 bearer tokens from Google Application Default
//! Credentials, and fails client setup when none can be found. A plain S3
//! target without keys goes out unsigned.

use super::{Credentials, CredentialsProvider, Dialect, RequestSigner, S3ClientError};
use crate::config::StorageConfig;
use google_cloud_auth::credentials::{
    Builder as GoogleCredentialsBuilder, CacheableResource, Credentials as GoogleCredentials,
};
use http::Extensions;
use std::sync::Arc;
use std::time::SystemTime;

/// How requests to the backend are authorized
#[derive(Clone, Debug)]
pub enum Authorization {
    SigV4(Arc<RequestSigner>),
    /// Headers minted by Google credentials, usually `Authorization: Bearer ...`
    Google(GoogleCredentials),
    Anonymous,
}

impl Authorization {
    pub fn sigv4(credentials: Credentials, region: impl Into<String>) -> Self {
        Authorization::SigV4(Arc::new(RequestSigner::new(credentials, region)))
    }

    /// Pick the authorization for `dialect` from the configured sources.
    pub async fn resolve(storage: &StorageConfig, dialect: Dialect) -> Result<Self, S3ClientError> {
        if let Some(credentials) = CredentialsProvider::resolve(storage).await? {
            return Ok(Self::sigv4(credentials, storage.region.clone()));
        }

        match dialect {
            Dialect::Gcs => Self::application_default().await,
            Dialect::S3 => {
                tracing::warn!("No storage credentials configured, sending unsigned requests");
                Ok(Authorization::Anonymous)
            }
        }
    }

    /// Load Google Application Default Credentials.
    ///
    /// A token is fetched straight away, so an unusable credential file or an
    /// unreachable token endpoint surfaces here rather than mid-upload.
    pub async fn application_default() -> Result<Self, S3ClientError> {
        let credentials = GoogleCredentialsBuilder::default().build().map_err(|e| {
            S3ClientError::ConfigError(format!(
                "no Google Application Default Credentials: {}",
                e
            ))
        })?;

        google_headers(&credentials).await?;
        tracing::debug!("Using Google Application Default Credentials");
        Ok(Authorization::Google(credentials))
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Authorization::Anonymous)
    }

    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Authorization::SigV4(_) => "sigv4",
            Authorization::Google(_) => "google-oauth2",
            Authorization::Anonymous => "anonymous",
        }
    }

    /// Headers to add to a request that carries `headers`.
    pub async fn headers(
        &self,
        method: &str,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<Vec<(String, String)>, S3ClientError> {
        match self {
            Authorization::SigV4(signer) => signer.sign(method, url, headers, SystemTime::now()),
            Authorization::Google(credentials) => google_headers(credentials).await,
            Authorization::Anonymous => Ok(Vec::new()),
        }
    }
}

async fn google_headers(
    credentials: &GoogleCredentials,
) -> Result<Vec<(String, String)>, S3ClientError> {
    let resource = credentials
        .headers(Extensions::new())
        .await
        .map_err(|e| S3ClientError::ConfigError(format!("fetching Google access token: {}", e)))?;

    let headers = match resource {
        CacheableResource::New { data, .. } => data,
        CacheableResource::NotModified => {
            return Err(S3ClientError::ConfigError(
                "Google credentials returned no headers".into(),
            ))
        }
    };

    headers
        .iter()
        .map(|(name, value)| {
            value
                .to_str()
                .map(|v| (name.as_str().to_string(), v.to_string()))
                .map_err(|e| S3ClientError::ConfigError(e.to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        std::env::remove_var("AWS_ACCESS_KEY_ID");
        std::env::remove_var("AWS_SECRET_ACCESS_KEY");
        std::env::remove_var("AWS_SESSION_TOKEN");
    }

    #[tokio::test]
    #[serial]
    async fn test_static_keys_sign_gcs_requests() {
        clear_env();
        let storage = StorageConfig {
            access_key: Some("GOOGHMACKEY".into()),
            secret_key: Some("hmac-secret".into()),
            ..Default::default()
        };

        let auth = Authorization::resolve(&storage, Dialect::Gcs).await.unwrap();
        assert_eq!(auth.kind(), "sigv4");

        let headers = auth
            .headers("PUT", "https://storage.googleapis.com/b/k", &[])
            .await
            .unwrap();
        assert!(headers.iter().any(|(name, _)| name == "authorization"));
    }

    #[tokio::test]
    #[serial]
    async fn test_s3_without_keys_is_anonymous() {
        clear_env();
        let auth = Authorization::resolve(&StorageConfig::default(), Dialect::S3)
            .await
            .unwrap();
        assert!(auth.is_anonymous());
        assert!(auth.headers("PUT", "http://h/b/k", &[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    #[serial]
    async fn test_gcs_without_any_credentials_fails() {
        clear_env();
        std::env::set_var(
            "GOOGLE_APPLICATION_CREDENTIALS",
            "/nonexistent/throttle-uploadr/adc.json",
        );

        let result = Authorization::resolve(&StorageConfig::default(), Dialect::Gcs).await;
        std::env::remove_var("GOOGLE_APPLICATION_CREDENTIALS");

        match result {
            Err(S3ClientError::ConfigError(msg)) => {
                assert!(msg.contains("Application Default Credentials"), "{}", msg)
            }
            other => panic!("unexpected result: {:?}", other.map(|a| a.kind())),
        }
    }
}
