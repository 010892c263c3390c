//! S3 Credentials Module
//!
//! Static keys come from the configuration file first and from the standard
//! AWS environment variables second. What happens without any is decided in
//! [`Authorization::resolve`](super::Authorization::resolve).
//!
//! # Example
//!
//! ```
//! use throttle_uploadr::s3::Credentials;
//!
//! let creds = Credentials::new("access-key", "secret-key");
//! assert_eq!(creds.access_key_id(), "access-key");
//! assert!(creds.session_token().is_none());
//! ```

use crate::config::StorageConfig;
use thiserror::Error;

/// Credential loading errors
#[derive(Error, Debug, PartialEq)]
pub enum CredentialsError {
    #[error("Incomplete credentials: {0}")]
    Incomplete(String),
}

/// Static AWS-style credentials
#[derive(Clone)]
pub struct Credentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl Credentials {
    pub fn new(access_key_id: impl Into<String>, secret_access_key: impl Into<String>) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: None,
        }
    }

    /// Temporary credentials carrying a session token
    pub fn with_session_token(
        access_key_id: impl Into<String>,
        secret_access_key: impl Into<String>,
        session_token: impl Into<String>,
    ) -> Self {
        Self {
            access_key_id: access_key_id.into(),
            secret_access_key: secret_access_key.into(),
            session_token: Some(session_token.into()),
        }
    }

    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"** redacted **")
            .field("session_token", &self.session_token.as_ref().map(|_| "** redacted **"))
            .finish()
    }
}

impl From<Credentials> for aws_credential_types::Credentials {
    fn from(creds: Credentials) -> Self {
        aws_credential_types::Credentials::new(
            creds.access_key_id,
            creds.secret_access_key,
            creds.session_token,
            None,
            "throttle-uploadr",
        )
    }
}

/// Factory for credentials from the supported sources
pub struct CredentialsProvider;

impl CredentialsProvider {
    /// Load credentials from environment variables
    ///
    /// Looks for:
    /// - `AWS_ACCESS_KEY_ID`
    /// - `AWS_SECRET_ACCESS_KEY`
    /// - `AWS_SESSION_TOKEN` (optional)
    pub async fn from_env() -> Result<Option<Credentials>, CredentialsError> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self::assemble(
            var("AWS_ACCESS_KEY_ID"),
            var("AWS_SECRET_ACCESS_KEY"),
            var("AWS_SESSION_TOKEN"),
            "AWS_ACCESS_KEY_ID",
            "AWS_SECRET_ACCESS_KEY",
        )
    }

    /// Load credentials from the `storage` config section
    pub fn from_config(config: &StorageConfig) -> Result<Option<Credentials>, CredentialsError> {
        Self::assemble(
            config.access_key.clone(),
            config.secret_key.clone(),
            config.session_token.clone(),
            "access_key",
            "secret_key",
        )
    }

    /// Config first, then environment. `None` means no static keys.
    pub async fn resolve(config: &StorageConfig) -> Result<Option<Credentials>, CredentialsError> {
        match Self::from_config(config)? {
            Some(creds) => Ok(Some(creds)),
            None => Self::from_env().await,
        }
    }

    fn assemble(
        access_key: Option<String>,
        secret_key: Option<String>,
        session_token: Option<String>,
        access_name: &str,
        secret_name: &str,
    ) -> Result<Option<Credentials>, CredentialsError> {
        match (access_key, secret_key) {
            (Some(access), Some(secret)) => Ok(Some(match session_token {
                Some(token) => Credentials::with_session_token(access, secret, token),
                None => Credentials::new(access, secret),
            })),
            (None, None) => Ok(None),
            (Some(_), None) => Err(CredentialsError::Incomplete(format!(
                "{} is set but {} is not",
                access_name, secret_name
            ))),
            (None, Some(_)) => Err(CredentialsError::Incomplete(format!(
                "{} is set but {} is not",
                secret_name, access_name
            ))),
        }
    }
}
