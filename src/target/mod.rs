//! Remote target resolution
//!
//! Turns a remote location such as `gs://bucket/some/prefix/` into a bucket
//! name and an object key prefix. The uploaded object lands at
//! `<prefix>/<local path as given>`.
//!
//! Keys holding a `.` or `..` segment are refused: URL parsers collapse them,
//! so the object would land somewhere other than the key names.

use crate::s3::Dialect;
use thiserror::Error;

/// Target resolution errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TargetError {
    #[error(
        "Missing bucket in remote location '{0}' (checked locally; bucket names are otherwise passed to the backend unvalidated)"
    )]
    MissingBucket(String),

    #[error("Object key '{0}' contains a '.' or '..' path segment")]
    DotSegment(String),
}

/// True if any `/`-separated segment of `key` is `.` or `..`.
pub fn has_dot_segment(key: &str) -> bool {
    key.split('/').any(|segment| segment == "." || segment == "..")
}

/// A resolved remote location
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTarget {
    scheme: Option<String>,
    bucket: String,
    prefix: String,
}

impl RemoteTarget {
    /// Parse `[scheme://]bucket/key/prefix...`
    ///
    /// The bucket name is not validated; whatever the first segment holds is
    /// handed to the backend as-is.
    pub fn parse(location: &str) -> Result<Self, TargetError> {
        let (scheme, rest) = Self::split_scheme(location);

        let mut segments = rest.split('/');
        let bucket = segments.next().unwrap_or_default().to_string();
        if bucket.is_empty() {
            return Err(TargetError::MissingBucket(location.to_string()));
        }

        let prefix = segments
            .collect::<Vec<_>>()
            .join("/")
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            scheme: scheme.map(str::to_string),
            bucket,
            prefix,
        })
    }

    fn split_scheme(location: &str) -> (Option<&str>, &str) {
        match location.split_once("://") {
            Some((scheme, rest))
                if !scheme.is_empty()
                    && scheme
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.')) =>
            {
                (Some(scheme), rest)
            }
            _ => (None, location),
        }
    }

    /// Scheme as written, without `://`
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Key prefix with trailing separators trimmed (may be empty)
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Storage dialect implied by the scheme
    pub fn dialect(&self) -> Dialect {
        Dialect::from_scheme(self.scheme())
    }

    /// Object key for a local path, which is appended verbatim.
    pub fn object_key(&self, local_path: &str) -> String {
        format!("{}/{}", self.prefix, local_path)
    }

    /// Like [`object_key`](Self::object_key), but refuses keys that a URL
    /// would not carry as written.
    pub fn checked_object_key(&self, local_path: &str) -> Result<String, TargetError> {
        let key = self.object_key(local_path);
        if has_dot_segment(&key) {
            return Err(TargetError::DotSegment(key));
        }
        Ok(key)
    }
}
