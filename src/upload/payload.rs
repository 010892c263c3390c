//! Payload loading
//!
//! The whole file is read into memory once. The checksum and content type
//! are derived from the full buffer before anything is sent.

use super::checksum::Crc32c;
use super::sniff::detect_content_type;
use crate::store::ObjectMetadata;
use bytes::Bytes;
use std::io;
use std::path::Path;

/// File contents plus the metadata derived from them
#[derive(Debug, Clone)]
pub struct Payload {
    data: Bytes,
    crc32c: Crc32c,
    content_type: &'static str,
}

impl Payload {
    /// Read a local file completely
    pub async fn load<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let data = tokio::fs::read(path).await?;
        Ok(Self::from_bytes(Bytes::from(data)))
    }

    pub fn from_bytes(data: Bytes) -> Self {
        Self {
            crc32c: Crc32c::compute(&data),
            content_type: detect_content_type(&data),
            data,
        }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn crc32c(&self) -> Crc32c {
        self.crc32c
    }

    pub fn content_type(&self) -> &'static str {
        self.content_type
    }

    /// Metadata to attach to the write stream before streaming
    pub fn metadata(&self) -> ObjectMetadata {
        ObjectMetadata {
            content_type: Some(self.content_type.to_string()),
            crc32c: Some(self.crc32c),
            content_length: Some(self.data.len() as u64),
        }
    }
}
