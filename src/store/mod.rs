//! Object write contract
//!
//! The uploader only needs a sink it can open for `(bucket, key)`, describe
//! with metadata, feed bytes sequentially and then close. Integrity is checked
//! by the sink at close time.

use crate::upload::checksum::Crc32c;
use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub mod memory;

pub use memory::MemoryStore;

/// Storage backend errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Request error: {0}")]
    Request(String),

    #[error("Backend returned {status} {code}: {message}")]
    Response {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Checksum mismatch: {0}")]
    ChecksumMismatch(String),

    #[error("Metadata must be set before the first write")]
    MetadataAfterWrite,

    #[error("Write stream is already closed")]
    Closed,
}

/// Metadata attached to an object before any byte is written
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectMetadata {
    pub content_type: Option<String>,
    pub crc32c: Option<Crc32c>,
    /// Total length, when known up front
    pub content_length: Option<u64>,
}

/// What the backend reports about a finalized object
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub etag: Option<String>,
    pub crc32c: Option<Crc32c>,
}

/// A backend that can open write streams
#[async_trait]
pub trait ObjectStore: Send + Sync {
    type Writer: ObjectWriter;

    /// Open a write stream bound to `(bucket, key)`.
    async fn open_writer(&self, bucket: &str, key: &str) -> Result<Self::Writer, StorageError>;
}

/// A single-use write stream to one remote object
#[async_trait]
pub trait ObjectWriter: Send {
    /// Set content type and checksum. Fails once bytes have been written.
    fn set_metadata(&mut self, metadata: ObjectMetadata) -> Result<(), StorageError>;

    /// Append a chunk to the object.
    async fn write(&mut self, chunk: Bytes) -> Result<(), StorageError>;

    /// Finalize the object. The backend verifies the checksum here.
    async fn close(self) -> Result<ObjectInfo, StorageError>;
}
