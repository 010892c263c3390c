//! In-memory object store
//!
//! Behaves like a real backend at close time: a declared CRC32C or content
//! length that does not match the received bytes fails the close and nothing
//! is stored.

use super::{ObjectInfo, ObjectMetadata, ObjectStore, ObjectWriter, StorageError};
use crate::upload::checksum::Crc32c;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A stored object
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub data: Bytes,
    pub metadata: ObjectMetadata,
}

/// Object store backed by a shared map
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    objects: Arc<Mutex<HashMap<(String, String), StoredObject>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a finalized object
    pub fn get(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    type Writer = MemoryWriter;

    async fn open_writer(&self, bucket: &str, key: &str) -> Result<Self::Writer, StorageError> {
        Ok(MemoryWriter {
            store: self.clone(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            metadata: ObjectMetadata::default(),
            buffer: BytesMut::new(),
            started: false,
        })
    }
}

/// Write stream into a [`MemoryStore`]
#[derive(Debug)]
pub struct MemoryWriter {
    store: MemoryStore,
    bucket: String,
    key: String,
    metadata: ObjectMetadata,
    buffer: BytesMut,
    started: bool,
}

#[async_trait]
impl ObjectWriter for MemoryWriter {
    fn set_metadata(&mut self, metadata: ObjectMetadata) -> Result<(), StorageError> {
        if self.started {
            return Err(StorageError::MetadataAfterWrite);
        }
        self.metadata = metadata;
        Ok(())
    }

    async fn write(&mut self, chunk: Bytes) -> Result<(), StorageError> {
        self.started = true;
        self.buffer.extend_from_slice(&chunk);
        Ok(())
    }

    async fn close(self) -> Result<ObjectInfo, StorageError> {
        let data = self.buffer.freeze();

        if let Some(expected) = self.metadata.content_length {
            if expected != data.len() as u64 {
                return Err(StorageError::Request(format!(
                    "declared {} bytes but received {}",
                    expected,
                    data.len()
                )));
            }
        }

        let received = Crc32c::compute(&data);
        if let Some(expected) = self.metadata.crc32c {
            if expected != received {
                return Err(StorageError::ChecksumMismatch(format!(
                    "declared crc32c {} but received {}",
                    expected, received
                )));
            }
        }

        let info = ObjectInfo {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            size: data.len() as u64,
            etag: Some(format!("\"{}\"", received.to_base64())),
            crc32c: Some(received),
        };

        self.store.objects.lock().insert(
            (self.bucket, self.key),
            StoredObject {
                data,
                metadata: self.metadata,
            },
        );

        Ok(info)
    }
}
