//! Rate-limited copy into a write stream

use super::rate_limit::TokenBucket;
use crate::store::{ObjectWriter, StorageError};
use bytes::Bytes;
use std::time::Duration;

/// Outcome of a throttled copy
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CopyStats {
    pub bytes: u64,
    pub chunks: u64,
    /// Total time spent waiting for tokens
    pub throttled: Duration,
}

/// Copy `data` into `writer` in order, one chunk at a time, taking each
/// chunk's size from `bucket` before writing it.
///
/// Chunks are at most `chunk_size` bytes and never larger than the bucket
/// capacity. Stops at the first write error.
pub async fn throttled_copy<W: ObjectWriter>(
    data: &Bytes,
    chunk_size: usize,
    bucket: &mut TokenBucket,
    writer: &mut W,
) -> Result<CopyStats, StorageError> {
    let chunk_size = chunk_size
        .min(usize::try_from(bucket.capacity()).unwrap_or(usize::MAX))
        .max(1);
    let mut stats = CopyStats::default();
    let mut offset = 0;

    while offset < data.len() {
        let end = (offset + chunk_size).min(data.len());
        let chunk = data.slice(offset..end);
        let len = chunk.len() as u64;

        stats.throttled += bucket.acquire(len).await;
        writer.write(chunk).await?;

        stats.bytes += len;
        stats.chunks += 1;
        offset = end;
    }

    Ok(stats)
}
