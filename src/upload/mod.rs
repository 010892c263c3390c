//! Upload module
//!
//! Drives one throttled, checksum-verified, deadline-bounded upload:
//! load payload, open write stream, attach metadata, rate-limited copy,
//! close, then delete the local file.

use crate::config::{ConfigError, StorageConfig, TransferRequest};
use crate::metrics;
use crate::s3::{S3Client, S3ClientError};
use crate::store::{ObjectInfo, ObjectStore, ObjectWriter, StorageError};
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

pub mod checksum;
pub mod copy;
pub mod payload;
pub mod rate_limit;
pub mod sniff;

use checksum::Crc32c;
use copy::throttled_copy;
use payload::Payload;
use rate_limit::TokenBucket;

/// Exit code for bad arguments or configuration
pub const EXIT_USAGE: u8 = 1;
/// Exit code when the storage client cannot be constructed
pub const EXIT_INIT: u8 = 2;
/// Exit code when the local file cannot be read
pub const EXIT_LOCAL_IO: u8 = 3;
/// Exit code for write/copy failures
pub const EXIT_TRANSFER: u8 = 4;
/// Exit code for stream close/verification failures
pub const EXIT_FINALIZE: u8 = 5;
/// Exit code when the object was stored but the local file could not be removed
pub const EXIT_CLEANUP: u8 = 6;

/// Lifecycle of one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Init,
    Opened,
    Streaming,
    Closed,
    LocalFileRemoved,
    Failed,
}

impl TransferState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferState::LocalFileRemoved | TransferState::Failed)
    }
}

/// The operation in progress, used to classify deadline expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Connect,
    Open,
    Copy,
    Close,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            Stage::Connect => "initializing the storage client",
            Stage::Open => "opening the write stream",
            Stage::Copy => "streaming bytes",
            Stage::Close => "closing the write stream",
        };
        f.write_str(stage)
    }
}

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Invalid arguments: {0}")]
    Usage(#[from] ConfigError),

    #[error("Failed to initialize storage client: {0}")]
    ClientInit(#[from] S3ClientError),

    #[error("Failed to read {path}: {source}")]
    LocalIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("write: {0}")]
    Transfer(#[source] StorageError),

    #[error("close: {0}")]
    Finalize(#[source] StorageError),

    #[error("Deadline of {timeout:?} exceeded while {stage}")]
    DeadlineExceeded { timeout: Duration, stage: Stage },

    #[error("Uploaded {key} but failed to remove {path}: {source}")]
    Cleanup {
        path: String,
        key: String,
        #[source]
        source: std::io::Error,
    },
}

impl UploadError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self {
            UploadError::Usage(_) => EXIT_USAGE,
            UploadError::ClientInit(_) => EXIT_INIT,
            UploadError::LocalIo { .. } => EXIT_LOCAL_IO,
            UploadError::Transfer(_) => EXIT_TRANSFER,
            UploadError::Finalize(_) => EXIT_FINALIZE,
            UploadError::DeadlineExceeded { stage, .. } => match stage {
                Stage::Connect => EXIT_INIT,
                Stage::Open | Stage::Copy => EXIT_TRANSFER,
                Stage::Close => EXIT_FINALIZE,
            },
            UploadError::Cleanup { .. } => EXIT_CLEANUP,
        }
    }

    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::Usage(_) => "usage",
            UploadError::ClientInit(_) => "init",
            UploadError::LocalIo { .. } => "local_io",
            UploadError::Transfer(_) => "transfer",
            UploadError::Finalize(_) => "finalize",
            UploadError::DeadlineExceeded { .. } => "deadline",
            UploadError::Cleanup { .. } => "cleanup",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, UploadError::DeadlineExceeded { .. })
    }
}

/// Summary of a completed transfer
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub object: ObjectInfo,
    pub content_type: String,
    pub crc32c: Crc32c,
    pub elapsed: Duration,
    pub throttled: Duration,
}

/// Where a run got to
#[derive(Debug, Clone, Copy)]
struct Progress {
    state: TransferState,
    stage: Stage,
}

/// Uploads one file through any [`ObjectStore`]
pub struct Uploader<'a, S: ObjectStore> {
    store: &'a S,
    request: &'a TransferRequest,
    state: TransferState,
}

impl<'a, S: ObjectStore> Uploader<'a, S> {
    pub fn new(store: &'a S, request: &'a TransferRequest) -> Self {
        Self {
            store,
            request,
            state: TransferState::Init,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Run the transfer. Network work is bounded by `deadline`.
    ///
    /// The local file is removed only after the write stream closed
    /// successfully; on every error it is left in place.
    #[tracing::instrument(
        name = "upload.run",
        skip(self, deadline),
        fields(
            s3.bucket = %self.request.bucket(),
            s3.key = %self.request.object_key(),
            upload.rate = self.request.rate(),
            upload.bytes = tracing::field::Empty
        )
    )]
    pub async fn run(&mut self, deadline: Instant) -> Result<TransferReport, UploadError> {
        let start = Instant::now();
        let result = self.transfer(deadline).await;
        let elapsed = start.elapsed();
        metrics::record_upload_duration(self.request.bucket(), elapsed.as_secs_f64());

        match &result {
            Ok(report) => {
                metrics::record_upload_success(self.request.bucket(), report.object.size);
                tracing::info!(
                    key = %report.object.key,
                    bytes = report.object.size,
                    crc32c = %report.crc32c,
                    content_type = %report.content_type,
                    throttled_ms = report.throttled.as_millis() as u64,
                    duration_ms = elapsed.as_millis() as u64,
                    "Upload completed"
                );
            }
            Err(e) => {
                // A failed local delete happens after the object is stored.
                if !matches!(e, UploadError::Cleanup { .. }) {
                    self.state = TransferState::Failed;
                }
                metrics::record_upload_failure(self.request.bucket());
                metrics::record_error(e.kind());
                tracing::error!(
                    error = %e,
                    state = ?self.state,
                    duration_ms = elapsed.as_millis() as u64,
                    "Upload failed"
                );
            }
        }

        result
    }

    async fn transfer(&mut self, deadline: Instant) -> Result<TransferReport, UploadError> {
        let start = Instant::now();
        let local_path = self.request.local_path();

        let payload = Payload::load(local_path)
            .await
            .map_err(|source| UploadError::LocalIo {
                path: local_path.to_string(),
                source,
            })?;
        tracing::Span::current().record("upload.bytes", payload.len());
        tracing::debug!(
            bytes = payload.len(),
            crc32c = %payload.crc32c(),
            content_type = payload.content_type(),
            "Payload loaded"
        );

        let key = self.request.object_key();
        let mut progress = Progress {
            state: self.state,
            stage: Stage::Open,
        };

        let streamed = tokio::time::timeout_at(
            deadline,
            stream_payload(self.store, self.request, &key, &payload, &mut progress),
        )
        .await;
        self.state = progress.state;

        let (object, throttled) = match streamed {
            Ok(result) => result?,
            Err(_) => {
                return Err(UploadError::DeadlineExceeded {
                    timeout: self.request.timeout(),
                    stage: progress.stage,
                })
            }
        };
        self.state = TransferState::Closed;

        tokio::fs::remove_file(local_path)
            .await
            .map_err(|source| UploadError::Cleanup {
                path: local_path.to_string(),
                key: key.clone(),
                source,
            })?;
        self.state = TransferState::LocalFileRemoved;
        tracing::debug!(path = %local_path, "Local file removed");

        Ok(TransferReport {
            object,
            content_type: payload.content_type().to_string(),
            crc32c: payload.crc32c(),
            elapsed: start.elapsed(),
            throttled,
        })
    }
}

/// Open, describe, fill and close the write stream.
///
/// `progress` is updated as each step starts so an expired deadline can be
/// attributed to the step that was running.
async fn stream_payload<S: ObjectStore>(
    store: &S,
    request: &TransferRequest,
    key: &str,
    payload: &Payload,
    progress: &mut Progress,
) -> Result<(ObjectInfo, Duration), UploadError> {
    progress.stage = Stage::Open;
    let mut writer = store
        .open_writer(request.bucket(), key)
        .await
        .map_err(UploadError::Transfer)?;
    writer
        .set_metadata(payload.metadata())
        .map_err(UploadError::Transfer)?;
    progress.state = TransferState::Opened;

    progress.stage = Stage::Copy;
    progress.state = TransferState::Streaming;
    let mut bucket = TokenBucket::with_rate(request.rate());
    let stats = throttled_copy(payload.data(), request.chunk_size(), &mut bucket, &mut writer)
        .await
        .map_err(UploadError::Transfer)?;
    metrics::record_throttle_wait(stats.throttled.as_secs_f64());
    tracing::debug!(
        bytes = stats.bytes,
        chunks = stats.chunks,
        throttled_ms = stats.throttled.as_millis() as u64,
        "Payload streamed"
    );

    progress.stage = Stage::Close;
    let object = writer.close().await.map_err(UploadError::Finalize)?;

    Ok((object, stats.throttled))
}

/// Connect to the backend named by `request` and upload.
///
/// One deadline, started here, covers client initialization, streaming and
/// close. The client is dropped before returning on every path.
pub async fn run(
    request: &TransferRequest,
    storage: &StorageConfig,
) -> Result<TransferReport, UploadError> {
    let deadline = Instant::now() + request.timeout();

    let client = match tokio::time::timeout_at(
        deadline,
        S3Client::connect(storage, request.target().dialect()),
    )
    .await
    {
        Ok(client) => client?,
        Err(_) => {
            let err = UploadError::DeadlineExceeded {
                timeout: request.timeout(),
                stage: Stage::Connect,
            };
            metrics::record_error(err.kind());
            return Err(err);
        }
    };

    Uploader::new(&client, request).run(deadline).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransferConfig;
    use crate::store::{MemoryStore, ObjectMetadata};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::io::Write;

    fn request_for(path: &str, upload_kbps: u64, timeout_seconds: u64) -> TransferRequest {
        let transfer = TransferConfig {
            upload_kbps,
            timeout_seconds,
            ..Default::default()
        };
        TransferRequest::new(path, "gs://bucket/incoming", &transfer).unwrap()
    }

    fn temp_file(contents: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file
    }

    /// Store whose writers fail on close
    struct FailingCloseStore;

    struct FailingCloseWriter;

    #[async_trait]
    impl ObjectStore for FailingCloseStore {
        type Writer = FailingCloseWriter;

        async fn open_writer(&self, _: &str, _: &str) -> Result<Self::Writer, StorageError> {
            Ok(FailingCloseWriter)
        }
    }

    #[async_trait]
    impl ObjectWriter for FailingCloseWriter {
        fn set_metadata(&mut self, _: ObjectMetadata) -> Result<(), StorageError> {
            Ok(())
        }

        async fn write(&mut self, _: Bytes) -> Result<(), StorageError> {
            Ok(())
        }

        async fn close(self) -> Result<ObjectInfo, StorageError> {
            Err(StorageError::ChecksumMismatch("injected".into()))
        }
    }

    #[tokio::test]
    async fn test_success_removes_local_file() {
        let file = temp_file(b"hello");
        let path = file.path().to_str().unwrap().to_string();
        let request = request_for(&path, 1024, 60);
        let store = MemoryStore::new();

        let mut uploader = Uploader::new(&store, &request);
        let report = uploader
            .run(Instant::now() + request.timeout())
            .await
            .unwrap();

        assert_eq!(uploader.state(), TransferState::LocalFileRemoved);
        assert_eq!(report.object.size, 5);
        assert_eq!(report.crc32c, Crc32c::compute(b"hello"));
        assert!(!file.path().exists());

        let stored = store.get("bucket", &request.object_key()).unwrap();
        assert_eq!(stored.data, Bytes::from_static(b"hello"));
        assert_eq!(
            stored.metadata.content_type.as_deref(),
            Some("text/plain; charset=utf-8")
        );
    }

    #[tokio::test]
    async fn test_close_failure_keeps_local_file() {
        let file = temp_file(b"payload");
        let path = file.path().to_str().unwrap().to_string();
        let request = request_for(&path, 1024, 60);

        let mut uploader = Uploader::new(&FailingCloseStore, &request);
        let err = uploader
            .run(Instant::now() + request.timeout())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Finalize(_)));
        assert_eq!(err.exit_code(), EXIT_FINALIZE);
        assert_eq!(uploader.state(), TransferState::Failed);
        assert!(file.path().exists());
    }

    #[tokio::test]
    async fn test_missing_file_is_local_io() {
        let request = request_for("/no/such/dir/file.bin", 1024, 60);
        let store = MemoryStore::new();

        let err = Uploader::new(&store, &request)
            .run(Instant::now() + request.timeout())
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::LocalIo { .. }));
        assert_eq!(err.exit_code(), EXIT_LOCAL_IO);
        assert!(store.is_empty());
    }

    #[test]
    fn test_deadline_exit_codes_follow_stage() {
        let timeout = Duration::from_secs(1);
        let code = |stage| UploadError::DeadlineExceeded { timeout, stage }.exit_code();
        assert_eq!(code(Stage::Connect), EXIT_INIT);
        assert_eq!(code(Stage::Open), EXIT_TRANSFER);
        assert_eq!(code(Stage::Copy), EXIT_TRANSFER);
        assert_eq!(code(Stage::Close), EXIT_FINALIZE);
    }

    #[test]
    fn test_terminal_states() {
        assert!(TransferState::Failed.is_terminal());
        assert!(TransferState::LocalFileRemoved.is_terminal());
        assert!(!TransferState::Closed.is_terminal());
    }
}
