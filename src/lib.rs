//! Throttle Uploadr Library
//!
//! Uploads a single local file to S3-compatible object storage at a bounded
//! rate, with a CRC32C integrity check and one overall deadline. The local
//! file is removed only after the remote object was finalized.
//!
//! # Features
//!
//! - **Token bucket throttling**: bursts up to one second of data, then a
//!   steady configured rate
//! - **Integrity**: CRC32C computed locally and verified by the backend at close
//! - **Content sniffing**: MIME type detected from the first 512 bytes
//! - **S3 and GCS**: `gs://` targets use GCS conventions, others plain S3
//!
//! # Example
//!
//! ```no_run
//! use throttle_uploadr::config::{StorageConfig, TransferConfig, TransferRequest};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let request = TransferRequest::new(
//!         "photo.jpg",
//!         "gs://mybucket/incoming",
//!         &TransferConfig::default(),
//!     )?;
//!     let report = throttle_uploadr::upload::run(&request, &StorageConfig::default()).await?;
//!     println!("stored {} ({} bytes)", report.object.key, report.object.size);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod metrics;
pub mod s3;
pub mod store;
pub mod target;
pub mod tracing;
pub mod upload;

// Re-export commonly used types
pub use config::{Config, TransferRequest};
pub use upload::{TransferReport, UploadError};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
