//! Streaming PutObject writer
//!
//! The first write starts a single PUT whose body is fed through a bounded
//! channel, so memory use stays at a few chunks and backpressure from the
//! socket reaches the caller. Close ends the body and waits for the response.

use super::{Authorization, Dialect};
use crate::store::{ObjectInfo, ObjectMetadata, ObjectWriter, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::SinkExt;
use serde::Deserialize;
use tokio::task::JoinHandle;

/// Chunks buffered between the caller and the HTTP body
const CHANNEL_DEPTH: usize = 4;

/// Error codes a backend uses to reject a body whose digest does not match
const CHECKSUM_ERROR_CODES: &[&str] = &["BadDigest", "InvalidDigest", "XAmzContentChecksumMismatch"];

type BodySender = mpsc::Sender<Result<Bytes, std::io::Error>>;

enum WriterState {
    /// Opened, nothing sent yet
    Pending,
    Streaming {
        sender: BodySender,
        response: JoinHandle<reqwest::Result<reqwest::Response>>,
        written: u64,
    },
    Finished,
}

/// S3 XML error document
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ErrorResponse {
    code: String,
    #[serde(default)]
    message: String,
}

/// Write stream for one object
pub struct S3ObjectWriter {
    http: reqwest::Client,
    authorization: Authorization,
    dialect: Dialect,
    bucket: String,
    key: String,
    url: String,
    metadata: ObjectMetadata,
    state: WriterState,
}

impl S3ObjectWriter {
    pub(crate) fn new(
        http: reqwest::Client,
        authorization: Authorization,
        dialect: Dialect,
        bucket: &str,
        key: &str,
        url: String,
    ) -> Self {
        Self {
            http,
            authorization,
            dialect,
            bucket: bucket.to_string(),
            key: key.to_string(),
            url,
            metadata: ObjectMetadata::default(),
            state: WriterState::Pending,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn request_headers(&self, content_length: u64) -> Result<Vec<(String, String)>, StorageError> {
        let mut headers = vec![("content-length".to_string(), content_length.to_string())];
        if let Some(content_type) = &self.metadata.content_type {
            headers.push(("content-type".to_string(), content_type.clone()));
        }
        if let Some(crc) = self.metadata.crc32c {
            headers.extend(
                self.dialect
                    .checksum_headers(crc)
                    .into_iter()
                    .map(|(name, value)| (name.to_string(), value)),
            );
        }

        let unsigned: Vec<(&str, &str)> = headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();
        let auth_headers = self
            .authorization
            .headers("PUT", &self.url, &unsigned)
            .await
            .map_err(|e| StorageError::Request(e.to_string()))?;
        headers.extend(auth_headers);

        Ok(headers)
    }

    /// Send the request headers and start streaming the body.
    async fn start(&mut self) -> Result<(), StorageError> {
        let content_length = self.metadata.content_length.ok_or_else(|| {
            StorageError::Request("content length must be set before writing".into())
        })?;
        let headers = self.request_headers(content_length).await?;

        let (sender, receiver) = mpsc::channel(CHANNEL_DEPTH);
        let mut request = self
            .http
            .put(&self.url)
            .body(reqwest::Body::wrap_stream(receiver));
        for (name, value) in &headers {
            request = request.header(name.as_str(), value.as_str());
        }

        tracing::debug!(url = %self.url, content_length, "Starting PutObject");
        self.state = WriterState::Streaming {
            sender,
            response: tokio::spawn(request.send()),
            written: 0,
        };
        Ok(())
    }

    /// The body was rejected mid-stream; report why.
    async fn abandon(&mut self) -> StorageError {
        match std::mem::replace(&mut self.state, WriterState::Finished) {
            WriterState::Streaming {
                sender, response, ..
            } => {
                drop(sender);
                match response.await {
                    Ok(Ok(resp)) if !resp.status().is_success() => {
                        let status = resp.status().as_u16();
                        let body = resp.text().await.unwrap_or_default();
                        parse_error(status, &body)
                    }
                    Ok(Ok(resp)) => StorageError::Request(format!(
                        "server answered {} before the body was complete",
                        resp.status()
                    )),
                    Ok(Err(e)) => StorageError::Request(e.to_string()),
                    Err(e) => StorageError::Request(e.to_string()),
                }
            }
            _ => StorageError::Closed,
        }
    }

    async fn finish(
        &self,
        response: reqwest::Response,
        written: u64,
    ) -> Result<ObjectInfo, StorageError> {
        let status = response.status();
        let span = tracing::Span::current();
        span.record("http.status_code", status.as_u16());

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(parse_error(status.as_u16(), &body));
        }

        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if let Some(etag) = &etag {
            span.record("s3.etag", etag.as_str());
        }

        let echoed = self.dialect.echoed_crc32c(response.headers());
        if let (Some(sent), Some(stored)) = (self.metadata.crc32c, echoed) {
            if sent != stored {
                return Err(StorageError::ChecksumMismatch(format!(
                    "sent crc32c {}, server stored {}",
                    sent, stored
                )));
            }
        }

        Ok(ObjectInfo {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
            size: written,
            etag,
            crc32c: echoed.or(self.metadata.crc32c),
        })
    }
}

fn parse_error(status: u16, body: &str) -> StorageError {
    match quick_xml::de::from_str::<ErrorResponse>(body) {
        Ok(err) if CHECKSUM_ERROR_CODES.contains(&err.code.as_str()) => {
            StorageError::ChecksumMismatch(format!("{}: {}", err.code, err.message))
        }
        Ok(err) => StorageError::Response {
            status,
            code: err.code,
            message: err.message,
        },
        Err(_) => StorageError::Response {
            status,
            code: reqwest::StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or("Unknown")
                .to_string(),
            message: body.chars().take(256).collect(),
        },
    }
}

#[async_trait]
impl ObjectWriter for S3ObjectWriter {
    fn set_metadata(&mut self, metadata: ObjectMetadata) -> Result<(), StorageError> {
        match self.state {
            WriterState::Pending => {
                self.metadata = metadata;
                Ok(())
            }
            WriterState::Streaming { .. } => Err(StorageError::MetadataAfterWrite),
            WriterState::Finished => Err(StorageError::Closed),
        }
    }

    async fn write(&mut self, chunk: Bytes) -> Result<(), StorageError> {
        if matches!(self.state, WriterState::Pending) {
            self.start().await?;
        }

        let len = chunk.len() as u64;
        let limit = self.metadata.content_length;
        let WriterState::Streaming {
            sender, written, ..
        } = &mut self.state
        else {
            return Err(StorageError::Closed);
        };

        if let Some(limit) = limit {
            if *written + len > limit {
                return Err(StorageError::Request(format!(
                    "write of {} bytes exceeds declared length {}",
                    len, limit
                )));
            }
        }

        if sender.send(Ok(chunk)).await.is_err() {
            return Err(self.abandon().await);
        }
        *written += len;
        Ok(())
    }

    #[tracing::instrument(
        name = "s3.put_object",
        skip(self),
        fields(
            s3.bucket = %self.bucket,
            s3.key = %self.key,
            upload.bytes = tracing::field::Empty,
            s3.etag = tracing::field::Empty,
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn close(mut self) -> Result<ObjectInfo, StorageError> {
        if matches!(self.state, WriterState::Pending) {
            self.start().await?;
        }

        let WriterState::Streaming {
            sender,
            response,
            written,
        } = std::mem::replace(&mut self.state, WriterState::Finished)
        else {
            return Err(StorageError::Closed);
        };
        drop(sender);
        tracing::Span::current().record("upload.bytes", written);

        if let Some(expected) = self.metadata.content_length {
            if written != expected {
                response.abort();
                return Err(StorageError::Request(format!(
                    "closed after {} of {} declared bytes",
                    written, expected
                )));
            }
        }

        let response = match response.await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(StorageError::Request(e.to_string())),
            Err(e) => return Err(StorageError::Request(e.to_string())),
        };

        let info = self.finish(response, written).await?;
        tracing::info!(etag = ?info.etag, bytes = info.size, "PutObject completed");
        Ok(info)
    }
}

impl Drop for S3ObjectWriter {
    fn drop(&mut self) {
        if let WriterState::Streaming { response, .. } = &self.state {
            response.abort();
        }
    }
}
