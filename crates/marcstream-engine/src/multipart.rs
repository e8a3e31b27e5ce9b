//! Chunked multipart upload to object storage
//!
//! Bytes are buffered and shipped as parts of exactly `part_size` bytes.
//! The multipart session starts lazily with the first part. On finalize the
//! remainder becomes the last part and the session is completed; a sink that
//! never uploaded a part writes an empty object directly instead.
//!
//! A failed part upload leaves the session open on the server.

use crate::backend::s3::{CompletedPart, ObjectStore};
use crate::backend::ByteSink;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use marcstream_common::{Error, Locator, Result};
use std::sync::Arc;
use tracing::{debug, info};

pub struct MultipartUploadSink {
    store: Arc<dyn ObjectStore>,
    locator: Locator,
    bucket: String,
    key: String,
    part_size: usize,
    upload_id: Option<String>,
    buffer: BytesMut,
    parts: Vec<CompletedPart>,
    finished: bool,
}

impl MultipartUploadSink {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        locator: Locator,
        bucket: impl Into<String>,
        key: impl Into<String>,
        part_size: usize,
    ) -> Self {
        Self {
            store,
            locator,
            bucket: bucket.into(),
            key: key.into(),
            part_size: part_size.max(1),
            upload_id: None,
            buffer: BytesMut::new(),
            parts: Vec::new(),
            finished: false,
        }
    }

    /// Parts uploaded so far
    pub fn parts(&self) -> &[CompletedPart] {
        &self.parts
    }

    async fn upload_part(&mut self, body: Bytes) -> Result<()> {
        let upload_id = match &self.upload_id {
            Some(id) => id.clone(),
            None => {
                let id = self
                    .store
                    .create_multipart(&self.bucket, &self.key)
                    .await
                    .map_err(|e| Error::transport(&self.locator, e))?;
                debug!(upload_id = %id, "started multipart upload");
                self.upload_id = Some(id.clone());
                id
            },
        };

        let part_number = self.parts.len() as i32 + 1;
        let size = body.len();
        let etag = self
            .store
            .upload_part(&self.bucket, &self.key, &upload_id, part_number, body)
            .await
            .map_err(|e| Error::transport(&self.locator, e))?;
        debug!(part_number, size, "uploaded part");

        self.parts.push(CompletedPart { part_number, etag });
        Ok(())
    }
}

#[async_trait]
impl ByteSink for MultipartUploadSink {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        self.buffer.extend_from_slice(&chunk);
        while self.buffer.len() >= self.part_size {
            let part = self.buffer.split_to(self.part_size).freeze();
            self.upload_part(part).await?;
        }
        Ok(())
    }

    async fn finalize(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        if !self.buffer.is_empty() {
            let last = self.buffer.split().freeze();
            self.upload_part(last).await?;
        }

        match &self.upload_id {
            Some(upload_id) => {
                self.store
                    .complete_multipart(&self.bucket, &self.key, upload_id, &self.parts)
                    .await
                    .map_err(|e| Error::transport(&self.locator, e))?;
                info!(locator = %self.locator, parts = self.parts.len(), "completed multipart upload");
            },
            None => {
                self.store
                    .put(&self.bucket, &self.key, Bytes::new())
                    .await
                    .map_err(|e| Error::transport(&self.locator, e))?;
                info!(locator = %self.locator, "wrote empty object");
            },
        }
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryStore;

    fn sink(store: &Arc<MemoryStore>, part_size: usize) -> MultipartUploadSink {
        MultipartUploadSink::new(
            store.clone(),
            Locator::parse("s3://minio/bucket/out.seq").unwrap(),
            "bucket",
            "out.seq",
            part_size,
        )
    }

    #[tokio::test]
    async fn test_empty_upload_writes_directly() {
        let store = Arc::new(MemoryStore::new());
        let mut sink = sink(&store, 5);
        sink.finalize().await.unwrap();

        let calls = store.calls();
        assert_eq!(calls.put, 1);
        assert_eq!(calls.create_multipart, 0);
        assert_eq!(calls.complete, 0);
        assert_eq!(store.object("bucket", "out.seq"), Some(Bytes::new()));
    }

    #[tokio::test]
    async fn test_parts_are_exact_and_sequential() {
        let store = Arc::new(MemoryStore::new());
        let mut sink = sink(&store, 4);
        sink.write(Bytes::from_static(b"abcdef")).await.unwrap();
        sink.write(Bytes::from_static(b"ghijk")).await.unwrap();
        sink.finalize().await.unwrap();

        let calls = store.calls();
        assert_eq!(calls.create_multipart, 1);
        assert_eq!(calls.complete, 1);
        assert_eq!(calls.put, 0);
        assert_eq!(calls.part_numbers, vec![1, 2, 3]);
        assert_eq!(calls.part_sizes, vec![4, 4, 3]);
        assert_eq!(
            store.object("bucket", "out.seq"),
            Some(Bytes::from_static(b"abcdefghijk"))
        );
    }

    #[tokio::test]
    async fn test_small_payload_is_single_part() {
        let store = Arc::new(MemoryStore::new());
        let mut sink = sink(&store, 1024);
        sink.write(Bytes::from_static(b"tiny")).await.unwrap();
        sink.finalize().await.unwrap();
        sink.finalize().await.unwrap();

        let calls = store.calls();
        assert_eq!(calls.part_numbers, vec![1]);
        assert_eq!(calls.complete, 1);
    }

    #[tokio::test]
    async fn test_failed_part_surfaces_transport_error() {
        let store = Arc::new(MemoryStore::new());
        store.fail_part_uploads(true);
        let mut sink = sink(&store, 2);
        let err = sink.write(Bytes::from_static(b"abc")).await.unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert_eq!(store.calls().complete, 0);
    }
}
