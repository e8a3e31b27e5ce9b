//! In-memory object store
//!
//! Implements [`ObjectStore`] and [`S3Connect`] over a shared map so
//! pipelines can target object storage without a server. Clones share state.

use super::s3::{CompletedPart, ListPage, ObjectInfo, ObjectStore, S3Connect, S3Target};
use super::ByteSource;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use marcstream_common::Result;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

/// Calls observed by the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallLog {
    pub put: usize,
    pub create_multipart: usize,
    pub complete: usize,
    pub part_numbers: Vec<i32>,
    pub part_sizes: Vec<usize>,
}

struct Pending {
    parts: BTreeMap<i32, Bytes>,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<(String, String), (Bytes, DateTime<Utc>)>,
    uploads: HashMap<String, Pending>,
    next_upload: u64,
    calls: CallLog,
    fail_parts: bool,
}

#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    page_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            page_size: 1000,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(&self, bucket: &str, key: &str, data: impl Into<Bytes>, modified: DateTime<Utc>) {
        self.lock()
            .objects
            .insert((bucket.to_string(), key.to_string()), (data.into(), modified));
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.lock()
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|(data, _)| data.clone())
    }

    pub fn calls(&self) -> CallLog {
        self.lock().calls.clone()
    }

    /// Make every subsequent part upload fail
    pub fn fail_part_uploads(&self, fail: bool) {
        self.lock().fail_parts = fail;
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> anyhow::Result<ListPage> {
        let start: usize = match continuation {
            Some(token) => token.parse()?,
            None => 0,
        };
        let inner = self.lock();
        let matching: Vec<ObjectInfo> = inner
            .objects
            .iter()
            .filter(|((b, key), _)| {
                b == bucket
                    && key.starts_with(prefix)
                    && !key[prefix.len()..].contains('/')
            })
            .map(|((_, key), (_, modified))| ObjectInfo {
                key: key.clone(),
                last_modified: Some(*modified),
            })
            .collect();

        let end = (start + self.page_size).min(matching.len());
        let objects = matching.get(start..end).map(<[_]>::to_vec).unwrap_or_default();
        let next = (end < matching.len()).then(|| end.to_string());
        Ok(ListPage { objects, next })
    }

    async fn get(&self, bucket: &str, key: &str) -> anyhow::Result<ByteSource> {
        let data = self
            .object(bucket, key)
            .ok_or_else(|| anyhow::anyhow!("NoSuchKey: {}/{}", bucket, key))?;
        Ok(futures::stream::iter([Ok(data)]).boxed())
    }

    async fn put(&self, bucket: &str, key: &str, body: Bytes) -> anyhow::Result<()> {
        let mut inner = self.lock();
        inner.calls.put += 1;
        inner
            .objects
            .insert((bucket.to_string(), key.to_string()), (body, Utc::now()));
        Ok(())
    }

    async fn create_multipart(&self, _bucket: &str, _key: &str) -> anyhow::Result<String> {
        let mut inner = self.lock();
        inner.calls.create_multipart += 1;
        inner.next_upload += 1;
        let id = format!("upload-{}", inner.next_upload);
        inner.uploads.insert(
            id.clone(),
            Pending {
                parts: BTreeMap::new(),
            },
        );
        Ok(id)
    }

    async fn upload_part(
        &self,
        _bucket: &str,
        _key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> anyhow::Result<String> {
        let mut inner = self.lock();
        if inner.fail_parts {
            anyhow::bail!("part upload rejected");
        }
        inner.calls.part_numbers.push(part_number);
        inner.calls.part_sizes.push(body.len());
        let pending = inner
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| anyhow::anyhow!("NoSuchUpload: {}", upload_id))?;
        pending.parts.insert(part_number, body);
        Ok(format!("\"etag-{}\"", part_number))
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> anyhow::Result<()> {
        let mut inner = self.lock();
        inner.calls.complete += 1;
        let pending = inner
            .uploads
            .remove(upload_id)
            .ok_or_else(|| anyhow::anyhow!("NoSuchUpload: {}", upload_id))?;

        let mut data = Vec::new();
        for part in parts {
            let body = pending
                .parts
                .get(&part.part_number)
                .ok_or_else(|| anyhow::anyhow!("InvalidPart: {}", part.part_number))?;
            data.extend_from_slice(body);
        }
        inner.objects.insert(
            (bucket.to_string(), key.to_string()),
            (Bytes::from(data), Utc::now()),
        );
        Ok(())
    }
}

#[async_trait]
impl S3Connect for MemoryStore {
    async fn connect(&self, _target: &S3Target) -> Result<Arc<dyn ObjectStore>> {
        Ok(Arc::new(self.clone()))
    }
}
