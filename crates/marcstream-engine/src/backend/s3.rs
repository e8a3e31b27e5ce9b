//! Object-storage backend
//!
//! Locators look like `s3://host[:port]/bucket/key`; `s3s` selects https for
//! the endpoint. Clients use path-style addressing.

use super::{Backend, ByteSink, ByteSource, Entry};
use crate::config::S3Settings;
use crate::multipart::MultipartUploadSink;
use anyhow::Context;
use async_trait::async_trait;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart as AwsCompletedPart},
    Client,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use marcstream_common::{Error, Locator, Result};
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, instrument};

/// Where one stream lives and how to authenticate
#[derive(Clone, PartialEq, Eq)]
pub struct S3Target {
    pub endpoint: String,
    pub bucket: String,
    pub key: String,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

impl std::fmt::Debug for S3Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Target")
            .field("endpoint", &self.endpoint)
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .field("region", &self.region)
            .field("access_key", &self.access_key.as_ref().map(|_| "***"))
            .field("secret_key", &self.secret_key.as_ref().map(|_| "***"))
            .finish()
    }
}

impl S3Target {
    /// Split a locator into endpoint, bucket and key; locator credentials win over settings
    pub fn from_locator(locator: &Locator, settings: &S3Settings) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidLocator {
            locator: locator.to_string(),
            reason: reason.to_string(),
        };

        let host = locator.host().ok_or_else(|| invalid("missing endpoint host"))?;
        let protocol = if locator.scheme() == "s3s" { "https" } else { "http" };
        let endpoint = match locator.port() {
            Some(port) => format!("{}://{}:{}", protocol, host, port),
            None => format!("{}://{}", protocol, host),
        };

        let path = locator.path();
        let path = path.trim_start_matches('/');
        let (bucket, key) = path.split_once('/').unwrap_or((path, ""));
        if bucket.is_empty() {
            return Err(invalid("missing bucket"));
        }

        let (access_key, secret_key) = match locator.username() {
            Some(user) => (Some(user), locator.password()),
            None => (settings.access_key.clone(), settings.secret_key.clone()),
        };

        Ok(Self {
            endpoint,
            bucket: bucket.to_string(),
            key: key.to_string(),
            region: settings.region.clone(),
            access_key,
            secret_key,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub last_modified: Option<DateTime<Utc>>,
}

/// One page of a listing, with the token for the next page
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectInfo>,
    pub next: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: i32,
    pub etag: String,
}

/// The object-storage operations the engine needs
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Objects directly under `prefix` (delimiter `/`)
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> anyhow::Result<ListPage>;

    async fn get(&self, bucket: &str, key: &str) -> anyhow::Result<ByteSource>;

    async fn put(&self, bucket: &str, key: &str, body: Bytes) -> anyhow::Result<()>;

    async fn create_multipart(&self, bucket: &str, key: &str) -> anyhow::Result<String>;

    /// Returns the part's ETag
    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> anyhow::Result<String>;

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> anyhow::Result<()>;
}

/// Creates a store connection; called once per opened stream
#[async_trait]
pub trait S3Connect: Send + Sync {
    async fn connect(&self, target: &S3Target) -> Result<Arc<dyn ObjectStore>>;
}

/// Connector building AWS SDK clients
pub struct AwsConnector;

#[async_trait]
impl S3Connect for AwsConnector {
    async fn connect(&self, target: &S3Target) -> Result<Arc<dyn ObjectStore>> {
        debug!("Initializing S3 client with config: {:?}", target);

        let region = Region::new(target.region.clone());
        let builder = match (&target.access_key, &target.secret_key) {
            (Some(access_key), Some(secret_key)) => {
                let credentials =
                    Credentials::new(access_key, secret_key, None, None, "marcstream");
                aws_sdk_s3::Config::builder()
                    .credentials_provider(credentials)
                    .region(region)
            },
            _ => {
                let shared = aws_config::defaults(aws_config::BehaviorVersion::latest())
                    .region(region)
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            },
        };

        let config = builder
            .endpoint_url(&target.endpoint)
            .force_path_style(true)
            .build();

        Ok(Arc::new(AwsStore {
            client: Client::from_conf(config),
        }))
    }
}

struct AwsStore {
    client: Client,
}

#[async_trait]
impl ObjectStore for AwsStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> anyhow::Result<ListPage> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .delimiter("/")
            .set_continuation_token(continuation)
            .send()
            .await
            .context("Failed to list objects")?;

        let objects = response
            .contents()
            .iter()
            .filter_map(|object| {
                Some(ObjectInfo {
                    key: object.key()?.to_string(),
                    last_modified: object
                        .last_modified()
                        .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos())),
                })
            })
            .collect();

        let next = if response.is_truncated().unwrap_or(false) {
            response.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ListPage { objects, next })
    }

    async fn get(&self, bucket: &str, key: &str) -> anyhow::Result<ByteSource> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("Failed to download {}", key))?;
        Ok(ReaderStream::new(response.body.into_async_read()).boxed())
    }

    async fn put(&self, bucket: &str, key: &str, body: Bytes) -> anyhow::Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .context("Failed to upload object")?;
        Ok(())
    }

    async fn create_multipart(&self, bucket: &str, key: &str) -> anyhow::Result<String> {
        let response = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .context("Failed to create multipart upload")?;
        response
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| anyhow::anyhow!("multipart upload without an upload id"))
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> anyhow::Result<String> {
        let response = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .with_context(|| format!("Failed to upload part {}", part_number))?;
        Ok(response.e_tag().unwrap_or_default().to_string())
    }

    async fn complete_multipart(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> anyhow::Result<()> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .iter()
                    .map(|part| {
                        AwsCompletedPart::builder()
                            .part_number(part.part_number)
                            .e_tag(&part.etag)
                            .build()
                    })
                    .collect(),
            ))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed)
            .send()
            .await
            .context("Failed to complete multipart upload")?;
        Ok(())
    }
}

pub struct S3Backend {
    settings: S3Settings,
    connector: Arc<dyn S3Connect>,
}

impl S3Backend {
    pub fn new(settings: S3Settings) -> Self {
        Self::with_connector(settings, Arc::new(AwsConnector))
    }

    pub fn with_connector(settings: S3Settings, connector: Arc<dyn S3Connect>) -> Self {
        Self {
            settings,
            connector,
        }
    }

    async fn connect(&self, locator: &Locator) -> Result<(S3Target, Arc<dyn ObjectStore>)> {
        let target = S3Target::from_locator(locator, &self.settings)?;
        let store = self.connector.connect(&target).await?;
        Ok((target, store))
    }
}

#[async_trait]
impl Backend for S3Backend {
    fn name(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self))]
    async fn open_source(&self, locator: &Locator) -> Result<ByteSource> {
        let (target, store) = self.connect(locator).await?;
        store
            .get(&target.bucket, &target.key)
            .await
            .map_err(|e| Error::transport(locator, e))
    }

    #[instrument(skip(self))]
    async fn open_sink(&self, locator: &Locator) -> Result<Box<dyn ByteSink>> {
        let (target, store) = self.connect(locator).await?;
        info!(bucket = %target.bucket, key = %target.key, part_size = self.settings.part_size, "opening multipart sink");
        Ok(Box::new(MultipartUploadSink::new(
            store,
            locator.clone(),
            target.bucket,
            target.key,
            self.settings.part_size,
        )))
    }

    async fn list(&self, container: &Locator) -> Result<Vec<Entry>> {
        let (target, store) = self.connect(container).await?;
        let prefix = target.key.clone();

        let mut entries = Vec::new();
        let mut continuation = None;
        loop {
            let page = store
                .list_page(&target.bucket, &prefix, continuation)
                .await
                .map_err(|source| Error::Listing {
                    container: container.to_string(),
                    source,
                })?;

            for object in page.objects {
                let name = object.key.strip_prefix(&prefix).unwrap_or(&object.key);
                if name.is_empty() || name.contains('/') {
                    continue;
                }
                entries.push(Entry {
                    locator: container.with_path(&format!("/{}/{}", target.bucket, object.key)),
                    name: name.to_string(),
                    modified: object.last_modified,
                });
            }

            match page.next {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }

        debug!(bucket = %target.bucket, %prefix, entries = entries.len(), "listed objects");
        Ok(entries)
    }
}
