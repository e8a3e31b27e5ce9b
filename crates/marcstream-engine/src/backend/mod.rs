//! Transport backends
//!
//! A [`Backend`] turns a [`Locator`] into a live byte source or sink and
//! resolves `@latest`/`@glob` markers by listing the marker's container.
//! [`Backends`] dispatches on the locator scheme.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use marcstream_common::{Error, Locator, MarkerKind, Result, VirtualMarker};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::config::BackendSettings;

pub mod file;
pub mod http;
pub mod memory;
pub mod s3;
pub mod sftp;
pub mod stdio;

pub use file::FileBackend;
pub use http::HttpBackend;
pub use memory::MemoryStore;
pub use s3::{AwsConnector, ObjectStore, S3Backend, S3Connect, S3Target};
pub use sftp::SftpBackend;
pub use stdio::StdioBackend;

/// A stream of byte chunks read from a backend
pub type ByteSource = BoxStream<'static, std::io::Result<Bytes>>;

/// Destination for encoded bytes
#[async_trait]
pub trait ByteSink: Send {
    async fn write(&mut self, chunk: Bytes) -> Result<()>;

    /// Commit everything written so far; called once after the last write
    async fn finalize(&mut self) -> Result<()>;
}

/// Message from a streaming sink to the task that owns the upload
///
/// The upload commits only on `Finish`; a channel that closes without one
/// means the sink was dropped mid-run and the upload is abandoned.
#[derive(Debug)]
pub(crate) enum Upload {
    Chunk(Bytes),
    Finish,
}

/// One entry of a container listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub locator: Locator,
    pub name: String,
    pub modified: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait Backend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn open_source(&self, locator: &Locator) -> Result<ByteSource>;

    async fn open_sink(&self, locator: &Locator) -> Result<Box<dyn ByteSink>>;

    /// Direct children of a container, in listing order
    async fn list(&self, container: &Locator) -> Result<Vec<Entry>>;

    /// Replace an `@latest` marker by the most recently modified match
    async fn resolve_latest(&self, locator: &Locator) -> Result<Locator> {
        let Some(marker) = locator.marker() else {
            return Ok(locator.clone());
        };
        if marker.kind != MarkerKind::Latest {
            return Err(Error::InvalidLocator {
                locator: locator.to_string(),
                reason: "expected an @latest marker".to_string(),
            });
        }

        let entries = matching(&marker, self.list(&marker.container).await?);
        let latest = pick_latest(entries).ok_or_else(|| Error::NoMatch {
            container: marker.container.to_string(),
            suffix: marker.suffix.clone(),
        })?;

        info!(from = %locator, to = %latest.locator, "resolved latest entry");
        Ok(latest.locator)
    }

    /// Expand an `@glob` marker into every match
    async fn resolve_glob(&self, locator: &Locator) -> Result<Vec<Locator>> {
        let Some(marker) = locator.marker() else {
            return Ok(vec![locator.clone()]);
        };
        if marker.kind != MarkerKind::Glob {
            return Err(Error::InvalidLocator {
                locator: locator.to_string(),
                reason: "expected an @glob marker".to_string(),
            });
        }

        let entries = matching(&marker, self.list(&marker.container).await?);
        debug!(container = %marker.container, matches = entries.len(), "expanded glob");
        Ok(entries.into_iter().map(|entry| entry.locator).collect())
    }
}

/// Entries whose name ends with the marker suffix
pub fn matching(marker: &VirtualMarker, entries: Vec<Entry>) -> Vec<Entry> {
    entries
        .into_iter()
        .filter(|entry| marker.matches(&entry.name))
        .collect()
}

/// Entry with the greatest modification time; the first one wins ties
pub fn pick_latest(entries: Vec<Entry>) -> Option<Entry> {
    let mut best: Option<Entry> = None;
    for entry in entries {
        let Some(modified) = entry.modified else {
            continue;
        };
        match &best {
            Some(current) if current.modified >= Some(modified) => {},
            _ => best = Some(entry),
        }
    }
    best
}

/// Scheme-keyed backend table
#[derive(Clone, Default)]
pub struct Backends {
    by_scheme: HashMap<String, Arc<dyn Backend>>,
}

impl Backends {
    pub fn empty() -> Self {
        Self::default()
    }

    /// All built-in backends
    pub fn new(settings: BackendSettings) -> Result<Self> {
        settings.s3.validate()?;
        let http: Arc<dyn Backend> = Arc::new(HttpBackend::new()?);
        let s3: Arc<dyn Backend> = Arc::new(S3Backend::new(settings.s3.clone()));
        let stdio: Arc<dyn Backend> = Arc::new(StdioBackend);

        let mut backends = Self::empty();
        backends.register("file", Arc::new(FileBackend));
        backends.register("http", http.clone());
        backends.register("https", http);
        backends.register("s3", s3.clone());
        backends.register("s3s", s3);
        backends.register("sftp", Arc::new(SftpBackend::new(settings.sftp)));
        backends.register("stdin", stdio.clone());
        backends.register("stdout", stdio);
        Ok(backends)
    }

    pub fn register(&mut self, scheme: &str, backend: Arc<dyn Backend>) {
        self.by_scheme.insert(scheme.to_lowercase(), backend);
    }

    pub fn for_locator(&self, locator: &Locator) -> Result<Arc<dyn Backend>> {
        self.by_scheme
            .get(locator.scheme())
            .cloned()
            .ok_or_else(|| Error::UnsupportedScheme(locator.scheme().to_string()))
    }

    #[instrument(skip(self))]
    pub async fn resolve_latest(&self, locator: &Locator) -> Result<Locator> {
        self.for_locator(locator)?.resolve_latest(locator).await
    }

    #[instrument(skip(self))]
    pub async fn resolve_glob(&self, locator: &Locator) -> Result<Vec<Locator>> {
        self.for_locator(locator)?.resolve_glob(locator).await
    }

    pub async fn open_source(&self, locator: &Locator) -> Result<ByteSource> {
        let backend = self.for_locator(locator)?;
        debug!(%locator, backend = backend.name(), "opening source");
        backend.open_source(locator).await
    }

    pub async fn open_sink(&self, locator: &Locator) -> Result<Box<dyn ByteSink>> {
        let backend = self.for_locator(locator)?;
        debug!(%locator, backend = backend.name(), "opening sink");
        backend.open_sink(locator).await
    }
}
