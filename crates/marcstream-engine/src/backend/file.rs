//! Local filesystem backend

use super::{Backend, ByteSink, ByteSource, Entry};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use marcstream_common::{Error, Locator, Result};
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::io::ReaderStream;
use tracing::debug;

pub struct FileBackend;

fn local_path(locator: &Locator) -> Result<PathBuf> {
    locator.file_path().ok_or_else(|| Error::InvalidLocator {
        locator: locator.to_string(),
        reason: "not a local file path".to_string(),
    })
}

#[async_trait]
impl Backend for FileBackend {
    fn name(&self) -> &'static str {
        "file"
    }

    async fn open_source(&self, locator: &Locator) -> Result<ByteSource> {
        let path = local_path(locator)?;
        let file = File::open(&path)
            .await
            .map_err(|e| Error::transport(locator, e))?;
        Ok(ReaderStream::new(file).boxed())
    }

    async fn open_sink(&self, locator: &Locator) -> Result<Box<dyn ByteSink>> {
        let path = local_path(locator)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::transport(locator, e))?;
        }
        let file = File::create(&path)
            .await
            .map_err(|e| Error::transport(locator, e))?;
        Ok(Box::new(FileSink {
            locator: locator.clone(),
            writer: BufWriter::new(file),
        }))
    }

    async fn list(&self, container: &Locator) -> Result<Vec<Entry>> {
        let listing_error = |e: std::io::Error| Error::Listing {
            container: container.to_string(),
            source: e.into(),
        };
        let dir = local_path(container)?;
        let mut reader = tokio::fs::read_dir(&dir).await.map_err(listing_error)?;

        let mut entries = Vec::new();
        while let Some(dirent) = reader.next_entry().await.map_err(listing_error)? {
            let metadata = dirent.metadata().await.map_err(listing_error)?;
            if !metadata.is_file() {
                continue;
            }
            let name = dirent.file_name().to_string_lossy().into_owned();
            entries.push(Entry {
                locator: container.with_path(&format!("{}{}", container.path(), name)),
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
                name,
            });
        }

        // directory order is unspecified
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(dir = %dir.display(), entries = entries.len(), "listed directory");
        Ok(entries)
    }
}

struct FileSink {
    locator: Locator,
    writer: BufWriter<File>,
}

#[async_trait]
impl ByteSink for FileSink {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        self.writer
            .write_all(&chunk)
            .await
            .map_err(|e| Error::transport(&self.locator, e))
    }

    async fn finalize(&mut self) -> Result<()> {
        self.writer
            .flush()
            .await
            .map_err(|e| Error::transport(&self.locator, e))
    }
}
