//! Incremental tar extraction
//!
//! Regular file entries are emitted as one chunk each, in archive order.
//! Every entry is buffered in full before it is emitted. The archive is read
//! by the `tar` crate on a blocking thread; chunks reach it through a channel
//! bridged into a synchronous reader.

use super::{unexpected, Flow, Outlet, Stage};
use crate::item::Item;
use async_trait::async_trait;
use bytes::Bytes;
use marcstream_common::{Error, Result};
use std::io::Read;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::io::{StreamReader, SyncIoBridge};
use tracing::debug;

const INPUT_CHANNEL_CAPACITY: usize = 8;

type Extracted = std::result::Result<(String, Bytes), std::io::Error>;

/// Walk the archive, sending every regular file entry; returns the entry count
fn extract<R: Read>(reader: R, entries: mpsc::UnboundedSender<Extracted>) -> std::io::Result<u64> {
    let mut archive = tar::Archive::new(reader);
    let mut count = 0;
    for entry in archive.entries()? {
        let mut entry = entry?;
        count += 1;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let name = entry.path()?.to_string_lossy().into_owned();
        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data)?;
        if data.len() as u64 != entry.size() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("entry {} is truncated", name),
            ));
        }
        if entries.send(Ok((name, Bytes::from(data)))).is_err() {
            // stage went away
            break;
        }
    }
    Ok(count)
}

struct Worker {
    input: Option<mpsc::Sender<std::io::Result<Bytes>>>,
    entries: mpsc::UnboundedReceiver<Extracted>,
    handle: Option<JoinHandle<std::io::Result<u64>>>,
}

impl Worker {
    fn spawn() -> Self {
        let (input, rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
        let (entries_tx, entries) = mpsc::unbounded_channel();
        let reader = SyncIoBridge::new(StreamReader::new(ReceiverStream::new(rx)));
        let errors = entries_tx.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let result = extract(reader, entries_tx);
            if let Err(e) = &result {
                let _ = errors.send(Err(std::io::Error::new(e.kind(), e.to_string())));
            }
            result
        });
        Self {
            input: Some(input),
            entries,
            handle: Some(handle),
        }
    }

    /// Wait for the reader thread; its error is already queued as an entry
    async fn join(&mut self) -> Result<Option<u64>> {
        match self.handle.take() {
            Some(handle) => match handle.await {
                Ok(Ok(count)) => Ok(Some(count)),
                Ok(Err(_)) => Ok(None),
                Err(e) => Err(Error::Unknown(format!("tar reader failed: {}", e))),
            },
            None => Ok(None),
        }
    }
}

pub struct Untar {
    worker: Option<Worker>,
    entries: u64,
}

impl Untar {
    pub fn new() -> Self {
        Self {
            worker: None,
            entries: 0,
        }
    }

    async fn emit(&mut self, extracted: Extracted, out: &mut Outlet) -> Result<()> {
        let (name, data) = extracted.map_err(|e| Error::malformed("untar", e))?;
        self.entries += 1;
        debug!(entry = %name, bytes = data.len(), "extracted tar entry");
        if !data.is_empty() {
            out.push(Item::Bytes(data)).await?;
        }
        Ok(())
    }

    /// Forward entries the reader thread has finished so far
    async fn forward_ready(&mut self, out: &mut Outlet) -> Result<()> {
        while let Some(extracted) = self
            .worker
            .as_mut()
            .and_then(|worker| worker.entries.try_recv().ok())
        {
            self.emit(extracted, out).await?;
        }
        Ok(())
    }
}

impl Default for Untar {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for Untar {
    fn name(&self) -> &str {
        "untar"
    }

    async fn process(&mut self, item: Item, out: &mut Outlet) -> Result<Flow> {
        let Item::Bytes(chunk) = item else {
            return Err(unexpected(self, &item));
        };
        let worker = self.worker.get_or_insert_with(Worker::spawn);
        if let Some(input) = &worker.input {
            if input.send(Ok(chunk)).await.is_err() {
                // the reader stopped: end of archive or an error queued below
                worker.input = None;
            }
        }
        self.forward_ready(out).await?;
        Ok(Flow::Continue)
    }

    async fn flush(&mut self, out: &mut Outlet) -> Result<()> {
        let Some(mut worker) = self.worker.take() else {
            return Ok(());
        };
        worker.input = None;
        let archived = worker.join().await?;
        while let Some(extracted) = worker.entries.recv().await {
            self.emit(extracted, out).await?;
        }
        debug!(
            files = self.entries,
            entries = archived.unwrap_or_default(),
            "tar archive finished"
        );
        Ok(())
    }
}
