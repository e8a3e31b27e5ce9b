//! Streaming gzip decompression

use super::{unexpected, Flow, Outlet, Stage};
use crate::item::Item;
use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::MultiGzDecoder;
use marcstream_common::{Error, Result};
use std::io::Write;
use tracing::debug;

/// Inflates gzip chunks as they arrive, member after member; corrupt input
/// aborts the pipeline
pub struct Gunzip {
    decoder: MultiGzDecoder<Vec<u8>>,
    consumed: u64,
}

impl Gunzip {
    pub fn new() -> Self {
        Self {
            decoder: MultiGzDecoder::new(Vec::new()),
            consumed: 0,
        }
    }

    async fn drain(&mut self, out: &mut Outlet) -> Result<()> {
        let inflated = std::mem::take(self.decoder.get_mut());
        if !inflated.is_empty() {
            out.push(Item::Bytes(Bytes::from(inflated))).await?;
        }
        Ok(())
    }
}

impl Default for Gunzip {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for Gunzip {
    fn name(&self) -> &str {
        "gunzip"
    }

    async fn process(&mut self, item: Item, out: &mut Outlet) -> Result<Flow> {
        let Item::Bytes(chunk) = item else {
            return Err(unexpected(self, &item));
        };
        self.consumed += chunk.len() as u64;
        self.decoder
            .write_all(&chunk)
            .map_err(|e| Error::malformed("gunzip", e))?;
        self.drain(out).await?;
        Ok(Flow::Continue)
    }

    async fn flush(&mut self, out: &mut Outlet) -> Result<()> {
        self.decoder
            .try_finish()
            .map_err(|e| Error::malformed("gunzip", e))?;
        self.drain(out).await?;
        debug!(compressed = self.consumed, "gzip stream finished");
        Ok(())
    }
}
