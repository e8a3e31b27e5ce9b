//! Standard input and output

use super::{Backend, ByteSink, ByteSource, Entry};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use marcstream_common::{Error, Locator, Result};
use tokio::io::{AsyncWriteExt, Stdout};
use tokio_util::io::ReaderStream;

/// `stdin:` for reading, `stdout:` for writing
pub struct StdioBackend;

#[async_trait]
impl Backend for StdioBackend {
    fn name(&self) -> &'static str {
        "stdio"
    }

    async fn open_source(&self, locator: &Locator) -> Result<ByteSource> {
        if locator.scheme() != "stdin" {
            return Err(Error::InvalidLocator {
                locator: locator.to_string(),
                reason: "only stdin: can be read".to_string(),
            });
        }
        Ok(ReaderStream::new(tokio::io::stdin()).boxed())
    }

    async fn open_sink(&self, locator: &Locator) -> Result<Box<dyn ByteSink>> {
        if locator.scheme() != "stdout" {
            return Err(Error::InvalidLocator {
                locator: locator.to_string(),
                reason: "only stdout: can be written".to_string(),
            });
        }
        Ok(Box::new(StdoutSink {
            out: tokio::io::stdout(),
        }))
    }

    async fn list(&self, container: &Locator) -> Result<Vec<Entry>> {
        Err(Error::Listing {
            container: container.to_string(),
            source: anyhow::anyhow!("standard streams cannot be listed"),
        })
    }
}

struct StdoutSink {
    out: Stdout,
}

#[async_trait]
impl ByteSink for StdoutSink {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        self.out.write_all(&chunk).await?;
        Ok(())
    }

    async fn finalize(&mut self) -> Result<()> {
        self.out.flush().await?;
        Ok(())
    }
}
