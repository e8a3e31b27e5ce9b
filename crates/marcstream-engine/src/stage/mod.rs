//! Pipeline stages
//!
//! A stage consumes one [`Item`] at a time and pushes zero or more items into
//! its [`Outlet`]. Pushing into a channel outlet suspends while the
//! downstream channel is full, which is how backpressure reaches the source.

use crate::item::Item;
use async_trait::async_trait;
use marcstream_common::{Error, Result};
use tokio::sync::mpsc;

pub mod gunzip;
pub mod limit;
pub mod metrics;
pub mod untar;

pub use gunzip::Gunzip;
pub use limit::SkipLimit;
pub use metrics::{Metrics, RecordCounter};
pub use untar::Untar;

/// What a stage wants after processing an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Controlled stop: upstream is shut down, downstream drains
    Stop,
}

/// Where a stage sends its output
pub enum Outlet {
    Channel(mpsc::Sender<Item>),
    /// In-memory collection, used for direct conversion
    Collect(Vec<Item>),
    Discard,
}

impl Outlet {
    pub async fn push(&mut self, item: Item) -> Result<()> {
        match self {
            Outlet::Channel(tx) => tx.send(item).await.map_err(|_| Error::DownstreamClosed),
            Outlet::Collect(items) => {
                items.push(item);
                Ok(())
            },
            Outlet::Discard => Ok(()),
        }
    }

    pub fn into_items(self) -> Vec<Item> {
        match self {
            Outlet::Collect(items) => items,
            _ => Vec::new(),
        }
    }
}

#[async_trait]
pub trait Stage: Send {
    fn name(&self) -> &str;

    async fn process(&mut self, item: Item, out: &mut Outlet) -> Result<Flow>;

    /// Called once when the input is exhausted or after a controlled stop
    async fn flush(&mut self, _out: &mut Outlet) -> Result<()> {
        Ok(())
    }
}

pub type BoxStage = Box<dyn Stage>;

/// Error for an item kind a stage does not accept
pub fn unexpected(stage: &dyn Stage, item: &Item) -> Error {
    Error::UnexpectedItem {
        stage: stage.name().to_string(),
        found: item.kind(),
    }
}

/// Run a stage over in-memory items and collect what it emits
pub async fn drive(stage: &mut dyn Stage, items: Vec<Item>) -> Result<Vec<Item>> {
    let mut out = Outlet::Collect(Vec::new());
    for item in items {
        if stage.process(item, &mut out).await? == Flow::Stop {
            break;
        }
    }
    stage.flush(&mut out).await?;
    Ok(out.into_items())
}
