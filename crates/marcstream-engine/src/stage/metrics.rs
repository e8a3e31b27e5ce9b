//! Record counting and progress logging

use super::{Flow, Outlet, Stage};
use crate::config::PROGRESS_LOG_INTERVAL;
use crate::item::Item;
use async_trait::async_trait;
use marcstream_common::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Shared record counter, readable while the pipeline runs
#[derive(Debug, Clone, Default)]
pub struct RecordCounter(Arc<AtomicU64>);

impl RecordCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    fn increment(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Pass-through stage counting every item
pub struct Metrics {
    counter: RecordCounter,
    interval: u64,
}

impl Metrics {
    pub fn new(counter: RecordCounter) -> Self {
        Self {
            counter,
            interval: PROGRESS_LOG_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: u64) -> Self {
        self.interval = interval.max(1);
        self
    }

    pub fn counter(&self) -> &RecordCounter {
        &self.counter
    }
}

#[async_trait]
impl Stage for Metrics {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn process(&mut self, item: Item, out: &mut Outlet) -> Result<Flow> {
        let seen = self.counter.increment();
        if seen % self.interval == 0 {
            info!("record: {}", seen);
        }
        out.push(item).await?;
        Ok(Flow::Continue)
    }

    async fn flush(&mut self, _out: &mut Outlet) -> Result<()> {
        info!(records = self.counter.get(), "total records");
        Ok(())
    }
}
