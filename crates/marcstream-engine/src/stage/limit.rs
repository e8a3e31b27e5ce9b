//! Skip/limit filter

use super::{Flow, Outlet, Stage};
use crate::item::Item;
use async_trait::async_trait;
use marcstream_common::Result;
use tracing::debug;

/// Drops the first `skip` items, then passes `count` items and stops at the next one
pub struct SkipLimit {
    skip: u64,
    count: Option<u64>,
    seen: u64,
    emitted: u64,
}

impl SkipLimit {
    pub fn new(skip: u64, count: Option<u64>) -> Self {
        Self {
            skip,
            count,
            seen: 0,
            emitted: 0,
        }
    }

    fn exhausted(&self) -> bool {
        self.count.is_some_and(|count| self.emitted >= count)
    }
}

#[async_trait]
impl Stage for SkipLimit {
    fn name(&self) -> &str {
        "skip-limit"
    }

    async fn process(&mut self, item: Item, out: &mut Outlet) -> Result<Flow> {
        self.seen += 1;
        if self.seen <= self.skip {
            return Ok(Flow::Continue);
        }
        // the stop waits for an item past the limit, so an input that ends
        // exactly at the limit finishes normally
        if self.exhausted() {
            debug!(emitted = self.emitted, "limit reached");
            return Ok(Flow::Stop);
        }

        out.push(item).await?;
        self.emitted += 1;
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn items(n: u64) -> Vec<Item> {
        (0..n).map(|i| Item::Object(json!(i))).collect()
    }

    #[tokio::test]
    async fn test_skip_then_count_stops() {
        let mut stage = SkipLimit::new(3, Some(4));
        let mut out = Outlet::Collect(Vec::new());
        let mut stopped_at = None;

        for (i, item) in items(20).into_iter().enumerate() {
            if stage.process(item, &mut out).await.unwrap() == Flow::Stop {
                stopped_at = Some(i);
                break;
            }
        }

        assert_eq!(stopped_at, Some(7));
        assert_eq!(
            out.into_items(),
            vec![
                Item::Object(json!(3)),
                Item::Object(json!(4)),
                Item::Object(json!(5)),
                Item::Object(json!(6)),
            ]
        );
    }

    #[tokio::test]
    async fn test_input_ending_at_limit_does_not_stop() {
        let mut stage = SkipLimit::new(2, Some(3));
        let mut out = Outlet::Collect(Vec::new());
        for item in items(5) {
            assert_eq!(stage.process(item, &mut out).await.unwrap(), Flow::Continue);
        }
        assert_eq!(out.into_items().len(), 3);
    }

    #[tokio::test]
    async fn test_skip_only_never_stops() {
        let mut stage = SkipLimit::new(2, None);
        let out = crate::stage::drive(&mut stage, items(5)).await.unwrap();
        assert_eq!(out.len(), 3);
    }

    #[tokio::test]
    async fn test_zero_count_stops_without_output() {
        let mut stage = SkipLimit::new(0, Some(0));
        let mut out = Outlet::Collect(Vec::new());
        let flow = stage.process(Item::Object(json!(1)), &mut out).await.unwrap();
        assert_eq!(flow, Flow::Stop);
        assert!(out.into_items().is_empty());
    }
}
