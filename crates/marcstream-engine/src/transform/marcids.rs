use crate::item::Item;
use crate::plugin::{PluginOptions, TransformPlugin};
use crate::stage::{BoxStage, Flow, Outlet, Stage};
use async_trait::async_trait;
use marcstream_common::Result;
use serde_json::json;
use tracing::debug;

/// Maps each record to `{ "id": <001> }`
pub struct MarcIds;

#[async_trait]
impl TransformPlugin for MarcIds {
    async fn create(&self, _options: &PluginOptions) -> Result<BoxStage> {
        Ok(Box::new(MarcIdStage))
    }
}

pub struct MarcIdStage;

#[async_trait]
impl Stage for MarcIdStage {
    fn name(&self) -> &str {
        "marcids"
    }

    async fn process(&mut self, item: Item, out: &mut Outlet) -> Result<Flow> {
        // records without exactly one 001, and non-records, are dropped
        match &item {
            Item::Record(record) => match record.id() {
                Some(id) => out.push(Item::Object(json!({ "id": id }))).await?,
                None => debug!(fields = record.fields.len(), "record without a single 001"),
            },
            other => debug!(kind = other.kind(), "skipping non-record item"),
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::stage::drive;
    use marcstream_common::{Field, Record};

    #[tokio::test]
    async fn test_marcids() {
        let mut stage = MarcIds.create(&PluginOptions::default()).await.unwrap();
        let items = vec![
            Item::Record(Record::new(vec![Field::control("001", "X1")])),
            Item::Record(Record::new(vec![
                Field::control("001", "A"),
                Field::control("001", "B"),
            ])),
            Item::Record(Record::default()),
            Item::Object(json!({"id": "kept?"})),
            Item::Record(Record::new(vec![Field::control("001", "X2")])),
        ];
        let out = drive(stage.as_mut(), items).await.unwrap();
        assert_eq!(
            out,
            vec![
                Item::Object(json!({"id": "X1"})),
                Item::Object(json!({"id": "X2"})),
            ]
        );
    }
}
