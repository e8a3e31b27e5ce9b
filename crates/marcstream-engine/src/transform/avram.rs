use crate::item::Item;
use crate::plugin::{PluginOptions, TransformPlugin};
use crate::stage::{BoxStage, Flow, Outlet, Stage};
use async_trait::async_trait;
use marcstream_common::{Record, Result};
use serde_json::{json, Value};

/// Maps records to Avram field lists
///
/// Control fields become `{tag, value}`, data fields
/// `{tag, indicator1, indicator2, subfields: [code, value, ...]}`.
pub struct Avram;

#[async_trait]
impl TransformPlugin for Avram {
    async fn create(&self, _options: &PluginOptions) -> Result<BoxStage> {
        Ok(Box::new(AvramStage))
    }
}

pub struct AvramStage;

impl AvramStage {
    pub fn convert(record: &Record) -> Value {
        let fields: Vec<Value> = record
            .fields
            .iter()
            .map(|field| {
                if field.is_control() {
                    json!({ "tag": field.tag, "value": field.value() })
                } else {
                    let subfields: Vec<&str> = field
                        .subfields
                        .iter()
                        .flat_map(|(code, value)| [code.as_str(), value.as_str()])
                        .collect();
                    json!({
                        "tag": field.tag,
                        "indicator1": field.ind1,
                        "indicator2": field.ind2,
                        "subfields": subfields,
                    })
                }
            })
            .collect();
        json!({ "fields": fields })
    }
}

#[async_trait]
impl Stage for AvramStage {
    fn name(&self) -> &str {
        "avram"
    }

    async fn process(&mut self, item: Item, out: &mut Outlet) -> Result<Flow> {
        if let Item::Record(record) = &item {
            out.push(Item::Object(Self::convert(record))).await?;
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use marcstream_common::Field;

    #[test]
    fn test_convert() {
        let record = Record::new(vec![
            Field::control("LDR", "00000nam"),
            Field::control("001", "X1"),
            Field::new("100", "1", " ", vec![("a".into(), "Name".into()), ("d".into(), "1900-".into())]),
        ]);
        assert_eq!(
            AvramStage::convert(&record),
            json!({"fields": [
                {"tag": "LDR", "value": "00000nam"},
                {"tag": "001", "value": "X1"},
                {"tag": "100", "indicator1": "1", "indicator2": " ", "subfields": ["a", "Name", "d", "1900-"]},
            ]})
        );
    }
}
