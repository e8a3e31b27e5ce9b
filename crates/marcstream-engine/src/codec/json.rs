//! JSON codecs
//!
//! `jsonl` carries one document per line and streams in both directions.
//! `json` reads a single document (an array yields one item per element)
//! and writes all items as one array.

use super::LineBuffer;
use crate::item::Item;
use crate::plugin::{InputCodec, InputOptions, OutputCodec, PluginOptions};
use crate::stage::{unexpected, BoxStage, Flow, Outlet, Stage};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use marcstream_common::{Error, Result};
use serde_json::Value;

fn serialize(stage: &dyn Stage, item: &Item) -> Result<String> {
    if matches!(item, Item::Bytes(_)) {
        return Err(unexpected(stage, item));
    }
    Ok(serde_json::to_string(&item.to_json()?)?)
}

pub struct JsonLinesInput;

#[async_trait]
impl InputCodec for JsonLinesInput {
    async fn create(&self, _options: &InputOptions) -> Result<BoxStage> {
        Ok(Box::new(JsonLinesDecoder {
            lines: LineBuffer::new("jsonl"),
        }))
    }
}

pub struct JsonLinesDecoder {
    lines: LineBuffer,
}

impl JsonLinesDecoder {
    async fn line(&self, line_no: u64, line: &str, out: &mut Outlet) -> Result<()> {
        if line.trim().is_empty() {
            return Ok(());
        }
        let value: Value = serde_json::from_str(line)
            .map_err(|e| Error::malformed("jsonl", format!("line {}: {}", line_no, e)))?;
        out.push(Item::from_json(value)?).await
    }
}

#[async_trait]
impl Stage for JsonLinesDecoder {
    fn name(&self) -> &str {
        "jsonl-input"
    }

    async fn process(&mut self, item: Item, out: &mut Outlet) -> Result<Flow> {
        let Item::Bytes(chunk) = item else {
            return Err(unexpected(self, &item));
        };
        for (line_no, line) in self.lines.push(&chunk)? {
            self.line(line_no, &line, out).await?;
        }
        Ok(Flow::Continue)
    }

    async fn flush(&mut self, out: &mut Outlet) -> Result<()> {
        if let Some((line_no, line)) = self.lines.finish()? {
            self.line(line_no, &line, out).await?;
        }
        Ok(())
    }
}

pub struct JsonLinesOutput;

#[async_trait]
impl OutputCodec for JsonLinesOutput {
    async fn create(&self, _options: &PluginOptions) -> Result<BoxStage> {
        Ok(Box::new(JsonLinesEncoder))
    }
}

pub struct JsonLinesEncoder;

#[async_trait]
impl Stage for JsonLinesEncoder {
    fn name(&self) -> &str {
        "jsonl-output"
    }

    async fn process(&mut self, item: Item, out: &mut Outlet) -> Result<Flow> {
        let mut line = serialize(self, &item)?;
        line.push('\n');
        out.push(Item::Bytes(Bytes::from(line))).await?;
        Ok(Flow::Continue)
    }
}

pub struct JsonInput;

#[async_trait]
impl InputCodec for JsonInput {
    async fn create(&self, _options: &InputOptions) -> Result<BoxStage> {
        Ok(Box::new(JsonDecoder {
            buffer: BytesMut::new(),
        }))
    }
}

/// Buffers the whole document; a top-level array yields one item per element
pub struct JsonDecoder {
    buffer: BytesMut,
}

#[async_trait]
impl Stage for JsonDecoder {
    fn name(&self) -> &str {
        "json-input"
    }

    async fn process(&mut self, item: Item, _out: &mut Outlet) -> Result<Flow> {
        let Item::Bytes(chunk) = item else {
            return Err(unexpected(self, &item));
        };
        self.buffer.extend_from_slice(&chunk);
        Ok(Flow::Continue)
    }

    async fn flush(&mut self, out: &mut Outlet) -> Result<()> {
        if self.buffer.iter().all(u8::is_ascii_whitespace) {
            return Ok(());
        }
        let document: Value = serde_json::from_slice(&self.buffer)
            .map_err(|e| Error::malformed("json", e.to_string()))?;
        self.buffer.clear();

        match document {
            Value::Array(values) => {
                for value in values {
                    out.push(Item::from_json(value)?).await?;
                }
            },
            value => out.push(Item::from_json(value)?).await?,
        }
        Ok(())
    }
}

pub struct JsonOutput;

#[async_trait]
impl OutputCodec for JsonOutput {
    async fn create(&self, _options: &PluginOptions) -> Result<BoxStage> {
        Ok(Box::new(JsonEncoder { first: true }))
    }
}

pub struct JsonEncoder {
    first: bool,
}

#[async_trait]
impl Stage for JsonEncoder {
    fn name(&self) -> &str {
        "json-output"
    }

    async fn process(&mut self, item: Item, out: &mut Outlet) -> Result<Flow> {
        let body = serialize(self, &item)?;
        let separator = if self.first { "[" } else { ",\n" };
        self.first = false;
        out.push(Item::Bytes(Bytes::from(format!("{}{}", separator, body))))
            .await?;
        Ok(Flow::Continue)
    }

    async fn flush(&mut self, out: &mut Outlet) -> Result<()> {
        let tail = if self.first { "[]\n" } else { "]\n" };
        self.first = false;
        out.push(Item::Bytes(Bytes::from_static(tail.as_bytes()))).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::stage::drive;
    use marcstream_common::{Field, Record};
    use serde_json::json;

    fn joined(items: Vec<Item>) -> String {
        items
            .into_iter()
            .map(|item| match item {
                Item::Bytes(b) => String::from_utf8(b.to_vec()).unwrap(),
                other => panic!("unexpected {:?}", other),
            })
            .collect()
    }

    fn chunks(parts: &[&'static str]) -> Vec<Item> {
        parts
            .iter()
            .map(|p| Item::Bytes(Bytes::from_static(p.as_bytes())))
            .collect()
    }

    #[tokio::test]
    async fn test_jsonl_classifies_lines() {
        let mut stage = JsonLinesInput.create(&InputOptions::default()).await.unwrap();
        let items = drive(
            stage.as_mut(),
            chunks(&[
                "{\"record\":[[\"001\",\" \",\" \",\"_\",\"X1\"]]}\n{\"pre",
                "fixes\":{},\"quads\":[]}\n\n{\"id\":\"a\"}",
            ]),
        )
        .await
        .unwrap();

        assert_eq!(items.len(), 3);
        assert_eq!(
            items[0],
            Item::Record(Record::new(vec![Field::control("001", "X1")]))
        );
        assert_eq!(items[1].kind(), "graph");
        assert_eq!(items[2], Item::Object(json!({"id": "a"})));
    }

    #[tokio::test]
    async fn test_jsonl_malformed_line_aborts() {
        let mut stage = JsonLinesInput.create(&InputOptions::default()).await.unwrap();
        let err = drive(stage.as_mut(), chunks(&["{\"id\":1}\n{oops\n"]))
            .await
            .unwrap_err();
        match err {
            Error::Malformed { stage, reason } => {
                assert_eq!(stage, "jsonl");
                assert!(reason.starts_with("line 2"));
            },
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_jsonl_output_one_document_per_item() {
        let mut stage = JsonLinesOutput.create(&PluginOptions::default()).await.unwrap();
        let out = drive(
            stage.as_mut(),
            vec![Item::Object(json!({"id": "1"})), Item::Object(json!(2))],
        )
        .await
        .unwrap();
        assert_eq!(joined(out), "{\"id\":\"1\"}\n2\n");
    }

    #[tokio::test]
    async fn test_json_array_round_trip() {
        let items = vec![
            Item::Object(json!({"id": "1"})),
            Item::Record(Record::new(vec![Field::control("001", "X1")])),
        ];
        let mut encoder = JsonOutput.create(&PluginOptions::default()).await.unwrap();
        let text = joined(drive(encoder.as_mut(), items.clone()).await.unwrap());
        assert!(text.starts_with('[') && text.ends_with("]\n"));

        let mut decoder = JsonInput.create(&InputOptions::default()).await.unwrap();
        let decoded = drive_items(encoder_input(text), decoder.as_mut()).await;
        assert_eq!(decoded, items);
    }

    fn encoder_input(text: String) -> Vec<Item> {
        text.into_bytes()
            .chunks(7)
            .map(|c| Item::Bytes(Bytes::copy_from_slice(c)))
            .collect()
    }

    async fn drive_items(items: Vec<Item>, stage: &mut dyn Stage) -> Vec<Item> {
        drive(stage, items).await.unwrap()
    }

    #[tokio::test]
    async fn test_json_output_empty_is_empty_array() {
        let mut encoder = JsonOutput.create(&PluginOptions::default()).await.unwrap();
        let text = joined(drive(encoder.as_mut(), Vec::new()).await.unwrap());
        assert_eq!(text, "[]\n");
    }

    #[tokio::test]
    async fn test_json_single_document() {
        let mut decoder = JsonInput.create(&InputOptions::default()).await.unwrap();
        let items = drive_items(chunks(&["{\"id\":", " 7}"]), decoder.as_mut()).await;
        assert_eq!(items, vec![Item::Object(json!({"id": 7}))]);
    }

    #[tokio::test]
    async fn test_byte_items_are_rejected_by_encoders() {
        let mut encoder = JsonLinesOutput.create(&PluginOptions::default()).await.unwrap();
        let err = drive(encoder.as_mut(), chunks(&["raw"])).await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedItem { .. }));
    }
}
