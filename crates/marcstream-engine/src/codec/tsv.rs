//! Tab-separated values
//!
//! Free-form objects map to one row each under a header of sorted keys.
//! Generic records use the fixed layout `rec tag ind1 ind2 value`, one row
//! per field, with the value in `$$` notation. `rec` is the record's
//! sequence number in the output, so rows group back into the same records
//! even when identifiers repeat.

use super::alephseq::{encode_value, field_from_value};
use super::LineBuffer;
use crate::item::Item;
use crate::plugin::{InputCodec, InputOptions, OutputCodec, PluginOptions};
use crate::stage::{unexpected, BoxStage, Flow, Outlet, Stage};
use async_trait::async_trait;
use bytes::Bytes;
use marcstream_common::{Record, Result};
use serde_json::{Map, Value};
use tracing::warn;

const NAME: &str = "tsv";
const RECORD_COLUMNS: [&str; 5] = ["rec", "tag", "ind1", "ind2", "value"];

fn clean(value: &str) -> String {
    value.replace(['\t', '\n', '\r'], " ")
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => clean(s),
        Value::Array(items) => format!("ARRAY[{}]", items.len()),
        Value::Object(map) => format!("HASH[{}]", map.len()),
        other => other.to_string(),
    }
}

pub struct TsvInput;

#[async_trait]
impl InputCodec for TsvInput {
    async fn create(&self, _options: &InputOptions) -> Result<BoxStage> {
        Ok(Box::new(TsvDecoder::new()))
    }
}

pub struct TsvDecoder {
    lines: LineBuffer,
    header: Option<Vec<String>>,
    current: Option<(String, Record)>,
}

impl TsvDecoder {
    pub fn new() -> Self {
        Self {
            lines: LineBuffer::new(NAME),
            header: None,
            current: None,
        }
    }

    fn is_record_layout(&self) -> bool {
        self.header
            .as_ref()
            .is_some_and(|h| h.iter().map(String::as_str).eq(RECORD_COLUMNS))
    }

    async fn line(&mut self, line_no: u64, line: &str, out: &mut Outlet) -> Result<()> {
        if line.is_empty() {
            return Ok(());
        }
        let columns: Vec<&str> = line.split('\t').collect();

        let Some(header) = &self.header else {
            self.header = Some(columns.iter().map(|c| c.to_string()).collect());
            return Ok(());
        };
        if columns.len() != header.len() {
            warn!(
                line = line_no,
                expected = header.len(),
                found = columns.len(),
                "column count mismatch, skipping row"
            );
            return Ok(());
        }

        if self.is_record_layout() {
            let field = field_from_value(columns[1], columns[2], columns[3], columns[4]);
            let same = matches!(&self.current, Some((id, _)) if id == columns[0]);
            if !same {
                self.emit(out).await?;
                self.current = Some((columns[0].to_string(), Record::default()));
            }
            if let Some((_, record)) = &mut self.current {
                record.push(field);
            }
        } else {
            let object: Map<String, Value> = header
                .iter()
                .zip(columns)
                .map(|(key, value)| (key.clone(), Value::String(value.to_string())))
                .collect();
            out.push(Item::Object(Value::Object(object))).await?;
        }
        Ok(())
    }

    async fn emit(&mut self, out: &mut Outlet) -> Result<()> {
        if let Some((_, record)) = self.current.take() {
            out.push(Item::Record(record)).await?;
        }
        Ok(())
    }
}

impl Default for TsvDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for TsvDecoder {
    fn name(&self) -> &str {
        "tsv-input"
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
        self.emit(out).await
    }
}

pub struct TsvOutput;

#[async_trait]
impl OutputCodec for TsvOutput {
    async fn create(&self, options: &PluginOptions) -> Result<BoxStage> {
        Ok(Box::new(TsvEncoder {
            header: options.param("header") != Some("no"),
            columns: None,
            records: 0,
        }))
    }
}

pub struct TsvEncoder {
    header: bool,
    /// Set by the first item: object keys, or `None` for record layout
    columns: Option<Option<Vec<String>>>,
    records: u64,
}

impl TsvEncoder {
    fn header_line(columns: &[&str]) -> String {
        format!("{}\n", columns.join("\t"))
    }
}

#[async_trait]
impl Stage for TsvEncoder {
    fn name(&self) -> &str {
        "tsv-output"
    }

    async fn process(&mut self, item: Item, out: &mut Outlet) -> Result<Flow> {
        let mut text = String::new();

        if self.columns.is_none() {
            let columns = match &item {
                Item::Object(Value::Object(map)) => {
                    let mut keys: Vec<String> = map.keys().cloned().collect();
                    keys.sort();
                    Some(keys)
                },
                _ => None,
            };
            if self.header {
                match &columns {
                    Some(keys) => text.push_str(&Self::header_line(
                        &keys.iter().map(String::as_str).collect::<Vec<_>>(),
                    )),
                    None => text.push_str(&Self::header_line(&RECORD_COLUMNS)),
                }
            }
            self.columns = Some(columns);
        }

        let keys = self.columns.clone().flatten();
        match (&item, keys) {
            (Item::Object(Value::Object(map)), Some(keys)) => {
                let row: Vec<String> = keys
                    .iter()
                    .map(|key| map.get(key).map(cell).unwrap_or_default())
                    .collect();
                text.push_str(&row.join("\t"));
                text.push('\n');
            },
            (Item::Record(record), None) => {
                // the rec column numbers records; the 001 stays in its own row
                self.records += 1;
                for field in &record.fields {
                    text.push_str(&format!(
                        "{:09}\t{}\t{}\t{}\t{}\n",
                        self.records,
                        field.tag,
                        field.ind1,
                        field.ind2,
                        clean(&encode_value(field))
                    ));
                }
            },
            _ => return Err(unexpected(self, &item)),
        }

        out.push(Item::Bytes(Bytes::from(text))).await?;
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::stage::drive;
    use marcstream_common::Field;
    use serde_json::json;

    fn text(items: Vec<Item>) -> String {
        items
            .into_iter()
            .map(|item| match item {
                Item::Bytes(b) => String::from_utf8(b.to_vec()).unwrap(),
                other => panic!("unexpected {:?}", other),
            })
            .collect()
    }

    async fn encode(items: Vec<Item>, params: &[(&str, &str)]) -> Result<String> {
        let options = PluginOptions {
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        let mut stage = TsvOutput.create(&options).await?;
        Ok(text(drive(stage.as_mut(), items).await?))
    }

    async fn decode(input: &str) -> Vec<Item> {
        let mut stage = TsvDecoder::new();
        drive(&mut stage, vec![Item::Bytes(Bytes::from(input.to_string()))])
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_objects_with_sorted_header() {
        let out = encode(
            vec![
                Item::Object(json!({"title": "A", "id": 1, "tags": ["x", "y"], "meta": {"k": 1}})),
                Item::Object(json!({"id": 2, "title": "B\tC"})),
            ],
            &[],
        )
        .await
        .unwrap();
        assert_eq!(out, "id\tmeta\ttags\ttitle\n1\tHASH[1]\tARRAY[2]\tA\n2\t\t\tB C\n");
    }

    #[tokio::test]
    async fn test_header_can_be_suppressed() {
        let out = encode(vec![Item::Object(json!({"id": "1"}))], &[("header", "no")])
            .await
            .unwrap();
        assert_eq!(out, "1\n");
    }

    #[tokio::test]
    async fn test_decode_objects_skips_bad_rows() {
        let items = decode("id\ttitle\n1\tA\nbroken\n2\tB\n").await;
        assert_eq!(
            items,
            vec![
                Item::Object(json!({"id": "1", "title": "A"})),
                Item::Object(json!({"id": "2", "title": "B"})),
            ]
        );
    }

    #[tokio::test]
    async fn test_record_round_trip() {
        let records = vec![
            Record::new(vec![
                Field::control("001", "X1"),
                Field::new("100", "1", " ", vec![("a".into(), "Name".into())]),
            ]),
            Record::new(vec![
                Field::control("001", "X2"),
                Field::new(
                    "245",
                    "1",
                    "0",
                    vec![("a".into(), "Title".into()), ("b".into(), "sub".into())],
                ),
            ]),
        ];
        let mut items: Vec<Item> = records.iter().cloned().map(Item::Record).collect();
        // consecutive records sharing an identifier stay apart
        items.push(items[1].clone());

        let encoded = encode(items.clone(), &[]).await.unwrap();
        assert!(encoded.starts_with("rec\ttag\tind1\tind2\tvalue\n"));
        assert!(encoded.contains("000000001\t001\t \t \tX1\n"));
        assert!(encoded.contains("000000002\t245\t1\t0\t$$aTitle$$bsub\n"));
        assert!(encoded.contains("000000003\t001\t \t \tX2\n"));

        assert_eq!(decode(&encoded).await, items);
    }

    #[tokio::test]
    async fn test_mixed_items_are_rejected() {
        let err = encode(
            vec![
                Item::Object(json!({"id": 1})),
                Item::Record(Record::default()),
            ],
            &[],
        )
        .await
        .unwrap_err();
        assert!(matches!(err, marcstream_common::Error::UnexpectedItem { .. }));
    }
}
