//! Items flowing between pipeline stages

use bytes::Bytes;
use marcstream_common::{Graph, Record, Result};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// Raw bytes, before an input codec or after an output codec
    Bytes(Bytes),
    Record(Record),
    Graph(Graph),
    /// Any other JSON value produced by a codec or transform
    Object(Value),
}

impl Item {
    pub fn kind(&self) -> &'static str {
        match self {
            Item::Bytes(_) => "byte",
            Item::Record(_) => "record",
            Item::Graph(_) => "graph",
            Item::Object(_) => "object",
        }
    }

    pub fn to_json(&self) -> Result<Value> {
        Ok(match self {
            Item::Bytes(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
            Item::Record(record) => serde_json::to_value(record)?,
            Item::Graph(graph) => serde_json::to_value(graph)?,
            Item::Object(value) => value.clone(),
        })
    }

    /// Classify a decoded JSON document by shape
    pub fn from_json(value: Value) -> Result<Self> {
        let shape = value
            .as_object()
            .map(|obj| (obj.get("record").is_some_and(Value::is_array), obj.contains_key("quads")))
            .unwrap_or((false, false));

        Ok(match shape {
            (true, _) => Item::Record(serde_json::from_value(value)?),
            (false, true) => Item::Graph(serde_json::from_value(value)?),
            _ => Item::Object(value),
        })
    }
}

impl From<Record> for Item {
    fn from(record: Record) -> Self {
        Item::Record(record)
    }
}

impl From<Bytes> for Item {
    fn from(bytes: Bytes) -> Self {
        Item::Bytes(bytes)
    }
}
