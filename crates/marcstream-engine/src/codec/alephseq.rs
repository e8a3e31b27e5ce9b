//! Aleph sequential format
//!
//! One field per line: `<id> <tag><ind1><ind2> L <data>`. Consecutive lines
//! with the same id form one record. Data fields carry `$$<code><value>`
//! subfields; control fields (`LDR`, `FMT`, `00x`) carry the raw value.

use super::LineBuffer;
use crate::item::Item;
use crate::plugin::{InputCodec, InputOptions, OutputCodec, PluginOptions};
use crate::stage::{unexpected, BoxStage, Flow, Outlet, Stage};
use async_trait::async_trait;
use bytes::Bytes;
use marcstream_common::record::CONTROL_CODE;
use marcstream_common::{Error, Field, Record, Result};
use regex::Regex;

const NAME: &str = "alephseq";
const SUBFIELD_MARK: &str = "$$";
const MISSING_ID: &str = "000000000";
const FORMAT_TAG: &str = "FMT";
const DEFAULT_FORMAT: &str = "BK";

/// Split `$$aFoo$$bBar` into subfields; text before the first mark goes under `_`
pub(crate) fn decode_subfields(data: &str) -> Vec<(String, String)> {
    let mut pieces = data.split(SUBFIELD_MARK);
    let mut subfields = Vec::new();

    if let Some(lead) = pieces.next() {
        if !lead.is_empty() {
            subfields.push((CONTROL_CODE.to_string(), lead.to_string()));
        }
    }
    for piece in pieces {
        let mut chars = piece.chars();
        if let Some(code) = chars.next() {
            subfields.push((code.to_string(), chars.as_str().to_string()));
        }
    }
    subfields
}

/// Control fields print their value, data fields their `$$` subfields
pub(crate) fn encode_value(field: &Field) -> String {
    if field.is_control() {
        return field.value();
    }
    field
        .subfields
        .iter()
        .map(|(code, value)| format!("{}{}{}", SUBFIELD_MARK, code, value))
        .collect()
}

/// Parse the value column of a field back into subfields
pub(crate) fn field_from_value(tag: &str, ind1: &str, ind2: &str, value: &str) -> Field {
    if marcstream_common::record::is_control_tag(tag) {
        Field::new(tag, ind1, ind2, vec![(CONTROL_CODE.to_string(), value.to_string())])
    } else {
        Field::new(tag, ind1, ind2, decode_subfields(value))
    }
}

fn indicator(value: &str) -> &str {
    if value.is_empty() {
        " "
    } else {
        value
    }
}

pub struct AlephseqInput;

#[async_trait]
impl InputCodec for AlephseqInput {
    async fn create(&self, _options: &InputOptions) -> Result<BoxStage> {
        Ok(Box::new(AlephseqDecoder::new()?))
    }
}

pub struct AlephseqDecoder {
    lines: LineBuffer,
    pattern: Regex,
    current_id: Option<String>,
    record: Record,
}

impl AlephseqDecoder {
    pub fn new() -> Result<Self> {
        let pattern = Regex::new(r"^\w+[ \t][\x20-\x7E]{5}[ \t]L[ \t]")
            .map_err(|e| Error::Configuration(e.to_string()))?;
        Ok(Self {
            lines: LineBuffer::new(NAME),
            pattern,
            current_id: None,
            record: Record::default(),
        })
    }

    async fn line(&mut self, line_no: u64, line: &str, out: &mut Outlet) -> Result<()> {
        if line.trim().is_empty() {
            return Ok(());
        }
        if !self.pattern.is_match(line) {
            return Err(Error::malformed(NAME, format!("line {}: {:?}", line_no, line)));
        }

        let (id, rest) = line
            .split_once([' ', '\t'])
            .ok_or_else(|| Error::malformed(NAME, format!("line {}: missing id", line_no)))?;
        // the pattern guarantees eight ASCII bytes: tag, indicators, " L "
        let field = field_from_value(&rest[0..3], &rest[3..4], &rest[4..5], &rest[8..]);

        if self.current_id.as_deref() != Some(id) {
            self.emit(out).await?;
            self.current_id = Some(id.to_string());
        }
        self.record.push(field);
        Ok(())
    }

    async fn emit(&mut self, out: &mut Outlet) -> Result<()> {
        if !self.record.is_empty() {
            out.push(Item::Record(std::mem::take(&mut self.record))).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Stage for AlephseqDecoder {
    fn name(&self) -> &str {
        "alephseq-input"
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

pub struct AlephseqOutput;

#[async_trait]
impl OutputCodec for AlephseqOutput {
    async fn create(&self, _options: &PluginOptions) -> Result<BoxStage> {
        Ok(Box::new(AlephseqEncoder))
    }
}

pub struct AlephseqEncoder;

impl AlephseqEncoder {
    /// Lines of one record; a `FMT` line leads unless the record has one
    pub fn encode(record: &Record) -> String {
        let id = record.id().unwrap_or_else(|| MISSING_ID.to_string());

        let mut text = String::new();
        if !record.fields.iter().any(|field| field.tag == FORMAT_TAG) {
            text.push_str(&format!("{} {}   L {}\n", id, FORMAT_TAG, DEFAULT_FORMAT));
        }
        for field in &record.fields {
            text.push_str(&format!(
                "{} {}{}{} L {}\n",
                id,
                field.tag,
                indicator(&field.ind1),
                indicator(&field.ind2),
                encode_value(field)
            ));
        }
        text
    }
}

#[async_trait]
impl Stage for AlephseqEncoder {
    fn name(&self) -> &str {
        "alephseq-output"
    }

    async fn process(&mut self, item: Item, out: &mut Outlet) -> Result<Flow> {
        let Item::Record(record) = &item else {
            return Err(unexpected(self, &item));
        };
        out.push(Item::Bytes(Bytes::from(Self::encode(record)))).await?;
        Ok(Flow::Continue)
    }
}
