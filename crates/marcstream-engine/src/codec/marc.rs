//! ISO 2709 (binary MARC) input
//!
//! A record is a 24 byte leader, a directory of 12 byte entries (tag, field
//! length, field offset) and the field data. The leader becomes an `LDR`
//! control field; `00x` fields keep their raw value and data fields are split
//! on the subfield delimiter.

use crate::item::Item;
use crate::plugin::{InputCodec, InputOptions};
use crate::stage::{unexpected, BoxStage, Flow, Outlet, Stage};
use async_trait::async_trait;
use bytes::{Buf, BytesMut};
use marcstream_common::{Error, Field, Record, Result};
use tracing::{debug, info, warn};

const NAME: &str = "marc";
const LEADER_LEN: usize = 24;
const ENTRY_LEN: usize = 12;
const RECORD_TERMINATOR: u8 = 0x1D;
const FIELD_TERMINATOR: u8 = 0x1E;
const SUBFIELD_DELIMITER: u8 = 0x1F;
const PROGRESS_EVERY: u64 = 1000;

fn number(raw: &[u8], what: &str) -> std::result::Result<usize, String> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|digits| digits.trim().parse().ok())
        .ok_or_else(|| format!("bad {}: {:?}", what, String::from_utf8_lossy(raw)))
}

fn text(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).into_owned()
}

/// Decode one complete record, terminator included
pub fn parse_record(raw: &[u8]) -> std::result::Result<Record, String> {
    if raw.len() < LEADER_LEN + 1 {
        return Err(format!("record of {} bytes is shorter than a leader", raw.len()));
    }
    let leader = &raw[..LEADER_LEN];
    let base = number(&leader[12..17], "base address")?;
    if base <= LEADER_LEN || base > raw.len() {
        return Err(format!("base address {} outside the record", base));
    }

    let directory = &raw[LEADER_LEN..base - 1];
    if raw[base - 1] != FIELD_TERMINATOR || directory.len() % ENTRY_LEN != 0 {
        return Err("directory is not a whole number of entries".to_string());
    }

    let mut record = Record::default();
    record.push(Field::control("LDR", text(leader)));

    for entry in directory.chunks(ENTRY_LEN) {
        let tag = text(&entry[..3]);
        let length = number(&entry[3..7], "field length")?;
        let start = base + number(&entry[7..12], "field offset")?;
        let data = raw
            .get(start..start + length)
            .ok_or_else(|| format!("field {} runs past the record", tag))?;
        let data = data.strip_suffix(&[FIELD_TERMINATOR]).unwrap_or(data);

        if tag.starts_with("00") {
            record.push(Field::control(tag, text(data)));
            continue;
        }

        let mut pieces = data.split(|b| *b == SUBFIELD_DELIMITER);
        let indicators = pieces.next().unwrap_or_default();
        let subfields: Vec<(String, String)> = pieces
            .filter(|piece| !piece.is_empty())
            .map(|piece| (text(&piece[..1]), text(&piece[1..])))
            .collect();
        if indicators.len() < 2 || subfields.is_empty() {
            warn!(tag = %tag, "skipping field without indicators or subfields");
            continue;
        }
        record.push(Field::new(
            tag,
            text(&indicators[..1]),
            text(&indicators[1..2]),
            subfields,
        ));
    }
    Ok(record)
}

pub struct MarcInput;

#[async_trait]
impl InputCodec for MarcInput {
    async fn create(&self, _options: &InputOptions) -> Result<BoxStage> {
        Ok(Box::new(MarcDecoder::new()))
    }
}

pub struct MarcDecoder {
    pending: BytesMut,
    records: u64,
}

impl MarcDecoder {
    pub fn new() -> Self {
        Self {
            pending: BytesMut::new(),
            records: 0,
        }
    }

    /// Split off the next complete record, if buffered
    fn next_record(&mut self) -> Result<Option<BytesMut>> {
        // line breaks between records are common in exports
        let gap = self
            .pending
            .iter()
            .take_while(|b| b.is_ascii_whitespace())
            .count();
        self.pending.advance(gap);
        if self.pending.len() < 5 {
            return Ok(None);
        }

        let length = number(&self.pending[..5], "record length")
            .map_err(|e| Error::malformed(NAME, format!("record {}: {}", self.records + 1, e)))?;
        if length < LEADER_LEN + 1 {
            return Err(Error::malformed(
                NAME,
                format!("record {}: length {} is too short", self.records + 1, length),
            ));
        }
        if self.pending.len() < length {
            return Ok(None);
        }
        let raw = self.pending.split_to(length);
        if raw[length - 1] != RECORD_TERMINATOR {
            return Err(Error::malformed(
                NAME,
                format!("record {}: missing record terminator", self.records + 1),
            ));
        }
        Ok(Some(raw))
    }

    async fn emit(&mut self, raw: &[u8], out: &mut Outlet) -> Result<()> {
        self.records += 1;
        let record = parse_record(raw)
            .map_err(|e| Error::malformed(NAME, format!("record {}: {}", self.records, e)))?;
        if self.records % PROGRESS_EVERY == 0 {
            info!(records = self.records, "marc progress");
        }
        out.push(Item::Record(record)).await
    }
}

impl Default for MarcDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for MarcDecoder {
    fn name(&self) -> &str {
        "marc-input"
    }

    async fn process(&mut self, item: Item, out: &mut Outlet) -> Result<Flow> {
        let Item::Bytes(chunk) = item else {
            return Err(unexpected(self, &item));
        };
        self.pending.extend_from_slice(&chunk);
        while let Some(raw) = self.next_record()? {
            self.emit(&raw, out).await?;
        }
        Ok(Flow::Continue)
    }

    async fn flush(&mut self, _out: &mut Outlet) -> Result<()> {
        let trailing = self.pending.iter().any(|b| !b.is_ascii_whitespace());
        if trailing {
            return Err(Error::malformed(
                NAME,
                format!("record {}: truncated", self.records + 1),
            ));
        }
        debug!(records = self.records, "marc input finished");
        Ok(())
    }
}
