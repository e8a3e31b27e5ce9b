//! Built-in codecs
//!
//! | name       | input | output |
//! |------------|-------|--------|
//! | `alephseq` | yes   | yes    |
//! | `marc`     | yes   |        |
//! | `tsv`      | yes   | yes    |
//! | `jsonl`    | yes   | yes    |
//! | `json`     | yes   | yes    |
//! | `xml`      | yes   | yes    |
//! | `rdf`      | yes   |        |
//! | `nt`       |       | yes    |

use crate::plugin::{Plugin, Registry};
use bytes::BytesMut;
use marcstream_common::{Error, Result};
use std::sync::Arc;

pub mod alephseq;
pub mod json;
pub mod marc;
pub mod marcxml;
pub mod rdf;
pub mod tsv;

pub fn register_builtins(registry: &mut Registry) {
    registry.register("input/alephseq", Plugin::Input(Arc::new(alephseq::AlephseqInput)));
    registry.register("output/alephseq", Plugin::Output(Arc::new(alephseq::AlephseqOutput)));
    registry.register("input/marc", Plugin::Input(Arc::new(marc::MarcInput)));
    registry.register("input/tsv", Plugin::Input(Arc::new(tsv::TsvInput)));
    registry.register("output/tsv", Plugin::Output(Arc::new(tsv::TsvOutput)));
    registry.register("input/jsonl", Plugin::Input(Arc::new(json::JsonLinesInput)));
    registry.register("output/jsonl", Plugin::Output(Arc::new(json::JsonLinesOutput)));
    registry.register("input/json", Plugin::Input(Arc::new(json::JsonInput)));
    registry.register("output/json", Plugin::Output(Arc::new(json::JsonOutput)));
    registry.register("input/xml", Plugin::Input(Arc::new(marcxml::MarcXmlInput)));
    registry.register("output/xml", Plugin::Output(Arc::new(marcxml::MarcXmlOutput)));
    registry.register("input/rdf", Plugin::Input(Arc::new(rdf::RdfInput)));
    registry.register("output/nt", Plugin::Output(Arc::new(rdf::NTriplesOutput)));
    registry.register("output/rdf", Plugin::Output(Arc::new(rdf::NTriplesOutput)));
}

/// Splits a byte stream into text lines, across chunk boundaries
pub(crate) struct LineBuffer {
    stage: &'static str,
    pending: BytesMut,
    line_no: u64,
}

impl LineBuffer {
    pub fn new(stage: &'static str) -> Self {
        Self {
            stage,
            pending: BytesMut::new(),
            line_no: 0,
        }
    }

    /// Complete lines in `chunk`, numbered from 1, without line terminators
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<(u64, String)>> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw = self.pending.split_to(pos + 1);
            lines.push(self.decode(&raw[..pos])?);
        }
        Ok(lines)
    }

    /// The trailing line without a terminator, if any
    pub fn finish(&mut self) -> Result<Option<(u64, String)>> {
        if self.pending.is_empty() {
            return Ok(None);
        }
        let raw = self.pending.split();
        self.decode(&raw).map(Some)
    }

    fn decode(&mut self, raw: &[u8]) -> Result<(u64, String)> {
        self.line_no += 1;
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        let text = std::str::from_utf8(raw).map_err(|e| {
            Error::malformed(self.stage, format!("line {}: {}", self.line_no, e))
        })?;
        Ok((self.line_no, text.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_lines_across_chunks() {
        let mut lines = LineBuffer::new("test");
        assert!(lines.push(b"first li").unwrap().is_empty());
        assert_eq!(
            lines.push(b"ne\r\nsecond\nthi").unwrap(),
            vec![(1, "first line".to_string()), (2, "second".to_string())]
        );
        assert_eq!(lines.finish().unwrap(), Some((3, "thi".to_string())));
        assert_eq!(lines.finish().unwrap(), None);
    }

    #[test]
    fn test_invalid_utf8_is_malformed() {
        let mut lines = LineBuffer::new("test");
        let err = lines.push(b"\xff\xfe\n").unwrap_err();
        assert!(matches!(err, Error::Malformed { .. }));
    }
}
