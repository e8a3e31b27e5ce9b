//! MARCXML
//!
//! The reader buffers input up to the last complete `</record>` and decodes
//! the records in that prefix, so memory stays bounded by one record plus a
//! chunk. Element names are matched on their local part, any namespace
//! prefix is accepted.

use crate::item::Item;
use crate::plugin::{InputCodec, InputOptions, OutputCodec, PluginOptions};
use crate::stage::{unexpected, BoxStage, Flow, Outlet, Stage};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use marcstream_common::{Error, Field, Record, Result};
use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::bytes::Regex;
use std::fmt::Write;

const NAME: &str = "xml";
const MARC_NS: &str = "http://www.loc.gov/MARC21/slim";

fn xml_error(e: impl std::fmt::Display) -> Error {
    Error::malformed(NAME, e.to_string())
}

fn attribute(element: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    element
        .attributes()
        .flatten()
        .find(|attr| attr.key.local_name().as_ref() == key)
        .map(|attr| String::from_utf8_lossy(&attr.value).into_owned())
}

fn indicator(element: &BytesStart<'_>, key: &[u8]) -> String {
    match attribute(element, key) {
        Some(value) if !value.is_empty() => value,
        _ => " ".to_string(),
    }
}

pub struct MarcXmlInput;

#[async_trait]
impl InputCodec for MarcXmlInput {
    async fn create(&self, _options: &InputOptions) -> Result<BoxStage> {
        Ok(Box::new(MarcXmlDecoder::new()?))
    }
}

enum Capture {
    Leader,
    Control(String),
    Subfield(String),
}

pub struct MarcXmlDecoder {
    buffer: BytesMut,
    record_end: Regex,
}

impl MarcXmlDecoder {
    pub fn new() -> Result<Self> {
        let record_end = Regex::new(r"</(?:[A-Za-z_][\w.\-]*:)?record\s*>")
            .map_err(|e| Error::Configuration(e.to_string()))?;
        Ok(Self {
            buffer: BytesMut::new(),
            record_end,
        })
    }

    /// Decode every record in `xml`, which must not end inside a record
    fn decode(xml: &[u8]) -> Result<Vec<Record>> {
        let mut reader = Reader::from_reader(xml);
        reader.config_mut().check_end_names = false;

        let mut records = Vec::new();
        let mut record: Option<Record> = None;
        let mut field: Option<Field> = None;
        let mut capture: Option<Capture> = None;
        let mut text = String::new();
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf).map_err(xml_error)? {
                Event::Start(e) => match e.local_name().as_ref() {
                    b"record" => record = Some(Record::default()),
                    b"leader" => capture = Some(Capture::Leader),
                    b"controlfield" => {
                        capture = Some(Capture::Control(attribute(&e, b"tag").unwrap_or_default()))
                    },
                    b"datafield" => {
                        field = Some(Field::new(
                            attribute(&e, b"tag").unwrap_or_default(),
                            indicator(&e, b"ind1"),
                            indicator(&e, b"ind2"),
                            Vec::new(),
                        ))
                    },
                    b"subfield" => {
                        capture = Some(Capture::Subfield(attribute(&e, b"code").unwrap_or_default()))
                    },
                    _ => {},
                },
                Event::Empty(e) if e.local_name().as_ref() == b"datafield" => {
                    if let Some(record) = record.as_mut() {
                        record.push(Field::new(
                            attribute(&e, b"tag").unwrap_or_default(),
                            indicator(&e, b"ind1"),
                            indicator(&e, b"ind2"),
                            Vec::new(),
                        ));
                    }
                },
                Event::Text(e) if capture.is_some() => {
                    text.push_str(&e.unescape().map_err(xml_error)?)
                },
                Event::CData(e) if capture.is_some() => {
                    text.push_str(&String::from_utf8_lossy(&e))
                },
                Event::End(e) => match e.local_name().as_ref() {
                    b"leader" | b"controlfield" => {
                        let value = std::mem::take(&mut text);
                        let tag = match capture.take() {
                            Some(Capture::Control(tag)) => tag,
                            _ => "LDR".to_string(),
                        };
                        if let Some(record) = record.as_mut() {
                            record.push(Field::control(tag, value));
                        }
                    },
                    b"subfield" => {
                        let value = std::mem::take(&mut text);
                        if let (Some(Capture::Subfield(code)), Some(field)) =
                            (capture.take(), field.as_mut())
                        {
                            field.subfields.push((code, value));
                        }
                    },
                    b"datafield" => {
                        if let (Some(done), Some(record)) = (field.take(), record.as_mut()) {
                            record.push(done);
                        }
                    },
                    b"record" => {
                        if let Some(done) = record.take() {
                            records.push(done);
                        }
                    },
                    _ => {},
                },
                Event::Eof => break,
                _ => {},
            }
            buf.clear();
        }

        if record.is_some() {
            return Err(Error::malformed(NAME, "truncated record"));
        }
        Ok(records)
    }

    async fn emit(xml: &[u8], out: &mut Outlet) -> Result<()> {
        for record in Self::decode(xml)? {
            out.push(Item::Record(record)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl Stage for MarcXmlDecoder {
    fn name(&self) -> &str {
        "xml-input"
    }

    async fn process(&mut self, item: Item, out: &mut Outlet) -> Result<Flow> {
        let Item::Bytes(chunk) = item else {
            return Err(unexpected(self, &item));
        };
        self.buffer.extend_from_slice(&chunk);

        let complete = self
            .record_end
            .find_iter(&self.buffer)
            .last()
            .map(|m| m.end());
        if let Some(end) = complete {
            let ready = self.buffer.split_to(end);
            Self::emit(&ready, out).await?;
        }
        Ok(Flow::Continue)
    }

    async fn flush(&mut self, out: &mut Outlet) -> Result<()> {
        let rest = self.buffer.split();
        Self::emit(&rest, out).await
    }
}

pub struct MarcXmlOutput;

#[async_trait]
impl OutputCodec for MarcXmlOutput {
    async fn create(&self, _options: &PluginOptions) -> Result<BoxStage> {
        Ok(Box::new(MarcXmlEncoder { started: false }))
    }
}

pub struct MarcXmlEncoder {
    started: bool,
}

/// Escape text, dropping characters XML 1.0 cannot carry
fn text(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .filter(|c| matches!(c, '\t' | '\n' | '\r') || (*c >= ' ' && *c != '\u{FFFE}' && *c != '\u{FFFF}'))
        .collect();
    escape(cleaned.as_str()).into_owned()
}

impl MarcXmlEncoder {
    fn header(&mut self, xml: &mut String) {
        if !self.started {
            self.started = true;
            xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
            let _ = writeln!(xml, "<marc:collection xmlns:marc=\"{}\">", MARC_NS);
        }
    }

    pub fn encode(record: &Record) -> String {
        let mut xml = String::from(" <marc:record>\n");
        for field in &record.fields {
            if field.tag == "LDR" {
                let _ = writeln!(xml, "  <marc:leader>{}</marc:leader>", text(&field.value()));
            } else if field.is_control() {
                let _ = writeln!(
                    xml,
                    "  <marc:controlfield tag=\"{}\">{}</marc:controlfield>",
                    text(&field.tag),
                    text(&field.value())
                );
            } else {
                let _ = writeln!(
                    xml,
                    "  <marc:datafield tag=\"{}\" ind1=\"{}\" ind2=\"{}\">",
                    text(&field.tag),
                    text(&field.ind1),
                    text(&field.ind2)
                );
                for (code, value) in &field.subfields {
                    let _ = writeln!(
                        xml,
                        "    <marc:subfield code=\"{}\">{}</marc:subfield>",
                        text(code),
                        text(value)
                    );
                }
                xml.push_str("  </marc:datafield>\n");
            }
        }
        xml.push_str(" </marc:record>\n");
        xml
    }
}

#[async_trait]
impl Stage for MarcXmlEncoder {
    fn name(&self) -> &str {
        "xml-output"
    }

    async fn process(&mut self, item: Item, out: &mut Outlet) -> Result<Flow> {
        let Item::Record(record) = &item else {
            return Err(unexpected(self, &item));
        };
        let mut xml = String::new();
        self.header(&mut xml);
        xml.push_str(&Self::encode(record));
        out.push(Item::Bytes(Bytes::from(xml))).await?;
        Ok(Flow::Continue)
    }

    async fn flush(&mut self, out: &mut Outlet) -> Result<()> {
        let mut xml = String::new();
        self.header(&mut xml);
        xml.push_str("</marc:collection>\n");
        out.push(Item::Bytes(Bytes::from(xml))).await
    }
}
