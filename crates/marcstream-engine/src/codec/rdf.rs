//! RDF codecs
//!
//! The reader parses a whole Turtle (or N-Triples) document into a single
//! [`Graph`]; relative IRIs resolve against the source locator. The writer
//! prints graph payloads as N-Triples.

use crate::item::Item;
use crate::plugin::{InputCodec, InputOptions, OutputCodec, PluginOptions};
use crate::stage::{unexpected, BoxStage, Flow, Outlet, Stage};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use marcstream_common::{Error, Graph, Quad, Result, Term, TermType};
use oxrdf::{Subject, Term as RdfTerm};
use oxttl::TurtleParser;
use std::collections::BTreeMap;

const NAME: &str = "rdf";
const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
const RDF_LANG_STRING: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#langString";

pub struct RdfInput;

#[async_trait]
impl InputCodec for RdfInput {
    async fn create(&self, options: &InputOptions) -> Result<BoxStage> {
        let base = options.params.get("base").cloned().or_else(|| {
            options
                .locator
                .as_ref()
                .filter(|l| !matches!(l.scheme(), "stdin" | "stdout"))
                .map(|l| l.stripped().expose().to_string())
        });
        Ok(Box::new(RdfDecoder {
            base,
            buffer: BytesMut::new(),
        }))
    }
}

pub struct RdfDecoder {
    base: Option<String>,
    buffer: BytesMut,
}

fn subject(subject: Subject) -> Option<Term> {
    match subject {
        Subject::NamedNode(node) => Some(Term::named(node.into_string())),
        Subject::BlankNode(node) => Some(Term::blank(node.as_str())),
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

fn object(term: RdfTerm) -> Option<Term> {
    match term {
        RdfTerm::NamedNode(node) => Some(Term::named(node.into_string())),
        RdfTerm::BlankNode(node) => Some(Term::blank(node.as_str())),
        RdfTerm::Literal(literal) => {
            let mut term = Term::literal(literal.value());
            if let Some(language) = literal.language() {
                term.language = Some(language.to_string());
            } else if literal.datatype().as_str() != XSD_STRING {
                term.datatype = Some(literal.datatype().as_str().to_string());
            }
            Some(term)
        },
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

impl RdfDecoder {
    fn parse(&self) -> Result<Graph> {
        let mut parser = TurtleParser::new();
        if let Some(base) = &self.base {
            parser = parser
                .with_base_iri(base.as_str())
                .map_err(|e| Error::malformed(NAME, format!("base {}: {}", base, e)))?;
        }

        let mut reader = parser.for_slice(&self.buffer);
        let mut quads = Vec::new();
        for triple in reader.by_ref() {
            let triple = triple.map_err(|e| Error::malformed(NAME, e.to_string()))?;
            let (Some(s), Some(o)) = (subject(triple.subject), object(triple.object)) else {
                continue;
            };
            quads.push(Quad {
                subject: s,
                predicate: Term::named(triple.predicate.into_string()),
                object: o,
            });
        }
        let prefixes = reader
            .prefixes()
            .map(|(prefix, iri)| (prefix.to_string(), iri.to_string()))
            .collect();
        Ok(Graph { prefixes, quads })
    }
}

#[async_trait]
impl Stage for RdfDecoder {
    fn name(&self) -> &str {
        "rdf-input"
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
        let graph = self.parse()?;
        self.buffer.clear();
        out.push(Item::Graph(graph)).await
    }
}

pub struct NTriplesOutput;

#[async_trait]
impl OutputCodec for NTriplesOutput {
    async fn create(&self, _options: &PluginOptions) -> Result<BoxStage> {
        Ok(Box::new(NTriplesEncoder))
    }
}

pub struct NTriplesEncoder;

fn escape_literal(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            '\r' => escaped.push_str("\\r"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Expand `prefix:local` when the prefix is declared
fn iri(value: &str, prefixes: &BTreeMap<String, String>) -> String {
    if let Some((prefix, local)) = value.split_once(':') {
        if let Some(namespace) = prefixes.get(prefix) {
            return format!("{}{}", namespace, local);
        }
    }
    value.to_string()
}

impl NTriplesEncoder {
    fn term(term: &Term, prefixes: &BTreeMap<String, String>) -> String {
        match term.kind() {
            TermType::BlankNode => format!("_:{}", term.value),
            TermType::Literal => {
                let mut literal = format!("\"{}\"", escape_literal(&term.value));
                match (&term.language, &term.datatype) {
                    (Some(language), _) => {
                        literal.push('@');
                        literal.push_str(language);
                    },
                    (None, Some(datatype)) if datatype != XSD_STRING && datatype != RDF_LANG_STRING => {
                        literal.push_str(&format!("^^<{}>", iri(datatype, prefixes)));
                    },
                    _ => {},
                }
                literal
            },
            _ => format!("<{}>", iri(&term.value, prefixes)),
        }
    }

    pub fn encode(graph: &Graph) -> String {
        graph
            .quads
            .iter()
            .map(|quad| {
                format!(
                    "{} {} {} .\n",
                    Self::term(&quad.subject, &graph.prefixes),
                    Self::term(&quad.predicate, &graph.prefixes),
                    Self::term(&quad.object, &graph.prefixes)
                )
            })
            .collect()
    }
}

#[async_trait]
impl Stage for NTriplesEncoder {
    fn name(&self) -> &str {
        "nt-output"
    }

    async fn process(&mut self, item: Item, out: &mut Outlet) -> Result<Flow> {
        let Item::Graph(graph) = &item else {
            return Err(unexpected(self, &item));
        };
        if !graph.quads.is_empty() {
            out.push(Item::Bytes(Bytes::from(Self::encode(graph)))).await?;
        }
        Ok(Flow::Continue)
    }
}
