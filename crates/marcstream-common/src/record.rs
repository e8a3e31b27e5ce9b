//! Payload types carried between pipeline stages
//!
//! - [`Record`]: a MARC-like generic record, a list of `[tag, ind1, ind2, code, value, ...]` rows
//! - [`Graph`]: a structured-data record made of prefixes and quads

use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Subfield code carrying the value of control fields
pub const CONTROL_CODE: &str = "_";

/// `LDR`, the Aleph `FMT` pseudo field and every `00x` tag are control fields
pub fn is_control_tag(tag: &str) -> bool {
    tag == "LDR" || tag == "FMT" || tag.starts_with("00")
}

/// One row of a generic record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub tag: String,
    pub ind1: String,
    pub ind2: String,
    pub subfields: Vec<(String, String)>,
}

impl Field {
    pub fn new(
        tag: impl Into<String>,
        ind1: impl Into<String>,
        ind2: impl Into<String>,
        subfields: Vec<(String, String)>,
    ) -> Self {
        Self {
            tag: tag.into(),
            ind1: ind1.into(),
            ind2: ind2.into(),
            subfields,
        }
    }

    /// A control field with blank indicators and a single `_` subfield
    pub fn control(tag: impl Into<String>, value: impl Into<String>) -> Self {
        Self::new(tag, " ", " ", vec![(CONTROL_CODE.to_string(), value.into())])
    }

    pub fn is_control(&self) -> bool {
        is_control_tag(&self.tag)
    }

    /// Value of a control field, or the concatenated subfields otherwise
    pub fn value(&self) -> String {
        self.subfields
            .iter()
            .map(|(_, value)| value.as_str())
            .collect::<Vec<_>>()
            .join("")
    }

    /// Values of the subfields whose code is one of `codes` (all when empty)
    pub fn subfield_values(&self, codes: &str) -> Vec<&str> {
        self.subfields
            .iter()
            .filter(|(code, _)| codes.is_empty() || code.chars().all(|c| codes.contains(c)))
            .map(|(_, value)| value.as_str())
            .collect()
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(3 + self.subfields.len() * 2))?;
        seq.serialize_element(&self.tag)?;
        seq.serialize_element(&self.ind1)?;
        seq.serialize_element(&self.ind2)?;
        for (code, value) in &self.subfields {
            seq.serialize_element(code)?;
            seq.serialize_element(value)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldVisitor;

        impl<'de> Visitor<'de> for FieldVisitor {
            type Value = Field;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an array [tag, ind1, ind2, code, value, ...]")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Field, A::Error> {
                let mut parts: Vec<String> = Vec::new();
                while let Some(part) = seq.next_element::<String>()? {
                    parts.push(part);
                }
                if parts.len() < 3 {
                    return Err(de::Error::invalid_length(parts.len(), &self));
                }
                if (parts.len() - 3) % 2 != 0 {
                    return Err(de::Error::custom(format!(
                        "field {} has a subfield code without a value",
                        parts[0]
                    )));
                }
                let mut iter = parts.into_iter();
                let tag = iter.next().unwrap_or_default();
                let ind1 = iter.next().unwrap_or_default();
                let ind2 = iter.next().unwrap_or_default();
                let mut subfields = Vec::new();
                while let (Some(code), Some(value)) = (iter.next(), iter.next()) {
                    subfields.push((code, value));
                }
                Ok(Field {
                    tag,
                    ind1,
                    ind2,
                    subfields,
                })
            }
        }

        deserializer.deserialize_seq(FieldVisitor)
    }
}

/// Generic record: `{ "record": [[tag, ind1, ind2, code, value, ...], ...] }`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "record")]
    pub fields: Vec<Field>,
}

impl Record {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn push(&mut self, field: Field) {
        self.fields.push(field);
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// All values matching a field path such as `001`, `245` or `100a`
    ///
    /// The first three characters select the tag; any remaining characters
    /// are subfield codes. Values of one field are joined with a space.
    pub fn marcmap(&self, path: &str) -> Vec<String> {
        let tag: String = path.chars().take(3).collect();
        let codes: String = path.chars().skip(3).collect();
        self.fields
            .iter()
            .filter(|field| field.tag == tag)
            .map(|field| field.subfield_values(&codes).join(" "))
            .collect()
    }

    /// The `001` identifier when exactly one is present
    pub fn id(&self) -> Option<String> {
        let mut ids = self.marcmap("001");
        if ids.len() == 1 {
            ids.pop()
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TermType {
    NamedNode,
    BlankNode,
    Literal,
    DefaultGraph,
    Variable,
}

/// An RDF term
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub value: String,
    /// Missing types are treated as named nodes
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub term_type: Option<TermType>,
    /// Datatype IRI of a literal
    #[serde(rename = "as", default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Term {
    pub fn named(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            term_type: Some(TermType::NamedNode),
            datatype: None,
            language: None,
        }
    }

    pub fn blank(value: impl Into<String>) -> Self {
        Self {
            term_type: Some(TermType::BlankNode),
            ..Self::named(value)
        }
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Self {
            term_type: Some(TermType::Literal),
            ..Self::named(value)
        }
    }

    pub fn kind(&self) -> TermType {
        self.term_type.unwrap_or(TermType::NamedNode)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quad {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
}

/// Structured-data record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub prefixes: BTreeMap<String, String>,
    pub quads: Vec<Quad>,
}
