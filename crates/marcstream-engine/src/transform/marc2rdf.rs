//! Bibliographic records to schema.org quads
//!
//! The record subject is the `base` parameter followed by the 001. Authors,
//! subjects and online copies become nodes of their own, named under the
//! `genid` namespace.

use crate::item::Item;
use crate::plugin::{PluginOptions, TransformPlugin};
use crate::stage::{BoxStage, Flow, Outlet, Stage};
use async_trait::async_trait;
use marcstream_common::{Error, Field, Graph, Quad, Record, Result, Term};
use regex::Regex;
use std::collections::BTreeMap;
use tracing::debug;
use uuid::Uuid;

const THIS: &str = "https://lib.ugent.be/record";
const SCHEMA: &str = "https://schema.org/";
const RDF: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#";
const GENID: &str = "https://lib.ugent.be/.well-known/genid/";
const OWL: &str = "http://www.w3.org/2002/07/owl#";
const BIBO: &str = "http://purl.org/ontology/bibo/";
const XSD: &str = "http://www.w3.org/2001/XMLSchema#";
const VIAF: &str = "https://viaf.org/viaf/";
const RUG01: &str = "https://lib.ugent.be/catalog/rug01:";
const BIBLIO: &str = "https://biblio.ugent.be/record/";

/// Drop one trailing `,` `.` `:` or `/` with the whitespace before it
fn strip(value: &str) -> &str {
    match value.strip_suffix([',', '.', ':', '/']) {
        Some(rest) => rest.trim_end(),
        None => value,
    }
}

fn joined(field: &Field, codes: &str) -> String {
    strip(&field.subfield_values(codes).join(" ")).to_string()
}

fn year(value: &str) -> Term {
    Term {
        datatype: Some(format!("{}gYear", XSD)),
        ..Term::literal(value)
    }
}

/// `rdf:type` objects for a 920 material code
fn material_types(code: &str) -> &'static [&'static str] {
    match code {
        "catalog" | "book" => &["https://schema.org/Book"],
        "correspondence" => &[
            "https://schema.org/CreativeWork",
            "http://purl.org/ontology/bibo/Letter",
        ],
        "dissertation" | "master" | "phd" => &["https://schema.org/Thesis"],
        "ephemera" => &[
            "https://schema.org/CreativeWork",
            "http://purl.org/ontology/bibo/Document",
        ],
        "image" => &["https://schema.org/VisualArtwork"],
        "manuscript" => &[
            "https://schema.org/Book",
            "http://purl.org/ontology/bibo/Manuscript",
        ],
        "map" => &["https://schema.org/Map"],
        "periodical" => &["https://schema.org/Periodical"],
        _ => &["https://schema.org/CreativeWork"],
    }
}

pub struct Marc2Rdf;

#[async_trait]
impl TransformPlugin for Marc2Rdf {
    async fn create(&self, options: &PluginOptions) -> Result<BoxStage> {
        Ok(Box::new(Marc2RdfStage::new(options.param("base").unwrap_or(THIS))?))
    }
}

pub struct Marc2RdfStage {
    base: String,
    prefixes: BTreeMap<String, String>,
    local_id: Regex,
    viaf: Regex,
    lifespan: Regex,
    year: Regex,
}

impl Marc2RdfStage {
    pub fn new(base: &str) -> Result<Self> {
        let regex = |pattern: &str| {
            Regex::new(pattern).map_err(|e| Error::Configuration(e.to_string()))
        };
        let prefixes = [
            ("this", base),
            ("schema", SCHEMA),
            ("rdf", RDF),
            ("genid", GENID),
            ("owl", OWL),
            ("bibo", BIBO),
            ("xmlschema", XSD),
        ]
        .into_iter()
        .map(|(prefix, iri)| (prefix.to_string(), iri.to_string()))
        .collect();

        Ok(Self {
            base: base.to_string(),
            prefixes,
            local_id: regex(r"^\((RUG01|BIBLIO)\)(\d.*)$")?,
            viaf: regex(r"\(viaf\)\d{2,}")?,
            lifespan: regex(r"\d{4}-(\d{4})?")?,
            year: regex(r"^\d{4}$")?,
        })
    }

    /// Quads for one record, or `None` without a single 001
    pub fn convert(&self, record: &Record) -> Option<Graph> {
        let id = record.id()?;
        let mut graph = GraphBuilder::new(Term::named(format!("{}{}", self.base, id)));

        for field in &record.fields {
            match field.tag.as_str() {
                "035" => self.identifier(&mut graph, field),
                "100" => self.author(&mut graph, field),
                "245" => graph.literal("name", joined(field, "ab")),
                "246" => graph.literal("alternativeHeadline", joined(field, "a")),
                "260" => {
                    graph.literal("locationCreated", joined(field, "a"));
                    graph.literal("publisher", joined(field, "b"));
                    let date = joined(field, "c");
                    if self.year.is_match(&date) {
                        graph.record(&format!("{}datePublished", SCHEMA), year(&date));
                    } else {
                        graph.literal("datePublished", date);
                    }
                },
                "300" => graph.literal("numberOfPages", joined(field, "a")),
                "340" => graph.literal("material", joined(field, "a")),
                "500" => graph.literal("description", joined(field, "a")),
                "520" => graph.literal("abstract", joined(field, "a")),
                "650" => {
                    let node = graph.node("about", "Thing");
                    for (codes, predicate) in [
                        ("ax", "name"),
                        ("v", "genre"),
                        ("y", "temporalCoverage"),
                        ("z", "spatialCoverage"),
                    ] {
                        for value in field.subfield_values(codes) {
                            let predicate = format!("{}{}", SCHEMA, predicate);
                            graph.add(&node, &predicate, Term::literal(strip(value)));
                        }
                    }
                },
                "856" => {
                    let url = joined(field, "u");
                    if !url.is_empty() {
                        let node = graph.node("encoding", "MediaObject");
                        graph.add(&node, &format!("{}contentUrl", RDF), Term::named(url));
                    }
                },
                "920" => {
                    let code = joined(field, "a");
                    if !code.is_empty() {
                        for class in material_types(&code) {
                            graph.record(&format!("{}type", RDF), Term::named(*class));
                        }
                    }
                },
                _ => {},
            }
        }

        Some(Graph {
            prefixes: self.prefixes.clone(),
            quads: graph.quads,
        })
    }

    fn identifier(&self, graph: &mut GraphBuilder, field: &Field) {
        let Some(value) = field.subfield_values("a").first().copied() else {
            return;
        };
        let Some(caps) = self.local_id.captures(value) else {
            return;
        };
        let (predicate, namespace) = match &caps[1] {
            "RUG01" => ("replaces", RUG01),
            _ => ("workExample", BIBLIO),
        };
        graph.record(
            &format!("{}{}", SCHEMA, predicate),
            Term::named(format!("{}{}", namespace, &caps[2])),
        );
    }

    fn author(&self, graph: &mut GraphBuilder, field: &Field) {
        let names = field.subfield_values("a");
        if names.is_empty() {
            return;
        }
        let person = match field.subfield_values("0").first() {
            Some(id) if self.viaf.is_match(id) => {
                Term::named(format!("{}{}", VIAF, id.replace("(viaf)", "")))
            },
            _ => genid(),
        };
        graph.record(&format!("{}author", SCHEMA), person.clone());
        let person_class = Term::named(format!("{}Person", SCHEMA));
        graph.add(&person, &format!("{}type", RDF), person_class);
        for name in names {
            graph.add(&person, &format!("{}name", SCHEMA), Term::literal(strip(name)));
        }

        let Some(dates) = field.subfield_values("d").first().copied() else {
            return;
        };
        if !self.lifespan.is_match(dates) {
            return;
        }
        let (born, died) = dates.split_once('-').unwrap_or((dates, ""));
        for (predicate, value) in [("birthDate", born), ("deathDate", died)] {
            let value = strip(value.trim());
            if !value.is_empty() {
                graph.add(&person, &format!("{}{}", SCHEMA, predicate), year(value));
            }
        }
    }
}

fn genid() -> Term {
    Term::named(format!("{}{}", GENID, Uuid::new_v4()))
}

/// Collects the quads of one record
struct GraphBuilder {
    subject: Term,
    quads: Vec<Quad>,
}

impl GraphBuilder {
    fn new(subject: Term) -> Self {
        Self {
            subject,
            quads: Vec::new(),
        }
    }

    fn add(&mut self, subject: &Term, predicate: &str, object: Term) {
        self.quads.push(Quad {
            subject: subject.clone(),
            predicate: Term::named(predicate),
            object,
        });
    }

    /// A statement about the record itself
    fn record(&mut self, predicate: &str, object: Term) {
        let subject = self.subject.clone();
        self.add(&subject, predicate, object);
    }

    /// A `schema:` literal about the record, skipped when empty
    fn literal(&mut self, property: &str, value: String) {
        if !value.is_empty() {
            self.record(&format!("{}{}", SCHEMA, property), Term::literal(value));
        }
    }

    /// A fresh node typed `schema:<class>` linked from the record
    fn node(&mut self, property: &str, class: &str) -> Term {
        let node = genid();
        self.record(&format!("{}{}", SCHEMA, property), node.clone());
        let class = Term::named(format!("{}{}", SCHEMA, class));
        self.add(&node, &format!("{}type", RDF), class);
        node
    }
}

#[async_trait]
impl Stage for Marc2RdfStage {
    fn name(&self) -> &str {
        "marc2rdf"
    }

    async fn process(&mut self, item: Item, out: &mut Outlet) -> Result<Flow> {
        match &item {
            Item::Record(record) => match self.convert(record) {
                Some(graph) => out.push(Item::Graph(graph)).await?,
                None => debug!(fields = record.fields.len(), "record without a single 001"),
            },
            other => debug!(kind = other.kind(), "skipping non-record item"),
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::stage::drive;

    fn sf(code: &str, value: &str) -> (String, String) {
        (code.to_string(), value.to_string())
    }

    fn sample() -> Record {
        Record::new(vec![
            Field::control("001", "000000001"),
            Field::new("035", " ", " ", vec![sf("a", "(RUG01)000000001")]),
            Field::new(
                "100",
                "1",
                " ",
                vec![sf("a", "Doe, Jane,"), sf("d", "1900-1980"), sf("0", "(viaf)12345")],
            ),
            Field::new("245", "1", "0", vec![sf("a", "Stories :"), sf("b", "a subtitle /")]),
            Field::new("260", " ", " ", vec![sf("a", "Gent :"), sf("b", "Snoeck,"), sf("c", "1988")]),
            Field::new("650", " ", "0", vec![sf("a", "Cats"), sf("z", "Belgium.")]),
            Field::new("856", "4", "0", vec![sf("u", "https://example.org/a.pdf")]),
            Field::new("920", " ", " ", vec![sf("a", "correspondence")]),
        ])
    }

    fn objects<'a>(graph: &'a Graph, subject: &str, predicate: &str) -> Vec<&'a Term> {
        graph
            .quads
            .iter()
            .filter(|q| q.subject.value == subject && q.predicate.value == predicate)
            .map(|q| &q.object)
            .collect()
    }

    #[test]
    fn test_strip() {
        assert_eq!(strip("Doe, Jane,"), "Doe, Jane");
        assert_eq!(strip("Stories :"), "Stories");
        assert_eq!(strip("1980."), "1980");
        assert_eq!(strip("plain"), "plain");
    }

    #[test]
    fn test_record_statements() {
        let stage = Marc2RdfStage::new(THIS).unwrap();
        let graph = stage.convert(&sample()).unwrap();
        let me = "https://lib.ugent.be/record000000001";

        assert_eq!(graph.prefixes["schema"], SCHEMA);
        assert_eq!(
            objects(&graph, me, "https://schema.org/replaces"),
            vec![&Term::named("https://lib.ugent.be/catalog/rug01:000000001")]
        );
        assert_eq!(
            objects(&graph, me, "https://schema.org/name"),
            vec![&Term::literal("Stories : a subtitle")]
        );
        assert_eq!(
            objects(&graph, me, "https://schema.org/datePublished"),
            vec![&year("1988")]
        );
        assert_eq!(
            objects(&graph, me, "https://schema.org/publisher"),
            vec![&Term::literal("Snoeck")]
        );
        assert_eq!(
            objects(&graph, me, "http://www.w3.org/1999/02/22-rdf-syntax-ns#type"),
            vec![
                &Term::named("https://schema.org/CreativeWork"),
                &Term::named("http://purl.org/ontology/bibo/Letter"),
            ]
        );
    }

    #[test]
    fn test_author_node() {
        let stage = Marc2RdfStage::new(THIS).unwrap();
        let graph = stage.convert(&sample()).unwrap();
        let viaf = "https://viaf.org/viaf/12345";

        assert_eq!(
            objects(&graph, "https://lib.ugent.be/record000000001", "https://schema.org/author"),
            vec![&Term::named(viaf)]
        );
        assert_eq!(
            objects(&graph, viaf, "https://schema.org/name"),
            vec![&Term::literal("Doe, Jane")]
        );
        assert_eq!(objects(&graph, viaf, "https://schema.org/birthDate"), vec![&year("1900")]);
        assert_eq!(objects(&graph, viaf, "https://schema.org/deathDate"), vec![&year("1980")]);
    }

    #[test]
    fn test_subject_and_encoding_nodes() {
        let stage = Marc2RdfStage::new("https://example.org/r/").unwrap();
        let graph = stage.convert(&sample()).unwrap();
        let me = "https://example.org/r/000000001";

        let about = objects(&graph, me, "https://schema.org/about");
        assert_eq!(about.len(), 1);
        assert!(about[0].value.starts_with(GENID));
        assert_eq!(
            objects(&graph, &about[0].value, "https://schema.org/spatialCoverage"),
            vec![&Term::literal("Belgium")]
        );

        let encoding = objects(&graph, me, "https://schema.org/encoding");
        assert_eq!(
            objects(
                &graph,
                &encoding[0].value,
                "http://www.w3.org/1999/02/22-rdf-syntax-ns#contentUrl"
            ),
            vec![&Term::named("https://example.org/a.pdf")]
        );
        assert_ne!(about[0].value, encoding[0].value);
    }

    #[tokio::test]
    async fn test_records_without_id_and_other_items_are_dropped() {
        let mut stage = Marc2Rdf.create(&PluginOptions::default()).await.unwrap();
        let items = vec![
            Item::Record(Record::new(vec![Field::new("245", "0", "0", vec![sf("a", "No id")])])),
            Item::Object(serde_json::json!({"id": "x"})),
            Item::Record(sample()),
        ];
        let out = drive(stage.as_mut(), items).await.unwrap();
        assert_eq!(out.len(), 1);
        assert!(matches!(&out[0], Item::Graph(graph) if !graph.quads.is_empty()));
    }
}
