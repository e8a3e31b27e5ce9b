//! End-to-end pipeline tests over local files and the in-memory object store

#![allow(clippy::unwrap_used, clippy::expect_used)]

use async_trait::async_trait;
use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;
use marcstream_common::{Error, Field, Locator, Record, Result};
use marcstream_engine::backend::{FileBackend, S3Backend};
use marcstream_engine::{
    Assembler, Backends, ByteSink, InputOptions, Item, MemoryStore, PipelineOptions, Registry,
    S3Settings, SinkTarget,
};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

/// Sink collecting everything into a shared buffer
#[derive(Clone, Default)]
struct Collected {
    bytes: Arc<Mutex<Vec<u8>>>,
    finalized: Arc<Mutex<bool>>,
}

impl Collected {
    fn text(&self) -> String {
        String::from_utf8(self.bytes.lock().unwrap().clone()).unwrap()
    }

    fn target(&self) -> SinkTarget {
        SinkTarget::Open(Box::new(self.clone()))
    }
}

#[async_trait]
impl ByteSink for Collected {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        self.bytes.lock().unwrap().extend_from_slice(&chunk);
        Ok(())
    }

    async fn finalize(&mut self) -> Result<()> {
        *self.finalized.lock().unwrap() = true;
        Ok(())
    }
}

fn assembler(store: Option<(MemoryStore, usize)>) -> Assembler {
    let mut backends = Backends::empty();
    backends.register("file", Arc::new(FileBackend));
    if let Some((store, part_size)) = store {
        let settings = S3Settings {
            part_size,
            ..S3Settings::default()
        };
        backends.register("s3", Arc::new(S3Backend::with_connector(settings, Arc::new(store))));
    }
    Assembler::new(backends, Arc::new(Registry::with_builtins()))
}

fn alephseq(ids: impl IntoIterator<Item = u32>) -> String {
    ids.into_iter()
        .map(|i| {
            format!(
                "{id:09} FMT   L BK\n{id:09} 001   L {id:09}\n{id:09} 24510 L $$aTitle {id}\n",
                id = i
            )
        })
        .collect()
}

fn write_file(dir: &Path, name: &str, content: &[u8]) -> Locator {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    Locator::parse(path.to_str().unwrap()).unwrap()
}

fn options(from: &str, to: Option<&str>) -> PipelineOptions {
    PipelineOptions {
        to: to.map(str::to_string),
        ..PipelineOptions::new(from)
    }
}

#[tokio::test]
async fn test_record_to_object_storage_in_parts() {
    let dir = TempDir::new().unwrap();
    let input = write_file(
        dir.path(),
        "in.jsonl",
        br#"{"record":[["001"," "," ","_","X1"],["100","1"," ","a","Name"]]}"#,
    );
    let store = MemoryStore::new();
    let assembler = assembler(Some((store.clone(), 1)));
    let output = Locator::parse("s3://minio.local:9000/bucket/out.seq").unwrap();

    let outcome = assembler
        .run(&input, &options("jsonl", Some("alephseq")), Some(SinkTarget::Locator(output)))
        .await
        .unwrap();
    assert_eq!(outcome.records, 1);

    let calls = store.calls();
    assert!(calls.part_numbers.len() >= 2);
    assert_eq!(calls.part_numbers[0], 1);
    assert!(calls.part_numbers.windows(2).all(|w| w[1] == w[0] + 1));
    assert_eq!(calls.complete, 1);
    assert_eq!(calls.put, 0);

    let written = store.object("bucket", "out.seq").unwrap();
    let decoded = Registry::with_builtins()
        .input("alephseq")
        .unwrap()
        .decode_bytes(written, &InputOptions::default())
        .await
        .unwrap();
    assert_eq!(
        decoded,
        vec![Item::Record(Record::new(vec![
            Field::control("FMT", "BK"),
            Field::control("001", "X1"),
            Field::new("100", "1", " ", vec![("a".into(), "Name".into())]),
        ]))]
    );
}

#[tokio::test]
async fn test_empty_output_is_written_directly() {
    let dir = TempDir::new().unwrap();
    let input = write_file(dir.path(), "empty.seq", b"");
    let store = MemoryStore::new();
    let assembler = assembler(Some((store.clone(), 4)));
    let output = Locator::parse("s3://minio.local:9000/bucket/empty.seq").unwrap();

    let outcome = assembler
        .run(&input, &options("alephseq", Some("alephseq")), Some(SinkTarget::Locator(output)))
        .await
        .unwrap();
    assert_eq!(outcome.records, 0);

    let calls = store.calls();
    assert_eq!(calls.put, 1);
    assert_eq!(calls.create_multipart, 0);
    assert_eq!(store.object("bucket", "empty.seq"), Some(Bytes::new()));
}

#[tokio::test]
async fn test_skip_and_count_stop_early() {
    let dir = TempDir::new().unwrap();
    let input = write_file(dir.path(), "in.seq", alephseq(1..=50).as_bytes());
    let sink = Collected::default();

    let opts = PipelineOptions {
        skip: 2,
        count: Some(3),
        map: Some("marcids".to_string()),
        ..options("alephseq", Some("jsonl"))
    };
    let outcome = assembler(None).run(&input, &opts, Some(sink.target())).await.unwrap();

    assert!(outcome.stopped_early);
    assert_eq!(outcome.records, 3);
    assert!(*sink.finalized.lock().unwrap());
    assert_eq!(
        sink.text(),
        "{\"id\":\"000000003\"}\n{\"id\":\"000000004\"}\n{\"id\":\"000000005\"}\n"
    );
}

#[tokio::test]
async fn test_metrics_match_outcome() {
    let dir = TempDir::new().unwrap();
    let input = write_file(dir.path(), "in.seq", alephseq(1..=25).as_bytes());
    let sink = Collected::default();

    let pipeline = assembler(None)
        .assemble(&input, &options("alephseq", Some("tsv")), Some(sink.target()))
        .await
        .unwrap();
    let counter = pipeline.counter().clone();
    let outcome = pipeline.run().await.unwrap();

    assert_eq!(outcome.records, 25);
    assert_eq!(counter.get(), 25);
    assert!(!outcome.stopped_early);
    assert_eq!(sink.text().lines().count(), 1 + 25 * 3);
}

#[tokio::test]
async fn test_gzipped_tar_input() {
    let dir = TempDir::new().unwrap();
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (name, ids) in [("a.seq", 1..=3), ("b.seq", 4..=5)] {
        let data = alephseq(ids);
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, data.as_bytes()).unwrap();
    }
    let archive = builder.into_inner().unwrap().finish().unwrap();
    let input = write_file(dir.path(), "records.tar.gz", &archive);
    let sink = Collected::default();

    let opts = PipelineOptions {
        map: Some("marcids".to_string()),
        ..options("alephseq", Some("jsonl"))
    };
    let outcome = assembler(None).run(&input, &opts, Some(sink.target())).await.unwrap();
    assert_eq!(outcome.records, 5);
    assert!(sink.text().ends_with("{\"id\":\"000000005\"}\n"));
}

#[tokio::test]
async fn test_explicit_gunzip_flag() {
    let dir = TempDir::new().unwrap();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(alephseq(1..=4).as_bytes()).unwrap();
    let input = write_file(dir.path(), "compressed.bin", &encoder.finish().unwrap());

    let opts = PipelineOptions {
        gunzip: true,
        ..options("alephseq", None)
    };
    let outcome = assembler(None).run(&input, &opts, None).await.unwrap();
    assert_eq!(outcome.records, 4);
}

#[tokio::test]
async fn test_latest_input_is_resolved() {
    let dir = TempDir::new().unwrap();
    let now = SystemTime::now();
    for (name, ids, age) in [("old.seq", 1..=1, 3600), ("new.seq", 7..=8, 10)] {
        let path = dir.path().join(name);
        std::fs::write(&path, alephseq(ids)).unwrap();
        let file = std::fs::File::options().write(true).open(&path).unwrap();
        file.set_modified(now - Duration::from_secs(age)).unwrap();
    }
    let input = Locator::parse(&format!("{}/@latest:.seq", dir.path().display())).unwrap();
    let sink = Collected::default();

    let opts = PipelineOptions {
        map: Some("marcids".to_string()),
        ..options("alephseq", Some("jsonl"))
    };
    let outcome = assembler(None).run(&input, &opts, Some(sink.target())).await.unwrap();
    assert_eq!(outcome.records, 2);
    assert_eq!(sink.text(), "{\"id\":\"000000007\"}\n{\"id\":\"000000008\"}\n");
}

#[tokio::test]
async fn test_latest_without_match_is_resolution_error() {
    let dir = TempDir::new().unwrap();
    let input = Locator::parse(&format!("{}/@latest:.xml", dir.path().display())).unwrap();
    let err = assembler(None)
        .run(&input, &options("xml", None), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NoMatch { .. }));
    assert_eq!(err.exit_code(), 4);
}

#[tokio::test]
async fn test_map_only_run_writes_nothing() {
    let dir = TempDir::new().unwrap();
    let input = write_file(dir.path(), "in.seq", alephseq(1..=6).as_bytes());
    let sink = Collected::default();

    let opts = PipelineOptions {
        map: Some("marcids".to_string()),
        ..options("alephseq", None)
    };
    let outcome = assembler(None).run(&input, &opts, Some(sink.target())).await.unwrap();
    assert_eq!(outcome.records, 6);
    assert!(sink.text().is_empty());
    assert!(!*sink.finalized.lock().unwrap());
}

#[tokio::test]
async fn test_malformed_input_reports_stage_and_progress() {
    let dir = TempDir::new().unwrap();
    let mut content = alephseq(1..=3);
    content.push_str("this is not aleph sequential\n");
    let input = write_file(dir.path(), "bad.seq", content.as_bytes());

    let err = assembler(None)
        .run(&input, &options("alephseq", Some("jsonl")), Some(Collected::default().target()))
        .await
        .unwrap_err();

    match &err {
        Error::Pipeline { stage, source, .. } => {
            assert_eq!(stage, "alephseq-input");
            assert!(matches!(**source, Error::Malformed { .. }));
        },
        other => panic!("unexpected error {:?}", other),
    }
    assert_eq!(err.exit_code(), 2);
}

#[tokio::test]
async fn test_unknown_output_codec_opens_nothing() {
    let dir = TempDir::new().unwrap();
    let input = write_file(dir.path(), "in.seq", alephseq(1..=1).as_bytes());
    let sink = Collected::default();

    let err = assembler(None)
        .assemble(&input, &options("alephseq", Some("nosuch")), Some(sink.target()))
        .await
        .err()
        .unwrap();
    assert!(matches!(err, Error::PluginNotFound { .. }));
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn test_xml_to_tsv_and_back() {
    let dir = TempDir::new().unwrap();
    let input = write_file(dir.path(), "in.seq", alephseq(1..=3).as_bytes());

    let xml = Collected::default();
    assembler(None)
        .run(&input, &options("alephseq", Some("xml")), Some(xml.target()))
        .await
        .unwrap();
    let xml_file = write_file(dir.path(), "mid.xml", xml.text().as_bytes());

    let tsv = Collected::default();
    let outcome = assembler(None)
        .run(&xml_file, &options("xml", Some("tsv")), Some(tsv.target()))
        .await
        .unwrap();
    assert_eq!(outcome.records, 3);
    let tsv_file = write_file(dir.path(), "out.tsv", tsv.text().as_bytes());

    let back = Collected::default();
    assembler(None)
        .run(&tsv_file, &options("tsv", Some("alephseq")), Some(back.target()))
        .await
        .unwrap();
    assert_eq!(back.text(), alephseq(1..=3));
}

#[tokio::test]
async fn test_binary_marc_to_ntriples() {
    let dir = TempDir::new().unwrap();
    let input = write_file(
        dir.path(),
        "records.mrc",
        include_bytes!("fixtures/two-records.mrc"),
    );
    let sink = Collected::default();

    let opts = PipelineOptions {
        map: Some("marc2rdf".to_string()),
        ..options("marc", Some("nt"))
    };
    let outcome = assembler(None).run(&input, &opts, Some(sink.target())).await.unwrap();
    assert_eq!(outcome.records, 2);

    let text = sink.text();
    assert!(text.contains(
        "<https://lib.ugent.be/record000000002> <https://schema.org/name> \"Second record\" .\n"
    ));
    assert!(text.contains(
        "<https://lib.ugent.be/record000000001> <https://schema.org/datePublished> \
         \"1988\"^^<http://www.w3.org/2001/XMLSchema#gYear> .\n"
    ));
    assert!(text.contains("<http://purl.org/ontology/bibo/Letter>"));
}
