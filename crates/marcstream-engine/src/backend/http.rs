//! HTTP(S) backend with linked-data container listings
//!
//! Containers are listed through their `ldp:contains` triples; entry
//! modification times come from `dcterms:modified`.

use super::{Backend, ByteSink, ByteSource, Entry, Upload};
use crate::config::MAX_REDIRECTS;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use marcstream_common::{Error, Locator, Result};
use oxrdf::{Subject, Term};
use oxttl::TurtleParser;
use reqwest::{header, redirect, Client, Method, RequestBuilder, Response, StatusCode};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, instrument};

const LDP_CONTAINS: &str = "http://www.w3.org/ns/ldp#contains";
const DCTERMS_MODIFIED: &str = "http://purl.org/dc/terms/modified";
const LISTING_ACCEPT: &str = "text/turtle, application/n-triples;q=0.9";
const UPLOAD_CHANNEL_CAPACITY: usize = 16;

pub struct HttpBackend {
    client: Client,
}

impl HttpBackend {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .user_agent(concat!("marcstream/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Configuration(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    fn request(&self, method: Method, locator: &Locator) -> RequestBuilder {
        let builder = self
            .client
            .request(method, locator.stripped().as_url().clone());
        match locator.username() {
            Some(user) => builder.basic_auth(user, locator.password()),
            None => builder,
        }
    }

    /// GET following redirects by hand so credentials stay on the original host
    #[instrument(skip(self))]
    async fn get(&self, locator: &Locator, accept: Option<&str>) -> Result<Response> {
        let mut current = locator.clone();

        for _ in 0..=MAX_REDIRECTS {
            let mut request = self.request(Method::GET, &current);
            if let Some(accept) = accept {
                request = request.header(header::ACCEPT, accept);
            }
            let response = request
                .send()
                .await
                .map_err(|e| Error::transport(&current, e))?;
            let status = response.status();

            if status.is_redirection() {
                if let Some(target) = response.headers().get(header::LOCATION) {
                    current = follow(&current, target)?;
                    debug!(to = %current, %status, "following redirect");
                    continue;
                }
            }
            check_status(&current, status)?;
            return Ok(response);
        }

        Err(Error::transport(
            locator,
            anyhow::anyhow!("more than {} redirects", MAX_REDIRECTS),
        ))
    }
}

fn check_status(locator: &Locator, status: StatusCode) -> Result<()> {
    if status.as_u16() >= 400 {
        return Err(Error::transport(locator, anyhow::anyhow!("HTTP status {}", status)));
    }
    Ok(())
}

fn follow(current: &Locator, target: &header::HeaderValue) -> Result<Locator> {
    let target = target
        .to_str()
        .map_err(|e| Error::transport(current, e))?;
    let url = current
        .stripped()
        .as_url()
        .join(target)
        .map_err(|e| Error::transport(current, e))?;

    let same_origin = url.host_str() == current.host() && url.port() == current.port();
    let next = if same_origin {
        let mut carried = current.with_path(url.path()).as_url().clone();
        carried.set_query(url.query());
        Locator::from_url(carried)
    } else {
        Locator::from_url(url)
    };
    Ok(next)
}

/// Parse a container description into `(child, modified)` pairs
pub(crate) fn parse_container(
    body: &[u8],
    base: &str,
) -> std::result::Result<Vec<(String, Option<DateTime<Utc>>)>, anyhow::Error> {
    let mut children = Vec::new();
    let mut modified: HashMap<String, DateTime<Utc>> = HashMap::new();

    for triple in TurtleParser::new().with_base_iri(base)?.for_slice(body) {
        let triple = triple?;
        match triple.predicate.as_str() {
            LDP_CONTAINS => {
                if let Term::NamedNode(child) = triple.object {
                    children.push(child.into_string());
                }
            },
            DCTERMS_MODIFIED => {
                let subject = match triple.subject {
                    Subject::NamedNode(node) => node.into_string(),
                    _ => continue,
                };
                if let Term::Literal(literal) = triple.object {
                    if let Ok(time) = DateTime::parse_from_rfc3339(literal.value()) {
                        modified.insert(subject, time.with_timezone(&Utc));
                    }
                }
            },
            _ => {},
        }
    }

    Ok(children
        .into_iter()
        .map(|child| {
            let time = modified.get(&child).copied();
            (child, time)
        })
        .collect())
}

#[async_trait]
impl Backend for HttpBackend {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn open_source(&self, locator: &Locator) -> Result<ByteSource> {
        let response = self.get(locator, None).await?;
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other))
            .boxed())
    }

    async fn open_sink(&self, locator: &Locator) -> Result<Box<dyn ByteSink>> {
        let (tx, rx) = mpsc::channel(UPLOAD_CHANNEL_CAPACITY);
        let request = self
            .request(Method::PUT, locator)
            .body(reqwest::Body::wrap_stream(upload_body(rx)));
        let target = locator.clone();

        let upload = tokio::spawn(async move {
            let response = request
                .send()
                .await
                .map_err(|e| Error::transport(&target, e))?;
            check_status(&target, response.status())
        });

        Ok(Box::new(HttpSink {
            tx: Some(tx),
            upload: Some(upload),
        }))
    }

    async fn list(&self, container: &Locator) -> Result<Vec<Entry>> {
        let response = self.get(container, Some(LISTING_ACCEPT)).await?;
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::transport(container, e))?;

        let base = container.stripped().as_url().to_string();
        let children = parse_container(&body, &base).map_err(|source| Error::Listing {
            container: container.to_string(),
            source,
        })?;

        Ok(children
            .into_iter()
            .filter_map(|(child, modified)| {
                let url = url::Url::parse(&child).ok()?;
                let raw = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
                let name = urlencoding::decode(raw)
                    .map(|n| n.into_owned())
                    .unwrap_or_else(|_| raw.to_string());
                Some(Entry {
                    locator: container.with_path(url.path()),
                    name,
                    modified,
                })
            })
            .collect())
    }
}

/// Request body fed by the sink; ends in an error unless the sink finished
fn upload_body(rx: mpsc::Receiver<Upload>) -> impl Stream<Item = std::io::Result<Bytes>> {
    futures::stream::unfold(Some(rx), |state| async move {
        let mut rx = state?;
        match rx.recv().await {
            Some(Upload::Chunk(chunk)) => Some((Ok(chunk), Some(rx))),
            Some(Upload::Finish) => None,
            None => Some((
                Err(std::io::Error::other("upload abandoned before finalize")),
                None,
            )),
        }
    })
}

/// Streams the request body of a PUT issued when the sink was opened
struct HttpSink {
    tx: Option<mpsc::Sender<Upload>>,
    upload: Option<JoinHandle<Result<()>>>,
}

impl HttpSink {
    async fn join(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            // a closed channel means the request already ended; its result says why
            let _ = tx.send(Upload::Finish).await;
        }
        match self.upload.take() {
            Some(handle) => handle
                .await
                .map_err(|e| Error::Unknown(format!("upload task failed: {}", e)))?,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ByteSink for HttpSink {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        let sent = match &self.tx {
            Some(tx) => tx.send(Upload::Chunk(chunk)).await.is_ok(),
            None => false,
        };
        if sent {
            return Ok(());
        }
        // the request ended early; surface its error
        self.join().await?;
        Err(Error::DownstreamClosed)
    }

    async fn finalize(&mut self) -> Result<()> {
        self.join().await
    }
}

impl Drop for HttpSink {
    fn drop(&mut self) {
        if let Some(upload) = self.upload.take() {
            debug!("http sink dropped before finalize, abandoning upload");
            upload.abort();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use wiremock::matchers::{body_string, header as header_is, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn locator(server: &MockServer, p: &str) -> Locator {
        Locator::parse(&format!("{}{}", server.uri(), p)).unwrap()
    }

    async fn read_all(source: ByteSource) -> Vec<u8> {
        let chunks: Vec<Bytes> = source.try_collect().await.unwrap();
        chunks.concat()
    }

    #[tokio::test]
    async fn test_follows_redirects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/old"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/new"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/new"))
            .respond_with(ResponseTemplate::new(200).set_body_string("payload"))
            .mount(&server)
            .await;

        let backend = HttpBackend::new().unwrap();
        let source = backend.open_source(&locator(&server, "/old")).await.unwrap();
        assert_eq!(read_all(source).await, b"payload");
    }

    #[tokio::test]
    async fn test_error_status_is_transport_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let backend = HttpBackend::new().unwrap();
        let err = backend
            .open_source(&locator(&server, "/missing"))
            .await
            .err()
            .unwrap();
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_redirect_loop_is_bounded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/loop"))
            .respond_with(ResponseTemplate::new(301).insert_header("Location", "/loop"))
            .mount(&server)
            .await;

        let backend = HttpBackend::new().unwrap();
        let err = backend
            .open_source(&locator(&server, "/loop"))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("redirects"));
    }

    #[tokio::test]
    async fn test_basic_auth_from_locator() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/private"))
            .and(header_is("Authorization", "Basic dXNlcjpwYXNz"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let uri = server.uri().replace("http://", "http://user:pass@");
        let loc = Locator::parse(&format!("{}/private", uri)).unwrap();
        let backend = HttpBackend::new().unwrap();
        let source = backend.open_source(&loc).await.unwrap();
        assert_eq!(read_all(source).await, b"ok");
    }

    #[tokio::test]
    async fn test_ldp_latest_and_glob() {
        let server = MockServer::start().await;
        let listing = r#"
            @prefix ldp: <http://www.w3.org/ns/ldp#> .
            @prefix dcterms: <http://purl.org/dc/terms/> .
            @prefix xsd: <http://www.w3.org/2001/XMLSchema#> .
            <> ldp:contains <a.xml>, <b.xml>, <c.ttl> .
            <a.xml> dcterms:modified "2024-01-01T00:00:00Z"^^xsd:dateTime .
            <b.xml> dcterms:modified "2024-03-01T00:00:00Z"^^xsd:dateTime .
            <c.ttl> dcterms:modified "2024-06-01T00:00:00Z"^^xsd:dateTime .
        "#;
        Mock::given(method("GET"))
            .and(path("/container/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Type", "text/turtle")
                    .set_body_string(listing),
            )
            .mount(&server)
            .await;

        let backend = HttpBackend::new().unwrap();
        let latest = backend
            .resolve_latest(&locator(&server, "/container/@latest:.xml"))
            .await
            .unwrap();
        assert_eq!(latest.path(), "/container/b.xml");

        let all = backend
            .resolve_glob(&locator(&server, "/container/@glob:*"))
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_put_sink_streams_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/upload.seq"))
            .and(body_string("line 1\nline 2\n"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let backend = HttpBackend::new().unwrap();
        let mut sink = backend
            .open_sink(&locator(&server, "/upload.seq"))
            .await
            .unwrap();
        sink.write(Bytes::from_static(b"line 1\n")).await.unwrap();
        sink.write(Bytes::from_static(b"line 2\n")).await.unwrap();
        sink.finalize().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_sink_does_not_commit_upload() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/partial.seq"))
            .respond_with(ResponseTemplate::new(201))
            .expect(0)
            .mount(&server)
            .await;

        let backend = HttpBackend::new().unwrap();
        let mut sink = backend
            .open_sink(&locator(&server, "/partial.seq"))
            .await
            .unwrap();
        sink.write(Bytes::from_static(b"partial-")).await.unwrap();
        drop(sink);

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let requests = server.received_requests().await.unwrap();
        assert!(requests.iter().all(|r| r.method.as_str() != "PUT"));
    }
}
