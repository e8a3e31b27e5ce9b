//! SFTP backend
//!
//! libssh2 is blocking, so every stream runs on its own blocking thread that
//! owns a fresh SSH session. The session ends when the thread does: after the
//! last chunk, on error, or when the consumer drops the stream.

use super::{Backend, ByteSink, ByteSource, Entry, Upload};
use crate::config::{PrivateKey, SftpSettings, DEFAULT_SFTP_PORT};
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::DateTime;
use futures::StreamExt;
use marcstream_common::{Error, Locator, Result};
use ssh2::Session;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

const READ_BUFFER_SIZE: usize = 64 * 1024;
const STREAM_CHANNEL_CAPACITY: usize = 16;

/// Connection parameters with credentials resolved
#[derive(Clone)]
struct SftpTarget {
    host: String,
    port: u16,
    username: String,
    password: Option<String>,
    private_key: Option<PrivateKey>,
    path: PathBuf,
}

impl std::fmt::Debug for SftpTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("private_key", &self.private_key)
            .field("path", &self.path)
            .finish()
    }
}

impl SftpTarget {
    fn resolve(locator: &Locator, settings: &SftpSettings) -> Result<Self> {
        let host = locator.host().ok_or_else(|| Error::InvalidLocator {
            locator: locator.to_string(),
            reason: "missing host".to_string(),
        })?;
        let username = locator
            .username()
            .or_else(|| settings.username.clone())
            .ok_or_else(|| {
                Error::Configuration(format!("no SFTP user name for {}", locator))
            })?;
        let password = locator.password().or_else(|| settings.password.clone());

        Ok(Self {
            host: host.to_string(),
            port: locator.port().unwrap_or(DEFAULT_SFTP_PORT),
            username,
            password,
            private_key: settings.private_key.clone(),
            path: PathBuf::from(locator.path()),
        })
    }

    fn connect(&self) -> anyhow::Result<Session> {
        let tcp = TcpStream::connect((self.host.as_str(), self.port))
            .with_context(|| format!("Failed to connect to {}:{}", self.host, self.port))?;
        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.handshake().context("SSH handshake failed")?;

        match (&self.private_key, &self.password) {
            (Some(PrivateKey::File(path)), passphrase) => session.userauth_pubkey_file(
                &self.username,
                None,
                path,
                passphrase.as_deref(),
            )?,
            (Some(PrivateKey::Inline(key)), passphrase) => session.userauth_pubkey_memory(
                &self.username,
                None,
                key,
                passphrase.as_deref(),
            )?,
            (None, Some(password)) => session.userauth_password(&self.username, password)?,
            (None, None) => session.userauth_agent(&self.username)?,
        }

        if !session.authenticated() {
            anyhow::bail!("SSH authentication failed for {}", self.username);
        }
        Ok(session)
    }
}

fn pump(mut file: ssh2::File, tx: mpsc::Sender<std::io::Result<Bytes>>) {
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                if tx.blocking_send(Ok(Bytes::copy_from_slice(&buffer[..n]))).is_err() {
                    // consumer went away
                    break;
                }
            },
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                break;
            },
        }
    }
}

/// Copy chunks into `out` until the sink finishes; a closed channel is an abort
fn drain_upload<W: Write>(rx: &mut mpsc::Receiver<Upload>, out: &mut W) -> anyhow::Result<()> {
    while let Some(message) = rx.blocking_recv() {
        match message {
            Upload::Chunk(chunk) => out.write_all(&chunk).context("Failed to write remote file")?,
            Upload::Finish => {
                out.flush()?;
                return Ok(());
            },
        }
    }
    anyhow::bail!("upload abandoned before finalize")
}

pub struct SftpBackend {
    settings: SftpSettings,
}

impl SftpBackend {
    pub fn new(settings: SftpSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Backend for SftpBackend {
    fn name(&self) -> &'static str {
        "sftp"
    }

    async fn open_source(&self, locator: &Locator) -> Result<ByteSource> {
        let target = SftpTarget::resolve(locator, &self.settings)?;
        debug!("sftp config: {:?}", target);
        info!(path = %target.path.display(), "opening remote file");

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel::<anyhow::Result<()>>();

        tokio::task::spawn_blocking(move || {
            let opened = target.connect().and_then(|session| {
                let file = session.sftp()?.open(&target.path)?;
                Ok((session, file))
            });
            match opened {
                Ok((session, file)) => {
                    let _ = ready_tx.send(Ok(()));
                    pump(file, tx);
                    drop(session);
                },
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                },
            }
        });

        ready_rx
            .await
            .map_err(|e| Error::transport(locator, e))?
            .map_err(|e| Error::transport(locator, e))?;
        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn open_sink(&self, locator: &Locator) -> Result<Box<dyn ByteSink>> {
        let target = SftpTarget::resolve(locator, &self.settings)?;
        debug!("sftp config: {:?}", target);

        let (tx, mut rx) = mpsc::channel::<Upload>(STREAM_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel::<anyhow::Result<()>>();

        let writer = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
            let opened = target.connect().and_then(|session| {
                let sftp = session.sftp()?;
                let file = sftp.create(&target.path)?;
                Ok((session, sftp, file))
            });
            let (session, sftp, mut file) = match opened {
                Ok(opened) => {
                    let _ = ready_tx.send(Ok(()));
                    opened
                },
                Err(e) => {
                    let _ = ready_tx.send(Err(anyhow::anyhow!("{:#}", e)));
                    return Err(e);
                },
            };
            if let Err(e) = drain_upload(&mut rx, &mut file) {
                drop(file);
                if let Err(unlink) = sftp.unlink(&target.path) {
                    warn!(path = %target.path.display(), "could not remove partial upload: {}", unlink);
                }
                return Err(e);
            }
            file.close()?;
            drop(session);
            Ok(())
        });

        ready_rx
            .await
            .map_err(|e| Error::transport(locator, e))?
            .map_err(|e| Error::transport(locator, e))?;

        Ok(Box::new(SftpSink {
            locator: locator.clone(),
            tx: Some(tx),
            writer: Some(writer),
        }))
    }

    async fn list(&self, container: &Locator) -> Result<Vec<Entry>> {
        let target = SftpTarget::resolve(container, &self.settings)?;
        debug!("sftp config: {:?}", target);
        let listing_error = |source: anyhow::Error| Error::Listing {
            container: container.to_string(),
            source,
        };

        let dir = target.path.clone();
        let listing = tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<(PathBuf, ssh2::FileStat)>> {
            let session = target.connect()?;
            let entries = session.sftp()?.readdir(&dir)?;
            Ok(entries)
        })
        .await
        .map_err(|e| listing_error(e.into()))?
        .map_err(listing_error)?;

        let mut entries: Vec<Entry> = listing
            .into_iter()
            .filter(|(_, stat)| stat.is_file())
            .filter_map(|(path, stat)| {
                let name = Path::new(&path).file_name()?.to_string_lossy().into_owned();
                Some(Entry {
                    locator: container.with_path(&format!("{}{}", container.path(), name)),
                    modified: stat
                        .mtime
                        .and_then(|secs| DateTime::from_timestamp(secs as i64, 0)),
                    name,
                })
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

struct SftpSink {
    locator: Locator,
    tx: Option<mpsc::Sender<Upload>>,
    writer: Option<JoinHandle<anyhow::Result<()>>>,
}

impl SftpSink {
    async fn join(&mut self) -> Result<()> {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Upload::Finish).await;
        }
        match self.writer.take() {
            Some(handle) => handle
                .await
                .map_err(|e| Error::transport(&self.locator, e))?
                .map_err(|e| Error::transport(&self.locator, e)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ByteSink for SftpSink {
    async fn write(&mut self, chunk: Bytes) -> Result<()> {
        let sent = match &self.tx {
            Some(tx) => tx.send(Upload::Chunk(chunk)).await.is_ok(),
            None => false,
        };
        if sent {
            return Ok(());
        }
        self.join().await?;
        Err(Error::DownstreamClosed)
    }

    async fn finalize(&mut self) -> Result<()> {
        self.join().await
    }
}
