//! marcstream engine
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Streaming record conversion:
//!
//! - **Backends**: file, HTTP/LDP, object storage, SFTP and standard streams
//! - **Stages**: decompression, archive extraction, skip/limit, metrics
//! - **Plugins**: input codecs, output codecs and transforms by name
//! - **Engine**: bounded channels, backpressure and controlled stop
//!
//! # Example
//!
//! ```no_run
//! use marcstream_common::Locator;
//! use marcstream_engine::{Assembler, BackendSettings, PipelineOptions};
//!
//! # async fn example() -> marcstream_common::Result<()> {
//! let assembler = Assembler::with_builtins(BackendSettings::from_env())?;
//! let options = PipelineOptions {
//!     to: Some("jsonl".to_string()),
//!     ..PipelineOptions::new("alephseq")
//! };
//! let outcome = assembler
//!     .run(&Locator::parse("records.seq")?, &options, None)
//!     .await?;
//! tracing::info!(records = outcome.records, "done");
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod codec;
pub mod config;
pub mod engine;
pub mod item;
pub mod multipart;
pub mod pipeline;
pub mod plugin;
pub mod stage;
pub mod transform;

pub use backend::{Backend, Backends, ByteSink, ByteSource, Entry, MemoryStore};
pub use config::{BackendSettings, PipelineOptions, PrivateKey, S3Settings, SftpSettings};
pub use engine::{Outcome, Pipeline};
pub use item::Item;
pub use multipart::MultipartUploadSink;
pub use pipeline::{Assembler, SinkTarget};
pub use plugin::{InputCodec, InputOptions, OutputCodec, PluginKind, PluginOptions, Registry, TransformPlugin};
pub use stage::{Flow, Outlet, RecordCounter, Stage};
