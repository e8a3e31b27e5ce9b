//! Pipeline assembly
//!
//! Turns an input locator plus [`PipelineOptions`] into a ready-to-run
//! [`Pipeline`]: source, optional decompression and archive stages, input
//! codec, skip/limit, metrics, transform, output codec and sink.

use crate::backend::{Backends, ByteSink};
use crate::config::{BackendSettings, PipelineOptions};
use crate::engine::{Outcome, Pipeline};
use crate::plugin::{InputOptions, PluginOptions, Registry};
use crate::stage::{Gunzip, Metrics, RecordCounter, SkipLimit, Untar};
use marcstream_common::{Error, Locator, Result};
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Where encoded output goes
pub enum SinkTarget {
    /// Opened through the matching backend
    Locator(Locator),
    /// Already open, used as is
    Open(Box<dyn ByteSink>),
}

impl std::fmt::Debug for SinkTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkTarget::Locator(locator) => f.debug_tuple("Locator").field(locator).finish(),
            SinkTarget::Open(_) => f.write_str("Open(..)"),
        }
    }
}

fn wants_gunzip(path: &str) -> bool {
    path.ends_with(".gz")
}

fn wants_untar(path: &str) -> Result<bool> {
    let tar = Regex::new(r"\.tar(\.\w+)?$").map_err(|e| Error::Configuration(e.to_string()))?;
    Ok(tar.is_match(path) || path.ends_with(".tgz"))
}

/// Builds pipelines from the registered backends and plugins
#[derive(Clone)]
pub struct Assembler {
    backends: Backends,
    registry: Arc<Registry>,
}

impl Assembler {
    pub fn new(backends: Backends, registry: Arc<Registry>) -> Self {
        Self { backends, registry }
    }

    /// Every built-in backend, codec and transform
    pub fn with_builtins(settings: BackendSettings) -> Result<Self> {
        Ok(Self::new(
            Backends::new(settings)?,
            Arc::new(Registry::with_builtins()),
        ))
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[instrument(skip(self, options, sink), fields(input = %input))]
    pub async fn assemble(
        &self,
        input: &Locator,
        options: &PipelineOptions,
        sink: Option<SinkTarget>,
    ) -> Result<Pipeline> {
        options.validate()?;

        // plugins are resolved before anything is opened
        let from = options.from.as_deref().unwrap_or_default();
        let input_codec = self.registry.input(from)?;
        let output_codec = options
            .to
            .as_deref()
            .map(|name| self.registry.output(name))
            .transpose()?;
        let transform = options
            .map
            .as_deref()
            .map(|name| self.registry.transform(name))
            .transpose()?;

        if let Some(marker) = input.marker() {
            if marker.kind == marcstream_common::MarkerKind::Glob {
                return Err(Error::Configuration(format!(
                    "{} names several inputs; expand it with `glob` first",
                    input
                )));
            }
        }

        let resolved = self.backends.resolve_latest(input).await?;
        if &resolved != input {
            info!(resolved = %resolved, "resolved latest input");
        }
        let source = self.backends.open_source(&resolved).await?;

        let counter = RecordCounter::new();
        let mut pipeline = Pipeline::new(source, resolved.redacted().to_string(), counter.clone())
            .with_capacity(options.channel_capacity);

        let path = resolved.path().to_lowercase();
        if options.gunzip || wants_gunzip(&path) {
            debug!("adding gunzip stage");
            pipeline.push_stage(Box::new(Gunzip::new()));
        }
        if options.tar || wants_untar(&path)? {
            debug!("adding untar stage");
            pipeline.push_stage(Box::new(Untar::new()));
        }

        let plugin_options = PluginOptions {
            params: options.params.clone(),
        };
        let input_options = InputOptions {
            locator: Some(resolved.clone()),
            params: options.params.clone(),
        };
        pipeline.push_stage(input_codec.create(&input_options).await?);

        if options.count.is_some() || options.skip > 0 {
            pipeline.push_stage(Box::new(SkipLimit::new(options.skip, options.count)));
        }
        pipeline.push_stage(Box::new(Metrics::new(counter)));

        if let Some(transform) = transform {
            pipeline.push_stage(transform.create(&plugin_options).await?);
        }

        match output_codec {
            Some(codec) => {
                pipeline.push_stage(codec.create(&plugin_options).await?);
                let target = match sink {
                    Some(target) => target,
                    None => SinkTarget::Locator(Locator::parse("stdout:")?),
                };
                let (label, opened) = match target {
                    SinkTarget::Locator(locator) => {
                        let opened = self.backends.open_sink(&locator).await?;
                        (locator.redacted().to_string(), opened)
                    },
                    SinkTarget::Open(opened) => ("open sink".to_string(), opened),
                };
                pipeline.set_sink(label, opened);
            },
            None => {
                if sink.is_some() {
                    warn!("no output codec configured, nothing will be written");
                }
            },
        }

        Ok(pipeline)
    }

    /// Assemble and run in one step
    pub async fn run(
        &self,
        input: &Locator,
        options: &PipelineOptions,
        sink: Option<SinkTarget>,
    ) -> Result<Outcome> {
        self.assemble(input, options, sink).await?.run().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_detection() {
        assert!(wants_gunzip("/data/a.mrc.gz"));
        assert!(!wants_gunzip("/data/a.gzip"));
        assert!(wants_untar("/data/a.tar").unwrap());
        assert!(wants_untar("/data/a.tar.gz").unwrap());
        assert!(wants_untar("/data/a.tgz").unwrap());
        assert!(!wants_untar("/data/a.tarball").unwrap());
    }

    #[tokio::test]
    async fn test_missing_input_codec_fails_before_opening() {
        let assembler = Assembler::new(Backends::empty(), Arc::new(Registry::with_builtins()));
        let input = Locator::parse("s3://host/bucket/key").unwrap();

        let err = assembler
            .assemble(&input, &PipelineOptions::default(), None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Configuration(_)));

        // unknown scheme would fail later; the unknown plugin must win
        let err = assembler
            .assemble(&input, &PipelineOptions::new("nope"), None)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::PluginNotFound { .. }));
    }

    #[tokio::test]
    async fn test_glob_input_is_rejected() {
        let assembler = Assembler::new(Backends::empty(), Arc::new(Registry::with_builtins()));
        let input = Locator::parse("/data/@glob:.xml").unwrap();
        let err = assembler
            .assemble(&input, &PipelineOptions::new("xml"), None)
            .await
            .err()
            .unwrap();
        assert_eq!(err.exit_code(), 1);
    }
}
