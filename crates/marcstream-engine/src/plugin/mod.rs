//! Plugin registry
//!
//! Codecs and transforms are named factories. A name is looked up first as
//! given and then as `<kind>/<name>`, so both `alephseq` and
//! `input/alephseq` select the built-in Aleph sequential reader.

use crate::item::Item;
use crate::stage::{drive, BoxStage};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use marcstream_common::{Error, Locator, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Options handed to input codecs
#[derive(Debug, Clone, Default)]
pub struct InputOptions {
    /// The resolved source, when reading from a backend
    pub locator: Option<Locator>,
    pub params: BTreeMap<String, String>,
}

/// Options handed to output codecs and transforms
#[derive(Debug, Clone, Default)]
pub struct PluginOptions {
    pub params: BTreeMap<String, String>,
}

impl PluginOptions {
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// Bytes in, records out
#[async_trait]
pub trait InputCodec: Send + Sync {
    async fn create(&self, options: &InputOptions) -> Result<BoxStage>;

    /// Decode an in-memory document
    async fn decode_bytes(&self, bytes: Bytes, options: &InputOptions) -> Result<Vec<Item>> {
        let mut stage = self.create(options).await?;
        drive(stage.as_mut(), vec![Item::Bytes(bytes)]).await
    }
}

/// Records in, bytes out
#[async_trait]
pub trait OutputCodec: Send + Sync {
    async fn create(&self, options: &PluginOptions) -> Result<BoxStage>;

    /// Encode in-memory items into one buffer
    async fn encode_items(&self, items: Vec<Item>, options: &PluginOptions) -> Result<Bytes> {
        let mut stage = self.create(options).await?;
        let mut buffer = BytesMut::new();
        for item in drive(stage.as_mut(), items).await? {
            match item {
                Item::Bytes(chunk) => buffer.extend_from_slice(&chunk),
                other => {
                    return Err(Error::UnexpectedItem {
                        stage: stage.name().to_string(),
                        found: other.kind(),
                    })
                },
            }
        }
        Ok(buffer.freeze())
    }
}

/// Records in, records out
#[async_trait]
pub trait TransformPlugin: Send + Sync {
    async fn create(&self, options: &PluginOptions) -> Result<BoxStage>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginKind {
    Input,
    Output,
    Transform,
}

impl std::fmt::Display for PluginKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PluginKind::Input => f.write_str("input"),
            PluginKind::Output => f.write_str("output"),
            PluginKind::Transform => f.write_str("transform"),
        }
    }
}

#[derive(Clone)]
pub enum Plugin {
    Input(Arc<dyn InputCodec>),
    Output(Arc<dyn OutputCodec>),
    Transform(Arc<dyn TransformPlugin>),
}

impl Plugin {
    pub fn kind(&self) -> PluginKind {
        match self {
            Plugin::Input(_) => PluginKind::Input,
            Plugin::Output(_) => PluginKind::Output,
            Plugin::Transform(_) => PluginKind::Transform,
        }
    }
}

/// Named plugin factories
#[derive(Clone, Default)]
pub struct Registry {
    plugins: HashMap<String, Plugin>,
}

impl Registry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with every built-in codec and transform
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        crate::codec::register_builtins(&mut registry);
        crate::transform::register_builtins(&mut registry);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, plugin: Plugin) {
        self.plugins.insert(name.into(), plugin);
    }

    /// Make `alias` resolve to the plugin registered as `target`
    pub fn alias(&mut self, alias: impl Into<String>, target: &str) -> Result<()> {
        let plugin = self
            .plugins
            .get(target)
            .cloned()
            .ok_or_else(|| Error::UnknownPlugin(target.to_string()))?;
        self.plugins.insert(alias.into(), plugin);
        Ok(())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plugins.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn lookup(&self, key: &str, kind: PluginKind) -> Result<Plugin> {
        let plugin = self
            .plugins
            .get(key)
            .ok_or_else(|| Error::UnknownPlugin(key.to_string()))?;
        if plugin.kind() != kind {
            return Err(Error::Configuration(format!(
                "'{}' is a {} plugin, not {}",
                key,
                plugin.kind(),
                kind
            )));
        }
        Ok(plugin.clone())
    }

    /// Resolve `name` directly, then as `<kind>/<name>`
    pub fn load(&self, name: &str, kind: PluginKind) -> Result<Plugin> {
        let direct = match self.lookup(name, kind) {
            Ok(plugin) => return Ok(plugin),
            Err(e) => e,
        };
        let conventional_name = format!("{}/{}", kind, name);
        match self.lookup(&conventional_name, kind) {
            Ok(plugin) => {
                debug!(name, resolved = %conventional_name, "loaded plugin");
                Ok(plugin)
            },
            Err(conventional) => Err(Error::PluginNotFound {
                name: name.to_string(),
                kind: kind.to_string(),
                direct: Box::new(direct),
                conventional: Box::new(conventional),
            }),
        }
    }

    pub fn input(&self, name: &str) -> Result<Arc<dyn InputCodec>> {
        match self.load(name, PluginKind::Input)? {
            Plugin::Input(codec) => Ok(codec),
            other => Err(Error::Configuration(format!("'{}' is a {} plugin", name, other.kind()))),
        }
    }

    pub fn output(&self, name: &str) -> Result<Arc<dyn OutputCodec>> {
        match self.load(name, PluginKind::Output)? {
            Plugin::Output(codec) => Ok(codec),
            other => Err(Error::Configuration(format!("'{}' is a {} plugin", name, other.kind()))),
        }
    }

    pub fn transform(&self, name: &str) -> Result<Arc<dyn TransformPlugin>> {
        match self.load(name, PluginKind::Transform)? {
            Plugin::Transform(plugin) => Ok(plugin),
            other => Err(Error::Configuration(format!("'{}' is a {} plugin", name, other.kind()))),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_conventional_fallback() {
        let registry = Registry::with_builtins();
        assert!(registry.input("alephseq").is_ok());
        assert!(registry.input("input/alephseq").is_ok());
        assert!(registry.output("alephseq").is_ok());
        assert!(registry.transform("marcids").is_ok());
    }

    #[test]
    fn test_not_found_carries_both_causes() {
        let registry = Registry::with_builtins();
        let err = registry.input("nosuchcodec").err().unwrap();
        match err {
            Error::PluginNotFound {
                direct,
                conventional,
                ..
            } => {
                assert!(matches!(*direct, Error::UnknownPlugin(ref n) if n == "nosuchcodec"));
                assert!(
                    matches!(*conventional, Error::UnknownPlugin(ref n) if n == "input/nosuchcodec")
                );
            },
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_kind_mismatch_is_not_found() {
        let registry = Registry::with_builtins();
        assert!(registry.transform("json").is_err());
        assert!(registry.input("nt").is_err());
    }

    #[test]
    fn test_alias() {
        let mut registry = Registry::with_builtins();
        registry.alias("marc-seq", "input/alephseq").unwrap();
        assert!(registry.input("marc-seq").is_ok());
        assert!(registry.alias("x", "input/none").is_err());
    }

    #[tokio::test]
    async fn test_direct_conversion_helpers() {
        let registry = Registry::with_builtins();
        let input = registry.input("alephseq").unwrap();
        let items = input
            .decode_bytes(
                Bytes::from_static(b"000000001 001   L X1\n000000001 24510 L $$aTitle\n"),
                &InputOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(items.len(), 1);

        let output = registry.output("alephseq").unwrap();
        let bytes = output
            .encode_items(items, &PluginOptions::default())
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"X1 FMT   L BK\nX1 001   L X1\nX1 24510 L $$aTitle\n");
    }
}
