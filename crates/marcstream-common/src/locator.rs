//! Resource locators
//!
//! A [`Locator`] addresses a byte source or sink on one of the supported
//! backends. Credentials embedded in the authority are kept for the backends
//! but never rendered: `Display` and `Debug` print the redacted form.
//!
//! Two virtual markers may appear as the last path segment:
//!
//! - `/@latest:<suffix>` resolves to the most recently modified entry
//! - `/@glob:<suffix>` expands to every matching entry
//!
//! A suffix of `*` matches every entry.

use crate::error::{Error, Result};
use std::path::PathBuf;
use url::Url;

const LATEST_MARKER: &str = "/@latest:";
const GLOB_MARKER: &str = "/@glob:";
const MASK: &str = "***";

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Locator {
    url: Url,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerKind {
    Latest,
    Glob,
}

/// A parsed virtual marker: the container to list and the entry suffix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualMarker {
    pub kind: MarkerKind,
    /// The container, with a trailing `/`
    pub container: Locator,
    pub suffix: String,
}

impl VirtualMarker {
    /// Case-insensitive suffix test; `*` matches everything
    pub fn matches(&self, name: &str) -> bool {
        self.suffix == "*" || name.to_lowercase().ends_with(&self.suffix.to_lowercase())
    }
}

impl Locator {
    /// Parse a locator from user input
    ///
    /// `-` and `stdin:` address standard input. Strings without a scheme are
    /// filesystem paths relative to the working directory.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |reason: String| Error::InvalidLocator {
            locator: input.to_string(),
            reason,
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty locator".to_string()));
        }
        if trimmed == "-" || trimmed == "stdin" {
            return Self::parse("stdin:");
        }

        if has_scheme(trimmed) {
            let url = Url::parse(trimmed).map_err(|e| invalid(e.to_string()))?;
            return Ok(Self { url });
        }

        let mut path = PathBuf::from(trimmed);
        if path.is_relative() {
            let cwd = std::env::current_dir().map_err(|e| invalid(e.to_string()))?;
            path = cwd.join(path);
        }
        let mut url = Url::from_file_path(&path)
            .map_err(|_| invalid("not an absolute file path".to_string()))?;
        if trimmed.ends_with('/') && !url.path().ends_with('/') {
            let with_slash = format!("{}/", url.path());
            url.set_path(&with_slash);
        }
        Ok(Self { url })
    }

    pub fn from_url(url: Url) -> Self {
        Self { url }
    }

    pub fn as_url(&self) -> &Url {
        &self.url
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }

    pub fn port(&self) -> Option<u16> {
        self.url.port()
    }

    /// Decoded user name, if the locator carries one
    pub fn username(&self) -> Option<String> {
        let user = self.url.username();
        if user.is_empty() {
            None
        } else {
            Some(decode(user))
        }
    }

    /// Decoded password, if the locator carries one
    pub fn password(&self) -> Option<String> {
        self.url.password().map(decode)
    }

    /// Decoded path
    pub fn path(&self) -> String {
        decode(self.url.path())
    }

    pub fn query(&self) -> Option<&str> {
        self.url.query()
    }

    /// Final path segment, decoded
    pub fn file_name(&self) -> Option<String> {
        self.path()
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    }

    /// Filesystem path for `file:` locators
    pub fn file_path(&self) -> Option<PathBuf> {
        if self.scheme() == "file" {
            self.url.to_file_path().ok()
        } else {
            None
        }
    }

    /// Same scheme, authority and credentials with a different path
    pub fn with_path(&self, path: &str) -> Self {
        let mut url = self.url.clone();
        url.set_path(path);
        url.set_query(None);
        url.set_fragment(None);
        Self { url }
    }

    /// Copy with user name and password masked as `***`
    pub fn redacted(&self) -> Self {
        let mut url = self.url.clone();
        if !url.username().is_empty() {
            let _ = url.set_username(MASK);
        }
        if url.password().is_some() {
            let _ = url.set_password(Some(MASK));
        }
        Self { url }
    }

    /// Copy without any credentials
    pub fn stripped(&self) -> Self {
        let mut url = self.url.clone();
        let _ = url.set_username("");
        let _ = url.set_password(None);
        Self { url }
    }

    /// Unredacted URL string, for handing to clients that need the credentials
    pub fn expose(&self) -> &str {
        self.url.as_str()
    }

    /// Split a trailing `@latest`/`@glob` marker off the path
    pub fn marker(&self) -> Option<VirtualMarker> {
        let path = self.path();
        let (kind, idx, len) = [
            (MarkerKind::Latest, LATEST_MARKER),
            (MarkerKind::Glob, GLOB_MARKER),
        ]
        .into_iter()
        .filter_map(|(kind, marker)| path.rfind(marker).map(|idx| (kind, idx, marker.len())))
        .max_by_key(|(_, idx, _)| *idx)?;

        let suffix = &path[idx + len..];
        if suffix.contains('/') {
            return None;
        }
        Some(VirtualMarker {
            kind,
            container: self.with_path(&path[..=idx]),
            suffix: suffix.to_string(),
        })
    }

    pub fn is_virtual(&self) -> bool {
        self.marker().is_some()
    }
}

fn has_scheme(input: &str) -> bool {
    match input.find(':') {
        // single letters are drive names, not schemes
        Some(idx) if idx > 1 => input[..idx]
            .chars()
            .enumerate()
            .all(|(i, c)| c.is_ascii_alphabetic() || (i > 0 && matches!(c, '0'..='9' | '+' | '-' | '.'))),
        _ => false,
    }
}

fn decode(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

impl std::str::FromStr for Locator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.redacted().url.as_str())
    }
}

impl std::fmt::Debug for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Locator({})", self)
    }
}
