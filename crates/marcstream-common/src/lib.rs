//! marcstream common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types for the marcstream workspace:
//!
//! - **Error Handling**: the [`Error`] taxonomy and its exit statuses
//! - **Logging**: tracing subscriber setup
//! - **Locators**: parsed, credential-aware resource addresses
//! - **Records**: generic MARC-like records and structured-data graphs
//!
//! # Example
//!
//! ```no_run
//! use marcstream_common::{Locator, Result};
//!
//! fn show(input: &str) -> Result<()> {
//!     let locator = Locator::parse(input)?;
//!     tracing::info!(%locator, "reading");
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod locator;
pub mod logging;
pub mod record;

pub use error::{Error, ErrorClass, Result};
pub use locator::{Locator, MarkerKind, VirtualMarker};
pub use record::{Field, Graph, Quad, Record, Term, TermType};
