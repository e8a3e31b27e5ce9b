//! Error taxonomy for marcstream
//!
//! Every failure the engine can report falls into one [`ErrorClass`], which in
//! turn decides the process exit status of the command-line front end.

use thiserror::Error;

/// Result type alias for marcstream operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad options, unknown plugins, unparsable locators
    Configuration,
    /// A stage rejected its input or the pipeline closed unexpectedly
    Stage,
    /// Reading from or writing to a backend failed
    Transport,
    /// A virtual locator could not be resolved
    Resolution,
    /// Anything else
    Unknown,
}

impl ErrorClass {
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorClass::Configuration => 1,
            ErrorClass::Stage => 2,
            ErrorClass::Transport => 3,
            ErrorClass::Resolution => 4,
            ErrorClass::Unknown => 8,
        }
    }
}

/// Main error type for marcstream
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid locator '{locator}': {reason}")]
    InvalidLocator { locator: String, reason: String },

    #[error("Unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("No entry ending in '{suffix}' found in {container}")]
    NoMatch { container: String, suffix: String },

    #[error("Failed to list {container}: {source}")]
    Listing {
        container: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Transport error on {locator}: {source}")]
    Transport {
        locator: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed input in {stage}: {reason}")]
    Malformed { stage: String, reason: String },

    #[error("Stage {stage} cannot handle {found} items")]
    UnexpectedItem { stage: String, found: &'static str },

    #[error("No plugin registered as '{0}'")]
    UnknownPlugin(String),

    #[error("Failed to load {kind} plugin '{name}' ({direct}; {conventional})")]
    PluginNotFound {
        name: String,
        kind: String,
        direct: Box<Error>,
        conventional: Box<Error>,
    },

    #[error("Downstream stage closed")]
    DownstreamClosed,

    #[error("Stage {0} closed before the pipeline finished")]
    PrematureClose(String),

    #[error("Pipeline failed in {stage} after {records} records: {source}")]
    Pipeline {
        stage: String,
        records: u64,
        #[source]
        source: Box<Error>,
    },

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl Error {
    pub fn transport(locator: impl ToString, source: impl Into<anyhow::Error>) -> Self {
        Error::Transport {
            locator: locator.to_string(),
            source: source.into(),
        }
    }

    pub fn malformed(stage: impl Into<String>, reason: impl ToString) -> Self {
        Error::Malformed {
            stage: stage.into(),
            reason: reason.to_string(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Configuration(_)
            | Error::InvalidLocator { .. }
            | Error::UnsupportedScheme(_)
            | Error::UnknownPlugin(_)
            | Error::PluginNotFound { .. } => ErrorClass::Configuration,
            Error::Malformed { .. }
            | Error::UnexpectedItem { .. }
            | Error::DownstreamClosed
            | Error::PrematureClose(_) => ErrorClass::Stage,
            Error::Transport { .. } | Error::Io(_) => ErrorClass::Transport,
            Error::NoMatch { .. } | Error::Listing { .. } => ErrorClass::Resolution,
            Error::Pipeline { source, .. } => source.class(),
            Error::Unknown(_) => ErrorClass::Unknown,
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.class().exit_code()
    }

    /// Records processed before the failure, when the error came out of a running pipeline
    pub fn records(&self) -> Option<u64> {
        match self {
            Error::Pipeline { records, .. } => Some(*records),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::malformed("json", err)
    }
}
