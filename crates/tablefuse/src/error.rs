//! Error types for tablefuse.
//!
//! All fallible operations return [`TableFuseError`]. The variants follow the
//! failure taxonomy of the reconciliation pipeline:
//!
//! - `Io` - file system errors (cache, config files). Always bubble up unchanged.
//! - `Validation` - malformed geometry, invalid configuration, broken call contracts
//! - `Parsing` - model output that could not be decoded into the expected structure
//! - `Ai` - the model answered, but the answer is unusable (never retried)
//! - `Network` / `Timeout` - transient transport failures (retried within budget)
//! - `Cache` - result cache failures (non-fatal for callers that treat the cache as optional)
//!
//! Content-quality problems of a table are *not* errors: they are reported as
//! validation warnings or as an unrepairable outcome.
//!
//! # Example
//!
//! ```rust
//! use tablefuse::{Result, TableFuseError};
//!
//! fn require_rows(rows: &[Vec<String>]) -> Result<()> {
//!     if rows.is_empty() {
//!         return Err(TableFuseError::validation("table has no rows"));
//!     }
//!     Ok(())
//! }
//! ```
use thiserror::Error;

/// Result type alias using `TableFuseError`.
pub type Result<T> = std::result::Result<T, TableFuseError>;

/// Main error type for all tablefuse operations.
#[derive(Debug, Error)]
pub enum TableFuseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parsing error: {message}")]
    Parsing {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Cache error: {message}")]
    Cache {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Serialization error: {message}")]
    Serialization {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("AI error: {message}")]
    Ai {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Network error: {message}")]
    Network {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Plugin error in '{plugin_name}': {message}")]
    Plugin { message: String, plugin_name: String },

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for TableFuseError {
    fn from(err: serde_json::Error) -> Self {
        TableFuseError::Serialization {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<rmp_serde::encode::Error> for TableFuseError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        TableFuseError::Serialization {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl From<rmp_serde::decode::Error> for TableFuseError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        TableFuseError::Serialization {
            message: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

macro_rules! error_constructor {
    ($name:ident, $variant:ident) => {
        pastey::paste! {
            #[doc = "Create a " $variant " error"]
            pub fn $name<S: Into<String>>(message: S) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: None,
                }
            }

            #[doc = "Create a " $variant " error with source"]
            pub fn [<$name _with_source>]<S: Into<String>, E: std::error::Error + Send + Sync + 'static>(
                message: S,
                source: E,
            ) -> Self {
                Self::$variant {
                    message: message.into(),
                    source: Some(Box::new(source)),
                }
            }
        }
    };
}

impl TableFuseError {
    error_constructor!(parsing, Parsing);
    error_constructor!(validation, Validation);
    error_constructor!(cache, Cache);
    error_constructor!(ai, Ai);
    error_constructor!(network, Network);

    /// Whether a retry of the same call may succeed.
    ///
    /// Only transport-level failures qualify. Content failures (bad JSON,
    /// refusals, schema mismatches) are handled by the repair tiers instead.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout(_))
    }
}
