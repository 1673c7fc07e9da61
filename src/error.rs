//! Error types for the lodestone module loader

use std::fmt;
use thiserror::Error;

/// Host-level error kinds, mirroring the JavaScript error classes a browser
/// loader would raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// TypeError - fetch and resolution failures
    TypeError,
    /// Generic Error - factory and protocol failures
    GenericError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::TypeError => write!(f, "TypeError"),
            ErrorKind::GenericError => write!(f, "Error"),
        }
    }
}

/// Main error type for lodestone.
///
/// Failure values propagate through the dependency graph by cloning: every
/// transitive dependent of a failed module carries the same root error, so
/// variants hold owned strings rather than sources.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// A script 404'd, or failed to parse or evaluate at load time.
    #[error("TypeError: Failed to fetch {url}")]
    FetchError { url: String },

    /// A user factory failed while producing its exports.
    #[error("Error: module factory for {url} failed: {message}")]
    FactoryError { url: String, message: String },

    /// A single script called `define` more than once.
    #[error("Error: duplicate define call for {url}")]
    DuplicateDefine { url: String },

    /// A dependency specifier could not be resolved against its referrer.
    #[error("TypeError: cannot resolve specifier '{specifier}' against {referrer}")]
    ResolveError { specifier: String, referrer: String },
}

impl Error {
    /// Create a fetch failure for a URL
    pub fn fetch_error(url: impl Into<String>) -> Self {
        Error::FetchError { url: url.into() }
    }

    /// Create a factory failure
    pub fn factory_error(url: impl Into<String>, message: impl Into<String>) -> Self {
        Error::FactoryError {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Create a duplicate-define failure
    pub fn duplicate_define(url: impl Into<String>) -> Self {
        Error::DuplicateDefine { url: url.into() }
    }

    /// Create a resolution failure
    pub fn resolve_error(specifier: impl Into<String>, referrer: impl Into<String>) -> Self {
        Error::ResolveError {
            specifier: specifier.into(),
            referrer: referrer.into(),
        }
    }

    /// The host error class this error maps onto
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::FetchError { .. } | Error::ResolveError { .. } => ErrorKind::TypeError,
            Error::FactoryError { .. } | Error::DuplicateDefine { .. } => ErrorKind::GenericError,
        }
    }

    /// The URL of the module the error originated at
    pub fn url(&self) -> Option<&str> {
        match self {
            Error::FetchError { url }
            | Error::FactoryError { url, .. }
            | Error::DuplicateDefine { url } => Some(url),
            Error::ResolveError { .. } => None,
        }
    }
}

/// Result type alias for lodestone
pub type Result<T> = std::result::Result<T, Error>;
