//! Error kinds shared across the engine.
//!
//! Every fallible operation in this crate returns [`Result`]. Callers at the
//! boundary (the CLI) turn these into a diagnostic on stderr and a non-zero
//! exit code; nothing in `fasttext-core` itself writes to stdout/stderr.

use thiserror::Error;

/// The error type returned by every fallible operation in this crate.
#[derive(Debug, Error)]
pub enum FastTextError {
    /// Bad CLI flag, malformed pretrained vectors, wrong magic/version, `k <= 0`,
    /// `predict` on a non-supervised model.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Propagated from a dot product on a matrix row; training threads record
    /// this and exit, the driver rethrows after join.
    #[error("encountered NaN during training")]
    NaNEncountered,

    /// The dictionary's open-addressed hash table would need to exceed its
    /// fixed capacity.
    #[error("size limit exceeded: {0}")]
    SizeLimit(String),

    /// Autotune's wall-clock budget elapsed.
    #[error("autotune budget exceeded")]
    Timeout,

    /// Cooperative cancellation was requested (autotune SIGINT or an explicit abort).
    #[error("operation aborted")]
    Abort,

    /// Raised only inside an autotune trial; the trial is counted as failed
    /// and the search moves on.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// Any underlying file I/O failure, annotated with the offending path.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl From<std::io::Error> for FastTextError {
    fn from(source: std::io::Error) -> Self {
        FastTextError::Io {
            path: String::new(),
            source,
        }
    }
}

impl FastTextError {
    /// Attaches a path to an I/O error for a clearer diagnostic.
    pub fn io_at(path: impl Into<String>, source: std::io::Error) -> Self {
        FastTextError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, FastTextError>;
