use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure of a single discovery step.
///
/// Step failures are recorded in the attempt log and never abort the chain.
#[derive(Debug, Error)]
pub enum LocateError {
    /// A file or directory could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The install marker is not valid JSON of the expected shape.
    #[error("malformed install marker {}: {source}", path.display())]
    Marker {
        /// Marker path.
        path: PathBuf,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// The bundled manifest is not valid JSON of the expected shape.
    #[error("malformed bundle manifest {}: {source}", path.display())]
    Manifest {
        /// Manifest path.
        path: PathBuf,
        /// The underlying parse error.
        #[source]
        source: serde_json::Error,
    },

    /// A configured executable does not exist.
    #[error("configured executable {} does not exist", .0.display())]
    Missing(PathBuf),

    /// A helper subprocess could not run or exited unsuccessfully.
    #[error("`{program}` failed: {message}")]
    Subprocess {
        /// Program that was run.
        program: String,
        /// Exit status or spawn error.
        message: String,
    },

    /// A helper subprocess exceeded its bound.
    #[error("`{program}` timed out after {after:?}")]
    Timeout {
        /// Program that was run.
        program: String,
        /// Bound that was exceeded.
        after: Duration,
    },

    /// Every installer invocation failed.
    #[error("{0}")]
    Install(String),
}

impl LocateError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
