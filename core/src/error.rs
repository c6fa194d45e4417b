use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::candidate::AttemptTrace;

/// Errors produced by the renderer pipeline.
///
/// The type is `Clone` so that one discovery outcome can be handed to every
/// caller waiting on the same in-flight attempt.
#[derive(Debug, Clone, Error)]
pub enum RenderError {
    /// Every discovery step failed.
    #[error("no usable renderer found ({} discovery steps failed)", attempts.len())]
    DiscoveryExhausted {
        /// Per-step diagnostics in the order the steps ran.
        attempts: Vec<AttemptTrace>,
    },

    /// A probe or production launch did not become ready in time.
    #[error("renderer at {} did not start within {:?}", path.display(), after)]
    LaunchTimeout {
        /// Executable that was launched.
        path: PathBuf,
        /// Bound that was exceeded.
        after: Duration,
    },

    /// The renderer executable exists but could not be started.
    #[error("failed to launch renderer at {}: {message}", path.display())]
    Launch {
        /// Executable that was launched.
        path: PathBuf,
        /// Underlying launch error.
        message: String,
    },

    /// Both the primary and the alternative installer failed.
    #[error("renderer installation failed: {0}")]
    InstallFailed(String),

    /// Content loading or export exceeded its bound.
    #[error("{stage} timed out after {after:?}")]
    RenderTimeout {
        /// Render step that timed out.
        stage: &'static str,
        /// Bound that was exceeded.
        after: Duration,
    },

    /// The renderer could not load the requested content.
    #[error("failed to load content: {0}")]
    LoadFailed(String),

    /// The renderer reported an export error.
    #[error("PDF export failed: {0}")]
    ExportFailed(String),

    /// The shared renderer process lost its connection.
    #[error("renderer process disconnected")]
    ProcessDisconnected,

    /// The request itself is malformed.
    #[error("invalid render request: {0}")]
    InvalidRequest(String),

    /// An acquisition attempt was abandoned before it resolved.
    #[error("renderer acquisition interrupted: {0}")]
    Interrupted(String),

    /// The service has been shut down.
    #[error("renderer is shutting down")]
    ShuttingDown,
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, RenderError>;

/// Classification exposed across the application boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// See [`RenderError::DiscoveryExhausted`].
    DiscoveryExhausted,
    /// See [`RenderError::LaunchTimeout`].
    LaunchTimeout,
    /// See [`RenderError::Launch`].
    LaunchFailed,
    /// See [`RenderError::InstallFailed`].
    InstallFailed,
    /// See [`RenderError::RenderTimeout`].
    RenderTimeout,
    /// See [`RenderError::LoadFailed`].
    LoadFailed,
    /// See [`RenderError::ExportFailed`].
    ExportFailed,
    /// See [`RenderError::ProcessDisconnected`].
    ProcessDisconnected,
    /// See [`RenderError::InvalidRequest`].
    InvalidRequest,
    /// See [`RenderError::Interrupted`].
    Interrupted,
    /// See [`RenderError::ShuttingDown`].
    ShuttingDown,
}

/// What a user can do about a renderer-unavailable condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Remedy {
    /// No renderer is installed yet; triggering an install should fix it.
    Install,
    /// A renderer is installed but does not start; the host environment needs attention.
    CheckEnvironment,
}

impl Remedy {
    /// Human-readable instruction.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Install => {
                "No PDF renderer is installed yet. Install Chrome or Chromium, or run the \
                 renderer installation, then try again."
            }
            Self::CheckEnvironment => {
                "A PDF renderer is installed but could not be started. Check that the \
                 executable is intact and that QUIRE_RENDERER_PATH points at a working browser."
            }
        }
    }
}

impl RenderError {
    /// Boundary classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::DiscoveryExhausted { .. } => ErrorKind::DiscoveryExhausted,
            Self::LaunchTimeout { .. } => ErrorKind::LaunchTimeout,
            Self::Launch { .. } => ErrorKind::LaunchFailed,
            Self::InstallFailed(_) => ErrorKind::InstallFailed,
            Self::RenderTimeout { .. } => ErrorKind::RenderTimeout,
            Self::LoadFailed(_) => ErrorKind::LoadFailed,
            Self::ExportFailed(_) => ErrorKind::ExportFailed,
            Self::ProcessDisconnected => ErrorKind::ProcessDisconnected,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Interrupted(_) => ErrorKind::Interrupted,
            Self::ShuttingDown => ErrorKind::ShuttingDown,
        }
    }

    /// Returns `true` if repeating the same request may succeed without
    /// changing its input or the host environment.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::DiscoveryExhausted { .. }
                | Self::LaunchTimeout { .. }
                | Self::RenderTimeout { .. }
                | Self::ProcessDisconnected
                | Self::Interrupted(_)
        )
    }

    /// Returns `true` if the error means no renderer could be made available.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(
            self,
            Self::DiscoveryExhausted { .. }
                | Self::LaunchTimeout { .. }
                | Self::Launch { .. }
                | Self::InstallFailed(_)
        )
    }

    /// Suggested user action for renderer-unavailable errors.
    #[must_use]
    pub fn remedy(&self) -> Option<Remedy> {
        match self {
            Self::DiscoveryExhausted { attempts } => {
                // A probe that failed on an existing binary means something is installed.
                let broken = attempts
                    .iter()
                    .any(|a| a.outcome == crate::AttemptOutcome::ProbeFailed);
                Some(if broken {
                    Remedy::CheckEnvironment
                } else {
                    Remedy::Install
                })
            }
            Self::LaunchTimeout { .. } | Self::Launch { .. } | Self::InstallFailed(_) => {
                Some(Remedy::CheckEnvironment)
            }
            _ => None,
        }
    }
}

/// Structured failure returned across the application boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct Failure {
    /// Error classification.
    pub kind: ErrorKind,
    /// Actionable message; never a raw low-level exception for unavailable renderers.
    pub message: String,
    /// Whether retrying the same request may succeed.
    pub retryable: bool,
    /// Suggested user action, when the renderer is unavailable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remedy: Option<Remedy>,
}

impl From<&RenderError> for Failure {
    fn from(error: &RenderError) -> Self {
        let remedy = error.remedy();
        let message = remedy.map_or_else(|| error.to_string(), |r| r.message().to_string());
        Self {
            kind: error.kind(),
            message,
            retryable: error.is_retryable(),
            remedy,
        }
    }
}

impl From<RenderError> for Failure {
    fn from(error: RenderError) -> Self {
        Self::from(&error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AttemptOutcome, SourceKind};

    fn trace(outcome: AttemptOutcome) -> AttemptTrace {
        AttemptTrace {
            source: SourceKind::WellKnownPath,
            path: None,
            outcome,
            message: None,
            elapsed_ms: 1,
        }
    }

    #[test]
    fn retryability_follows_taxonomy() {
        assert!(RenderError::DiscoveryExhausted { attempts: vec![] }.is_retryable());
        assert!(
            RenderError::LaunchTimeout {
                path: PathBuf::from("/usr/bin/chromium"),
                after: Duration::from_secs(10),
            }
            .is_retryable()
        );
        assert!(!RenderError::InstallFailed("exit status 1".into()).is_retryable());
        assert!(
            RenderError::RenderTimeout {
                stage: "export",
                after: Duration::from_secs(60),
            }
            .is_retryable()
        );
        assert!(!RenderError::ExportFailed("malformed".into()).is_retryable());
        assert!(RenderError::ProcessDisconnected.is_retryable());
    }

    #[test]
    fn render_timeout_is_not_unavailability() {
        let err = RenderError::RenderTimeout {
            stage: "content load",
            after: Duration::from_secs(30),
        };
        assert!(!err.is_unavailable());
        assert_eq!(err.remedy(), None);
    }

    #[test]
    fn exhausted_without_binaries_suggests_install() {
        let err = RenderError::DiscoveryExhausted {
            attempts: vec![trace(AttemptOutcome::NotFound), trace(AttemptOutcome::StepFailed)],
        };
        assert_eq!(err.remedy(), Some(Remedy::Install));
    }

    #[test]
    fn exhausted_with_broken_binary_suggests_environment_check() {
        let err = RenderError::DiscoveryExhausted {
            attempts: vec![trace(AttemptOutcome::NotFound), trace(AttemptOutcome::ProbeFailed)],
        };
        assert_eq!(err.remedy(), Some(Remedy::CheckEnvironment));
    }

    #[test]
    fn failure_serializes_with_kind_and_retryable() {
        let failure = Failure::from(RenderError::ExportFailed("bad css".into()));
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["kind"], "export-failed");
        assert_eq!(json["retryable"], false);
        assert!(json["message"].as_str().unwrap().contains("bad css"));
        assert!(json.get("remedy").is_none());
    }

    #[test]
    fn unavailable_failure_carries_actionable_message() {
        let failure = Failure::from(RenderError::DiscoveryExhausted { attempts: vec![] });
        assert_eq!(failure.remedy, Some(Remedy::Install));
        assert!(failure.message.contains("No PDF renderer is installed"));
        assert!(failure.retryable);
    }
}
