//! Renderer discovery data model.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where a renderer executable candidate came from.
///
/// Variants are listed in discovery priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Path configured through the environment or explicit configuration.
    Environment,
    /// A well-known installation directory for the host platform.
    WellKnownPath,
    /// Resolved through the shell's executable lookup (`which` / `where`).
    ShellLookup,
    /// Recorded by a previous successful installation.
    InstallMarker,
    /// A copy bundled with the application.
    Bundled,
    /// Installed on demand during this discovery pass.
    FreshlyInstalled,
}

impl SourceKind {
    /// Stable lowercase name used in logs and traces.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Environment => "environment",
            Self::WellKnownPath => "well-known-path",
            Self::ShellLookup => "shell-lookup",
            Self::InstallMarker => "install-marker",
            Self::Bundled => "bundled",
            Self::FreshlyInstalled => "freshly-installed",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A renderer executable found during discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendererCandidate {
    /// Strategy that produced this candidate.
    pub source: SourceKind,
    /// Absolute path to the executable.
    pub path: PathBuf,
    /// Whether a launch probe succeeded for this path.
    pub verified: bool,
}

impl RendererCandidate {
    /// Creates an unverified candidate.
    #[must_use]
    pub fn new(source: SourceKind, path: impl Into<PathBuf>) -> Self {
        Self {
            source,
            path: path.into(),
            verified: false,
        }
    }

    /// Marks the candidate as verified by a launch probe.
    #[must_use]
    pub fn verified(mut self) -> Self {
        self.verified = true;
        self
    }
}

/// Result of a single discovery step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// The step produced a candidate that passed the launch probe.
    Verified,
    /// The step produced no candidate at all.
    NotFound,
    /// A candidate was found but the launch probe failed.
    ProbeFailed,
    /// The step itself failed (subprocess error, unreadable marker, ...).
    StepFailed,
}

/// Diagnostic record of one discovery step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptTrace {
    /// Strategy that ran.
    pub source: SourceKind,
    /// Candidate path, when the step produced one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// What happened.
    pub outcome: AttemptOutcome,
    /// Failure detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Wall-clock time spent in the step.
    pub elapsed_ms: u128,
}

impl fmt::Display for AttemptTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {:?}", self.source, self.outcome)?;
        if let Some(path) = &self.path {
            write!(f, " {}", path.display())?;
        }
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        write!(f, " ({} ms)", self.elapsed_ms)
    }
}
