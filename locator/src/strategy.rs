//! Discovery strategies.
//!
//! Each strategy is one step of the discovery chain. A strategy produces zero
//! or more candidate paths and verifies them through the [`LocateContext`];
//! the first verified candidate ends the chain.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_process::{Command, Stdio};
use quire_core::{
    AttemptOutcome, AttemptTrace, BoxFuture, ProgressSink, RendererCandidate, SourceKind, Stage,
    deadline,
};
use tracing::{debug, info, warn};

use crate::error::LocateError;
use crate::marker::InstallMarker;
use crate::platform;
use crate::probe::Probe;
use crate::tree::{self, MAX_DEPTH};

/// One step of the discovery chain.
pub trait LocateStrategy: Send + Sync {
    /// Source kind reported for candidates from this step.
    fn source(&self) -> SourceKind;

    /// Produces a verified candidate, `None` if this step has nothing to offer.
    fn locate<'a>(
        &'a self,
        ctx: &'a LocateContext<'a>,
    ) -> BoxFuture<'a, Result<Option<RendererCandidate>, LocateError>>;
}

/// Shared state for one discovery pass.
pub struct LocateContext<'a> {
    probe: &'a dyn Probe,
    progress: &'a ProgressSink,
    attempts: Mutex<Vec<AttemptTrace>>,
}

impl std::fmt::Debug for LocateContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocateContext")
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

impl<'a> LocateContext<'a> {
    /// Creates a context that verifies candidates with `probe`.
    #[must_use]
    pub fn new(probe: &'a dyn Probe, progress: &'a ProgressSink) -> Self {
        Self {
            probe,
            progress,
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Probes `path`; on success returns it as a verified candidate.
    ///
    /// Both outcomes are recorded in the attempt log.
    pub async fn verify(&self, source: SourceKind, path: &Path) -> Option<RendererCandidate> {
        let started = Instant::now();
        match self.probe.probe(path).await {
            Ok(()) => {
                self.record(source, Some(path), AttemptOutcome::Verified, None, started);
                Some(RendererCandidate::new(source, path).verified())
            }
            Err(error) => {
                debug!(source = %source, path = %path.display(), %error, "probe failed");
                self.record(
                    source,
                    Some(path),
                    AttemptOutcome::ProbeFailed,
                    Some(error.to_string()),
                    started,
                );
                None
            }
        }
    }

    /// Progress sink of this pass.
    #[must_use]
    pub const fn progress(&self) -> &ProgressSink {
        self.progress
    }

    pub(crate) fn record(
        &self,
        source: SourceKind,
        path: Option<&Path>,
        outcome: AttemptOutcome,
        message: Option<String>,
        started: Instant,
    ) {
        self.lock().push(AttemptTrace {
            source,
            path: path.map(Path::to_path_buf),
            outcome,
            message,
            elapsed_ms: started.elapsed().as_millis(),
        });
    }

    pub(crate) fn attempt_count(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn into_attempts(self) -> Vec<AttemptTrace> {
        self.attempts
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<AttemptTrace>> {
        self.attempts.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Step 1: the executable configured through the environment.
#[derive(Debug, Clone)]
pub struct EnvironmentOverride {
    path: Option<PathBuf>,
}

impl EnvironmentOverride {
    /// Strategy for an optional configured path.
    #[must_use]
    pub const fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl LocateStrategy for EnvironmentOverride {
    fn source(&self) -> SourceKind {
        SourceKind::Environment
    }

    fn locate<'a>(
        &'a self,
        ctx: &'a LocateContext<'a>,
    ) -> BoxFuture<'a, Result<Option<RendererCandidate>, LocateError>> {
        Box::pin(async move {
            let Some(path) = &self.path else {
                return Ok(None);
            };
            if !tree::is_file(path).await {
                return Err(LocateError::Missing(path.clone()));
            }
            Ok(ctx.verify(self.source(), path).await)
        })
    }
}

/// Step 2: well-known installation paths for the host platform.
#[derive(Debug, Clone)]
pub struct WellKnownPaths {
    paths: Vec<PathBuf>,
}

impl WellKnownPaths {
    /// Strategy over the platform defaults from [`platform::well_known_paths`].
    #[must_use]
    pub fn for_host() -> Self {
        Self::new(platform::well_known_paths())
    }

    /// Strategy over an explicit path list.
    #[must_use]
    pub const fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }
}

impl LocateStrategy for WellKnownPaths {
    fn source(&self) -> SourceKind {
        SourceKind::WellKnownPath
    }

    fn locate<'a>(
        &'a self,
        ctx: &'a LocateContext<'a>,
    ) -> BoxFuture<'a, Result<Option<RendererCandidate>, LocateError>> {
        Box::pin(async move {
            for path in &self.paths {
                if !tree::is_file(path).await {
                    continue;
                }
                if let Some(candidate) = ctx.verify(self.source(), path).await {
                    return Ok(Some(candidate));
                }
            }
            Ok(None)
        })
    }
}

/// Step 3: the shell's executable lookup (`which` / `where`).
#[derive(Debug, Clone)]
pub struct ShellLookup {
    program: String,
    names: Vec<String>,
    timeout: Duration,
}

impl ShellLookup {
    /// Strategy using the host lookup command and program names.
    #[must_use]
    pub fn for_host(timeout: Duration) -> Self {
        Self::new(
            platform::lookup_program(),
            platform::lookup_names().iter().copied(),
            timeout,
        )
    }

    /// Strategy with an explicit lookup program and name list.
    #[must_use]
    pub fn new<I, S>(program: impl Into<String>, names: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            names: names.into_iter().map(Into::into).collect(),
            timeout,
        }
    }

    async fn lookup(&self, name: &str) -> Result<Option<PathBuf>, LocateError> {
        let output = deadline(
            self.timeout,
            Command::new(&self.program)
                .arg(name)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .ok_or_else(|| LocateError::Timeout {
            program: self.program.clone(),
            after: self.timeout,
        })?
        .map_err(|error| LocateError::Subprocess {
            program: self.program.clone(),
            message: error.to_string(),
        })?;

        // A non-zero exit just means "not found".
        if !output.status.success() {
            return Ok(None);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(PathBuf::from))
    }
}

impl LocateStrategy for ShellLookup {
    fn source(&self) -> SourceKind {
        SourceKind::ShellLookup
    }

    fn locate<'a>(
        &'a self,
        ctx: &'a LocateContext<'a>,
    ) -> BoxFuture<'a, Result<Option<RendererCandidate>, LocateError>> {
        Box::pin(async move {
            let mut last_error = None;
            for name in &self.names {
                match self.lookup(name).await {
                    Ok(Some(path)) => {
                        if let Some(candidate) = ctx.verify(self.source(), &path).await {
                            return Ok(Some(candidate));
                        }
                    }
                    Ok(None) => {}
                    Err(error) => {
                        debug!(program = %self.program, name = %name, %error, "lookup failed");
                        last_error = Some(error);
                    }
                }
            }
            last_error.map_or(Ok(None), Err)
        })
    }
}

/// Step 4: the marker written by a previous installation.
#[derive(Debug, Clone)]
pub struct InstallMarkerLookup {
    marker: PathBuf,
}

impl InstallMarkerLookup {
    /// Strategy reading the marker at `marker`.
    #[must_use]
    pub fn new(marker: impl Into<PathBuf>) -> Self {
        Self {
            marker: marker.into(),
        }
    }
}

impl LocateStrategy for InstallMarkerLookup {
    fn source(&self) -> SourceKind {
        SourceKind::InstallMarker
    }

    fn locate<'a>(
        &'a self,
        ctx: &'a LocateContext<'a>,
    ) -> BoxFuture<'a, Result<Option<RendererCandidate>, LocateError>> {
        Box::pin(async move {
            let Some(marker) = InstallMarker::read(&self.marker).await? else {
                return Ok(None);
            };
            debug!(cache_dir = %marker.cache_dir.display(), "found install marker");

            if let Some(executable) = &marker.executable_path {
                if tree::is_file(executable).await {
                    if let Some(candidate) = ctx.verify(self.source(), executable).await {
                        return Ok(Some(candidate));
                    }
                }
            }

            let found =
                tree::find_executable(&marker.cache_dir, platform::executable_names(), MAX_DEPTH)
                    .await?;
            match found {
                Some(path) => Ok(ctx.verify(self.source(), &path).await),
                None => Ok(None),
            }
        })
    }
}

/// Step 5: a renderer copy shipped with the application.
#[derive(Debug, Clone)]
pub struct BundledSearch {
    root: Option<PathBuf>,
    names: Vec<String>,
}

impl BundledSearch {
    /// Strategy searching `root` for the host executable names.
    #[must_use]
    pub fn new(root: Option<PathBuf>) -> Self {
        Self {
            root,
            names: platform::executable_names()
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }

    /// Overrides the executable names searched for.
    #[must_use]
    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = names.into_iter().map(Into::into).collect();
        self
    }
}

impl LocateStrategy for BundledSearch {
    fn source(&self) -> SourceKind {
        SourceKind::Bundled
    }

    fn locate<'a>(
        &'a self,
        ctx: &'a LocateContext<'a>,
    ) -> BoxFuture<'a, Result<Option<RendererCandidate>, LocateError>> {
        Box::pin(async move {
            let Some(root) = &self.root else {
                return Ok(None);
            };
            let names: Vec<&str> = self.names.iter().map(String::as_str).collect();
            match tree::find_executable(root, &names, MAX_DEPTH).await? {
                Some(path) => Ok(ctx.verify(self.source(), &path).await),
                None => Ok(None),
            }
        })
    }
}

/// Placeholder substituted with the cache directory in installer arguments.
pub const CACHE_DIR_PLACEHOLDER: &str = "{cache_dir}";

/// A renderer installer invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallCommand {
    /// Program to run.
    pub program: String,
    /// Arguments; [`CACHE_DIR_PLACEHOLDER`] is replaced with the cache directory.
    pub args: Vec<String>,
}

impl InstallCommand {
    /// Creates an installer invocation.
    #[must_use]
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Installs the headless shell build through `@puppeteer/browsers`.
    #[must_use]
    pub fn headless_shell() -> Self {
        Self::new(
            npx(),
            [
                "--yes",
                "@puppeteer/browsers",
                "install",
                "chrome-headless-shell@stable",
                "--path",
                CACHE_DIR_PLACEHOLDER,
            ],
        )
    }

    /// Installs the full Chrome for Testing build through `@puppeteer/browsers`.
    #[must_use]
    pub fn chrome_for_testing() -> Self {
        Self::new(
            npx(),
            [
                "--yes",
                "@puppeteer/browsers",
                "install",
                "chrome@stable",
                "--path",
                CACHE_DIR_PLACEHOLDER,
            ],
        )
    }

    fn resolved_args(&self, cache_dir: &Path) -> Vec<String> {
        let cache_dir = cache_dir.to_string_lossy();
        self.args
            .iter()
            .map(|arg| arg.replace(CACHE_DIR_PLACEHOLDER, &cache_dir))
            .collect()
    }
}

const fn npx() -> &'static str {
    if cfg!(target_os = "windows") {
        "npx.cmd"
    } else {
        "npx"
    }
}

/// Step 6: install a renderer on demand.
///
/// Runs the primary installer, then probes what it installed. If either
/// fails, runs the alternative installer once and probes again. A verified
/// installation is recorded in the install marker.
#[derive(Debug, Clone)]
pub struct Installer {
    primary: InstallCommand,
    alternative: Option<InstallCommand>,
    cache_dir: PathBuf,
    marker: PathBuf,
    timeout: Duration,
}

impl Installer {
    /// Installer with the default `@puppeteer/browsers` invocations.
    #[must_use]
    pub fn new(cache_dir: impl Into<PathBuf>, marker: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            primary: InstallCommand::headless_shell(),
            alternative: Some(InstallCommand::chrome_for_testing()),
            cache_dir: cache_dir.into(),
            marker: marker.into(),
            timeout,
        }
    }

    /// Overrides the installer invocations.
    #[must_use]
    pub fn with_commands(mut self, primary: InstallCommand, alternative: Option<InstallCommand>) -> Self {
        self.primary = primary;
        self.alternative = alternative;
        self
    }

    async fn run(&self, command: &InstallCommand) -> Result<(), LocateError> {
        async_fs::create_dir_all(&self.cache_dir)
            .await
            .map_err(|source| LocateError::io(&self.cache_dir, source))?;

        info!(program = %command.program, cache_dir = %self.cache_dir.display(), "running renderer installer");
        let output = deadline(
            self.timeout,
            Command::new(&command.program)
                .args(command.resolved_args(&self.cache_dir))
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .ok_or_else(|| LocateError::Timeout {
            program: command.program.clone(),
            after: self.timeout,
        })?
        .map_err(|error| LocateError::Subprocess {
            program: command.program.clone(),
            message: error.to_string(),
        })?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(LocateError::Subprocess {
            program: command.program.clone(),
            message: format!("{}: {}", output.status, tail(stderr.trim(), 400)),
        })
    }

    async fn install_and_verify(
        &self,
        command: &InstallCommand,
        ctx: &LocateContext<'_>,
    ) -> Result<RendererCandidate, String> {
        self.run(command).await.map_err(|e| e.to_string())?;

        let path = tree::find_executable(&self.cache_dir, platform::executable_names(), MAX_DEPTH)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| {
                format!(
                    "installer finished but no executable was found under {}",
                    self.cache_dir.display()
                )
            })?;

        ctx.verify(SourceKind::FreshlyInstalled, &path)
            .await
            .ok_or_else(|| format!("installed executable {} failed its probe", path.display()))
    }
}

impl LocateStrategy for Installer {
    fn source(&self) -> SourceKind {
        SourceKind::FreshlyInstalled
    }

    fn locate<'a>(
        &'a self,
        ctx: &'a LocateContext<'a>,
    ) -> BoxFuture<'a, Result<Option<RendererCandidate>, LocateError>> {
        Box::pin(async move {
            let commands = std::iter::once(&self.primary).chain(self.alternative.as_ref());
            let mut failures = Vec::new();

            for (attempt, command) in (1u8..).zip(commands) {
                ctx.progress().emit(Stage::Installing { attempt });
                match self.install_and_verify(command, ctx).await {
                    Ok(candidate) => {
                        let marker =
                            InstallMarker::now(&self.cache_dir, Some(candidate.path.clone()));
                        if let Err(error) = marker.write(&self.marker).await {
                            warn!(%error, "failed to write install marker");
                        }
                        return Ok(Some(candidate));
                    }
                    Err(message) => {
                        warn!(attempt, program = %command.program, %message, "installer attempt failed");
                        failures.push(format!("attempt {attempt} (`{}`): {message}", command.program));
                    }
                }
            }

            Err(LocateError::Install(failures.join("; ")))
        })
    }
}

fn tail(text: &str, max_chars: usize) -> &str {
    let count = text.chars().count();
    if count <= max_chars {
        return text;
    }
    let skip = count - max_chars;
    text.char_indices()
        .nth(skip)
        .map_or(text, |(index, _)| &text[index..])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn installer_args_substitute_cache_dir() {
        let command = InstallCommand::headless_shell();
        let args = command.resolved_args(Path::new("/tmp/cache"));
        assert!(args.iter().any(|a| a == "/tmp/cache"));
        assert!(!args.iter().any(|a| a.contains(CACHE_DIR_PLACEHOLDER)));
    }

    #[test]
    fn tail_keeps_suffix() {
        assert_eq!(tail("abcdef", 3), "def");
        assert_eq!(tail("abc", 10), "abc");
    }
}
