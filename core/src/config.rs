//! Renderer configuration.
//!
//! Built with `with_*` methods or read from the environment with
//! [`RendererConfig::from_env`]:
//!
//! | Variable | Meaning | Default |
//! |----------|---------|---------|
//! | `QUIRE_RENDERER_PATH` (or `CHROME_PATH`) | executable override | none |
//! | `QUIRE_RENDERER_CACHE_DIR` | installer cache directory | `<user cache>/quire/renderer` |
//! | `QUIRE_BUNDLED_DIR` | bundled renderer root | none |
//! | `QUIRE_INSTALL_MARKER` | install marker file | `<cache dir>/install-complete.json` |
//! | `QUIRE_MAX_USES` | acquisitions before the process is relaunched | 50 |
//! | `QUIRE_PROBE_TIMEOUT_SECS` | launch probe bound | 10 |
//! | `QUIRE_INSTALL_TIMEOUT_SECS` | installer bound | 300 |
//! | `QUIRE_SKIP_INSTALL` | disable the on-demand installer | false |

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

const RENDERER_PATH_ENV: &str = "QUIRE_RENDERER_PATH";
const CHROME_PATH_ENV: &str = "CHROME_PATH";
const CACHE_DIR_ENV: &str = "QUIRE_RENDERER_CACHE_DIR";
const BUNDLED_DIR_ENV: &str = "QUIRE_BUNDLED_DIR";
const INSTALL_MARKER_ENV: &str = "QUIRE_INSTALL_MARKER";
const MAX_USES_ENV: &str = "QUIRE_MAX_USES";
const PROBE_TIMEOUT_ENV: &str = "QUIRE_PROBE_TIMEOUT_SECS";
const INSTALL_TIMEOUT_ENV: &str = "QUIRE_INSTALL_TIMEOUT_SECS";
const SKIP_INSTALL_ENV: &str = "QUIRE_SKIP_INSTALL";

const MARKER_FILE_NAME: &str = "install-complete.json";

/// Bounds for every suspension point in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Discovery launch probe.
    pub probe: Duration,
    /// Shell executable lookup.
    pub shell_lookup: Duration,
    /// One installer invocation.
    pub install: Duration,
    /// Production process launch.
    pub launch: Duration,
    /// Content load (HTML injection or navigation).
    pub navigation: Duration,
    /// PDF export.
    pub export: Duration,
    /// Grace period for draining the pool on shutdown.
    pub shutdown_grace: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            probe: Duration::from_secs(10),
            shell_lookup: Duration::from_secs(5),
            install: Duration::from_secs(300),
            launch: Duration::from_secs(30),
            navigation: Duration::from_secs(30),
            export: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Configuration for discovery, pooling and rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendererConfig {
    /// Executable to try before any other source.
    pub executable_override: Option<PathBuf>,
    /// Directory the installer downloads into.
    pub cache_dir: PathBuf,
    /// Root of a renderer copy shipped with the application.
    pub bundled_dir: Option<PathBuf>,
    /// Marker file written after a successful installation.
    pub install_marker: PathBuf,
    /// Acquisitions served by one process before it is relaunched.
    pub max_uses: u32,
    /// Whether discovery may fall back to installing a renderer.
    pub allow_install: bool,
    /// Step bounds.
    pub timeouts: Timeouts,
}

impl Default for RendererConfig {
    fn default() -> Self {
        let cache_dir = default_cache_dir();
        Self {
            executable_override: None,
            install_marker: cache_dir.join(MARKER_FILE_NAME),
            cache_dir,
            bundled_dir: None,
            max_uses: 50,
            allow_install: true,
            timeouts: Timeouts::default(),
        }
    }
}

impl RendererConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the configuration from environment variables.
    ///
    /// Unset variables keep their defaults; unparsable values are logged and
    /// ignored.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(path) = env_path(RENDERER_PATH_ENV).or_else(|| env_path(CHROME_PATH_ENV)) {
            config.executable_override = Some(path);
        }
        if let Some(dir) = env_path(CACHE_DIR_ENV) {
            config = config.with_cache_dir(dir);
        }
        if let Some(dir) = env_path(BUNDLED_DIR_ENV) {
            config.bundled_dir = Some(dir);
        }
        if let Some(marker) = env_path(INSTALL_MARKER_ENV) {
            config.install_marker = marker;
        }
        if let Some(max_uses) = env_parse::<u32>(MAX_USES_ENV) {
            config = config.with_max_uses(max_uses);
        }
        if let Some(secs) = env_parse::<u64>(PROBE_TIMEOUT_ENV) {
            config.timeouts.probe = Duration::from_secs(secs);
        }
        if let Some(secs) = env_parse::<u64>(INSTALL_TIMEOUT_ENV) {
            config.timeouts.install = Duration::from_secs(secs);
        }
        if let Some(skip) = env_flag(SKIP_INSTALL_ENV) {
            config.allow_install = !skip;
        }

        config
    }

    /// Sets the executable override.
    #[must_use]
    pub fn with_executable(mut self, path: impl Into<PathBuf>) -> Self {
        self.executable_override = Some(path.into());
        self
    }

    /// Sets the installer cache directory.
    ///
    /// The install marker follows the cache directory unless it was set
    /// explicitly to a different location.
    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if self.install_marker == self.cache_dir.join(MARKER_FILE_NAME) {
            self.install_marker = dir.join(MARKER_FILE_NAME);
        }
        self.cache_dir = dir;
        self
    }

    /// Sets the bundled renderer root.
    #[must_use]
    pub fn with_bundled_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bundled_dir = Some(dir.into());
        self
    }

    /// Sets the install marker path.
    #[must_use]
    pub fn with_install_marker(mut self, path: impl Into<PathBuf>) -> Self {
        self.install_marker = path.into();
        self
    }

    /// Sets the restart threshold; zero is treated as one.
    #[must_use]
    pub fn with_max_uses(mut self, max_uses: u32) -> Self {
        self.max_uses = max_uses.max(1);
        self
    }

    /// Enables or disables the on-demand installer step.
    #[must_use]
    pub const fn with_install(mut self, allow: bool) -> Self {
        self.allow_install = allow;
        self
    }

    /// Sets the step bounds.
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Installer cache directory.
    #[must_use]
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("quire")
        .join("renderer")
}

fn env_path(name: &str) -> Option<PathBuf> {
    let value = std::env::var_os(name)?;
    let trimmed = value.to_string_lossy().trim().to_string();
    (!trimmed.is_empty()).then(|| PathBuf::from(trimmed))
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!(variable = name, value = trimmed, "ignoring unparsable environment value");
            None
        }
    }
}

fn env_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    let parsed = parse_flag(trimmed);
    if parsed.is_none() {
        warn!(variable = name, value = trimmed, "ignoring unrecognised boolean environment value");
    }
    parsed
}

/// Shell-style boolean: `1/0`, `true/false`, `yes/no` or `on/off`.
fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
