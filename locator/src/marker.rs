//! Post-install marker file.
//!
//! After a successful installation the installer step records where it put
//! the renderer. The file is JSON:
//!
//! ```json
//! { "cacheDir": "/home/me/.cache/quire/renderer", "executablePath": "...", "installedAt": 1760000000 }
//! ```
//!
//! Only `cacheDir` is required.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::LocateError;

/// Contents of the install marker file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallMarker {
    /// Directory the installer downloaded into.
    pub cache_dir: PathBuf,
    /// Executable verified right after installation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable_path: Option<PathBuf>,
    /// Unix timestamp of the installation.
    #[serde(default)]
    pub installed_at: u64,
}

impl InstallMarker {
    /// Marker for an installation that just finished.
    #[must_use]
    pub fn now(cache_dir: impl Into<PathBuf>, executable_path: Option<PathBuf>) -> Self {
        let installed_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_secs());
        Self {
            cache_dir: cache_dir.into(),
            executable_path,
            installed_at,
        }
    }

    /// Reads the marker at `path`; a missing file yields `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn read(path: &Path) -> Result<Option<Self>, LocateError> {
        let raw = match async_fs::read(path).await {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(LocateError::io(path, source)),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|source| LocateError::Marker {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Writes the marker to `path`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub async fn write(&self, path: &Path) -> Result<(), LocateError> {
        if let Some(parent) = path.parent() {
            async_fs::create_dir_all(parent)
                .await
                .map_err(|source| LocateError::io(parent, source))?;
        }
        let json = serde_json::to_vec_pretty(self).map_err(|source| LocateError::Marker {
            path: path.to_path_buf(),
            source,
        })?;

        // Write-then-rename so a reader never sees a half-written marker.
        let staging = path.with_extension("json.tmp");
        async_fs::write(&staging, json)
            .await
            .map_err(|source| LocateError::io(&staging, source))?;
        async_fs::rename(&staging, path)
            .await
            .map_err(|source| LocateError::io(path, source))
    }
}
