//! Breadth-first search for an executable inside a directory tree.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use futures_lite::stream::StreamExt;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::LocateError;

/// Manifest file naming the exact renderer binary, relative to its own directory.
pub const MANIFEST_FILE: &str = "renderer-manifest.json";

/// Directory depth searched below a root.
pub(crate) const MAX_DEPTH: usize = 8;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BundleManifest {
    executable: PathBuf,
}

/// Searches `root` for a renderer executable.
///
/// A [`MANIFEST_FILE`] anywhere in the tree wins; otherwise the shallowest
/// file whose name is in `names` is returned. A missing root is not an error.
pub(crate) async fn find_executable(
    root: &Path,
    names: &[&str],
    max_depth: usize,
) -> Result<Option<PathBuf>, LocateError> {
    if !path_exists(root).await {
        return Ok(None);
    }

    let mut queue = VecDeque::from([(root.to_path_buf(), 0usize)]);
    let mut by_name: Option<PathBuf> = None;

    while let Some((dir, depth)) = queue.pop_front() {
        let mut entries = match async_fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(source) if dir == root => return Err(LocateError::io(dir, source)),
            Err(error) => {
                debug!(dir = %dir.display(), %error, "skipping unreadable directory");
                continue;
            }
        };

        let mut subdirs = Vec::new();
        while let Some(entry) = entries
            .try_next()
            .await
            .map_err(|source| LocateError::io(&dir, source))?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|source| LocateError::io(&path, source))?;
            if file_type.is_dir() {
                if depth < max_depth {
                    subdirs.push(path);
                }
                continue;
            }

            let name = entry.file_name();
            if name == MANIFEST_FILE {
                if let Some(executable) = read_manifest(&path).await? {
                    return Ok(Some(executable));
                }
                continue;
            }
            if by_name.is_none() && names.iter().any(|candidate| name == *candidate) {
                by_name = Some(path);
            }
        }

        subdirs.sort();
        queue.extend(subdirs.into_iter().map(|sub| (sub, depth + 1)));
    }

    Ok(by_name)
}

async fn read_manifest(path: &Path) -> Result<Option<PathBuf>, LocateError> {
    let raw = async_fs::read(path)
        .await
        .map_err(|source| LocateError::io(path, source))?;
    let manifest: BundleManifest =
        serde_json::from_slice(&raw).map_err(|source| LocateError::Manifest {
            path: path.to_path_buf(),
            source,
        })?;

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let executable = base.join(&manifest.executable);
    if path_exists(&executable).await {
        Ok(Some(executable))
    } else {
        warn!(
            manifest = %path.display(),
            executable = %executable.display(),
            "bundle manifest names a missing executable"
        );
        Ok(None)
    }
}

pub(crate) async fn path_exists(path: &Path) -> bool {
    async_fs::metadata(path).await.is_ok()
}

pub(crate) async fn is_file(path: &Path) -> bool {
    async_fs::metadata(path)
        .await
        .is_ok_and(|meta| meta.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"#!/bin/sh\n").unwrap();
    }

    #[tokio::test]
    async fn finds_shallowest_named_executable() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("a/b/c/chrome"));
        touch(&dir.path().join("linux-120/chrome"));

        let found = find_executable(dir.path(), &["chrome"], MAX_DEPTH)
            .await
            .unwrap();
        assert_eq!(found, Some(dir.path().join("linux-120/chrome")));
    }

    #[tokio::test]
    async fn manifest_wins_over_name_match() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("chrome"));
        touch(&dir.path().join("bundle/bin/headless-shell"));
        std::fs::write(
            dir.path().join("bundle").join(MANIFEST_FILE),
            r#"{"executable": "bin/headless-shell"}"#,
        )
        .unwrap();

        let found = find_executable(dir.path(), &["chrome"], MAX_DEPTH)
            .await
            .unwrap();
        assert_eq!(found, Some(dir.path().join("bundle/bin/headless-shell")));
    }

    #[tokio::test]
    async fn respects_depth_limit() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("1/2/3/chrome"));

        let shallow = find_executable(dir.path(), &["chrome"], 2).await.unwrap();
        assert_eq!(shallow, None);
        let deep = find_executable(dir.path(), &["chrome"], 3).await.unwrap();
        assert!(deep.is_some());
    }

    #[tokio::test]
    async fn missing_root_is_not_an_error() {
        let found = find_executable(Path::new("/definitely/not/here"), &["chrome"], MAX_DEPTH)
            .await
            .unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn malformed_manifest_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), "not json").unwrap();

        let err = find_executable(dir.path(), &["chrome"], MAX_DEPTH)
            .await
            .unwrap_err();
        assert!(matches!(err, LocateError::Manifest { .. }));
    }
}
