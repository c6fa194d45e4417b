//! Host-specific executable names and install locations.

use std::path::PathBuf;

/// File names a renderer executable may have on this platform, most specific first.
#[must_use]
pub fn executable_names() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["chrome-headless-shell.exe", "chrome.exe", "chromium.exe"]
    }
    #[cfg(target_os = "macos")]
    {
        &[
            "chrome-headless-shell",
            "Google Chrome for Testing",
            "Google Chrome",
            "Chromium",
        ]
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        &[
            "chrome-headless-shell",
            "chrome",
            "chromium",
            "chromium-browser",
            "google-chrome-stable",
            "google-chrome",
        ]
    }
}

/// Program names handed to the shell lookup.
#[must_use]
pub fn lookup_names() -> &'static [&'static str] {
    #[cfg(target_os = "windows")]
    {
        &["chrome", "chromium"]
    }
    #[cfg(not(target_os = "windows"))]
    {
        &[
            "chromium",
            "chromium-browser",
            "google-chrome-stable",
            "google-chrome",
            "chrome",
        ]
    }
}

/// The shell command that resolves a program name to a path.
#[must_use]
pub const fn lookup_program() -> &'static str {
    if cfg!(target_os = "windows") {
        "where"
    } else {
        "which"
    }
}

/// Well-known installation paths for the host platform.
#[must_use]
pub fn well_known_paths() -> Vec<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let mut paths = Vec::new();
        for var in ["PROGRAMFILES", "PROGRAMFILES(X86)", "LOCALAPPDATA"] {
            if let Some(base) = std::env::var_os(var) {
                let base = PathBuf::from(base);
                paths.push(base.join(r"Google\Chrome\Application\chrome.exe"));
                paths.push(base.join(r"Chromium\Application\chrome.exe"));
            }
        }
        paths
    }
    #[cfg(target_os = "macos")]
    {
        let mut paths: Vec<PathBuf> = [
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/Applications/Google Chrome Canary.app/Contents/MacOS/Google Chrome Canary",
        ]
        .iter()
        .map(PathBuf::from)
        .collect();
        if let Some(home) = std::env::var_os("HOME") {
            paths.push(
                PathBuf::from(home)
                    .join("Applications/Google Chrome.app/Contents/MacOS/Google Chrome"),
            );
        }
        paths
    }
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        [
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/google-chrome",
            "/usr/lib/chromium/chromium",
            "/opt/google/chrome/chrome",
            "/snap/bin/chromium",
            "/usr/local/bin/chromium",
        ]
        .iter()
        .map(PathBuf::from)
        .collect()
    }
}
