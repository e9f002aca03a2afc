use anyhow::{bail, Result};
use std::path::PathBuf;

/// Locate the adb binary: explicit override, then PATH, then the usual SDK
/// install locations.
pub fn find_adb() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("ADB_PATH") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Ok(path);
        }
        bail!("ADB_PATH is set to {} but nothing is there", path.display());
    }

    if let Ok(path) = which::which("adb") {
        return Ok(path);
    }

    if let Some(home) = dirs::home_dir() {
        let name = if cfg!(windows) { "adb.exe" } else { "adb" };
        for sdk in ["Android/Sdk", "Library/Android/sdk", ".android/sdk"] {
            let candidate = home.join(sdk).join("platform-tools").join(name);
            if candidate.exists() {
                return Ok(candidate);
            }
        }
    }

    bail!("adb not found; install platform-tools or set ADB_PATH")
}
