use std::path::PathBuf;

use anyhow::{Context, Result};
use directories::ProjectDirs;

/// Resolve the storage root under which all state files live.
///
/// Priority:
/// 1. `TFSTATE_STORAGE_DIR` environment variable
/// 2. Platform-specific app data dir (`~/.local/share/tfstated/states`, etc.)
pub fn storage_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var("TFSTATE_STORAGE_DIR") {
        let path = PathBuf::from(dir);
        std::fs::create_dir_all(&path).context("create TFSTATE_STORAGE_DIR")?;
        return Ok(path);
    }

    let dirs = ProjectDirs::from("", "", "tfstated")
        .context("could not determine platform data directory")?;

    let path = dirs.data_dir().join("states");
    std::fs::create_dir_all(&path).context("create platform data dir")?;
    Ok(path)
}
