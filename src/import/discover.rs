use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use walkdir::WalkDir;

use crate::config::{BUNDLE_EXTENSION, MAX_DISCOVERY_DEPTH};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("data root is not a directory")]
    NotADirectory,
    #[error("data root is unreadable: {0}")]
    Unreadable(#[source] std::io::Error),
    #[error("path is neither a directory nor a bundle file")]
    Unsupported,
}

/// Resolve `root` to its canonical form, failing if it is not a directory.
pub fn canonical_root(root: &Path) -> Result<PathBuf, DiscoveryError> {
    if !root.is_dir() {
        return Err(DiscoveryError::NotADirectory);
    }
    fs::canonicalize(root).map_err(DiscoveryError::Unreadable)
}

pub fn is_bundle_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext == BUNDLE_EXTENSION)
}

/// Every bundle file below `root`, sorted by full path.
///
/// Entries that cannot be read are logged and skipped together with their
/// subtree; only an unusable root fails the call.
pub fn discover_bundle_files(root: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
    if !root.is_dir() {
        return Err(DiscoveryError::NotADirectory);
    }
    fs::read_dir(root).map_err(DiscoveryError::Unreadable)?;

    let mut found = Vec::new();
    for entry in WalkDir::new(root)
        .follow_links(false)
        .min_depth(1)
        .max_depth(MAX_DISCOVERY_DEPTH)
    {
        let entry = match entry {
            Ok(e) => e,
            Err(err) => {
                let relative = err
                    .path()
                    .and_then(|p| p.strip_prefix(root).ok())
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                tracing::warn!(
                    target: "ledgerload",
                    event = "import_discovery_walk_error",
                    entry = %relative,
                    depth = err.depth(),
                    error = %err,
                    "Skipping entry due to walkdir error"
                );
                continue;
            }
        };
        // Linked files count by their target; linked directories are not entered.
        if !entry.path().is_file() || !is_bundle_file(entry.path()) {
            continue;
        }
        found.push(entry.into_path());
    }

    found.sort_by(|a, b| a.as_os_str().cmp(b.as_os_str()));
    tracing::debug!(
        target: "ledgerload",
        event = "import_discovery_complete",
        files = found.len()
    );
    Ok(found)
}
