use std::ffi::OsStr;
use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context, Result};

/// Brings the local data root up to date before a scan.
///
/// Called once per `import_all`, on the blocking pool. An error is logged
/// by the engine and the import continues with what is already on disk.
pub trait DataRefresher: Send + Sync {
    fn refresh(&self, target: &Path) -> Result<()>;
}

/// Clones the remote into the data root, or fast-forwards an existing checkout.
#[derive(Debug, Clone)]
pub struct GitRefresher {
    remote_url: String,
}

impl GitRefresher {
    pub fn new(remote_url: impl Into<String>) -> Self {
        Self {
            remote_url: remote_url.into(),
        }
    }
}

fn run_git(args: &[&OsStr]) -> Result<()> {
    let output = Command::new("git")
        .args(args)
        .output()
        .context("spawn git")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("git exited with {}: {}", output.status, stderr.trim());
    }
    Ok(())
}

impl DataRefresher for GitRefresher {
    fn refresh(&self, target: &Path) -> Result<()> {
        if target.join(".git").is_dir() {
            tracing::info!(target: "ledgerload", event = "refresh_pull");
            run_git(&[
                OsStr::new("-C"),
                target.as_os_str(),
                OsStr::new("pull"),
                OsStr::new("--ff-only"),
            ])
            .context("pull data repository")
        } else {
            if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create {}", parent.display()))?;
            }
            tracing::info!(target: "ledgerload", event = "refresh_clone");
            run_git(&[
                OsStr::new("clone"),
                OsStr::new(&self.remote_url),
                target.as_os_str(),
            ])
            .context("clone data repository")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn clone_from_missing_remote_fails_cleanly() {
        let tmp = TempDir::new().unwrap();
        let refresher = GitRefresher::new(tmp.path().join("no-such-remote").display().to_string());
        let target = tmp.path().join("data");
        assert!(refresher.refresh(&target).is_err());
        assert!(!target.join(".git").exists());
    }
}
