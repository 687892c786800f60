use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// File extension that marks a data bundle.
pub const BUNDLE_EXTENSION: &str = "json";
/// Deepest directory level scanned below the data root (the root is depth 0).
pub const MAX_DISCOVERY_DEPTH: usize = 5;

pub const DATA_DIR_ENV: &str = "LEDGERLOAD_DATA_DIR";
pub const DB_PATH_ENV: &str = "LEDGERLOAD_DB";
pub const REMOTE_URL_ENV: &str = "LEDGERLOAD_REMOTE_URL";
pub const SYNC_ENV: &str = "LEDGERLOAD_SYNC";
pub const REPORTS_DIR_ENV: &str = "LEDGERLOAD_REPORTS_DIR";
pub const LOG_DIR_ENV: &str = "LEDGERLOAD_LOG_DIR";

const APP_DIR: &str = "ledgerload";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportConfig {
    /// Local data root scanned by `import_all`. Stored origins under this
    /// root list as `LOCAL`, everything else as `UPLOAD`.
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    /// Remote repository the data root is refreshed from before an import.
    pub remote_url: Option<String>,
    pub sync_on_import: bool,
    pub reports_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

impl ImportConfig {
    pub fn new(data_dir: impl Into<PathBuf>, db_path: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            db_path: db_path.into(),
            remote_url: None,
            sync_on_import: false,
            reports_dir: None,
            log_dir: None,
        }
    }

    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source; `from_env` is the
    /// process-environment flavour.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let base = default_base_dir()?;
        let data_dir = non_empty(DATA_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| base.join("data"));
        let db_path = non_empty(DB_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| base.join("ledgerload.sqlite3"));
        let remote_url = non_empty(REMOTE_URL_ENV);
        let sync_on_import = non_empty(SYNC_ENV).map_or(false, |v| flag_enabled(&v));

        Ok(Self {
            data_dir,
            db_path,
            remote_url,
            sync_on_import,
            reports_dir: non_empty(REPORTS_DIR_ENV).map(PathBuf::from),
            log_dir: non_empty(LOG_DIR_ENV).map(PathBuf::from),
        })
    }

    pub fn with_data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.data_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_db_path(mut self, path: impl AsRef<Path>) -> Self {
        self.db_path = path.as_ref().to_path_buf();
        self
    }
}

fn default_base_dir() -> Result<PathBuf> {
    let base = match dirs::data_dir() {
        Some(dir) => dir,
        None => std::env::current_dir().context("resolve working directory")?,
    };
    Ok(base.join(APP_DIR))
}

fn flag_enabled(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE" | "yes" | "YES")
}
