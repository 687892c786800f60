pub mod config;
pub mod db;
pub mod error;
pub mod import;
pub mod logging;
pub mod migrate;
pub mod refresh;
pub mod time;

pub use config::ImportConfig;
pub use error::{AppError, AppResult};
pub use import::{ImportEngine, ImportError, ImportSummary, MigrationLedger};
pub use refresh::{DataRefresher, GitRefresher};

/// Full commit hash baked in at build time, `unknown` outside a checkout.
pub const BUILD_HASH: &str = env!("LEDGERLOAD_GIT_HASH");
