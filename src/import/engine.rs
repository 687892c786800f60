use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sqlx::{SqliteConnection, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

use super::bundle::{parse_bundle, BundleDescriptor};
use super::discover::{canonical_root, discover_bundle_files, is_bundle_file, DiscoveryError};
use super::dispatch::{DispatchError, OperationDispatcher, TableRegistry};
use super::ledger::{LedgerError, LedgerRecord, MigrationLedger};
use super::summary::{BundleOutcome, BundleState, ImportSummary};
use crate::config::ImportConfig;
use crate::db::finish_tx;
use crate::refresh::DataRefresher;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error("store unavailable: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
enum ApplyError {
    #[error("operation {index}: {source}")]
    Operation {
        index: usize,
        #[source]
        source: DispatchError,
    },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

enum LedgerState {
    AlreadyApplied,
    Ready,
    Blocked(Vec<String>),
}

enum Attempt {
    Skipped(String),
    Deferred {
        bundle: BundleDescriptor,
        missing: Vec<String>,
    },
    Done(BundleOutcome),
}

/// A file being attempted in a given pass.
struct Candidate<'a> {
    path: &'a Path,
    file: String,
    pass: u8,
}

impl Candidate<'_> {
    fn outcome(
        &self,
        bundle: Option<&BundleDescriptor>,
        state: BundleState,
        reason: Option<String>,
    ) -> BundleOutcome {
        BundleOutcome {
            file: self.file.clone(),
            bundle_name: bundle.map_or_else(|| self.file.clone(), |b| b.name.clone()),
            kind: bundle.map(|b| b.kind),
            state,
            reason,
            pass: self.pass,
        }
    }

    fn failed(&self, bundle: Option<&BundleDescriptor>, reason: String) -> BundleOutcome {
        tracing::error!(
            target: "ledgerload",
            event = "import_bundle_failed",
            file = %self.file,
            bundle = bundle.map(|b| b.name.as_str()).unwrap_or(""),
            pass = self.pass,
            reason = %reason
        );
        self.outcome(bundle, BundleState::Failed, Some(reason))
    }
}

fn relative_name(root: &Path, path: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(rel) => rel.display().to_string(),
        Err(_) => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}

/// Applies bundle files to the store exactly once each.
///
/// A run makes two passes: the second only revisits files whose
/// dependencies were missing during the first. Every bundle runs in its own
/// transaction together with its ledger row.
pub struct ImportEngine {
    pool: SqlitePool,
    dispatcher: OperationDispatcher,
    ledger: MigrationLedger,
    config: ImportConfig,
    refresher: Option<Arc<dyn DataRefresher>>,
    cancel: Arc<AtomicBool>,
}

impl ImportEngine {
    pub fn new(pool: SqlitePool, config: ImportConfig) -> Self {
        Self {
            ledger: MigrationLedger::new(&config.data_dir),
            dispatcher: OperationDispatcher::new(TableRegistry::with_catalog()),
            pool,
            config,
            refresher: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: OperationDispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn with_refresher(mut self, refresher: Arc<dyn DataRefresher>) -> Self {
        self.refresher = Some(refresher);
        self
    }

    pub fn ledger(&self) -> &MigrationLedger {
        &self.ledger
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Setting the flag stops the run before the next bundle starts.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Refresh the local data root if configured, then import everything in it.
    pub async fn import_all(&self) -> Result<ImportSummary, ImportError> {
        self.refresh_data_dir().await;
        let root = canonical_root(&self.config.data_dir)?;
        let files = discover_bundle_files(&root)?;
        self.run(&root, files).await
    }

    /// Import an uploaded directory or a single bundle file.
    pub async fn import_path(&self, path: &Path) -> Result<ImportSummary, ImportError> {
        if path.is_dir() {
            let root = canonical_root(path)?;
            let files = discover_bundle_files(&root)?;
            return self.run(&root, files).await;
        }
        if path.is_file() && is_bundle_file(path) {
            let file = fs::canonicalize(path).map_err(DiscoveryError::Unreadable)?;
            let root = file
                .parent()
                .map(Path::to_path_buf)
                .ok_or(DiscoveryError::Unsupported)?;
            return self.run(&root, vec![file]).await;
        }
        Err(ImportError::Discovery(DiscoveryError::Unsupported))
    }

    async fn refresh_data_dir(&self) {
        if !self.config.sync_on_import {
            return;
        }
        let Some(refresher) = self.refresher.clone() else {
            return;
        };
        let target = self.config.data_dir.clone();
        let result = tokio::task::spawn_blocking(move || refresher.refresh(&target)).await;
        match result {
            Ok(Ok(())) => {
                tracing::info!(target: "ledgerload", event = "import_refresh_complete");
            }
            Ok(Err(err)) => {
                tracing::warn!(
                    target: "ledgerload",
                    event = "import_refresh_failed",
                    error = %format!("{err:#}")
                );
            }
            Err(err) => {
                tracing::warn!(
                    target: "ledgerload",
                    event = "import_refresh_failed",
                    error = %err
                );
            }
        }
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    async fn run(&self, root: &Path, files: Vec<PathBuf>) -> Result<ImportSummary, ImportError> {
        let run_id = Uuid::now_v7();
        let mut summary = ImportSummary::new(run_id, files.len());
        if files.is_empty() {
            tracing::info!(target: "ledgerload", event = "import_nothing_to_do", run_id = %run_id);
            return Ok(summary);
        }
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        tracing::info!(
            target: "ledgerload",
            event = "import_run_start",
            run_id = %run_id,
            files = files.len()
        );

        let mut deferred: Vec<(&Path, BundleDescriptor)> = Vec::new();
        for (position, path) in files.iter().enumerate() {
            if self.cancelled() {
                self.note_cancel(&mut summary, files.len() - position);
                break;
            }
            match self.attempt(root, path, 1).await {
                Attempt::Skipped(name) => summary.record_skip(name),
                Attempt::Deferred { bundle, .. } => deferred.push((path.as_path(), bundle)),
                Attempt::Done(outcome) => summary.record(outcome),
            }
        }

        if !deferred.is_empty() {
            tracing::info!(
                target: "ledgerload",
                event = "import_retry_pass",
                run_id = %run_id,
                files = deferred.len()
            );
        }
        for (position, (path, first_seen)) in deferred.iter().enumerate() {
            if !summary.cancelled && self.cancelled() {
                self.note_cancel(&mut summary, deferred.len() - position);
            }
            let candidate = Candidate {
                path: *path,
                file: relative_name(root, path),
                pass: 2,
            };
            if summary.cancelled {
                let reason = "import cancelled before dependency retry".to_string();
                summary.record(candidate.failed(Some(first_seen), reason));
                continue;
            }
            match self.attempt(root, path, 2).await {
                Attempt::Skipped(name) => summary.record_skip(name),
                Attempt::Done(outcome) => summary.record(outcome),
                Attempt::Deferred { bundle, missing } => {
                    let reason = format!("unresolved dependencies: {}", missing.join(", "));
                    summary.record(candidate.failed(Some(&bundle), reason));
                }
            }
        }

        tracing::info!(
            target: "ledgerload",
            event = "import_run_complete",
            run_id = %run_id,
            applied = summary.applied_count,
            skipped = summary.skipped_count,
            failed = summary.failures.len(),
            cancelled = summary.cancelled
        );
        Ok(summary)
    }

    fn note_cancel(&self, summary: &mut ImportSummary, remaining: usize) {
        summary.cancelled = true;
        tracing::warn!(
            target: "ledgerload",
            event = "import_cancelled",
            run_id = %summary.run_id,
            remaining
        );
    }

    async fn attempt(&self, root: &Path, path: &Path, pass: u8) -> Attempt {
        let candidate = Candidate {
            path,
            file: relative_name(root, path),
            pass,
        };

        let bytes = match fs::read(candidate.path) {
            Ok(bytes) => bytes,
            Err(err) => {
                return Attempt::Done(candidate.failed(None, format!("unreadable file: {err}")))
            }
        };
        let bundle = match parse_bundle(&bytes) {
            Ok(bundle) => bundle,
            Err(err) => return Attempt::Done(candidate.failed(None, err.to_string())),
        };

        match self.ledger_state(&bundle).await {
            Ok(LedgerState::AlreadyApplied) => {
                tracing::info!(
                    target: "ledgerload",
                    event = "import_bundle_skipped",
                    file = %candidate.file,
                    bundle = %bundle.name
                );
                return Attempt::Skipped(bundle.name);
            }
            Ok(LedgerState::Blocked(missing)) => {
                tracing::info!(
                    target: "ledgerload",
                    event = "import_bundle_deferred",
                    file = %candidate.file,
                    bundle = %bundle.name,
                    pass,
                    missing = %missing.join(",")
                );
                return Attempt::Deferred { bundle, missing };
            }
            Ok(LedgerState::Ready) => {}
            Err(err) => return Attempt::Done(candidate.failed(Some(&bundle), err.to_string())),
        }

        for (index, op) in bundle.operations.iter().enumerate() {
            if let Err(source) = self.dispatcher.check(&op.action, &op.table) {
                self.log_operation_failure(&bundle, index, &source);
                let err = ApplyError::Operation { index, source };
                return Attempt::Done(candidate.failed(Some(&bundle), err.to_string()));
            }
        }

        let source_location = candidate.path.to_string_lossy().into_owned();
        let result = match self.pool.begin().await {
            Ok(mut tx) => {
                let applied = self.apply_bundle(&mut tx, &bundle, &source_location).await;
                finish_tx(tx, applied).await
            }
            Err(err) => Err(ApplyError::Database(err)),
        };

        match result {
            Ok(record) => {
                tracing::info!(
                    target: "ledgerload",
                    event = "import_bundle_applied",
                    file = %candidate.file,
                    bundle = %record.name,
                    kind = %record.kind,
                    ledger_id = record.id,
                    operations = bundle.operations.len(),
                    pass
                );
                Attempt::Done(candidate.outcome(Some(&bundle), BundleState::Applied, None))
            }
            Err(err) => Attempt::Done(candidate.failed(Some(&bundle), err.to_string())),
        }
    }

    async fn ledger_state(&self, bundle: &BundleDescriptor) -> Result<LedgerState, LedgerError> {
        let mut conn = self.pool.acquire().await?;
        if self.ledger.is_applied(&mut conn, &bundle.name).await? {
            return Ok(LedgerState::AlreadyApplied);
        }
        let mut missing = Vec::new();
        for dep in &bundle.depends_on {
            if !self.ledger.is_applied(&mut conn, dep).await? {
                missing.push(dep.clone());
            }
        }
        Ok(if missing.is_empty() {
            LedgerState::Ready
        } else {
            LedgerState::Blocked(missing)
        })
    }

    async fn apply_bundle(
        &self,
        conn: &mut SqliteConnection,
        bundle: &BundleDescriptor,
        source_location: &str,
    ) -> Result<LedgerRecord, ApplyError> {
        for (index, op) in bundle.operations.iter().enumerate() {
            if let Err(source) = self
                .dispatcher
                .apply(conn, &op.action, &op.table, &op.values)
                .await
            {
                self.log_operation_failure(bundle, index, &source);
                return Err(ApplyError::Operation { index, source });
            }
        }
        Ok(self.ledger.record(conn, bundle, source_location).await?)
    }

    fn log_operation_failure(&self, bundle: &BundleDescriptor, index: usize, err: &DispatchError) {
        let op = &bundle.operations[index];
        tracing::warn!(
            target: "ledgerload",
            event = "import_operation_failed",
            bundle = %bundle.name,
            index,
            table = %op.table,
            action = %op.action,
            error = %err
        );
    }
}
