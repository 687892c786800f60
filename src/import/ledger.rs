use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use thiserror::Error;

use super::bundle::{BundleDescriptor, BundleKind};
use crate::time::now_ms;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("bundle '{0}' is already recorded in the ledger")]
    Duplicate(String),
    #[error("ledger row for '{name}' is unreadable: {detail}")]
    Corrupt { name: String, detail: String },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// A persisted ledger row. `source_location` is the raw origin and must not
/// leave the process; callers get [`LedgerEntry`] instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerRecord {
    pub id: i64,
    pub name: String,
    pub source_location: String,
    pub kind: BundleKind,
    pub depends_on: Vec<String>,
    pub applied_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceCategory {
    Local,
    Upload,
}

impl SourceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceCategory::Local => "LOCAL",
            SourceCategory::Upload => "UPLOAD",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: i64,
    pub name: String,
    pub source: SourceCategory,
    pub kind: BundleKind,
    pub depends_on: Vec<String>,
    pub applied_at: i64,
}

type LedgerRow = (i64, String, String, String, String, i64);

const SELECT_COLUMNS: &str = "SELECT id, name, path, kind, depends, applied_at FROM data_migration";

#[derive(Debug, Clone)]
pub struct MigrationLedger {
    local_root: PathBuf,
}

impl MigrationLedger {
    pub fn new(local_root: impl AsRef<Path>) -> Self {
        Self {
            local_root: local_root.as_ref().to_path_buf(),
        }
    }

    /// The local data root as it resolves on disk now. The root may not exist
    /// when the ledger is built (a refresh can create it later), so it is
    /// resolved on every use rather than once.
    pub fn local_root(&self) -> PathBuf {
        fs::canonicalize(&self.local_root).unwrap_or_else(|_| self.local_root.clone())
    }

    pub async fn is_applied(
        &self,
        conn: &mut SqliteConnection,
        name: &str,
    ) -> Result<bool, LedgerError> {
        let found: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM data_migration WHERE name = ?1")
                .bind(name)
                .fetch_optional(&mut *conn)
                .await?;
        Ok(found.is_some())
    }

    /// Insert the ledger row for `bundle`. Must run on the same connection
    /// (transaction) that applied the bundle's operations.
    pub async fn record(
        &self,
        conn: &mut SqliteConnection,
        bundle: &BundleDescriptor,
        source_location: &str,
    ) -> Result<LedgerRecord, LedgerError> {
        let depends = serde_json::to_string(&bundle.depends_on).map_err(|err| {
            LedgerError::Corrupt {
                name: bundle.name.clone(),
                detail: err.to_string(),
            }
        })?;
        let applied_at = now_ms();

        let res = sqlx::query(
            "INSERT INTO data_migration (name, path, kind, depends, applied_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&bundle.name)
        .bind(source_location)
        .bind(bundle.kind.as_str())
        .bind(&depends)
        .bind(applied_at)
        .execute(&mut *conn)
        .await;

        let res = match res {
            Ok(r) => r,
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                tracing::error!(
                    target: "ledgerload",
                    event = "ledger_duplicate",
                    bundle = %bundle.name
                );
                return Err(LedgerError::Duplicate(bundle.name.clone()));
            }
            Err(err) => return Err(err.into()),
        };

        Ok(LedgerRecord {
            id: res.last_insert_rowid(),
            name: bundle.name.clone(),
            source_location: source_location.to_string(),
            kind: bundle.kind,
            depends_on: bundle.depends_on.clone(),
            applied_at,
        })
    }

    pub async fn get(
        &self,
        conn: &mut SqliteConnection,
        name: &str,
    ) -> Result<Option<LedgerRecord>, LedgerError> {
        let row: Option<LedgerRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} WHERE name = ?1"))
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?;
        row.map(decode_row).transpose()
    }

    /// Every ledger row in application order, with origins reduced to
    /// `LOCAL` / `UPLOAD`.
    pub async fn list_all(&self, pool: &SqlitePool) -> Result<Vec<LedgerEntry>, LedgerError> {
        let rows: Vec<LedgerRow> = sqlx::query_as(&format!("{SELECT_COLUMNS} ORDER BY id"))
            .fetch_all(pool)
            .await?;
        let local_root = self.local_root();
        rows.into_iter()
            .map(|row| {
                let record = decode_row(row)?;
                Ok(LedgerEntry {
                    id: record.id,
                    source: category_under(&local_root, &record.source_location),
                    name: record.name,
                    kind: record.kind,
                    depends_on: record.depends_on,
                    applied_at: record.applied_at,
                })
            })
            .collect()
    }

    pub fn categorize(&self, source_location: &str) -> SourceCategory {
        category_under(&self.local_root(), source_location)
    }
}

fn category_under(local_root: &Path, source_location: &str) -> SourceCategory {
    if Path::new(source_location).starts_with(local_root) {
        SourceCategory::Local
    } else {
        SourceCategory::Upload
    }
}

fn decode_row(row: LedgerRow) -> Result<LedgerRecord, LedgerError> {
    let (id, name, path, kind, depends, applied_at) = row;
    let kind = kind.parse::<BundleKind>().map_err(|err| LedgerError::Corrupt {
        name: name.clone(),
        detail: err.to_string(),
    })?;
    let depends_on: Vec<String> =
        serde_json::from_str(&depends).map_err(|err| LedgerError::Corrupt {
            name: name.clone(),
            detail: err.to_string(),
        })?;
    Ok(LedgerRecord {
        id,
        name,
        source_location: path,
        kind,
        depends_on,
        applied_at,
    })
}
