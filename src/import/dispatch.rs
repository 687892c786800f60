use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use sqlx::SqliteConnection;
use thiserror::Error;

use super::bundle::RowMap;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("row {index} of {table} is missing required column {column}")]
    MissingColumn {
        table: String,
        column: String,
        index: usize,
    },
    #[error("row {index} of {table} has no record_id for lookup")]
    MissingRecordId { table: String, index: usize },
    #[error("no {table} row found with id {id}")]
    RecordNotFound { table: String, id: String },
    #[error("row {index} of {table} could not be encoded: {detail}")]
    InvalidRow {
        table: String,
        index: usize,
        detail: String,
    },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown action '{0}'")]
    UnknownAction(String),
    #[error("unknown table '{0}'")]
    UnknownTable(String),
    #[error("{action} on {table} failed: {source}")]
    Persistence {
        table: String,
        action: Action,
        #[source]
        source: PersistenceError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Insert,
    Update,
    Delete,
}

impl Action {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "insert" => Some(Action::Insert),
            "update" => Some(Action::Update),
            "delete" => Some(Action::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Insert => "insert",
            Action::Update => "update",
            Action::Delete => "delete",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Batch persistence for one logical table.
///
/// Every call runs on the connection handed in, which is the bundle's open
/// transaction; a returned error makes the caller roll the whole bundle back.
/// The `Ok` value is the number of rows touched.
pub trait TableStore: Send + Sync {
    fn name(&self) -> &str;

    fn insert_batch<'a>(
        &'a self,
        conn: &'a mut SqliteConnection,
        rows: &'a [RowMap],
    ) -> BoxFuture<'a, Result<u64, PersistenceError>>;

    fn update_batch<'a>(
        &'a self,
        conn: &'a mut SqliteConnection,
        rows: &'a [RowMap],
    ) -> BoxFuture<'a, Result<u64, PersistenceError>>;

    fn delete_batch<'a>(
        &'a self,
        conn: &'a mut SqliteConnection,
        rows: &'a [RowMap],
    ) -> BoxFuture<'a, Result<u64, PersistenceError>>;
}

#[derive(Clone, Default)]
pub struct TableRegistry {
    tables: BTreeMap<String, Arc<dyn TableStore>>,
}

impl TableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, store: Arc<dyn TableStore>) -> &mut Self {
        self.tables.insert(store.name().to_string(), store);
        self
    }

    pub fn get(&self, table: &str) -> Option<&Arc<dyn TableStore>> {
        self.tables.get(table)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }
}

impl fmt::Debug for TableRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.tables.keys()).finish()
    }
}

#[derive(Debug, Clone)]
pub struct OperationDispatcher {
    registry: TableRegistry,
}

impl OperationDispatcher {
    pub fn new(registry: TableRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &TableRegistry {
        &self.registry
    }

    /// Resolve an operation target without touching the store.
    pub fn check(
        &self,
        action: &str,
        table: &str,
    ) -> Result<(Action, &Arc<dyn TableStore>), DispatchError> {
        let parsed =
            Action::parse(action).ok_or_else(|| DispatchError::UnknownAction(action.to_string()))?;
        let store = self
            .registry
            .get(table)
            .ok_or_else(|| DispatchError::UnknownTable(table.to_string()))?;
        Ok((parsed, store))
    }

    pub async fn apply(
        &self,
        conn: &mut SqliteConnection,
        action: &str,
        table: &str,
        values: &[RowMap],
    ) -> Result<u64, DispatchError> {
        let (action, store) = self.check(action, table)?;
        let result = match action {
            Action::Insert => store.insert_batch(conn, values).await,
            Action::Update => store.update_batch(conn, values).await,
            Action::Delete => store.delete_batch(conn, values).await,
        };
        match result {
            Ok(rows) => {
                tracing::debug!(
                    target: "ledgerload",
                    event = "import_operation_applied",
                    table = %table,
                    action = %action,
                    rows
                );
                Ok(rows)
            }
            Err(source) => Err(DispatchError::Persistence {
                table: table.to_string(),
                action,
                source,
            }),
        }
    }
}
