use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use sqlx::SqliteConnection;

use super::bundle::RowMap;
use super::dispatch::{PersistenceError, TableRegistry, TableStore};

/// Field carrying the lookup identifier on update rows.
pub const RECORD_ID_FIELD: &str = "record_id";

#[derive(Debug, Clone, Copy)]
pub struct ColumnSpec {
    pub name: &'static str,
    pub required: bool,
}

const fn required(name: &'static str) -> ColumnSpec {
    ColumnSpec {
        name,
        required: true,
    }
}

const fn optional(name: &'static str) -> ColumnSpec {
    ColumnSpec {
        name,
        required: false,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    pub name: &'static str,
    pub key: &'static str,
    /// Writable columns, key included.
    pub columns: &'static [ColumnSpec],
}

pub const SERVER_INFO: TableSpec = TableSpec {
    name: "server_info",
    key: "info_id",
    columns: &[
        optional("info_id"),
        required("server_version"),
        required("zzz_version"),
        required("sr_version"),
        required("update_description"),
    ],
};

pub const SR_ACHIEVEMENT: TableSpec = TableSpec {
    name: "sr_achievement",
    key: "achievement_id",
    columns: &[
        required("achievement_id"),
        required("class_name"),
        required("name"),
        required("description"),
        required("reward_level"),
        required("game_version"),
    ],
};

pub const ZZZ_ACHIEVEMENT: TableSpec = TableSpec {
    name: "zzz_achievement",
    key: "achievement_id",
    columns: &[
        required("achievement_id"),
        required("class_id"),
        required("name"),
        required("description"),
        required("reward_level"),
        required("hidden"),
        required("game_version"),
    ],
};

pub const SR_BRANCH: TableSpec = TableSpec {
    name: "sr_branch",
    key: "achievement_id",
    columns: &[required("achievement_id"), required("branch_id")],
};

pub const ZZZ_BRANCH: TableSpec = TableSpec {
    name: "zzz_branch",
    key: "achievement_id",
    columns: &[required("achievement_id"), required("branch_id")],
};

pub const CATALOG: &[TableSpec] = &[
    SERVER_INFO,
    SR_ACHIEVEMENT,
    ZZZ_ACHIEVEMENT,
    SR_BRANCH,
    ZZZ_BRANCH,
];

impl TableRegistry {
    /// Registry holding a [`SqlTable`] for every table in [`CATALOG`].
    pub fn with_catalog() -> Self {
        let mut registry = TableRegistry::new();
        for spec in CATALOG {
            registry.register(Arc::new(SqlTable::new(*spec)));
        }
        registry
    }
}

fn quote_ident(name: &str) -> String {
    let escaped = name.replace('"', "\"\"");
    format!("\"{}\"", escaped)
}

fn json_extract_for_column(param: u8, column: &str) -> String {
    let escaped = column.replace('\\', "\\\\");
    let escaped = escaped.replace('"', "\\\"");
    format!("json_extract(?{param}, '$.\"{escaped}\"')")
}

fn display_id(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Table collaborator backed by a SQLite table described by a [`TableSpec`].
///
/// Rows are bound as one JSON document and unpacked with `json_extract`, so a
/// single prepared statement shape serves every row with the same columns.
#[derive(Debug, Clone)]
pub struct SqlTable {
    spec: TableSpec,
}

impl SqlTable {
    pub fn new(spec: TableSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &TableSpec {
        &self.spec
    }

    /// Known, non-null fields of `row` keyed by their declared column name.
    fn normalize(&self, row: &RowMap) -> RowMap {
        let mut out = RowMap::new();
        for (field, value) in row {
            if value.is_null() {
                continue;
            }
            if let Some(column) = self
                .spec
                .columns
                .iter()
                .find(|c| c.name.eq_ignore_ascii_case(field))
            {
                out.insert(column.name.to_string(), value.clone());
            }
        }
        out
    }

    fn lookup_id(&self, row: &RowMap, index: usize) -> Result<Value, PersistenceError> {
        row.iter()
            .find(|(field, value)| field.eq_ignore_ascii_case(RECORD_ID_FIELD) && !value.is_null())
            .map(|(_, value)| value.clone())
            .ok_or_else(|| PersistenceError::MissingRecordId {
                table: self.spec.name.to_string(),
                index,
            })
    }

    fn encode(&self, value: &impl serde::Serialize, index: usize) -> Result<String, PersistenceError> {
        serde_json::to_string(value).map_err(|err| PersistenceError::InvalidRow {
            table: self.spec.name.to_string(),
            index,
            detail: err.to_string(),
        })
    }

    fn not_found(&self, id: &Value) -> PersistenceError {
        PersistenceError::RecordNotFound {
            table: self.spec.name.to_string(),
            id: display_id(id),
        }
    }

    async fn insert_row(
        &self,
        conn: &mut SqliteConnection,
        row: &RowMap,
        index: usize,
    ) -> Result<u64, PersistenceError> {
        let fields = self.normalize(row);
        if let Some(missing) = self
            .spec
            .columns
            .iter()
            .find(|c| c.required && !fields.contains_key(c.name))
        {
            return Err(PersistenceError::MissingColumn {
                table: self.spec.name.to_string(),
                column: missing.name.to_string(),
                index,
            });
        }

        let table = quote_ident(self.spec.name);
        let sql = if fields.is_empty() {
            format!("INSERT INTO {table} DEFAULT VALUES")
        } else {
            let columns: Vec<String> = fields.keys().map(|c| quote_ident(c)).collect();
            let values: Vec<String> = fields
                .keys()
                .map(|c| json_extract_for_column(1, c))
                .collect();
            format!(
                "INSERT INTO {table} ({}) VALUES ({})",
                columns.join(", "),
                values.join(", ")
            )
        };
        let payload = self.encode(&fields, index)?;
        let res = sqlx::query(&sql)
            .bind(payload)
            .execute(&mut *conn)
            .await?;
        Ok(res.rows_affected())
    }

    async fn fetch_existing(
        &self,
        conn: &mut SqliteConnection,
        id: &Value,
        index: usize,
    ) -> Result<Option<RowMap>, PersistenceError> {
        let pairs: Vec<String> = self
            .spec
            .columns
            .iter()
            .map(|c| format!("'{}', {}", c.name, quote_ident(c.name)))
            .collect();
        let sql = format!(
            "SELECT json_object({}) FROM {} WHERE {} = json_extract(?1, '$')",
            pairs.join(", "),
            quote_ident(self.spec.name),
            quote_ident(self.spec.key)
        );
        let found: Option<(String,)> = sqlx::query_as(&sql)
            .bind(self.encode(id, index)?)
            .fetch_optional(&mut *conn)
            .await?;
        match found {
            Some((doc,)) => serde_json::from_str::<RowMap>(&doc)
                .map(Some)
                .map_err(|err| PersistenceError::InvalidRow {
                    table: self.spec.name.to_string(),
                    index,
                    detail: err.to_string(),
                }),
            None => Ok(None),
        }
    }

    async fn update_row(
        &self,
        conn: &mut SqliteConnection,
        row: &RowMap,
        index: usize,
    ) -> Result<u64, PersistenceError> {
        let id = self.lookup_id(row, index)?;
        let existing = self
            .fetch_existing(conn, &id, index)
            .await?
            .ok_or_else(|| self.not_found(&id))?;

        let patch = self.normalize(row);
        let old_key = existing.get(self.spec.key).cloned().unwrap_or(Value::Null);
        let key_changed = patch
            .get(self.spec.key)
            .map_or(false, |new_key| new_key != &old_key);

        let assignments: Vec<String> = patch
            .keys()
            .filter(|c| key_changed || c.as_str() != self.spec.key)
            .map(|c| format!("{} = {}", quote_ident(c), json_extract_for_column(1, c)))
            .collect();
        if assignments.is_empty() {
            return Ok(1);
        }

        if key_changed {
            tracing::info!(
                target: "ledgerload",
                event = "import_key_rewrite",
                table = %self.spec.name,
                old_key = %display_id(&old_key),
                new_key = %patch.get(self.spec.key).map(display_id).unwrap_or_default()
            );
        }

        let sql = format!(
            "UPDATE {} SET {} WHERE {} = json_extract(?2, '$')",
            quote_ident(self.spec.name),
            assignments.join(", "),
            quote_ident(self.spec.key)
        );
        let res = sqlx::query(&sql)
            .bind(self.encode(&patch, index)?)
            .bind(self.encode(&old_key, index)?)
            .execute(&mut *conn)
            .await?;
        if res.rows_affected() != 1 {
            return Err(self.not_found(&id));
        }
        Ok(1)
    }

    async fn delete_row(
        &self,
        conn: &mut SqliteConnection,
        row: &RowMap,
        index: usize,
    ) -> Result<u64, PersistenceError> {
        let fields = self.normalize(row);
        let id = match fields.get(self.spec.key) {
            Some(key) => key.clone(),
            None => self.lookup_id(row, index)?,
        };
        let sql = format!(
            "DELETE FROM {} WHERE {} = json_extract(?1, '$')",
            quote_ident(self.spec.name),
            quote_ident(self.spec.key)
        );
        let res = sqlx::query(&sql)
            .bind(self.encode(&id, index)?)
            .execute(&mut *conn)
            .await?;
        if res.rows_affected() == 0 {
            return Err(self.not_found(&id));
        }
        Ok(res.rows_affected())
    }
}

impl TableStore for SqlTable {
    fn name(&self) -> &str {
        self.spec.name
    }

    fn insert_batch<'a>(
        &'a self,
        conn: &'a mut SqliteConnection,
        rows: &'a [RowMap],
    ) -> BoxFuture<'a, Result<u64, PersistenceError>> {
        async move {
            let mut total = 0;
            for (index, row) in rows.iter().enumerate() {
                total += self.insert_row(conn, row, index).await?;
            }
            Ok(total)
        }
        .boxed()
    }

    fn update_batch<'a>(
        &'a self,
        conn: &'a mut SqliteConnection,
        rows: &'a [RowMap],
    ) -> BoxFuture<'a, Result<u64, PersistenceError>> {
        async move {
            let mut total = 0;
            for (index, row) in rows.iter().enumerate() {
                total += self.update_row(conn, row, index).await?;
            }
            Ok(total)
        }
        .boxed()
    }

    fn delete_batch<'a>(
        &'a self,
        conn: &'a mut SqliteConnection,
        rows: &'a [RowMap],
    ) -> BoxFuture<'a, Result<u64, PersistenceError>> {
        async move {
            let mut total = 0;
            for (index, row) in rows.iter().enumerate() {
                total += self.delete_row(conn, row, index).await?;
            }
            Ok(total)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    async fn pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::migrate::apply_migrations(&pool).await.unwrap();
        pool
    }

    fn rows(values: Value) -> Vec<RowMap> {
        serde_json::from_value(values).unwrap()
    }

    async fn branches(pool: &SqlitePool) -> Vec<(i64, i64)> {
        sqlx::query_as("SELECT achievement_id, branch_id FROM sr_branch ORDER BY achievement_id")
            .fetch_all(pool)
            .await
            .unwrap()
    }

    #[test]
    fn catalog_registers_every_table() {
        let registry = TableRegistry::with_catalog();
        let names: Vec<&str> = registry.table_names().collect();
        assert_eq!(
            names,
            vec!["server_info", "sr_achievement", "sr_branch", "zzz_achievement", "zzz_branch"]
        );
    }

    #[tokio::test]
    async fn insert_matches_columns_case_insensitively_and_ignores_unknown() {
        let pool = pool().await;
        let table = SqlTable::new(SR_BRANCH);
        let mut conn = pool.acquire().await.unwrap();
        let inserted = table
            .insert_batch(
                &mut conn,
                &rows(json!([
                    {"Achievement_ID": 1, "branch_id": 10, "comment": "ignored"},
                    {"achievement_id": 2, "BRANCH_ID": 10}
                ])),
            )
            .await
            .unwrap();
        assert_eq!(inserted, 2);
        drop(conn);
        assert_eq!(branches(&pool).await, vec![(1, 10), (2, 10)]);
    }

    #[tokio::test]
    async fn insert_requires_every_required_column() {
        let pool = pool().await;
        let table = SqlTable::new(SERVER_INFO);
        let mut conn = pool.acquire().await.unwrap();
        let err = table
            .insert_batch(
                &mut conn,
                &rows(json!([{
                    "server_version": "1.0",
                    "zzz_version": "1.0",
                    "sr_version": null,
                    "update_description": "x"
                }])),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PersistenceError::MissingColumn { ref column, index: 0, .. } if column == "sr_version"
        ));
    }

    #[tokio::test]
    async fn update_overwrites_only_present_fields() {
        let pool = pool().await;
        let table = SqlTable::new(SERVER_INFO);
        let mut conn = pool.acquire().await.unwrap();
        table
            .insert_batch(
                &mut conn,
                &rows(json!([{
                    "server_version": "1.0",
                    "zzz_version": "1.1",
                    "sr_version": "2.0",
                    "update_description": "initial"
                }])),
            )
            .await
            .unwrap();
        table
            .update_batch(
                &mut conn,
                &rows(json!([{
                    "record_id": 1,
                    "Server_Version": "1.1",
                    "sr_version": null
                }])),
            )
            .await
            .unwrap();
        drop(conn);

        let row: (String, String, String) = sqlx::query_as(
            "SELECT server_version, sr_version, update_description FROM server_info WHERE info_id = 1",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(row, ("1.1".into(), "2.0".into(), "initial".into()));
    }

    #[tokio::test]
    async fn update_rewrites_changed_keys() {
        let pool = pool().await;
        let table = SqlTable::new(SR_BRANCH);
        let mut conn = pool.acquire().await.unwrap();
        table
            .insert_batch(
                &mut conn,
                &rows(json!([{"achievement_id": 5, "branch_id": 1}])),
            )
            .await
            .unwrap();
        table
            .update_batch(
                &mut conn,
                &rows(json!([{"record_id": 5, "achievement_id": 50, "branch_id": 2}])),
            )
            .await
            .unwrap();
        drop(conn);
        assert_eq!(branches(&pool).await, vec![(50, 2)]);
    }

    #[tokio::test]
    async fn update_lookup_failures() {
        let pool = pool().await;
        let table = SqlTable::new(SR_BRANCH);
        let mut conn = pool.acquire().await.unwrap();

        let err = table
            .update_batch(&mut conn, &rows(json!([{"branch_id": 3}])))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::MissingRecordId { index: 0, .. }));

        let err = table
            .update_batch(&mut conn, &rows(json!([{"record_id": 99, "branch_id": 3}])))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::RecordNotFound { ref id, .. } if id == "99"));
    }

    #[tokio::test]
    async fn delete_by_key_or_record_id() {
        let pool = pool().await;
        let table = SqlTable::new(SR_BRANCH);
        let mut conn = pool.acquire().await.unwrap();
        table
            .insert_batch(
                &mut conn,
                &rows(json!([
                    {"achievement_id": 1, "branch_id": 1},
                    {"achievement_id": 2, "branch_id": 1},
                    {"achievement_id": 3, "branch_id": 1}
                ])),
            )
            .await
            .unwrap();
        let deleted = table
            .delete_batch(
                &mut conn,
                &rows(json!([{"achievement_id": 1}, {"record_id": 3}])),
            )
            .await
            .unwrap();
        assert_eq!(deleted, 2);

        let err = table
            .delete_batch(&mut conn, &rows(json!([{"achievement_id": 1}])))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistenceError::RecordNotFound { .. }));
        drop(conn);
        assert_eq!(branches(&pool).await, vec![(2, 1)]);
    }
}
