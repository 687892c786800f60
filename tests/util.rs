#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::path::Path;

use ledgerload_lib::{migrate, ImportConfig, ImportEngine};
use serde_json::{json, Value};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

pub async fn temp_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("connect sqlite::memory:");
    sqlx::query("PRAGMA foreign_keys=ON;")
        .execute(&pool)
        .await
        .unwrap();
    migrate::apply_migrations(&pool).await.unwrap();
    pool
}

pub fn engine(pool: &SqlitePool, data_dir: &Path) -> ImportEngine {
    ImportEngine::new(
        pool.clone(),
        ImportConfig::new(data_dir, data_dir.join("unused.sqlite3")),
    )
}

pub fn write_bundle(root: &Path, rel: &str, doc: Value) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, serde_json::to_vec_pretty(&doc).unwrap()).unwrap();
}

pub fn bundle(name: &str, depends: &[&str], operations: Value) -> Value {
    json!({
        "name": name,
        "type": "data",
        "depends": depends,
        "payload": {"operations": operations}
    })
}

/// A bundle inserting one `sr_branch` row.
pub fn branch_bundle(name: &str, depends: &[&str], achievement_id: i64) -> Value {
    bundle(
        name,
        depends,
        json!([{
            "action": "insert",
            "table": "sr_branch",
            "values": [{"achievement_id": achievement_id, "branch_id": 1}]
        }]),
    )
}

pub async fn ledger_names(pool: &SqlitePool) -> Vec<String> {
    sqlx::query_as::<_, (String,)>("SELECT name FROM data_migration ORDER BY id")
        .fetch_all(pool)
        .await
        .unwrap()
        .into_iter()
        .map(|(name,)| name)
        .collect()
}

pub async fn count(pool: &SqlitePool, table: &str) -> i64 {
    let (n,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
        .fetch_one(pool)
        .await
        .unwrap();
    n
}
