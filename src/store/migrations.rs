//! Schema for rules, labels and vocabulary, applied in numbered steps.
//!
//! `schema_version` records which steps a database has seen, so opening an
//! older rules file only runs the steps it is missing.

use libsql::Connection;

use crate::error::DatabaseError;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Append only; versions must increase.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "rules_and_labels",
        sql: r#"
            CREATE TABLE IF NOT EXISTS rules (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                pattern TEXT NOT NULL,
                labels TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                priority REAL NOT NULL DEFAULT 1.0,
                ai_threshold REAL,
                version INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_rules_active ON rules(is_active, deleted_at);

            CREATE TABLE IF NOT EXISTS labels (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL DEFAULT 'custom',
                color TEXT
            );
        "#,
    },
    Migration {
        version: 2,
        name: "vocabulary",
        sql: r#"
            CREATE TABLE IF NOT EXISTS vocabulary (
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                phrases TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (kind, name)
            );
        "#,
    },
];

pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("cannot create schema_version: {e}")))?;

    let from = schema_version(conn).await?;
    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > from).collect();
    if pending.is_empty() {
        tracing::debug!(version = from, "Rule store schema is current");
        return Ok(());
    }

    for step in pending {
        tracing::info!(version = step.version, name = step.name, "Upgrading rule store schema");
        conn.execute_batch(step.sql)
            .await
            .map_err(|e| DatabaseError::Migration(format!("step {} ({}): {e}", step.version, step.name)))?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, name) VALUES (?1, ?2)",
            libsql::params![step.version, step.name],
        )
        .await
        .map_err(|e| DatabaseError::Migration(format!("cannot record step {}: {e}", step.version)))?;
    }
    Ok(())
}

/// Highest recorded step, 0 for a fresh database.
async fn schema_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let read = |e: libsql::Error| DatabaseError::Migration(format!("cannot read schema_version: {e}"));
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await
        .map_err(read)?;
    match rows.next().await.map_err(read)? {
        Some(row) => row.get::<i64>(0).map_err(read),
        None => Ok(0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory() -> Connection {
        libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap()
            .connect()
            .unwrap()
    }

    async fn has_table(conn: &Connection, table: &str) -> bool {
        let mut rows = conn
            .query(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                libsql::params![table],
            )
            .await
            .unwrap();
        rows.next().await.unwrap().is_some()
    }

    #[tokio::test]
    async fn fresh_database_gets_rules_labels_and_vocabulary() {
        let conn = memory().await;
        run_migrations(&conn).await.unwrap();
        for table in ["rules", "labels", "vocabulary"] {
            assert!(has_table(&conn, table).await, "{table}");
        }
        assert_eq!(schema_version(&conn).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn reopening_keeps_stored_rules() {
        let conn = memory().await;
        run_migrations(&conn).await.unwrap();
        conn.execute(
            "INSERT INTO rules (id, name, pattern, labels, created_at, updated_at)
             VALUES ('r-1', 'VIP', '{}', '[\"vip\"]', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')",
            (),
        )
        .await
        .unwrap();

        run_migrations(&conn).await.unwrap();
        let mut rows = conn.query("SELECT name FROM rules", ()).await.unwrap();
        let name: String = rows.next().await.unwrap().unwrap().get(0).unwrap();
        assert_eq!(name, "VIP");
    }

    #[tokio::test]
    async fn database_without_vocabulary_is_upgraded() {
        let conn = memory().await;
        conn.execute_batch(
            "CREATE TABLE schema_version (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )
        .await
        .unwrap();
        conn.execute_batch(MIGRATIONS[0].sql).await.unwrap();
        conn.execute(
            "INSERT INTO schema_version (version, name) VALUES (1, 'rules_and_labels')",
            (),
        )
        .await
        .unwrap();
        assert!(!has_table(&conn, "vocabulary").await);

        run_migrations(&conn).await.unwrap();
        assert!(has_table(&conn, "vocabulary").await);
        assert_eq!(schema_version(&conn).await.unwrap(), 2);
    }
}
