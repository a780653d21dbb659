//! SQLite-backed Local Store.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;

use super::LocalStore;
use crate::error::{DbError, DbResult};

const UPSERT: &str = r#"
    INSERT INTO local_store (key, value, updated_at)
    VALUES (?1, ?2, ?3)
    ON CONFLICT(key) DO UPDATE SET
        value = excluded.value,
        updated_at = excluded.updated_at
"#;

/// Local Store over the `local_store` table.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        SqliteStore { pool }
    }
}

#[async_trait]
impl LocalStore for SqliteStore {
    async fn get(&self, key: &str) -> DbResult<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM local_store WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> DbResult<()> {
        sqlx::query(UPSERT)
            .bind(key)
            .bind(value)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_many(&self, entries: &[(String, String)]) -> DbResult<()> {
        let now = Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        for (key, value) in entries {
            sqlx::query(UPSERT)
                .bind(key)
                .bind(value)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit()
            .await
            .map_err(|e| DbError::TransactionFailed(e.to_string()))?;

        debug!(keys = entries.len(), "Committed multi-key write");
        Ok(())
    }

    async fn remove(&self, key: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM local_store WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn clear(&self) -> DbResult<()> {
        sqlx::query("DELETE FROM local_store")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, DbConfig};

    async fn store() -> SqliteStore {
        Database::new(DbConfig::in_memory())
            .await
            .unwrap()
            .local_store()
    }

    #[tokio::test]
    async fn test_set_get_remove() {
        let store = store().await;

        assert_eq!(store.get("a").await.unwrap(), None);
        store.set("a", "1").await.unwrap();
        store.set("a", "2").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some("2".to_string()));

        store.remove("a").await.unwrap();
        store.remove("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_many_and_clear() {
        let store = store().await;
        let entries = vec![
            ("x".to_string(), "[1]".to_string()),
            ("y".to_string(), "[2]".to_string()),
        ];

        store.set_many(&entries).await.unwrap();
        assert_eq!(store.get("x").await.unwrap(), Some("[1]".to_string()));
        assert_eq!(store.get("y").await.unwrap(), Some("[2]".to_string()));

        store.clear().await.unwrap();
        assert_eq!(store.get("x").await.unwrap(), None);
        assert_eq!(store.get("y").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_values_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("terminal").join("stockline.db");

        let db = Database::new(DbConfig::new(&path)).await.unwrap();
        db.local_store().set("catalog.cursor", "\"kept\"").await.unwrap();
        db.close().await;

        let reopened = Database::new(DbConfig::new(&path)).await.unwrap();
        assert_eq!(
            reopened.local_store().get("catalog.cursor").await.unwrap(),
            Some("\"kept\"".to_string())
        );
    }
}
