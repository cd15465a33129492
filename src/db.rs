use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use libsql::{Builder, Connection, Database as LibsqlDatabase};
use serde_json::Value as JsonValue;

use crate::cache::StateStore;
use crate::config::Config;
use crate::items::Items;
use crate::model::{ItemSeed, Principal, ResearchItem};
use crate::router::ItemStore;

const SYSTEM_MIGRATIONS: &[(&str, &str)] =
    &[("system/000_migrations_table.sql", include_str!("migrations/system/000_migrations_table.sql"))];

const MIGRATIONS: &[(&str, &str)] = &[
    ("001_schema.sql", include_str!("migrations/001_schema.sql")),
    ("002_projects.sql", include_str!("migrations/002_projects.sql")),
];

pub struct Database {
    db: LibsqlDatabase,
    conn: Connection,
    turso_url: Option<String>,
    turso_auth_token: Option<String>,
}

impl Database {
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn is_replica(turso_url: &Option<String>, turso_auth_token: &Option<String>) -> bool {
        turso_url.is_some() && turso_auth_token.is_some()
    }

    /// Pushes local writes to the remote when running as a synced replica.
    pub async fn sync(&self) -> Result<()> {
        if Self::is_replica(&self.turso_url, &self.turso_auth_token) {
            self.db
                .sync()
                .await
                .map_err(|e| anyhow::anyhow!("sync failed: {}", e))?;
        }
        Ok(())
    }

    async fn is_migration_applied(conn: &Connection, name: &str) -> Result<bool> {
        let query = "SELECT 1 FROM _migrations WHERE name = ?";
        match conn.query(query, libsql::params![name]).await {
            Ok(mut rows) => Ok(rows.next().await?.is_some()),
            Err(e) => {
                if e.to_string().contains("no such table") {
                    Ok(false)
                } else {
                    Err(e.into())
                }
            }
        }
    }

    async fn record_migration(conn: &Connection, name: &str) -> Result<()> {
        let query = r#"
            INSERT INTO _migrations (name, applied_at)
            VALUES (?, strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        "#;
        conn.execute(query, libsql::params![name]).await?;
        Ok(())
    }

    async fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<()> {
        if Self::is_migration_applied(conn, name).await? {
            tracing::debug!("migration {} already applied, skipping", name);
            return Ok(());
        }

        tracing::info!("applying migration: {}", name);
        conn.execute_batch(sql)
            .await
            .map_err(|e| anyhow::anyhow!("failed to execute migration {name}: {e}"))?;

        Self::record_migration(conn, name).await?;
        Ok(())
    }

    pub async fn new(cfg: &Config, data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(cfg.app.get_db());
        let turso_url = cfg.app.turso_url.clone();
        let turso_auth_token = cfg.app.turso_auth_token.clone();

        let db = match (&turso_url, &turso_auth_token) {
            (Some(url), Some(token)) => {
                tracing::info!("[db] running in synced database mode (offline writes)");
                let sync_interval = Duration::from_secs(cfg.app.sync_interval_seconds);
                Builder::new_synced_database(&path, url.clone(), token.clone())
                    .sync_interval(sync_interval)
                    .build()
                    .await?
            }
            _ => Builder::new_local(&path).build().await?,
        };

        Self::setup(db, turso_url, turso_auth_token).await
    }

    pub async fn in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::setup(db, None, None).await
    }

    async fn setup(
        db: LibsqlDatabase,
        turso_url: Option<String>,
        turso_auth_token: Option<String>,
    ) -> Result<Self> {
        let conn = db.connect()?;
        conn.query("SELECT 1", ()).await?;

        for (filename, sql) in SYSTEM_MIGRATIONS {
            Self::run_migration(&conn, filename, sql).await?;
        }

        for (filename, sql) in MIGRATIONS {
            Self::run_migration(&conn, filename, sql).await?;
        }

        Ok(Database {
            db,
            conn,
            turso_url,
            turso_auth_token,
        })
    }
}

#[async_trait]
impl StateStore for Database {
    async fn get(&self, key: &str) -> Result<Option<JsonValue>> {
        let mut rows = self
            .conn
            .query("SELECT value FROM kv_state WHERE key = ?", libsql::params![key])
            .await?;

        match rows.next().await? {
            Some(row) => {
                let raw: String = row.get(0)?;
                Ok(Some(serde_json::from_str(&raw)?))
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: JsonValue) -> Result<()> {
        let query = r#"
            INSERT INTO kv_state (key, value)
            VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
        "#;
        self.conn
            .execute(query, libsql::params![key, value.to_string()])
            .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM kv_state WHERE key = ?", libsql::params![key])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ItemStore for Database {
    async fn create(&self, owner: &Principal, seed: ItemSeed) -> Result<ResearchItem> {
        let item = Items::new(self.connection()).create(owner, seed).await?;
        if let Err(e) = self.sync().await {
            tracing::warn!("item {} saved locally, remote sync deferred: {}", item.id, e);
        }
        Ok(item)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::cache::HighlightCache;
    use crate::model::HighlightRecord;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let db = Database::in_memory().await.unwrap();
        for (filename, sql) in MIGRATIONS {
            Database::run_migration(db.connection(), filename, sql)
                .await
                .unwrap();
        }
        for name in ["001_schema.sql", "002_projects.sql"] {
            assert!(Database::is_migration_applied(db.connection(), name).await.unwrap());
        }
    }

    #[tokio::test]
    async fn highlight_cache_persists_in_kv_state() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let cache = HighlightCache::new(db.clone());

        let first = HighlightRecord::capture("first text", "https://a.com", "A");
        let second = HighlightRecord::capture("second text", "https://b.com", "B");
        cache.set(&first).await.unwrap();
        cache.set(&second).await.unwrap();
        assert_eq!(cache.get().await.unwrap(), Some(second));

        cache.clear().await.unwrap();
        cache.clear().await.unwrap();
        assert_eq!(cache.get().await.unwrap(), None);
    }

    #[tokio::test]
    async fn item_store_writes_research_items() {
        let db = Database::in_memory().await.unwrap();
        let owner = Principal::new("u-1");

        let item = ItemStore::create(&db, &owner, ItemSeed::from_selection("saved text", "https://x.com", "X"))
            .await
            .unwrap();

        let listed = Items::new(db.connection()).list(&owner, 10, 0).await.unwrap();
        assert_eq!(listed, vec![item]);
    }
}
