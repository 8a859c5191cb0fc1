//! Document store built on SQLite.
//!
//! Each collection keeps the full serialized document in a `doc` column
//! plus a handful of indexed columns for the query paths the pipeline
//! needs. WAL mode keeps reads cheap while a sync run writes.

mod images;
mod products;
mod sync_logs;

pub use images::ImageStore;
pub use products::{ProductStore, UpsertOutcome};
pub use sync_logs::{Pagination, SyncLogFilter, SyncLogPage, SyncLogStore};

use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::error::Result;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

-- productId is intentionally NOT a schema-level primary key: the repair
-- pass has to be able to observe and collapse duplicate rows.
CREATE TABLE IF NOT EXISTS products (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    product_id TEXT NOT NULL,
    name_display TEXT NOT NULL,
    status TEXT NOT NULL,
    version INTEGER NOT NULL,
    collect_time INTEGER NOT NULL,
    sync_time INTEGER NOT NULL,
    doc TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_products_product_id
    ON products(product_id, sync_time DESC);
CREATE INDEX IF NOT EXISTS idx_products_status
    ON products(status, sync_time DESC);

CREATE TABLE IF NOT EXISTS images (
    image_id TEXT PRIMARY KEY,
    product_id TEXT NOT NULL,
    image_type TEXT NOT NULL,
    md5_hash TEXT NOT NULL,
    source_token TEXT,
    object_name TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed_at INTEGER,
    created_at INTEGER NOT NULL,
    doc TEXT NOT NULL
) WITHOUT ROWID;

CREATE UNIQUE INDEX IF NOT EXISTS idx_images_dedupe
    ON images(product_id, image_type, md5_hash);
CREATE INDEX IF NOT EXISTS idx_images_product
    ON images(product_id, is_active);
CREATE INDEX IF NOT EXISTS idx_images_token
    ON images(source_token) WHERE source_token IS NOT NULL;

CREATE TABLE IF NOT EXISTS sync_logs (
    log_id TEXT PRIMARY KEY,
    sync_type TEXT NOT NULL,
    status TEXT NOT NULL,
    start_time INTEGER NOT NULL,
    end_time INTEGER,
    doc TEXT NOT NULL
) WITHOUT ROWID;

CREATE INDEX IF NOT EXISTS idx_sync_logs_start
    ON sync_logs(start_time DESC);
CREATE INDEX IF NOT EXISTS idx_sync_logs_status
    ON sync_logs(status, start_time DESC);
"#;

/// Shared connection handle. Cloning is cheap; all stores built from one
/// `Database` share the same connection and mutex.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn handle(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }

    /// Trivial query proving the connection is alive; used by the health
    /// endpoint.
    pub fn ping(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.query_row("SELECT 1", [], |_| Ok(()))?;
        Ok(())
    }

    pub fn products(&self) -> ProductStore {
        ProductStore::new(self.handle())
    }

    pub fn images(&self) -> ImageStore {
        ImageStore::new(self.handle())
    }

    pub fn sync_logs(&self) -> SyncLogStore {
        SyncLogStore::new(self.handle())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SyncLog, SyncMode};

    #[test]
    fn schema_applies_cleanly() {
        let db = Database::open_in_memory().unwrap();
        db.ping().unwrap();
    }

    #[test]
    fn on_disk_database_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("product-sync.db");
        let path = path.to_str().unwrap();

        {
            let db = Database::open(path).unwrap();
            db.sync_logs()
                .create(&SyncLog::open(
                    "s1".into(),
                    SyncMode::Full,
                    serde_json::json!({}),
                ))
                .unwrap();
        }

        let db = Database::open(path).unwrap();
        let log = db.sync_logs().find_by_id("s1").unwrap().unwrap();
        assert_eq!(log.sync_type, SyncMode::Full);
    }
}
