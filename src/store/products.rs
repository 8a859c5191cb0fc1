//! Product collection access.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::Result;
use crate::models::{ImageType, Product, ProductStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

pub struct ProductStore {
    conn: Arc<Mutex<Connection>>,
}

impl ProductStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// Atomic create-or-update. The store is the version authority: the
    /// committed row always carries `existing.version + 1` (or 1 on
    /// create), regardless of what the caller staged.
    pub fn upsert(&self, product: &Product) -> Result<(Product, UpsertOutcome)> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let existing: Option<(i64, i64)> = tx
            .query_row(
                "SELECT id, version FROM products WHERE product_id = ?1
                 ORDER BY sync_time DESC, id DESC LIMIT 1",
                params![product.product_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let mut stored = product.clone();
        let outcome = match existing {
            Some((row_id, version)) => {
                stored.version = version + 1;
                let doc = serde_json::to_string(&stored)?;
                tx.execute(
                    "UPDATE products SET name_display = ?1, status = ?2, version = ?3,
                            collect_time = ?4, sync_time = ?5, doc = ?6
                     WHERE id = ?7",
                    params![
                        stored.name.display,
                        stored.status.as_str(),
                        stored.version,
                        stored.collect_time.timestamp_millis(),
                        stored.sync_time.timestamp_millis(),
                        doc,
                        row_id,
                    ],
                )?;
                UpsertOutcome::Updated
            }
            None => {
                stored.version = 1;
                let doc = serde_json::to_string(&stored)?;
                tx.execute(
                    "INSERT INTO products
                        (product_id, name_display, status, version, collect_time, sync_time, doc)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        stored.product_id,
                        stored.name.display,
                        stored.status.as_str(),
                        stored.version,
                        stored.collect_time.timestamp_millis(),
                        stored.sync_time.timestamp_millis(),
                        doc,
                    ],
                )?;
                UpsertOutcome::Created
            }
        };

        tx.commit()?;
        debug!(product_id = %stored.product_id, version = stored.version, ?outcome, "upserted product");
        Ok((stored, outcome))
    }

    pub fn find(&self, product_id: &str) -> Result<Option<Product>> {
        let conn = self.conn.lock();
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM products WHERE product_id = ?1
                 ORDER BY sync_time DESC, id DESC LIMIT 1",
                params![product_id],
                |row| row.get(0),
            )
            .optional()?;
        doc.map(|d| serde_json::from_str(&d).map_err(Into::into))
            .transpose()
    }

    /// Product ids currently in `active` status.
    pub fn active_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT DISTINCT product_id FROM products WHERE status = 'active'")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    pub fn all(&self) -> Result<Vec<Product>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT doc FROM products ORDER BY sync_time DESC, id DESC",
        )?;
        let docs = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        docs.iter()
            .map(|d| serde_json::from_str(d).map_err(Into::into))
            .collect()
    }

    pub fn recent(&self, limit: usize) -> Result<Vec<Product>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT doc FROM products ORDER BY sync_time DESC, id DESC LIMIT ?1",
        )?;
        let docs = stmt
            .query_map(params![limit as i64], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        docs.iter()
            .map(|d| serde_json::from_str(d).map_err(Into::into))
            .collect()
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM products", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Soft delete: flips status to inactive with a version bump. Returns
    /// false when the product does not exist or is already inactive.
    pub fn soft_delete(&self, product_id: &str) -> Result<bool> {
        let Some(mut product) = self.find(product_id)? else {
            return Ok(false);
        };
        if product.status != ProductStatus::Active {
            return Ok(false);
        }
        product.status = ProductStatus::Inactive;
        product.is_visible = false;
        product.sync_time = Utc::now();
        self.upsert(&product)?;
        Ok(true)
    }

    /// Writes an uploaded image URL onto the product document. A version
    /// bump like any other write.
    pub fn set_image_url(
        &self,
        product_id: &str,
        image_type: ImageType,
        url: &str,
    ) -> Result<bool> {
        let Some(mut product) = self.find(product_id)? else {
            return Ok(false);
        };
        if product.images.get(image_type) == Some(url) {
            return Ok(true);
        }
        product.images.set(image_type, url.to_string());
        product.sync_time = Utc::now();
        self.upsert(&product)?;
        Ok(true)
    }

    /// Product ids that appear on more than one row, oldest issue first.
    pub fn duplicate_ids(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT product_id FROM products
             GROUP BY product_id HAVING COUNT(*) > 1
             ORDER BY product_id",
        )?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(ids)
    }

    /// Collapses duplicate rows for a product id, keeping the newest
    /// `syncTime` (ties broken by insertion order). Returns removed count.
    pub fn collapse_duplicates(&self, product_id: &str) -> Result<usize> {
        let conn = self.conn.lock();
        let removed = conn.execute(
            "DELETE FROM products WHERE product_id = ?1 AND id NOT IN (
                SELECT id FROM products WHERE product_id = ?1
                ORDER BY sync_time DESC, id DESC LIMIT 1
             )",
            params![product_id],
        )?;
        Ok(removed)
    }

    /// Test/repair helper: inserts a raw row without touching versioning.
    pub fn insert_raw(&self, product: &Product) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO products
                (product_id, name_display, status, version, collect_time, sync_time, doc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                product.product_id,
                product.name.display,
                product.status.as_str(),
                product.version,
                product.collect_time.timestamp_millis(),
                product.sync_time.timestamp_millis(),
                serde_json::to_string(product)?,
            ],
        )?;
        Ok(())
    }
}
