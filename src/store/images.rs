//! Image collection access.
//!
//! The `(product_id, image_type, md5_hash)` unique index is the dedupe
//! key: inserting identical bytes for the same slot twice must resolve to
//! the existing row, never to an error.

use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::models::{ImageRecord, ImageType};

pub struct ImageStore {
    conn: Arc<Mutex<Connection>>,
}

impl ImageStore {
    pub(crate) fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn row_to_record(doc: &str) -> Result<ImageRecord> {
        serde_json::from_str(doc).map_err(Into::into)
    }

    /// Active row matching the dedupe key, if any.
    pub fn find_by_dedupe(
        &self,
        product_id: &str,
        image_type: ImageType,
        md5_hash: &str,
    ) -> Result<Option<ImageRecord>> {
        let conn = self.conn.lock();
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM images
                 WHERE product_id = ?1 AND image_type = ?2 AND md5_hash = ?3 AND is_active = 1",
                params![product_id, image_type.as_str(), md5_hash],
                |row| row.get(0),
            )
            .optional()?;
        doc.as_deref().map(Self::row_to_record).transpose()
    }

    /// Active row that was downloaded from the given upstream token for
    /// this slot, if any.
    pub fn find_by_token(
        &self,
        product_id: &str,
        image_type: ImageType,
        source_token: &str,
    ) -> Result<Option<ImageRecord>> {
        let conn = self.conn.lock();
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM images
                 WHERE product_id = ?1 AND image_type = ?2 AND source_token = ?3 AND is_active = 1
                 ORDER BY created_at DESC LIMIT 1",
                params![product_id, image_type.as_str(), source_token],
                |row| row.get(0),
            )
            .optional()?;
        doc.as_deref().map(Self::row_to_record).transpose()
    }

    pub fn find_by_id(&self, image_id: &str) -> Result<Option<ImageRecord>> {
        let conn = self.conn.lock();
        let doc: Option<String> = conn
            .query_row(
                "SELECT doc FROM images WHERE image_id = ?1",
                params![image_id],
                |row| row.get(0),
            )
            .optional()?;
        doc.as_deref().map(Self::row_to_record).transpose()
    }

    /// Inserts a new row. A duplicate-key collision on the dedupe index is
    /// a "use existing" signal, not an error: the already-stored row is
    /// returned (reactivated if it had been soft-removed).
    pub fn insert(&self, record: &ImageRecord) -> Result<ImageRecord> {
        let insert_result = {
            let conn = self.conn.lock();
            conn.execute(
                "INSERT INTO images
                    (image_id, product_id, image_type, md5_hash, source_token, object_name,
                     is_active, access_count, last_accessed_at, created_at, doc)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    record.image_id,
                    record.product_id,
                    record.image_type.as_str(),
                    record.md5_hash,
                    record.metadata.source_token,
                    record.object_name,
                    record.is_active as i64,
                    record.access_count as i64,
                    record.last_accessed_at.map(|t| t.timestamp_millis()),
                    record.created_at.timestamp_millis(),
                    serde_json::to_string(record)?,
                ],
            )
        };

        match insert_result {
            Ok(_) => {
                debug!(image_id = %record.image_id, object_name = %record.object_name, "inserted image row");
                Ok(record.clone())
            }
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                let existing = {
                    let conn = self.conn.lock();
                    let doc: Option<String> = conn
                        .query_row(
                            "SELECT doc FROM images
                             WHERE product_id = ?1 AND image_type = ?2 AND md5_hash = ?3",
                            params![
                                record.product_id,
                                record.image_type.as_str(),
                                record.md5_hash
                            ],
                            |row| row.get(0),
                        )
                        .optional()?;
                    doc.as_deref().map(Self::row_to_record).transpose()?
                };
                match existing {
                    Some(mut row) => {
                        if !row.is_active {
                            row.is_active = true;
                            self.save(&row)?;
                        }
                        Ok(row)
                    }
                    None => Err(SyncError::Store(
                        "image dedupe collision with no matching row".into(),
                    )),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Full-document rewrite keyed by image id.
    pub fn save(&self, record: &ImageRecord) -> Result<()> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE images SET product_id = ?2, image_type = ?3, md5_hash = ?4,
                    source_token = ?5, object_name = ?6, is_active = ?7,
                    access_count = ?8, last_accessed_at = ?9, doc = ?10
             WHERE image_id = ?1",
            params![
                record.image_id,
                record.product_id,
                record.image_type.as_str(),
                record.md5_hash,
                record.metadata.source_token,
                record.object_name,
                record.is_active as i64,
                record.access_count as i64,
                record.last_accessed_at.map(|t| t.timestamp_millis()),
                serde_json::to_string(record)?,
            ],
        )?;
        if updated == 0 {
            return Err(SyncError::Store(format!(
                "image {} does not exist",
                record.image_id
            )));
        }
        Ok(())
    }

    pub fn list_active(&self) -> Result<Vec<ImageRecord>> {
        self.list_where("is_active = 1")
    }

    pub fn list_inactive(&self) -> Result<Vec<ImageRecord>> {
        self.list_where("is_active = 0")
    }

    fn list_where(&self, predicate: &str) -> Result<Vec<ImageRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT doc FROM images WHERE {predicate} ORDER BY created_at"
        ))?;
        let docs = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        docs.iter().map(|d| Self::row_to_record(d)).collect()
    }

    pub fn for_product(&self, product_id: &str) -> Result<Vec<ImageRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT doc FROM images WHERE product_id = ?1 AND is_active = 1 ORDER BY created_at",
        )?;
        let docs = stmt
            .query_map(params![product_id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        docs.iter().map(|d| Self::row_to_record(d)).collect()
    }

    /// Soft removal; the cleanup pass later deletes the row and objects.
    pub fn deactivate(&self, image_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let updated = conn.execute(
            "UPDATE images SET is_active = 0,
                    doc = json_set(doc, '$.isActive', json('false'))
             WHERE image_id = ?1",
            params![image_id],
        )?;
        Ok(updated > 0)
    }

    pub fn delete_row(&self, image_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let deleted = conn.execute("DELETE FROM images WHERE image_id = ?1", params![image_id])?;
        Ok(deleted > 0)
    }

    /// Atomically bumps the access counter and stamps the access time.
    pub fn bump_access(&self, image_id: &str) -> Result<Option<ImageRecord>> {
        let Some(mut record) = self.find_by_id(image_id)? else {
            return Ok(None);
        };
        record.access_count += 1;
        record.last_accessed_at = Some(Utc::now());
        self.save(&record)?;
        Ok(Some(record))
    }

    pub fn count_active(&self) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM images WHERE is_active = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ImageMetadata;
    use crate::store::Database;

    fn record(image_id: &str, product_id: &str, md5: &str) -> ImageRecord {
        ImageRecord {
            image_id: image_id.into(),
            product_id: product_id.into(),
            image_type: ImageType::Front,
            bucket_name: "products".into(),
            object_name: format!("products/{product_id}/front_0.jpg"),
            original_name: "front.jpg".into(),
            file_size: 3,
            mime_type: "image/jpeg".into(),
            width: 2,
            height: 2,
            public_url: format!("http://store/products/{product_id}/front_0.jpg"),
            md5_hash: md5.into(),
            sha256_hash: "deadbeef".into(),
            thumbnails: vec![],
            metadata: ImageMetadata {
                source_token: Some("tok_1".into()),
            },
            is_active: true,
            access_count: 0,
            last_accessed_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn duplicate_dedupe_key_returns_existing_row() {
        let store = Database::open_in_memory().unwrap().images();

        let first = store.insert(&record("img_1", "p1", "abc")).unwrap();
        assert_eq!(first.image_id, "img_1");

        // Same bytes, new candidate row: existing row wins.
        let second = store.insert(&record("img_2", "p1", "abc")).unwrap();
        assert_eq!(second.image_id, "img_1");

        // Different md5 for the same slot is a distinct row.
        let third = store.insert(&record("img_3", "p1", "def")).unwrap();
        assert_eq!(third.image_id, "img_3");
    }

    #[test]
    fn dedupe_collision_reactivates_soft_removed_row() {
        let store = Database::open_in_memory().unwrap().images();
        store.insert(&record("img_1", "p1", "abc")).unwrap();
        store.deactivate("img_1").unwrap();
        assert_eq!(store.count_active().unwrap(), 0);

        let revived = store.insert(&record("img_2", "p1", "abc")).unwrap();
        assert_eq!(revived.image_id, "img_1");
        assert!(revived.is_active);
        assert_eq!(store.count_active().unwrap(), 1);
    }

    #[test]
    fn token_lookup_finds_active_rows_only() {
        let store = Database::open_in_memory().unwrap().images();
        store.insert(&record("img_1", "p1", "abc")).unwrap();

        let found = store
            .find_by_token("p1", ImageType::Front, "tok_1")
            .unwrap();
        assert_eq!(found.unwrap().image_id, "img_1");

        store.deactivate("img_1").unwrap();
        assert!(store
            .find_by_token("p1", ImageType::Front, "tok_1")
            .unwrap()
            .is_none());
    }

    #[test]
    fn access_bump_increments_and_stamps() {
        let store = Database::open_in_memory().unwrap().images();
        store.insert(&record("img_1", "p1", "abc")).unwrap();

        let bumped = store.bump_access("img_1").unwrap().unwrap();
        assert_eq!(bumped.access_count, 1);
        assert!(bumped.last_accessed_at.is_some());

        let bumped = store.bump_access("img_1").unwrap().unwrap();
        assert_eq!(bumped.access_count, 2);

        assert!(store.bump_access("missing").unwrap().is_none());
    }
}
