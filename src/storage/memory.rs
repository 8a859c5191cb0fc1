//! In-memory blob store used by tests and local development.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;

use super::BlobStore;

#[derive(Debug, Clone)]
struct StoredBlob {
    bytes: Vec<u8>,
    content_type: String,
    metadata: Vec<(String, String)>,
}

#[derive(Default)]
pub struct MemoryBlobStore {
    bucket: String,
    objects: Mutex<HashMap<String, StoredBlob>>,
}

impl MemoryBlobStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Mutex::new(HashMap::new()),
        }
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn contains(&self, object_name: &str) -> bool {
        self.objects.lock().contains_key(object_name)
    }

    /// Drops an object out from under the service; lets tests simulate a
    /// store that lost data.
    pub fn corrupt(&self, object_name: &str) {
        self.objects.lock().remove(object_name);
    }

    pub fn metadata_of(&self, object_name: &str) -> Option<Vec<(String, String)>> {
        self.objects
            .lock()
            .get(object_name)
            .map(|blob| blob.metadata.clone())
    }

    pub fn content_type_of(&self, object_name: &str) -> Option<String> {
        self.objects
            .lock()
            .get(object_name)
            .map(|blob| blob.content_type.clone())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        object_name: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: &[(&'static str, String)],
    ) -> Result<()> {
        self.objects.lock().insert(
            object_name.to_string(),
            StoredBlob {
                bytes,
                content_type: content_type.to_string(),
                metadata: metadata
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.clone()))
                    .collect(),
            },
        );
        Ok(())
    }

    async fn get(&self, object_name: &str) -> Result<Vec<u8>> {
        self.objects
            .lock()
            .get(object_name)
            .map(|blob| blob.bytes.clone())
            .ok_or_else(|| {
                crate::error::SyncError::ObjectStore(format!("object {object_name} not found"))
            })
    }

    async fn stat(&self, object_name: &str) -> Result<Option<u64>> {
        Ok(self
            .objects
            .lock()
            .get(object_name)
            .map(|blob| blob.bytes.len() as u64))
    }

    async fn delete(&self, object_name: &str) -> Result<()> {
        self.objects.lock().remove(object_name);
        Ok(())
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn public_url(&self, object_name: &str) -> String {
        format!("memory://{}/{}", self.bucket, object_name)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_get_stat_delete_round_trip() {
        let store = MemoryBlobStore::new("products");
        store
            .put(
                "products/p1/front_0.jpg",
                vec![1, 2, 3],
                "image/jpeg",
                &[("md5", "abc".to_string())],
            )
            .await
            .unwrap();

        assert_eq!(store.get("products/p1/front_0.jpg").await.unwrap(), vec![1, 2, 3]);
        assert_eq!(store.stat("products/p1/front_0.jpg").await.unwrap(), Some(3));
        assert_eq!(store.stat("products/p1/back_0.jpg").await.unwrap(), None);
        assert_eq!(
            store.metadata_of("products/p1/front_0.jpg").unwrap(),
            vec![("md5".to_string(), "abc".to_string())]
        );

        store.delete("products/p1/front_0.jpg").await.unwrap();
        assert!(!store.contains("products/p1/front_0.jpg"));
    }
}
