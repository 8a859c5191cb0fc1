//! MinIO / S3-compatible blob store backend.

use std::sync::Arc;

use async_trait::async_trait;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::{Attribute, AttributeValue, Attributes, ObjectStore, PutOptions, PutPayload};
use tracing::debug;

use crate::config::MinioConfig;
use crate::error::{Result, SyncError};

use super::BlobStore;

pub struct S3BlobStore {
    store: Arc<dyn ObjectStore>,
    bucket: String,
    public_url: String,
}

impl S3BlobStore {
    pub fn new(config: &MinioConfig) -> Result<Self> {
        let store = AmazonS3Builder::new()
            .with_endpoint(&config.endpoint)
            .with_bucket_name(&config.bucket)
            .with_access_key_id(&config.access_key)
            .with_secret_access_key(&config.secret_key)
            .with_region(&config.region)
            .with_allow_http(true)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to build object store client: {e}")))?;

        Ok(Self {
            store: Arc::new(store),
            bucket: config.bucket.clone(),
            public_url: config.public_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(
        &self,
        object_name: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: &[(&'static str, String)],
    ) -> Result<()> {
        let mut attributes = Attributes::new();
        attributes.insert(
            Attribute::ContentType,
            AttributeValue::from(content_type.to_string()),
        );
        for (key, value) in metadata {
            attributes.insert(
                Attribute::Metadata(std::borrow::Cow::Borrowed(key)),
                AttributeValue::from(value.clone()),
            );
        }

        let mut options = PutOptions::default();
        options.attributes = attributes;
        self.store
            .put_opts(&Path::from(object_name), PutPayload::from(bytes), options)
            .await?;
        debug!(object_name, "uploaded object");
        Ok(())
    }

    async fn get(&self, object_name: &str) -> Result<Vec<u8>> {
        let result = self.store.get(&Path::from(object_name)).await?;
        Ok(result.bytes().await?.to_vec())
    }

    async fn stat(&self, object_name: &str) -> Result<Option<u64>> {
        match self.store.head(&Path::from(object_name)).await {
            Ok(meta) => Ok(Some(meta.size as u64)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, object_name: &str) -> Result<()> {
        match self.store.delete(&Path::from(object_name)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    fn public_url(&self, object_name: &str) -> String {
        format!("{}/{}", self.public_url, object_name)
    }

    async fn ping(&self) -> Result<()> {
        // A delimiter listing at the bucket root is the cheapest call that
        // exercises auth and connectivity.
        self.store.list_with_delimiter(None).await?;
        Ok(())
    }
}
