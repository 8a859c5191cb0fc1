//! Object-store seam.
//!
//! Originals live under `products/<productId>/<type>_0<ext>`, thumbnails
//! under `thumbnails/<size>/<name>.webp`, all in a single bucket. The
//! pipeline only talks to [`BlobStore`]; production wires the S3/MinIO
//! backend, tests the in-memory one.

mod memory;
mod s3;

pub use memory::MemoryBlobStore;
pub use s3::S3BlobStore;

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Uploads `bytes` at `object_name`, overwriting any existing object.
    /// Metadata pairs are stored as object metadata headers.
    async fn put(
        &self,
        object_name: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: &[(&'static str, String)],
    ) -> Result<()>;

    async fn get(&self, object_name: &str) -> Result<Vec<u8>>;

    /// Object size when it exists, `None` when it does not.
    async fn stat(&self, object_name: &str) -> Result<Option<u64>>;

    /// Removes the object; removing a missing object is not an error.
    async fn delete(&self, object_name: &str) -> Result<()>;

    fn bucket(&self) -> &str;

    /// Public URL for a stored object.
    fn public_url(&self, object_name: &str) -> String;

    /// Cheap reachability probe for the health endpoint.
    async fn ping(&self) -> Result<()>;
}
