//! Content-addressed image sync service.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::future::join_all;
use md5::{Digest as Md5Digest, Md5};
use sha2::{Digest as Sha2Digest, Sha256};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::feishu::UpstreamSource;
use crate::models::{
    ImageMetadata, ImageRecord, ImageType, Thumbnail, ThumbnailSize,
};
use crate::storage::BlobStore;
use crate::store::ImageStore;

use super::thumbnails::{self, DerivedThumbnail, ProbedImage};

/// Pause between download batches.
const BATCH_SPACING: Duration = Duration::from_millis(500);

/// A unit of image work scheduled by the orchestrator: every attachment
/// token the upstream reported for one product slot.
#[derive(Debug, Clone)]
pub struct ImageJob {
    pub product_id: String,
    pub image_type: ImageType,
    pub file_tokens: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ImageFailure {
    pub product_id: String,
    pub image_type: ImageType,
    pub file_token: String,
    pub error: String,
}

#[derive(Debug, Default)]
pub struct BatchImageResult {
    pub successful: Vec<ImageRecord>,
    pub failed: Vec<ImageFailure>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntegrityReport {
    pub exists: bool,
    pub accessible: bool,
    pub size: Option<u64>,
    pub error: Option<String>,
}

#[derive(Debug, Default)]
pub struct RepairImagesReport {
    pub total: u64,
    pub broken_found: u64,
    pub repaired: u64,
    pub failed: u64,
    pub errors: Vec<String>,
}

#[derive(Debug, Default)]
pub struct CleanupReport {
    pub scanned: u64,
    pub removed: u64,
    pub failed: u64,
}

/// Options for [`ImageService::get_image_proxy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ProxyOptions {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub quality: Option<u8>,
    pub format: Option<ProxyFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyFormat {
    Jpeg,
    Png,
    Webp,
}

impl ProxyFormat {
    fn as_str(&self) -> &'static str {
        match self {
            ProxyFormat::Jpeg => "jpeg",
            ProxyFormat::Png => "png",
            ProxyFormat::Webp => "webp",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageProxyTarget {
    pub url: String,
    /// Which fixed thumbnail backs the URL, when one does.
    pub thumbnail: Option<ThumbnailSize>,
}

#[derive(Clone)]
pub struct ImageService {
    upstream: Arc<dyn UpstreamSource>,
    blobs: Arc<dyn BlobStore>,
    store: Arc<ImageStore>,
}

impl ImageService {
    pub fn new(
        upstream: Arc<dyn UpstreamSource>,
        blobs: Arc<dyn BlobStore>,
        store: Arc<ImageStore>,
    ) -> Self {
        Self {
            upstream,
            blobs,
            store,
        }
    }

    /// Uploads image bytes for a product slot. Identical bytes for the same
    /// `(productId, type)` reuse the existing row: no re-upload, no new row.
    pub async fn upload_image(
        &self,
        bytes: Vec<u8>,
        filename: &str,
        product_id: &str,
        image_type: ImageType,
    ) -> Result<ImageRecord> {
        let md5_hash = hex::encode(Md5::digest(&bytes));
        let sha256_hash = hex::encode(Sha256::digest(&bytes));

        if let Some(existing) = self.store.find_by_dedupe(product_id, image_type, &md5_hash)? {
            debug!(
                product_id,
                image_type = %image_type,
                md5 = %md5_hash,
                "identical bytes already uploaded, reusing row"
            );
            return Ok(existing);
        }

        let decode_bytes = bytes.clone();
        let probed: ProbedImage = tokio::task::spawn_blocking(move || thumbnails::probe(&decode_bytes))
            .await
            .map_err(|e| SyncError::Transform(format!("decode task failed: {e}")))??;

        let object_name = object_name_for(product_id, image_type, probed.extension);
        let file_size = bytes.len() as u64;
        let upload_time = Utc::now();

        self.blobs
            .put(
                &object_name,
                bytes,
                probed.mime_type,
                &[
                    ("original-name", filename.to_string()),
                    ("upload-time", upload_time.to_rfc3339()),
                    ("md5", md5_hash.clone()),
                    ("sha256", sha256_hash.clone()),
                ],
            )
            .await?;

        let derived = tokio::task::spawn_blocking({
            let image = probed.image;
            move || thumbnails::derive_thumbnails(&image)
        })
        .await
        .map_err(|e| SyncError::Transform(format!("thumbnail task failed: {e}")))??;

        let thumbnails = self
            .upload_thumbnails(product_id, image_type, &derived)
            .await?;

        let record = ImageRecord {
            image_id: format!("{}_{}_{}", product_id, image_type, &md5_hash[..8]),
            product_id: product_id.to_string(),
            image_type,
            bucket_name: self.blobs.bucket().to_string(),
            object_name: object_name.clone(),
            original_name: filename.to_string(),
            file_size,
            mime_type: probed.mime_type.to_string(),
            width: probed.width,
            height: probed.height,
            public_url: self.blobs.public_url(&object_name),
            md5_hash,
            sha256_hash,
            thumbnails,
            metadata: ImageMetadata::default(),
            is_active: true,
            access_count: 0,
            last_accessed_at: None,
            created_at: upload_time,
        };

        let stored = self.store.insert(&record)?;
        info!(
            product_id,
            image_type = %image_type,
            object_name = %stored.object_name,
            "uploaded image"
        );
        Ok(stored)
    }

    async fn upload_thumbnails(
        &self,
        product_id: &str,
        image_type: ImageType,
        derived: &[DerivedThumbnail],
    ) -> Result<Vec<Thumbnail>> {
        let mut thumbnails = Vec::with_capacity(derived.len());
        for thumb in derived {
            let object_name = thumbnail_object_name(product_id, image_type, thumb.size);
            self.blobs
                .put(&object_name, thumb.bytes.clone(), "image/webp", &[])
                .await?;
            thumbnails.push(Thumbnail {
                size: thumb.size,
                url: self.blobs.public_url(&object_name),
                width: thumb.width,
                height: thumb.height,
            });
        }
        Ok(thumbnails)
    }

    /// Fetches an upstream attachment and uploads it for the slot. A row
    /// already carrying this token for the slot short-circuits the fetch.
    pub async fn download_from_feishu(
        &self,
        file_token: &str,
        product_id: &str,
        image_type: ImageType,
    ) -> Result<ImageRecord> {
        if let Some(existing) = self.store.find_by_token(product_id, image_type, file_token)? {
            debug!(file_token, product_id, "token already synced, reusing row");
            return Ok(existing);
        }

        let bytes = self.upstream.download_image(file_token).await?;
        let filename = format!("{product_id}_{image_type}_{file_token}");
        let mut record = self
            .upload_image(bytes, &filename, product_id, image_type)
            .await?;

        if record.metadata.source_token.as_deref() != Some(file_token) {
            record.metadata.source_token = Some(file_token.to_string());
            self.store.save(&record)?;
        }
        Ok(record)
    }

    /// Processes the job queue in bounded concurrent chunks; a failing
    /// token never aborts its peers.
    pub async fn batch_download_from_feishu(
        &self,
        jobs: &[ImageJob],
        concurrency: usize,
    ) -> BatchImageResult {
        let items: Vec<(String, ImageType, String)> = jobs
            .iter()
            .flat_map(|job| {
                job.file_tokens
                    .iter()
                    .map(|token| (job.product_id.clone(), job.image_type, token.clone()))
            })
            .collect();

        let concurrency = concurrency.max(1);
        let mut result = BatchImageResult::default();

        // Each chunk runs concurrently up to the bound; chunks are spaced
        // apart to stay under upstream rate limits.
        for (batch_index, batch) in items.chunks(concurrency).enumerate() {
            if batch_index > 0 {
                sleep(BATCH_SPACING).await;
            }

            let downloads = batch.iter().map(|(product_id, image_type, token)| async move {
                let outcome = self
                    .download_from_feishu(token, product_id, *image_type)
                    .await;
                (product_id.clone(), *image_type, token.clone(), outcome)
            });

            for (product_id, image_type, file_token, outcome) in join_all(downloads).await {
                match outcome {
                    Ok(record) => result.successful.push(record),
                    Err(e) => {
                        warn!(
                            product_id,
                            image_type = %image_type,
                            file_token,
                            error = %e,
                            "image download failed"
                        );
                        result.failed.push(ImageFailure {
                            product_id,
                            image_type,
                            file_token,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        result
    }

    /// Stats the object behind an image row.
    pub async fn validate_image_integrity(&self, object_name: &str) -> IntegrityReport {
        match self.blobs.stat(object_name).await {
            Ok(Some(size)) => IntegrityReport {
                exists: true,
                accessible: true,
                size: Some(size),
                error: None,
            },
            Ok(None) => IntegrityReport {
                exists: false,
                accessible: false,
                size: None,
                error: None,
            },
            Err(e) => IntegrityReport {
                exists: false,
                accessible: false,
                size: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Walks every active image row, re-fetching missing objects from the
    /// upstream when a source token is available. Rows without a token are
    /// reported as unrepairable.
    pub async fn repair_broken_images(&self) -> Result<RepairImagesReport> {
        let rows = self.store.list_active()?;
        let mut report = RepairImagesReport {
            total: rows.len() as u64,
            ..Default::default()
        };

        for row in rows {
            let integrity = self.validate_image_integrity(&row.object_name).await;
            if integrity.exists {
                continue;
            }
            report.broken_found += 1;

            match self.repair_from_source(&row).await {
                Ok(()) => {
                    info!(image_id = %row.image_id, "repaired missing object from source");
                    report.repaired += 1;
                }
                Err(e) => {
                    warn!(image_id = %row.image_id, error = %e, "repair failed");
                    report.failed += 1;
                    report
                        .errors
                        .push(format!("image {}: {e}", row.image_id));
                }
            }
        }

        Ok(report)
    }

    /// Re-fetches a row's bytes from its source token, re-uploads the
    /// original under its existing object name, and regenerates the
    /// thumbnail set. Rows without a source token are unrepairable.
    pub async fn repair_from_source(&self, row: &ImageRecord) -> Result<()> {
        let Some(token) = row.metadata.source_token.as_deref() else {
            return Err(SyncError::ObjectStore(format!(
                "image {} has no source token; cannot repair",
                row.image_id
            )));
        };
        let bytes = self.upstream.download_image(token).await?;

        let decode_bytes = bytes.clone();
        let probed = tokio::task::spawn_blocking(move || thumbnails::probe(&decode_bytes))
            .await
            .map_err(|e| SyncError::Transform(format!("decode task failed: {e}")))??;

        self.blobs
            .put(
                &row.object_name,
                bytes,
                &row.mime_type,
                &[
                    ("original-name", row.original_name.clone()),
                    ("upload-time", Utc::now().to_rfc3339()),
                    ("md5", row.md5_hash.clone()),
                    ("sha256", row.sha256_hash.clone()),
                ],
            )
            .await?;

        let derived = tokio::task::spawn_blocking({
            let image = probed.image;
            move || thumbnails::derive_thumbnails(&image)
        })
        .await
        .map_err(|e| SyncError::Transform(format!("thumbnail task failed: {e}")))??;
        self.upload_thumbnails(&row.product_id, row.image_type, &derived)
            .await?;
        Ok(())
    }

    /// Resolves a display URL for an image. Pure size requests map to the
    /// nearest fixed thumbnail; any dynamic transform (quality, format)
    /// yields a parameterized proxy URL. Bumps access stats either way.
    pub async fn get_image_proxy(
        &self,
        image_id: &str,
        opts: ProxyOptions,
    ) -> Result<Option<ImageProxyTarget>> {
        let Some(record) = self.store.bump_access(image_id)? else {
            return Ok(None);
        };

        let wants_dynamic = opts.quality.is_some() || opts.format.is_some();
        if wants_dynamic {
            let mut params: Vec<String> = Vec::new();
            if let Some(w) = opts.width {
                params.push(format!("w={w}"));
            }
            if let Some(h) = opts.height {
                params.push(format!("h={h}"));
            }
            if let Some(q) = opts.quality {
                params.push(format!("q={}", q.clamp(1, 100)));
            }
            if let Some(f) = opts.format {
                params.push(format!("format={}", f.as_str()));
            }
            return Ok(Some(ImageProxyTarget {
                url: format!("{}?{}", record.public_url, params.join("&")),
                thumbnail: None,
            }));
        }

        let requested = opts.width.or(opts.height);
        match requested {
            Some(width) if width <= ThumbnailSize::Large.max_dimension() => {
                let size = ThumbnailSize::for_requested_width(width);
                let url = record
                    .thumbnail(size)
                    .map(|t| t.url.clone())
                    .unwrap_or_else(|| record.public_url.clone());
                Ok(Some(ImageProxyTarget {
                    url,
                    thumbnail: Some(size),
                }))
            }
            _ => Ok(Some(ImageProxyTarget {
                url: record.public_url,
                thumbnail: None,
            })),
        }
    }

    /// Physically removes soft-deleted rows and their objects.
    pub async fn cleanup_inactive_images(&self) -> Result<CleanupReport> {
        let rows = self.store.list_inactive()?;
        let mut report = CleanupReport {
            scanned: rows.len() as u64,
            ..Default::default()
        };

        for row in rows {
            let mut ok = self.blobs.delete(&row.object_name).await.is_ok();
            for size in ThumbnailSize::ALL {
                let thumb_name = thumbnail_object_name(&row.product_id, row.image_type, size);
                if self.blobs.delete(&thumb_name).await.is_err() {
                    ok = false;
                }
            }
            if ok && self.store.delete_row(&row.image_id)? {
                report.removed += 1;
            } else {
                report.failed += 1;
            }
        }

        Ok(report)
    }
}

/// `products/<productId>/<type>_0<ext>`
pub fn object_name_for(product_id: &str, image_type: ImageType, extension: &str) -> String {
    format!("products/{product_id}/{image_type}_0{extension}")
}

/// `thumbnails/<size>/<name>.webp`
pub fn thumbnail_object_name(
    product_id: &str,
    image_type: ImageType,
    size: ThumbnailSize,
) -> String {
    format!("thumbnails/{}/{}_{}_0.webp", size.as_str(), product_id, image_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_name_layout() {
        assert_eq!(
            object_name_for("p1", ImageType::Front, ".jpg"),
            "products/p1/front_0.jpg"
        );
        assert_eq!(
            thumbnail_object_name("p1", ImageType::Back, ThumbnailSize::Medium),
            "thumbnails/medium/p1_back_0.webp"
        );
    }
}
