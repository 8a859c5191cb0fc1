//! Content-addressed image record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ImageType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailSize {
    Small,
    Medium,
    Large,
}

impl ThumbnailSize {
    pub const ALL: [ThumbnailSize; 3] = [
        ThumbnailSize::Small,
        ThumbnailSize::Medium,
        ThumbnailSize::Large,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ThumbnailSize::Small => "small",
            ThumbnailSize::Medium => "medium",
            ThumbnailSize::Large => "large",
        }
    }

    /// Longest-edge pixel bound for this size.
    pub fn max_dimension(&self) -> u32 {
        match self {
            ThumbnailSize::Small => 150,
            ThumbnailSize::Medium => 300,
            ThumbnailSize::Large => 600,
        }
    }

    /// Picks the smallest thumbnail that covers the requested width.
    pub fn for_requested_width(width: u32) -> Self {
        if width <= 150 {
            ThumbnailSize::Small
        } else if width <= 300 {
            ThumbnailSize::Medium
        } else {
            ThumbnailSize::Large
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thumbnail {
    pub size: ThumbnailSize,
    pub url: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    /// Upstream attachment token used to re-fetch the original bytes.
    /// Absent for images uploaded directly rather than pulled from Feishu.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
    pub image_id: String,
    pub product_id: String,
    #[serde(rename = "type")]
    pub image_type: ImageType,
    pub bucket_name: String,
    /// Path under the bucket, derivable from `(productId, type, extension)`.
    pub object_name: String,
    pub original_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub public_url: String,
    pub md5_hash: String,
    pub sha256_hash: String,
    /// Ordered small, medium, large.
    pub thumbnails: Vec<Thumbnail>,
    #[serde(default)]
    pub metadata: ImageMetadata,
    pub is_active: bool,
    #[serde(default)]
    pub access_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ImageRecord {
    pub fn thumbnail(&self, size: ThumbnailSize) -> Option<&Thumbnail> {
        self.thumbnails.iter().find(|t| t.size == size)
    }
}
