//! Canonical persistent documents: Product, Image, SyncLog.
//!
//! These shapes are the wire truth shared with the web layer, so every
//! struct serializes with camelCase field names.

mod image;
mod product;
mod sync_log;

pub use image::{ImageMetadata, ImageRecord, Thumbnail, ThumbnailSize};
pub use product::{
    Category, LocalizedText, Origin, Price, Product, ProductImages, ProductStatus, FIELD_SENTINEL,
    NAME_SENTINEL,
};
pub use sync_log::{
    SyncErrorLog, SyncLog, SyncMode, SyncProgress, SyncStage, SyncStats, SyncStatus,
};

/// The five image slots a product can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    Front,
    Back,
    Label,
    Package,
    Gift,
}

impl ImageType {
    pub const ALL: [ImageType; 5] = [
        ImageType::Front,
        ImageType::Back,
        ImageType::Label,
        ImageType::Package,
        ImageType::Gift,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageType::Front => "front",
            ImageType::Back => "back",
            ImageType::Label => "label",
            ImageType::Package => "package",
            ImageType::Gift => "gift",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "front" => Some(ImageType::Front),
            "back" => Some(ImageType::Back),
            "label" => Some(ImageType::Label),
            "package" => Some(ImageType::Package),
            "gift" => Some(ImageType::Gift),
            _ => None,
        }
    }
}

impl std::fmt::Display for ImageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
