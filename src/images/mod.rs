//! Image sync: content-addressed upload, dedupe, thumbnails, integrity.

mod service;
mod thumbnails;

pub use service::{
    object_name_for, thumbnail_object_name, BatchImageResult, CleanupReport, ImageFailure,
    ImageJob, ImageProxyTarget, ImageService, IntegrityReport, ProxyFormat, ProxyOptions,
    RepairImagesReport,
};
pub use thumbnails::{derive_thumbnails, probe, DerivedThumbnail, ProbedImage};
