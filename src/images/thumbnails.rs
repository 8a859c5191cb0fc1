//! Image probing and thumbnail derivation.
//!
//! Decode, resize and encode are CPU-bound; callers run these helpers on a
//! blocking thread.

use image::codecs::webp::WebPEncoder;
use image::{DynamicImage, ExtendedColorType, ImageEncoder, ImageFormat};

use crate::error::{Result, SyncError};
use crate::models::ThumbnailSize;

/// Decoded original plus the format facts the image record needs.
pub struct ProbedImage {
    pub image: DynamicImage,
    pub width: u32,
    pub height: u32,
    pub mime_type: &'static str,
    /// Extension including the leading dot.
    pub extension: &'static str,
}

pub fn probe(bytes: &[u8]) -> Result<ProbedImage> {
    let format = image::guess_format(bytes)
        .map_err(|e| SyncError::Transform(format!("unrecognized image bytes: {e}")))?;
    let (mime_type, extension) = match format {
        ImageFormat::Jpeg => ("image/jpeg", ".jpg"),
        ImageFormat::Png => ("image/png", ".png"),
        ImageFormat::WebP => ("image/webp", ".webp"),
        ImageFormat::Gif => ("image/gif", ".gif"),
        other => {
            return Err(SyncError::Transform(format!(
                "unsupported image format {other:?}"
            )))
        }
    };

    let image = image::load_from_memory(bytes)
        .map_err(|e| SyncError::Transform(format!("failed to decode image: {e}")))?;
    let (width, height) = (image.width(), image.height());
    Ok(ProbedImage {
        image,
        width,
        height,
        mime_type,
        extension,
    })
}

#[derive(Debug, Clone)]
pub struct DerivedThumbnail {
    pub size: ThumbnailSize,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Derives the fixed small/medium/large set as WebP. Aspect ratio is
/// preserved and originals are never upscaled.
pub fn derive_thumbnails(image: &DynamicImage) -> Result<Vec<DerivedThumbnail>> {
    ThumbnailSize::ALL
        .iter()
        .map(|&size| {
            let bound = size.max_dimension();
            let resized = if image.width() > bound || image.height() > bound {
                image.resize(bound, bound, image::imageops::FilterType::Lanczos3)
            } else {
                image.clone()
            };
            let bytes = encode_webp(&resized)?;
            Ok(DerivedThumbnail {
                size,
                width: resized.width(),
                height: resized.height(),
                bytes,
            })
        })
        .collect()
}

fn encode_webp(image: &DynamicImage) -> Result<Vec<u8>> {
    let rgba = image.to_rgba8();
    let mut buffer = Vec::new();
    let encoder = WebPEncoder::new_lossless(&mut buffer);
    encoder
        .write_image(
            rgba.as_raw(),
            rgba.width(),
            rgba.height(),
            ExtendedColorType::Rgba8,
        )
        .map_err(|e| SyncError::Transform(format!("WebP encoding failed: {e}")))?;
    Ok(buffer)
}

#[cfg(test)]
pub(crate) fn test_png(width: u32, height: u32) -> Vec<u8> {
    use image::{ImageBuffer, Rgba};
    let img: ImageBuffer<Rgba<u8>, Vec<u8>> = ImageBuffer::from_fn(width, height, |x, y| {
        Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
    });
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(img)
        .write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode test png");
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_reads_dimensions_and_format() {
        let bytes = test_png(320, 200);
        let probed = probe(&bytes).unwrap();
        assert_eq!(probed.width, 320);
        assert_eq!(probed.height, 200);
        assert_eq!(probed.mime_type, "image/png");
        assert_eq!(probed.extension, ".png");
    }

    #[test]
    fn probe_rejects_garbage() {
        assert!(probe(b"definitely not an image").is_err());
    }

    #[test]
    fn thumbnails_preserve_aspect_and_never_upscale() {
        let probed = probe(&test_png(1200, 600)).unwrap();
        let thumbs = derive_thumbnails(&probed.image).unwrap();
        assert_eq!(thumbs.len(), 3);

        let small = &thumbs[0];
        assert_eq!(small.size, ThumbnailSize::Small);
        assert_eq!(small.width, 150);
        assert_eq!(small.height, 75);

        let large = &thumbs[2];
        assert_eq!(large.width, 600);
        assert_eq!(large.height, 300);

        // A tiny original passes through at its own size for every bound.
        let tiny = probe(&test_png(100, 80)).unwrap();
        let thumbs = derive_thumbnails(&tiny.image).unwrap();
        assert!(thumbs.iter().all(|t| t.width == 100 && t.height == 80));
    }

    #[test]
    fn thumbnails_are_webp() {
        let probed = probe(&test_png(64, 64)).unwrap();
        let thumbs = derive_thumbnails(&probed.image).unwrap();
        for thumb in thumbs {
            assert_eq!(image::guess_format(&thumb.bytes).unwrap(), ImageFormat::WebP);
        }
    }
}
