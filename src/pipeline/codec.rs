//! Decode and encode helpers, run inside `spawn_blocking`. Adapted from the
//! standalone image-processing function's `validate_and_decode` /
//! `process_dynamic_image` / `resize_to_webp`: same `image` + `fast_image_resize`
//! + `webp` stack, generalized to produce either stage independently instead
//! of always producing the fixed widths that function hard-coded.

use fast_image_resize::{images::Image, FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer};
use image::{DynamicImage, GenericImageView, ImageReader};
use std::io::Cursor;
use webp::{Encoder, WebPConfig};

pub struct ProcessedVariant {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

pub struct ProduceOutcome {
    pub webp: Option<Result<ProcessedVariant, String>>,
    pub thumbnail: Option<Result<ProcessedVariant, String>>,
}

/// Decodes `bytes` once and produces whichever stages were requested.
/// Returns `Err` only for failures that invalidate both stages: an
/// undecodable source or one that exceeds `max_dimension`.
pub fn decode_and_produce(
    bytes: &[u8],
    max_dimension: u32,
    want_webp: bool,
    want_thumbnail: bool,
    webp_quality: u8,
    webp_effort: u8,
    thumbnail_width: u32,
    thumbnail_quality: u8,
) -> Result<ProduceOutcome, String> {
    let img = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| format!("cannot decode image: failed to guess format: {e}"))?
        .decode()
        .map_err(|e| format!("cannot decode image: {e}"))?;

    let (w, h) = img.dimensions();
    if w > max_dimension || h > max_dimension {
        return Err(format!(
            "image exceeds max dimension: {w}x{h} (max {max_dimension})"
        ));
    }

    let webp = want_webp.then(|| encode_webp_full(&img, webp_quality, webp_effort));
    let thumbnail =
        want_thumbnail.then(|| encode_thumbnail(&img, thumbnail_width, thumbnail_quality, webp_effort));

    Ok(ProduceOutcome { webp, thumbnail })
}

/// Builds the libwebp encode config for a given quality/effort pair.
/// `effort` is libwebp's `method` knob (0 fastest, 6 best compression).
fn webp_config(quality: u8, effort: u8) -> Result<WebPConfig, String> {
    let mut config = WebPConfig::new().map_err(|_| "failed to initialize webp encoder config".to_string())?;
    config.quality = quality as f32;
    config.method = effort as i32;
    Ok(config)
}

/// Re-encodes the full-resolution source as WebP; EXIF is dropped because we
/// re-encode from raw pixels rather than carry the original container along.
pub fn encode_webp_full(img: &DynamicImage, quality: u8, effort: u8) -> Result<ProcessedVariant, String> {
    let (width, height) = img.dimensions();
    let config = webp_config(quality, effort)?;
    let data = match img {
        DynamicImage::ImageRgba8(_) => {
            let rgba = img.to_rgba8();
            Encoder::from_rgba(rgba.as_raw(), width, height)
                .encode_advanced(&config)
                .map_err(|e| format!("webp encode failed: {e:?}"))?
        }
        _ => {
            let rgb = img.to_rgb8();
            Encoder::from_rgb(rgb.as_raw(), width, height)
                .encode_advanced(&config)
                .map_err(|e| format!("webp encode failed: {e:?}"))?
        }
    };
    Ok(ProcessedVariant {
        data: data.to_vec(),
        width,
        height,
    })
}

/// Resizes to `target_width` with proportional height, no cropping, then
/// encodes as WebP.
pub fn encode_thumbnail(
    img: &DynamicImage,
    target_width: u32,
    quality: u8,
    effort: u8,
) -> Result<ProcessedVariant, String> {
    let (w, h) = img.dimensions();
    let target_width = target_width.max(1);
    let target_height = (((h as f32) * (target_width as f32 / w as f32)).round() as u32).max(1);

    let has_alpha = img.color().has_alpha();
    let pixel_type = if has_alpha { PixelType::U8x4 } else { PixelType::U8x3 };
    let raw = if has_alpha {
        img.to_rgba8().into_raw()
    } else {
        img.to_rgb8().into_raw()
    };

    let src_image =
        Image::from_vec_u8(w, h, raw, pixel_type).map_err(|e| format!("cannot decode image: {e}"))?;
    let mut dst_image = Image::new(target_width, target_height, pixel_type);
    let mut resizer = Resizer::new();
    resizer
        .resize(
            &src_image,
            &mut dst_image,
            &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear)),
        )
        .map_err(|e| format!("resize failed: {e}"))?;

    let config = webp_config(quality, effort)?;
    let data = match pixel_type {
        PixelType::U8x4 => Encoder::from_rgba(dst_image.buffer(), target_width, target_height)
            .encode_advanced(&config)
            .map_err(|e| format!("webp encode failed: {e:?}"))?,
        _ => Encoder::from_rgb(dst_image.buffer(), target_width, target_height)
            .encode_advanced(&config)
            .map_err(|e| format!("webp encode failed: {e:?}"))?,
    };

    Ok(ProcessedVariant {
        data: data.to_vec(),
        width: target_width,
        height: target_height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn solid_jpeg(width: u32, height: u32) -> Vec<u8> {
        let buf: ImageBuffer<Rgb<u8>, Vec<u8>> = ImageBuffer::from_pixel(width, height, Rgb([200, 30, 30]));
        let mut out = Vec::new();
        DynamicImage::ImageRgb8(buf)
            .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Jpeg)
            .unwrap();
        out
    }

    #[test]
    fn decode_and_produce_builds_both_stages_when_requested() {
        let bytes = solid_jpeg(64, 32);
        let outcome = decode_and_produce(&bytes, 8000, true, true, 80, 4, 16, 80).unwrap();
        let webp = outcome.webp.unwrap().unwrap();
        assert_eq!((webp.width, webp.height), (64, 32));
        let thumb = outcome.thumbnail.unwrap().unwrap();
        assert_eq!(thumb.width, 16);
        assert_eq!(thumb.height, 8);
        assert!(!webp.data.is_empty());
        assert!(!thumb.data.is_empty());
    }

    #[test]
    fn decode_and_produce_skips_stages_not_requested() {
        let bytes = solid_jpeg(32, 32);
        let outcome = decode_and_produce(&bytes, 8000, true, false, 80, 4, 16, 80).unwrap();
        assert!(outcome.webp.is_some());
        assert!(outcome.thumbnail.is_none());
    }

    #[test]
    fn decode_and_produce_rejects_oversized_dimensions() {
        let bytes = solid_jpeg(32, 32);
        let err = decode_and_produce(&bytes, 16, true, false, 80, 4, 16, 80).unwrap_err();
        assert!(err.contains("exceeds max dimension"));
    }

    #[test]
    fn decode_and_produce_rejects_garbage_bytes() {
        let err = decode_and_produce(&[0u8, 1, 2, 3], 8000, true, false, 80, 4, 16, 80).unwrap_err();
        assert!(err.contains("cannot decode"));
    }
}
