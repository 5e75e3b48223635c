//! MIME sniffing against a fixed magic-byte list, adapted from the
//! standalone image-processing function's `detect_format` and widened to
//! cover GIF and BMP in addition to JPEG/PNG/WebP.

use std::io::Cursor;

const SNIFF_WINDOW: usize = 512;

pub fn sniff_mime(data: &[u8]) -> Option<&'static str> {
    let head = &data[..data.len().min(SNIFF_WINDOW)];

    if head.len() >= 3 && head[0] == 0xFF && head[1] == 0xD8 && head[2] == 0xFF {
        return Some("image/jpeg");
    }
    if head.len() >= 8 && &head[..8] == b"\x89PNG\r\n\x1a\n" {
        return Some("image/png");
    }
    if head.len() >= 6 && (&head[..6] == b"GIF87a" || &head[..6] == b"GIF89a") {
        return Some("image/gif");
    }
    if head.len() >= 12 && &head[..4] == b"RIFF" && &head[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if head.len() >= 2 && &head[..2] == b"BM" {
        return Some("image/bmp");
    }
    None
}

/// Cheap dimension probe: reads just enough of the container to report
/// width/height without decoding pixel data.
pub fn dimensions(data: &[u8]) -> Option<(i32, i32)> {
    let (w, h) = image::ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()?;
    Some((w as i32, h as i32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_jpeg_magic_bytes() {
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
        bytes.extend_from_slice(&[0u8; 20]);
        assert_eq!(sniff_mime(&bytes), Some("image/jpeg"));
    }

    #[test]
    fn sniffs_png_magic_bytes() {
        let bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        assert_eq!(sniff_mime(&bytes), Some("image/png"));
    }

    #[test]
    fn sniffs_gif_magic_bytes() {
        assert_eq!(sniff_mime(b"GIF89a...."), Some("image/gif"));
    }

    #[test]
    fn sniffs_webp_magic_bytes() {
        let mut bytes = b"RIFF".to_vec();
        bytes.extend_from_slice(&[0u8; 4]);
        bytes.extend_from_slice(b"WEBP");
        assert_eq!(sniff_mime(&bytes), Some("image/webp"));
    }

    #[test]
    fn rejects_unrecognized_bytes() {
        assert_eq!(sniff_mime(b"not an image"), None);
    }
}
