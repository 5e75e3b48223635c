//! Content-addressed path generation (§6, bit-exact).
//!
//! Paths are derived purely from the detected MIME / hash / date; the
//! storage provider never picks them.

use chrono::{DateTime, Utc};

/// One of `.jpg .png .gif .webp .bmp`, chosen from the sniffed MIME type.
pub fn extension_for_mime(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" => ".jpg",
        "image/png" => ".png",
        "image/gif" => ".gif",
        "image/webp" => ".webp",
        "image/bmp" => ".bmp",
        _ => ".bin",
    }
}

fn ymd(at: DateTime<Utc>) -> (String, String, String) {
    (
        format!("{:04}", at.format("%Y")),
        format!("{:02}", at.format("%m")),
        format!("{:02}", at.format("%d")),
    )
}

pub fn original_path(hash12: &str, mime: &str, at: DateTime<Utc>) -> String {
    let (y, m, d) = ymd(at);
    let ext = extension_for_mime(mime);
    format!("original/{y}/{m}/{d}/{hash12}{ext}")
}

pub fn webp_path(hash12: &str, at: DateTime<Utc>) -> String {
    let (y, m, d) = ymd(at);
    format!("converted/webp/{y}/{m}/{d}/{hash12}.webp")
}

pub fn thumbnail_path(hash12: &str, width: u32, at: DateTime<Utc>) -> String {
    let (y, m, d) = ymd(at);
    format!("thumbnails/{y}/{m}/{d}/{hash12}_{width}.webp")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 7, 12, 0, 0).unwrap()
    }

    #[test]
    fn original_path_is_bit_exact() {
        assert_eq!(
            original_path("abcdef012345", "image/jpeg", fixed_date()),
            "original/2026/03/07/abcdef012345.jpg"
        );
    }

    #[test]
    fn webp_path_is_bit_exact() {
        assert_eq!(
            webp_path("abcdef012345", fixed_date()),
            "converted/webp/2026/03/07/abcdef012345.webp"
        );
    }

    #[test]
    fn thumbnail_path_is_bit_exact() {
        assert_eq!(
            thumbnail_path("abcdef012345", 600, fixed_date()),
            "thumbnails/2026/03/07/abcdef012345_600.webp"
        );
    }

    #[test]
    fn extension_covers_the_fixed_mime_list() {
        assert_eq!(extension_for_mime("image/jpeg"), ".jpg");
        assert_eq!(extension_for_mime("image/png"), ".png");
        assert_eq!(extension_for_mime("image/gif"), ".gif");
        assert_eq!(extension_for_mime("image/webp"), ".webp");
        assert_eq!(extension_for_mime("image/bmp"), ".bmp");
    }
}
