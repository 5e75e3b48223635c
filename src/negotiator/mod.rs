//! Format negotiator (§4.G). Stateless: picks one of `avif`, `webp`, or
//! `original` from the client's `Accept` header, the server's enabled output
//! formats, and the formats the database records as `Completed` for this
//! image.

/// Preference order when multiple formats are acceptable.
const PREFERENCE_ORDER: &[&str] = &["avif", "webp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiatedFormat {
    Avif,
    Webp,
    Original,
}

impl NegotiatedFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            NegotiatedFormat::Avif => "avif",
            NegotiatedFormat::Webp => "webp",
            NegotiatedFormat::Original => "original",
        }
    }
}

struct AcceptEntry {
    media_range: String,
    q: f32,
}

/// `q` defaults to 1.0; absent or malformed q leaves the entry at 1.0;
/// `q=0` is an explicit refusal.
fn parse_accept(accept: &str) -> Vec<AcceptEntry> {
    accept
        .split(',')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            let mut segments = part.split(';');
            let media_range = segments.next()?.trim().to_lowercase();
            let q = segments
                .find_map(|param| {
                    let param = param.trim();
                    param.strip_prefix("q=").and_then(|v| v.trim().parse::<f32>().ok())
                })
                .unwrap_or(1.0);
            Some(AcceptEntry { media_range, q })
        })
        .collect()
}

fn mime_for(format: &str) -> &'static str {
    match format {
        "avif" => "image/avif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

/// Whether `entries` accept `mime`: either a direct match with `q > 0`, or a
/// wildcard (`image/*` / `*/*`) with `q > 0` and no direct `q=0` entry for
/// this exact MIME.
fn accepts(entries: &[AcceptEntry], mime: &str) -> bool {
    let image_wildcard = format!("{}/*", mime.split('/').next().unwrap_or(""));

    let direct_refusal = entries
        .iter()
        .any(|e| e.media_range == mime && e.q <= 0.0);
    if direct_refusal {
        return false;
    }

    entries.iter().any(|e| {
        (e.media_range == mime || e.media_range == image_wildcard || e.media_range == "*/*") && e.q > 0.0
    })
}

/// Negotiates the best format to serve. `enabled_formats` and
/// `completed_formats` both use the bare format name (`"webp"`, `"avif"`).
pub fn negotiate(accept: &str, enabled_formats: &[&str], completed_formats: &[&str]) -> NegotiatedFormat {
    let entries = parse_accept(accept);

    for candidate in PREFERENCE_ORDER {
        if !enabled_formats.contains(candidate) {
            continue;
        }
        if !completed_formats.contains(candidate) {
            continue;
        }
        if accepts(&entries, mime_for(candidate)) {
            return match *candidate {
                "avif" => NegotiatedFormat::Avif,
                "webp" => NegotiatedFormat::Webp,
                _ => unreachable!(),
            };
        }
    }

    NegotiatedFormat::Original
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_webp_when_accepted_and_completed() {
        let result = negotiate("image/webp,*/*", &["webp"], &["webp"]);
        assert_eq!(result, NegotiatedFormat::Webp);
    }

    #[test]
    fn falls_back_to_original_when_webp_not_completed_yet() {
        let result = negotiate("image/webp,*/*", &["webp"], &[]);
        assert_eq!(result, NegotiatedFormat::Original);
    }

    #[test]
    fn explicit_q_zero_refuses_webp_even_if_wildcard_present() {
        let result = negotiate("image/webp;q=0, */*", &["webp"], &["webp"]);
        assert_eq!(result, NegotiatedFormat::Original);
    }

    #[test]
    fn malformed_q_value_defaults_to_one() {
        let result = negotiate("image/webp;q=not-a-number", &["webp"], &["webp"]);
        assert_eq!(result, NegotiatedFormat::Webp);
    }

    #[test]
    fn avif_is_preferred_over_webp_when_both_available() {
        let result = negotiate("image/avif,image/webp,*/*", &["webp", "avif"], &["webp", "avif"]);
        assert_eq!(result, NegotiatedFormat::Avif);
    }

    #[test]
    fn server_disabled_format_is_never_selected() {
        let result = negotiate("image/webp", &[], &["webp"]);
        assert_eq!(result, NegotiatedFormat::Original);
    }

    #[test]
    fn wildcard_image_star_matches_any_image_mime() {
        let result = negotiate("image/*;q=0.9", &["webp"], &["webp"]);
        assert_eq!(result, NegotiatedFormat::Webp);
    }
}
