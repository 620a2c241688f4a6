//! Recognizes supported YouTube page URLs and extracts the video identifier.
//!
//! Matching is purely textual; no network access happens here. Inputs arrive
//! straight from a query string, so callers run them through `normalize_url`
//! once before matching.

/// Recognized URL shapes, tried in order; the first one that matches wins.
const ID_MARKERS: [&str; 4] = [
    "youtube.com/watch?v=",
    "youtu.be/",
    "youtube.com/embed/",
    "youtube.com/v/",
];

/// The identifier runs until the next query or fragment delimiter.
const ID_TERMINATORS: [char; 4] = ['&', '?', '#', '\n'];

/// Percent-decodes a raw URL parameter. Invalid percent sequences are kept
/// as-is rather than rejected.
pub fn normalize_url(raw: &str) -> String {
    match urlencoding::decode(raw) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => raw.to_owned(),
    }
}

/// Extracts the video identifier from a normalized URL string, or `None`
/// when the string does not denote a supported video page.
pub fn extract_video_id(url: &str) -> Option<String> {
    for marker in ID_MARKERS {
        if let Some(position) = url.find(marker) {
            let rest = &url[position + marker.len()..];
            let id = rest.split(ID_TERMINATORS.as_ref()).next().unwrap_or(rest);
            if !id.is_empty() {
                return Some(id.to_owned());
            }
        }
    }

    None
}
