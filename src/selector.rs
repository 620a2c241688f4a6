//! Format selection and ranking policy.
//!
//! The extractor reports anywhere from a handful to over a hundred format
//! descriptors per video. This module narrows that catalog down to the top
//! few links matching the requested media kind, and shapes each survivor
//! into the view served to clients.

use serde::Serialize;
use std::cmp::Reverse;

use crate::extractor::{FormatHint, FormatInfo, VideoInfo};

/// Upper bound on the ranked link list.
pub const MAX_LINKS: usize = 5;

/// Requested output container. `mp4` and `webm` share the contains-video
/// filter; the distinction is only recorded in the response, since the
/// catalog does not label container type separately from codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    Mp4,
    Mp3,
    Webm,
}

impl OutputKind {
    /// Parses the `format` request parameter, case-insensitively.
    /// Unrecognized values fall back to the default container.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::to_ascii_lowercase).as_deref() {
            Some("mp3") => OutputKind::Mp3,
            Some("webm") => OutputKind::Webm,
            _ => OutputKind::Mp4,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            OutputKind::Mp4 => "mp4",
            OutputKind::Mp3 => "mp3",
            OutputKind::Webm => "webm",
        }
    }

    pub fn is_audio(&self) -> bool {
        matches!(self, OutputKind::Mp3)
    }
}

/// Requested quality tier. Tier labels are a closed set; anything else,
/// including the default, means "best" and never attempts integer parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityTier {
    Best,
    Capped(u32),
}

const TIER_LABELS: [&str; 6] = ["144p", "240p", "360p", "480p", "720p", "1080p"];

impl QualityTier {
    pub fn parse(raw: Option<&str>) -> Self {
        let Some(raw) = raw else {
            return QualityTier::Best;
        };
        let lowered = raw.to_ascii_lowercase();
        if TIER_LABELS.contains(&lowered.as_str())
            && let Some(height) = lowered.strip_suffix('p').and_then(|v| v.parse().ok())
        {
            return QualityTier::Capped(height);
        }
        QualityTier::Best
    }

    pub fn label(&self) -> String {
        match self {
            QualityTier::Best => "best".to_owned(),
            QualityTier::Capped(height) => format!("{height}p"),
        }
    }
}

/// Maps the request parameters to the resolve-mode extraction hint.
pub fn hint_for(kind: OutputKind, quality: QualityTier) -> FormatHint {
    if kind.is_audio() {
        FormatHint::AudioBest
    } else {
        match quality {
            QualityTier::Best => FormatHint::VideoBest,
            QualityTier::Capped(height) => FormatHint::VideoHeightCap(height),
        }
    }
}

/// Client-facing view of one ranked format. Kind-specific fields are omitted
/// rather than serialized as null.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadLink {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format_id: Option<String>,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext: Option<String>,
    pub quality: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filesize: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vcodec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub acodec: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<i64>,
}

/// Produces the ranked link list for one resolve-mode payload.
///
/// When the payload carries no per-format catalog at all, ranking is skipped
/// and a single synthetic link wraps the top-level resolved URL.
pub fn select_links(info: &VideoInfo, kind: OutputKind, quality: QualityTier) -> Vec<DownloadLink> {
    let Some(formats) = info.formats.as_ref() else {
        return vec![DownloadLink {
            format_id: Some("single".to_owned()),
            url: info.url.clone().unwrap_or_default(),
            ext: Some(kind.label().to_owned()),
            quality: quality.label(),
            filesize: None,
            resolution: None,
            fps: None,
            vcodec: None,
            acodec: None,
            bitrate: None,
            sample_rate: None,
        }];
    };

    let mut matching: Vec<&FormatInfo> = formats
        .iter()
        .filter(|format| {
            if kind.is_audio() {
                is_audio_only(format)
            } else {
                has_video(format)
            }
        })
        .filter(|format| format.url.as_deref().is_some_and(|url| !url.is_empty()))
        .collect();

    // Stable sorts keep the catalog's relative order for ties.
    if kind.is_audio() {
        matching.sort_by(|a, b| b.abr.unwrap_or(0.0).total_cmp(&a.abr.unwrap_or(0.0)));
    } else {
        matching.sort_by_key(|format| Reverse(format.height.unwrap_or(0)));
    }

    matching
        .into_iter()
        .take(MAX_LINKS)
        .map(|format| build_link(format, kind))
        .collect()
}

/// A descriptor is audio-only iff its video codec is the `none` sentinel and
/// its audio codec is not; it contains video iff its video codec is anything
/// but the sentinel (including unreported).
fn is_audio_only(format: &FormatInfo) -> bool {
    codec_is_none(&format.vcodec) && !codec_is_none(&format.acodec)
}

fn has_video(format: &FormatInfo) -> bool {
    !codec_is_none(&format.vcodec)
}

fn codec_is_none(codec: &Option<String>) -> bool {
    codec
        .as_deref()
        .is_some_and(|value| value.eq_ignore_ascii_case("none"))
}

fn build_link(format: &FormatInfo, kind: OutputKind) -> DownloadLink {
    let mut link = DownloadLink {
        format_id: format.format_id.clone(),
        url: format.url.clone().unwrap_or_default(),
        ext: format.ext.clone(),
        quality: format
            .format_note
            .clone()
            .unwrap_or_else(|| "Unknown".to_owned()),
        filesize: format.filesize.or(format.filesize_approx),
        resolution: None,
        fps: None,
        vcodec: None,
        acodec: None,
        bitrate: None,
        sample_rate: None,
    };

    if kind.is_audio() {
        link.bitrate = format.abr;
        link.sample_rate = format.asr;
    } else {
        link.resolution = Some(format!(
            "{}x{}",
            dimension(format.width),
            dimension(format.height)
        ));
        link.fps = format.fps;
        link.vcodec = format.vcodec.clone();
        link.acodec = format.acodec.clone();
    }

    link
}

fn dimension(value: Option<i64>) -> String {
    value.map_or_else(|| "Unknown".to_owned(), |v| v.to_string())
}
