//! Extraction adapter around yt-dlp.
//!
//! Everything hard about turning a video page into playable stream URLs lives
//! inside yt-dlp; this module only invokes it in metadata-only mode and maps
//! its output onto typed structs. The `MetadataSource` trait keeps the
//! subprocess behind an injectable seam so handler tests can substitute a
//! fake that never touches the network.

use serde::Deserialize;
use std::path::PathBuf;
use std::process::Command;
use thiserror::Error;
use tracing::{debug, error};

/// Failures surfaced by an extraction call. Both kinds are client-facing:
/// the policy limit reflects configuration, not a malfunction, and an
/// underlying extractor error is reported with its own text, opaquely.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Video too long ({actual}s). Maximum allowed: {limit}s")]
    TooLong { actual: i64, limit: i64 },

    #[error("{0}")]
    Extraction(String),
}

/// Full `--dump-single-json` payload. Only a subset of fields are read but
/// everything except the id is left optional because older videos may lack
/// metadata.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoInfo {
    pub id: String,
    pub title: Option<String>,
    pub fulltitle: Option<String>,
    pub description: Option<String>,
    pub uploader: Option<String>,
    pub channel: Option<String>,
    pub duration: Option<i64>,
    pub view_count: Option<i64>,
    pub like_count: Option<i64>,
    pub thumbnail: Option<String>,
    pub upload_date: Option<String>,
    pub categories: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub webpage_url: Option<String>,
    /// Direct media URL for the single format picked by the selector hint.
    /// Some platforms report only this and no per-format catalog.
    pub url: Option<String>,
    pub formats: Option<Vec<FormatInfo>>,
}

impl VideoInfo {
    /// `fulltitle` carries the unshortened variant when both are present.
    pub fn display_title(&self) -> Option<&str> {
        self.fulltitle
            .as_deref()
            .or(self.title.as_deref())
            .filter(|title| !title.is_empty())
    }

    pub fn display_uploader(&self) -> Option<&str> {
        self.uploader.as_deref().or(self.channel.as_deref())
    }
}

/// One concrete encoded variant of a video as reported by the platform.
#[derive(Debug, Clone, Deserialize)]
pub struct FormatInfo {
    pub format_id: Option<String>,
    pub url: Option<String>,
    pub ext: Option<String>,
    pub format_note: Option<String>,
    pub filesize: Option<i64>,
    pub filesize_approx: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub fps: Option<f64>,
    pub vcodec: Option<String>,
    pub acodec: Option<String>,
    /// Average audio bitrate in kbit/s.
    pub abr: Option<f64>,
    /// Audio sample rate in Hz.
    pub asr: Option<i64>,
}

/// Format-selection hint forwarded to the resolve-mode invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatHint {
    AudioBest,
    VideoBest,
    VideoHeightCap(u32),
}

impl FormatHint {
    /// Renders the yt-dlp format selector expression for this hint.
    pub fn selector(&self) -> String {
        match self {
            FormatHint::AudioBest => "bestaudio/best".to_owned(),
            FormatHint::VideoBest => "best".to_owned(),
            FormatHint::VideoHeightCap(height) => format!("best[height<={height}]"),
        }
    }
}

/// Injectable extraction capability. `probe` fetches metadata only; `resolve`
/// re-invokes extraction with a format hint and returns the full catalog.
pub trait MetadataSource: Send + Sync {
    fn probe(&self, url: &str) -> Result<VideoInfo, ExtractError>;

    fn resolve(&self, url: &str, hint: &FormatHint) -> Result<VideoInfo, ExtractError>;
}

/// Checks the probed duration against the configured ceiling. A missing
/// duration counts as zero and passes.
pub fn enforce_duration_ceiling(info: &VideoInfo, limit: i64) -> Result<(), ExtractError> {
    let actual = info.duration.unwrap_or(0);
    if actual > limit {
        return Err(ExtractError::TooLong { actual, limit });
    }
    Ok(())
}

/// Production `MetadataSource` shelling out to the yt-dlp binary.
pub struct YtDlp {
    program: PathBuf,
}

impl YtDlp {
    pub fn new() -> Self {
        Self::with_program("yt-dlp")
    }

    /// Uses an explicit binary path instead of resolving through PATH.
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn invoke(&self, url: &str, hint: Option<&FormatHint>) -> Result<VideoInfo, ExtractError> {
        let mut command = Command::new(&self.program);
        command
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--no-warnings")
            .arg("--no-progress");

        if let Some(hint) = hint {
            command.arg("--format").arg(hint.selector());
        }

        command.arg(url);

        debug!(url, hint = ?hint, "invoking {}", self.program.display());
        let output = command.output().map_err(|err| {
            ExtractError::Extraction(format!(
                "failed to run {}: {}",
                self.program.display(),
                err
            ))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = stderr.trim();
            error!(url, "extraction failed: {}", message);
            if message.is_empty() {
                return Err(ExtractError::Extraction(format!(
                    "extractor exited with {}",
                    output.status
                )));
            }
            return Err(ExtractError::Extraction(message.to_owned()));
        }

        let raw = String::from_utf8(output.stdout).map_err(|err| {
            ExtractError::Extraction(format!("extractor produced invalid UTF-8: {err}"))
        })?;
        serde_json::from_str(&raw)
            .map_err(|err| ExtractError::Extraction(format!("deserializing extractor JSON: {err}")))
    }
}

impl MetadataSource for YtDlp {
    fn probe(&self, url: &str) -> Result<VideoInfo, ExtractError> {
        self.invoke(url, None)
    }

    fn resolve(&self, url: &str, hint: &FormatHint) -> Result<VideoInfo, ExtractError> {
        self.invoke(url, Some(hint))
    }
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new()
    }
}
