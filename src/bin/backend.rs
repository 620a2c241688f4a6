//! HTTP API server exposing yt-dlp extraction as JSON endpoints.
//!
//! Per-request flow: auth gate, URL validation, probe-mode extraction with a
//! duration ceiling, then (for the downloader endpoint) resolve-mode
//! extraction and format ranking. Requests are stateless; the only shared
//! state is the immutable config and the injected extractor.

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{NaiveDate, Utc};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::{signal, task};
use tracing::error;
use tubelink_api::config::{self, ServiceConfig};
use tubelink_api::extractor::{
    ExtractError, MetadataSource, VideoInfo, YtDlp, enforce_duration_ceiling,
};
use tubelink_api::selector::{self, DownloadLink, OutputKind, QualityTier};
use tubelink_api::{security, urls};

const SERVICE_NAME: &str = "YouTube Downloader API";
const DESCRIPTION_LIMIT: usize = 500;
const MAX_TAGS: usize = 10;

#[derive(Parser)]
struct Args {
    /// Path to the env-style config file.
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Override the configured listen host.
    #[arg(long)]
    host: Option<String>,

    /// Override the configured listen port.
    #[arg(long)]
    port: Option<u16>,
}

#[derive(Clone)]
struct AppState {
    config: Arc<ServiceConfig>,
    extractor: Arc<dyn MetadataSource>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn unauthorized() -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: "Invalid or missing API key".to_owned(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "Internal server error".to_owned(),
        }
    }
}

impl From<ExtractError> for ApiError {
    // Both extraction failure kinds reflect the request, not the service.
    fn from(err: ExtractError) -> Self {
        ApiError::bad_request(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
            "status": "failed",
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt::init();
    security::ensure_not_root("backend")?;

    let service_config = config::load_service_config_from(&args.config)
        .with_context(|| format!("loading config from {}", args.config.display()))?;
    let host = args
        .host
        .unwrap_or_else(|| service_config.tubelink_host.clone());
    let port = args.port.unwrap_or(service_config.tubelink_port);

    let state = AppState {
        config: Arc::new(service_config),
        extractor: Arc::new(YtDlp::new()),
    };

    let addr = SocketAddr::new(host.parse()?, port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    println!("API server listening on http://{}", addr);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(service_description))
        .route("/api/youtube-downloader", get(download))
        .route("/api/video-info", get(video_info))
        .route("/health", get(health))
        .fallback(not_found)
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        eprintln!("Failed to install Ctrl+C handler: {}", err);
    }
}

#[derive(Debug, Default, Deserialize)]
struct DownloadParams {
    apikey: Option<String>,
    url: Option<String>,
    format: Option<String>,
    quality: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct InfoParams {
    apikey: Option<String>,
    url: Option<String>,
}

#[derive(Debug, Serialize)]
struct DownloadResponse {
    status: &'static str,
    video_info: VideoSummary,
    download_links: Vec<DownloadLink>,
    requested_format: &'static str,
    requested_quality: String,
}

/// Trimmed metadata block served by the downloader endpoint.
#[derive(Debug, Serialize)]
struct VideoSummary {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    uploader: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    view_count: Option<i64>,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    upload_date: Option<String>,
}

impl VideoSummary {
    fn from_info(info: &VideoInfo) -> Self {
        Self {
            id: info.id.clone(),
            title: info.display_title().map(str::to_owned),
            uploader: info.display_uploader().map(str::to_owned),
            duration: info.duration,
            view_count: info.view_count,
            description: truncate_description(info.description.as_deref().unwrap_or_default()),
            thumbnail: info.thumbnail.clone(),
            upload_date: info.upload_date.as_deref().map(normalize_upload_date),
        }
    }
}

#[derive(Debug, Serialize)]
struct InfoResponse {
    status: &'static str,
    video_info: VideoDetails,
}

/// Fuller metadata block served by the info-only endpoint.
#[derive(Debug, Serialize)]
struct VideoDetails {
    id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    uploader: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duration: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    view_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    like_count: Option<i64>,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    thumbnail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    upload_date: Option<String>,
    categories: Vec<String>,
    tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    webpage_url: Option<String>,
}

impl VideoDetails {
    fn from_info(info: &VideoInfo) -> Self {
        Self {
            id: info.id.clone(),
            title: info.display_title().map(str::to_owned),
            uploader: info.display_uploader().map(str::to_owned),
            duration: info.duration,
            view_count: info.view_count,
            like_count: info.like_count,
            description: info.description.clone().unwrap_or_default(),
            thumbnail: info.thumbnail.clone(),
            upload_date: info.upload_date.as_deref().map(normalize_upload_date),
            categories: info.categories.clone().unwrap_or_default(),
            tags: info
                .tags
                .clone()
                .unwrap_or_default()
                .into_iter()
                .take(MAX_TAGS)
                .collect(),
            webpage_url: info.webpage_url.clone(),
        }
    }
}

async fn service_description() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "download": "/api/youtube-downloader",
            "info": "/api/video-info",
        },
        "usage": {
            "download": "/api/youtube-downloader?url=YOUTUBE_URL&apikey=YOUR_API_KEY&format=mp4&quality=720p",
            "info": "/api/video-info?url=YOUTUBE_URL&apikey=YOUR_API_KEY",
        },
        "parameters": {
            "url": "YouTube video URL (required)",
            "apikey": "API authentication key (required)",
            "format": "Output format: mp4, mp3, webm (optional, default: mp4)",
            "quality": "Video quality: 144p, 240p, 360p, 480p, 720p, 1080p, best (optional, default: best)",
        },
    }))
}

async fn download(
    State(state): State<AppState>,
    Query(params): Query<DownloadParams>,
) -> ApiResult<Json<DownloadResponse>> {
    require_api_key(&state, params.apikey.as_deref())?;

    let url = validated_url(params.url.as_deref())?;
    let kind = OutputKind::parse(params.format.as_deref());
    let quality = QualityTier::parse(params.quality.as_deref());

    let probed = run_extraction({
        let extractor = state.extractor.clone();
        let url = url.clone();
        move || extractor.probe(&url)
    })
    .await?;
    enforce_duration_ceiling(&probed, state.config.max_duration)?;

    let hint = selector::hint_for(kind, quality);
    let resolved = run_extraction({
        let extractor = state.extractor.clone();
        let url = url.clone();
        move || extractor.resolve(&url, &hint)
    })
    .await?;

    let download_links = selector::select_links(&resolved, kind, quality);

    Ok(Json(DownloadResponse {
        status: "success",
        video_info: VideoSummary::from_info(&resolved),
        download_links,
        requested_format: kind.label(),
        requested_quality: quality.label(),
    }))
}

async fn video_info(
    State(state): State<AppState>,
    Query(params): Query<InfoParams>,
) -> ApiResult<Json<InfoResponse>> {
    require_api_key(&state, params.apikey.as_deref())?;

    let url = validated_url(params.url.as_deref())?;

    let probed = run_extraction({
        let extractor = state.extractor.clone();
        move || extractor.probe(&url)
    })
    .await?;
    enforce_duration_ceiling(&probed, state.config.max_duration)?;

    Ok(Json(InfoResponse {
        status: "success",
        video_info: VideoDetails::from_info(&probed),
    }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn not_found() -> Response {
    let body = serde_json::json!({
        "error": "Endpoint not found",
        "status": "failed",
        "available_endpoints": [
            "/api/youtube-downloader",
            "/api/video-info",
            "/health",
        ],
    });
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}

fn require_api_key(state: &AppState, provided: Option<&str>) -> ApiResult<()> {
    if state.config.authorize(provided) {
        Ok(())
    } else {
        Err(ApiError::unauthorized())
    }
}

fn validated_url(raw: Option<&str>) -> ApiResult<String> {
    let raw = raw.ok_or_else(|| ApiError::bad_request("URL parameter is required"))?;
    let url = urls::normalize_url(raw);
    if urls::extract_video_id(&url).is_none() {
        return Err(ApiError::bad_request("Invalid YouTube URL"));
    }
    Ok(url)
}

/// Runs one blocking extraction call off the async runtime. Only a join
/// failure counts as unexpected; extraction errors stay client-facing.
async fn run_extraction<F>(operation: F) -> ApiResult<VideoInfo>
where
    F: FnOnce() -> Result<VideoInfo, ExtractError> + Send + 'static,
{
    task::spawn_blocking(operation)
        .await
        .map_err(|err| {
            error!("extraction task join error: {err}");
            ApiError::internal()
        })?
        .map_err(ApiError::from)
}

/// Truncates a non-empty description and appends the ellipsis marker.
fn truncate_description(description: &str) -> String {
    if description.is_empty() {
        return String::new();
    }
    let mut truncated: String = description.chars().take(DESCRIPTION_LIMIT).collect();
    truncated.push_str("...");
    truncated
}

/// Converts yt-dlp's `YYYYMMDD` upload date format into ISO-8601, passing
/// unparseable values through untouched.
fn normalize_upload_date(value: &str) -> String {
    upload_date_to_iso(value).unwrap_or_else(|| value.to_owned())
}

fn upload_date_to_iso(value: &str) -> Option<String> {
    if value.len() != 8 {
        return None;
    }
    let year = &value[0..4];
    let month = &value[4..6];
    let day = &value[6..8];
    let naive = NaiveDate::from_ymd_opt(year.parse().ok()?, month.parse().ok()?, day.parse().ok()?);
    let naive = naive?.and_hms_opt(0, 0, 0)?;
    Some(format!("{}Z", naive.format("%Y-%m-%dT%H:%M:%S")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tubelink_api::extractor::FormatHint;

    struct MockExtractor {
        payload: VideoInfo,
        probe_calls: AtomicUsize,
        resolve_calls: AtomicUsize,
        last_hint: Mutex<Option<FormatHint>>,
    }

    impl MockExtractor {
        fn new(payload: VideoInfo) -> Self {
            Self {
                payload,
                probe_calls: AtomicUsize::new(0),
                resolve_calls: AtomicUsize::new(0),
                last_hint: Mutex::new(None),
            }
        }

        fn probes(&self) -> usize {
            self.probe_calls.load(Ordering::SeqCst)
        }

        fn resolves(&self) -> usize {
            self.resolve_calls.load(Ordering::SeqCst)
        }

        fn hint(&self) -> Option<FormatHint> {
            *self.last_hint.lock().unwrap()
        }
    }

    impl MetadataSource for MockExtractor {
        fn probe(&self, _url: &str) -> Result<VideoInfo, ExtractError> {
            self.probe_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.payload.clone())
        }

        fn resolve(&self, _url: &str, hint: &FormatHint) -> Result<VideoInfo, ExtractError> {
            self.resolve_calls.fetch_add(1, Ordering::SeqCst);
            *self.last_hint.lock().unwrap() = Some(*hint);
            Ok(self.payload.clone())
        }
    }

    struct FailingExtractor;

    impl MetadataSource for FailingExtractor {
        fn probe(&self, _url: &str) -> Result<VideoInfo, ExtractError> {
            Err(ExtractError::Extraction(
                "Unsupported URL: https://example.com".to_owned(),
            ))
        }

        fn resolve(&self, _url: &str, _hint: &FormatHint) -> Result<VideoInfo, ExtractError> {
            Err(ExtractError::Extraction(
                "Unsupported URL: https://example.com".to_owned(),
            ))
        }
    }

    fn test_config() -> ServiceConfig {
        ServiceConfig {
            api_key: "test-key".to_owned(),
            max_duration: 3600,
            tubelink_port: config::DEFAULT_TUBELINK_PORT,
            tubelink_host: config::DEFAULT_TUBELINK_HOST.to_owned(),
        }
    }

    fn sample_payload() -> VideoInfo {
        serde_json::from_value(serde_json::json!({
            "id": "alpha",
            "fulltitle": "Alpha Title",
            "uploader": "Channel",
            "description": "A short description",
            "duration": 120,
            "view_count": 10,
            "like_count": 2,
            "thumbnail": "https://img/alpha.jpg",
            "upload_date": "20240102",
            "categories": ["Music"],
            "tags": ["t1", "t2", "t3", "t4", "t5", "t6", "t7", "t8", "t9", "t10", "t11", "t12"],
            "webpage_url": "https://www.youtube.com/watch?v=alpha",
            "formats": [
                {"format_id": "18", "url": "https://cdn/18", "ext": "mp4", "height": 360,
                 "vcodec": "avc1", "acodec": "mp4a", "format_note": "360p"},
                {"format_id": "22", "url": "https://cdn/22", "ext": "mp4", "height": 720,
                 "vcodec": "avc1", "acodec": "mp4a", "format_note": "720p"},
                {"format_id": "140", "url": "https://cdn/140", "ext": "m4a",
                 "vcodec": "none", "acodec": "mp4a", "abr": 129.5, "asr": 44100}
            ]
        }))
        .unwrap()
    }

    fn state_with(mock: Arc<MockExtractor>) -> AppState {
        AppState {
            config: Arc::new(test_config()),
            extractor: mock,
        }
    }

    fn download_params(apikey: Option<&str>, url: Option<&str>) -> DownloadParams {
        DownloadParams {
            apikey: apikey.map(str::to_owned),
            url: url.map(str::to_owned),
            ..DownloadParams::default()
        }
    }

    const VALID_URL: &str = "https://www.youtube.com/watch?v=alpha";

    #[tokio::test]
    async fn missing_api_key_short_circuits_before_extraction() {
        let mock = Arc::new(MockExtractor::new(sample_payload()));
        let state = state_with(mock.clone());

        let err = download(State(state), Query(download_params(None, Some(VALID_URL))))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(mock.probes(), 0);
        assert_eq!(mock.resolves(), 0);
    }

    #[tokio::test]
    async fn wrong_api_key_is_rejected() {
        let mock = Arc::new(MockExtractor::new(sample_payload()));
        let state = state_with(mock.clone());

        let err = download(
            State(state),
            Query(download_params(Some("other-key"), Some(VALID_URL))),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);
        assert_eq!(mock.probes(), 0);
    }

    #[tokio::test]
    async fn missing_url_is_a_validation_failure() {
        let mock = Arc::new(MockExtractor::new(sample_payload()));
        let state = state_with(mock.clone());

        let err = download(State(state), Query(download_params(Some("test-key"), None)))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "URL parameter is required");
        assert_eq!(mock.probes(), 0);
    }

    #[tokio::test]
    async fn unrecognized_url_is_a_validation_failure() {
        let mock = Arc::new(MockExtractor::new(sample_payload()));
        let state = state_with(mock.clone());

        let err = download(
            State(state),
            Query(download_params(Some("test-key"), Some("https://vimeo.com/1"))),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Invalid YouTube URL");
        assert_eq!(mock.probes(), 0);
    }

    #[tokio::test]
    async fn over_long_video_aborts_before_resolve() {
        let mut payload = sample_payload();
        payload.duration = Some(3601);
        let mock = Arc::new(MockExtractor::new(payload));
        let state = state_with(mock.clone());

        let err = download(
            State(state),
            Query(download_params(Some("test-key"), Some(VALID_URL))),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("3601"));
        assert!(err.message.contains("3600"));
        assert_eq!(mock.probes(), 1);
        assert_eq!(mock.resolves(), 0);
    }

    #[tokio::test]
    async fn download_success_shapes_the_response() {
        let mock = Arc::new(MockExtractor::new(sample_payload()));
        let state = state_with(mock.clone());

        let Json(response) = download(
            State(state),
            Query(download_params(Some("test-key"), Some(VALID_URL))),
        )
        .await
        .unwrap();

        assert_eq!(response.status, "success");
        assert_eq!(response.requested_format, "mp4");
        assert_eq!(response.requested_quality, "best");
        assert_eq!(response.video_info.id, "alpha");
        assert_eq!(response.video_info.title.as_deref(), Some("Alpha Title"));
        assert_eq!(
            response.video_info.description,
            "A short description..."
        );
        assert_eq!(
            response.video_info.upload_date.as_deref(),
            Some("2024-01-02T00:00:00Z")
        );

        // Two video formats ranked by height; the audio-only one is filtered.
        let ids: Vec<_> = response
            .download_links
            .iter()
            .map(|link| link.format_id.as_deref().unwrap())
            .collect();
        assert_eq!(ids, vec!["22", "18"]);

        assert_eq!(mock.probes(), 1);
        assert_eq!(mock.resolves(), 1);
        assert_eq!(mock.hint(), Some(FormatHint::VideoBest));
    }

    #[tokio::test]
    async fn format_and_quality_parameters_drive_the_hint() {
        let mock = Arc::new(MockExtractor::new(sample_payload()));
        let state = state_with(mock.clone());

        let mut params = download_params(Some("test-key"), Some(VALID_URL));
        params.format = Some("mp3".to_owned());
        let Json(response) = download(State(state.clone()), Query(params)).await.unwrap();
        assert_eq!(mock.hint(), Some(FormatHint::AudioBest));
        assert_eq!(response.requested_format, "mp3");
        let ids: Vec<_> = response
            .download_links
            .iter()
            .map(|link| link.format_id.as_deref().unwrap())
            .collect();
        assert_eq!(ids, vec!["140"]);

        let mut params = download_params(Some("test-key"), Some(VALID_URL));
        params.quality = Some("720p".to_owned());
        let Json(response) = download(State(state), Query(params)).await.unwrap();
        assert_eq!(mock.hint(), Some(FormatHint::VideoHeightCap(720)));
        assert_eq!(response.requested_quality, "720p");
    }

    #[tokio::test]
    async fn info_endpoint_probes_once_and_never_resolves() {
        let mock = Arc::new(MockExtractor::new(sample_payload()));
        let state = state_with(mock.clone());

        let Json(response) = video_info(
            State(state),
            Query(InfoParams {
                apikey: Some("test-key".to_owned()),
                url: Some(VALID_URL.to_owned()),
            }),
        )
        .await
        .unwrap();

        assert_eq!(response.status, "success");
        assert_eq!(response.video_info.like_count, Some(2));
        // Full description, no ellipsis marker.
        assert_eq!(response.video_info.description, "A short description");
        assert_eq!(response.video_info.tags.len(), MAX_TAGS);
        assert_eq!(response.video_info.tags.last().map(String::as_str), Some("t10"));
        assert_eq!(
            response.video_info.webpage_url.as_deref(),
            Some("https://www.youtube.com/watch?v=alpha")
        );
        assert_eq!(mock.probes(), 1);
        assert_eq!(mock.resolves(), 0);
    }

    #[tokio::test]
    async fn extraction_failure_maps_to_bad_request() {
        let state = AppState {
            config: Arc::new(test_config()),
            extractor: Arc::new(FailingExtractor),
        };

        let err = download(
            State(state),
            Query(download_params(Some("test-key"), Some(VALID_URL))),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Unsupported URL: https://example.com");
    }

    #[test]
    fn description_truncation_appends_marker_only_when_non_empty() {
        assert_eq!(truncate_description(""), "");
        assert_eq!(truncate_description("abc"), "abc...");

        let long: String = "x".repeat(600);
        let truncated = truncate_description(&long);
        assert_eq!(truncated.chars().count(), DESCRIPTION_LIMIT + 3);
        assert!(truncated.ends_with("..."));

        // Multi-byte characters must truncate on char boundaries.
        let accented: String = "é".repeat(600);
        let truncated = truncate_description(&accented);
        assert_eq!(truncated.chars().count(), DESCRIPTION_LIMIT + 3);
    }

    #[test]
    fn upload_dates_normalize_to_iso() {
        assert_eq!(normalize_upload_date("20240102"), "2024-01-02T00:00:00Z");
        assert_eq!(normalize_upload_date("2024"), "2024");
        assert_eq!(normalize_upload_date("not-a-date"), "not-a-date");
    }

    #[tokio::test]
    async fn root_and_health_report_service_details() {
        let Json(root) = service_description().await;
        assert_eq!(root["service"], SERVICE_NAME);
        assert_eq!(root["endpoints"]["download"], "/api/youtube-downloader");

        let Json(health_body) = health().await;
        assert_eq!(health_body["status"], "healthy");
        assert!(health_body["timestamp"].is_string());
    }
}
