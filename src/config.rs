use anyhow::{Context, Result, anyhow};
use std::{fs, path::Path};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/tubelink-env";
pub const DEFAULT_TUBELINK_PORT: u16 = 5000;
pub const DEFAULT_TUBELINK_HOST: &str = "0.0.0.0";
/// Maximum probed video duration in seconds (1 hour).
pub const DEFAULT_MAX_DURATION: i64 = 3600;

#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub api_key: Option<String>,
    pub max_duration: Option<i64>,
    pub tubelink_port: Option<u16>,
    pub tubelink_host: Option<String>,
}

/// Immutable per-process configuration. Built once at startup and shared by
/// every request handler; the API key never changes while the server runs.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub api_key: String,
    pub max_duration: i64,
    pub tubelink_port: u16,
    pub tubelink_host: String,
}

impl ServiceConfig {
    /// Exact string comparison against the configured key. A missing value
    /// never authorizes.
    pub fn authorize(&self, provided: Option<&str>) -> bool {
        provided.is_some_and(|key| key == self.api_key)
    }
}

pub fn read_env_config(path: &Path) -> Result<Option<EnvConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    let mut cfg = EnvConfig::default();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if let Some((key, value_raw)) = trimmed.split_once('=') {
            let value = value_raw.trim().trim_matches('"');
            match key {
                "API_KEY" => {
                    if !value.is_empty() {
                        cfg.api_key = Some(value.to_string());
                    }
                }
                "MAX_DURATION" => {
                    let seconds: i64 = value.parse().with_context(|| {
                        format!("Parsing MAX_DURATION from {}", path.display())
                    })?;
                    cfg.max_duration = Some(seconds);
                }
                "TUBELINK_PORT" => {
                    let port: u16 = value.parse().with_context(|| {
                        format!("Parsing TUBELINK_PORT from {}", path.display())
                    })?;
                    cfg.tubelink_port = Some(port);
                }
                "TUBELINK_HOST" => {
                    if !value.is_empty() {
                        cfg.tubelink_host = Some(value.to_string());
                    }
                }
                _ => {}
            }
        }
    }
    Ok(Some(cfg))
}

pub fn load_service_config() -> Result<ServiceConfig> {
    load_service_config_from(Path::new(DEFAULT_CONFIG_PATH))
}

pub fn load_service_config_from(path: impl AsRef<Path>) -> Result<ServiceConfig> {
    let path = path.as_ref();
    let cfg = read_env_config(path)?
        .ok_or_else(|| anyhow!("Missing config file at {}", path.display()))?;
    let api_key = cfg
        .api_key
        .ok_or_else(|| anyhow!("API_KEY not set in {}", path.display()))?;
    let max_duration = cfg.max_duration.unwrap_or(DEFAULT_MAX_DURATION);
    let tubelink_port = cfg.tubelink_port.unwrap_or(DEFAULT_TUBELINK_PORT);
    let tubelink_host = cfg
        .tubelink_host
        .clone()
        .unwrap_or_else(|| DEFAULT_TUBELINK_HOST.to_string());
    Ok(ServiceConfig {
        api_key,
        max_duration,
        tubelink_port,
        tubelink_host,
    })
}
