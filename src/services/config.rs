//! Stage configuration loaded from `.env`/environment.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageConfig {
    /// Backend serving `/achievement/{id}` and `/playtime`.
    pub api_base_url: String,
    /// Overrides `<exe_dir>/savedata`.
    pub data_dir: Option<PathBuf>,
    pub hide_delay: Duration,
    pub proximity_px: f32,
    pub fade_seconds: f32,
    pub poll_interval: Duration,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            data_dir: None,
            hide_delay: Duration::from_millis(1000),
            proximity_px: 50.0,
            fade_seconds: 0.4,
            poll_interval: Duration::from_secs(10),
        }
    }
}

fn normalize_api_base(base_url: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    if base.is_empty() {
        return DEFAULT_API_BASE_URL.to_string();
    }
    if base.starts_with("http://") || base.starts_with("https://") {
        base.to_string()
    } else {
        format!("http://{base}")
    }
}

impl StageConfig {
    /// Load configuration from `.env`/environment.
    ///
    /// Reads:
    /// - `RCAT_API_BASE_URL` (fallback: `API_BASE_URL`)
    /// - `RCAT_DATA_DIR`
    /// - `AVATAR_HIDE_DELAY_MS`, `AVATAR_PROXIMITY_PX`, `AVATAR_FADE_MS`
    /// - `ACHIEVEMENT_POLL_SECS`
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let api_base_url = std::env::var("RCAT_API_BASE_URL")
            .or_else(|_| std::env::var("API_BASE_URL"))
            .map(|v| normalize_api_base(&v))
            .unwrap_or(defaults.api_base_url);

        let data_dir = std::env::var("RCAT_DATA_DIR")
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        Self {
            api_base_url,
            data_dir,
            hide_delay: Duration::from_millis(
                env_u64("AVATAR_HIDE_DELAY_MS", 1000).clamp(0, 60_000),
            ),
            proximity_px: env_f32("AVATAR_PROXIMITY_PX", defaults.proximity_px).clamp(0.0, 2000.0),
            fade_seconds: env_u64("AVATAR_FADE_MS", 400).clamp(0, 10_000) as f32 / 1000.0,
            poll_interval: Duration::from_secs(env_u64("ACHIEVEMENT_POLL_SECS", 10).clamp(1, 3600)),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    parse_u64(std::env::var(key).ok().as_deref()).unwrap_or(default)
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<f32>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

fn parse_u64(raw: Option<&str>) -> Option<u64> {
    raw.and_then(|v| v.trim().parse::<u64>().ok())
}
