use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::BackendError;
use crate::services::config::StageConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Remote side of the achievement system.
pub trait AchievementBackend: Send + Sync {
    /// Confirm an unlock. Only an `Ok` makes the unlock stick locally.
    fn unlock(&self, id: &str) -> BoxFuture<'_, Result<(), BackendError>>;

    /// Report `seconds` of new playtime; returns the cumulative total.
    fn update_playtime(&self, seconds: u64) -> BoxFuture<'_, Result<u64, BackendError>>;
}

#[derive(Debug, Serialize)]
struct PlaytimeRequest {
    seconds: u64,
}

#[derive(Debug, Deserialize)]
struct PlaytimeResponse {
    #[serde(alias = "totalSeconds", alias = "total_playtime")]
    total_seconds: u64,
}

#[derive(Clone)]
pub struct HttpAchievementBackend {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAchievementBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|err| {
                log::warn!("achievements: custom HTTP client failed ({}), using default", err);
                reqwest::Client::new()
            });
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn from_config(config: &StageConfig) -> Self {
        Self::new(config.api_base_url.clone())
    }
}

fn check_status(status: reqwest::StatusCode) -> Result<(), BackendError> {
    if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
        return Err(BackendError::not_ready("service not ready (503)"));
    }
    if !status.is_success() {
        return Err(BackendError::http(format!("unexpected status {}", status)));
    }
    Ok(())
}

impl AchievementBackend for HttpAchievementBackend {
    fn unlock(&self, id: &str) -> BoxFuture<'_, Result<(), BackendError>> {
        let url = format!("{}/achievement/{}", self.base_url, id);
        Box::pin(async move {
            let resp = self.client.post(&url).send().await?;
            check_status(resp.status())
        })
    }

    fn update_playtime(&self, seconds: u64) -> BoxFuture<'_, Result<u64, BackendError>> {
        let url = format!("{}/playtime", self.base_url);
        Box::pin(async move {
            let resp = self
                .client
                .post(&url)
                .json(&PlaytimeRequest { seconds })
                .send()
                .await?;
            check_status(resp.status())?;
            let body: PlaytimeResponse = resp.json().await?;
            Ok(body.total_seconds)
        })
    }
}
