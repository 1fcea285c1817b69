//! Greeting composition.
//!
//! A remote composer service can tailor the first message to the posting
//! (title, company, job description). It is strictly optional: any failure
//! or empty response falls back to the configured static greeting.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::config::ComposerConfig;

#[async_trait]
pub trait MessageComposer: Send + Sync {
    /// A tailored greeting for this posting, or an error when the composer
    /// cannot produce one.
    async fn compose(&self, req: &ComposeRequest) -> Result<String>;
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ComposeRequest {
    pub user_id: String,
    pub job_name: String,
    pub company: String,
    pub job_description: String,
}

/// Composer that never produces anything; the static greeting always wins.
pub struct DisabledComposer;

#[async_trait]
impl MessageComposer for DisabledComposer {
    async fn compose(&self, _req: &ComposeRequest) -> Result<String> {
        Err(anyhow!("composer disabled"))
    }
}

/// HTTP composer: POSTs the request as JSON and expects the greeting as the
/// response body (plain text or a JSON string).
pub struct HttpComposer {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpComposer {
    pub fn from_config(cfg: &ComposerConfig) -> Option<Self> {
        if !cfg.enabled {
            return None;
        }
        let endpoint = cfg.endpoint.clone()?;
        if let Err(e) = url::Url::parse(&endpoint) {
            warn!("composer: endpoint '{}' is not a valid URL: {}", endpoint, e);
            return None;
        }
        let timeout = Duration::from_secs(cfg.timeout_secs.unwrap_or(30));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| warn!("composer: client build failed: {}", e))
            .ok()?;
        Some(Self { client, endpoint })
    }

    async fn post_once(&self, req: &ComposeRequest) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(req)
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        // Tolerate services that wrap the greeting in a JSON string.
        let text = serde_json::from_str::<String>(&body).unwrap_or(body);
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl MessageComposer for HttpComposer {
    async fn compose(&self, req: &ComposeRequest) -> Result<String> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(500))
            .with_max_elapsed_time(Some(Duration::from_secs(20)))
            .build();

        let text = backoff::future::retry(policy, || async {
            self.post_once(req).await.map_err(|e| {
                debug!("composer: request failed, retrying: {}", e);
                backoff::Error::transient(e)
            })
        })
        .await?;

        if text.is_empty() {
            return Err(anyhow!("composer returned an empty greeting"));
        }
        Ok(text)
    }
}

/// The message that will actually be sent: composed greeting when available,
/// otherwise the static `say_hi` with newlines flattened (the chat input is
/// single-line). `None` means there is nothing sensible to send.
pub async fn resolve_greeting(
    composer: Option<&dyn MessageComposer>,
    req: &ComposeRequest,
    say_hi: &str,
) -> Option<String> {
    if let Some(composer) = composer {
        match composer.compose(req).await {
            Ok(text) => {
                info!("💬 composed greeting ({} chars)", text.chars().count());
                return Some(text);
            }
            Err(e) => warn!("composer failed, falling back to static greeting: {}", e),
        }
    }

    let fallback: String = say_hi.replace(['\r', '\n'], " ").trim().to_string();
    if fallback.is_empty() {
        None
    } else {
        Some(fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req() -> ComposeRequest {
        ComposeRequest {
            user_id: "u1".into(),
            job_name: "市场总监".into(),
            company: "某某科技".into(),
            job_description: "负责市场体系搭建".into(),
        }
    }

    #[tokio::test]
    async fn test_fallback_flattens_newlines() {
        let greeting = resolve_greeting(None, &req(), "您好，\r\n我对这个职位很感兴趣。\n期待沟通")
            .await
            .unwrap();
        assert!(!greeting.contains('\n'));
        assert!(!greeting.contains('\r'));
        assert!(greeting.starts_with("您好，"));
    }

    #[tokio::test]
    async fn test_failing_composer_falls_back() {
        let composer = DisabledComposer;
        let greeting = resolve_greeting(Some(&composer), &req(), "你好").await;
        assert_eq!(greeting.as_deref(), Some("你好"));
    }

    #[tokio::test]
    async fn test_nothing_to_send() {
        assert!(resolve_greeting(None, &req(), "  ").await.is_none());
        let composer = DisabledComposer;
        assert!(resolve_greeting(Some(&composer), &req(), "").await.is_none());
    }

    #[test]
    fn test_request_serializes_camel_case() {
        let v = serde_json::to_value(req()).unwrap();
        assert!(v.get("userId").is_some());
        assert!(v.get("jobName").is_some());
        assert!(v.get("jobDescription").is_some());
    }
}
