//! Filesystem handoff for verification challenges.
//!
//! When the site demands an SMS code mid-delivery, the run cannot proceed on
//! its own: a human (or a companion app watching the directory) must read the
//! screenshot and supply the code. The exchange happens through JSON files in
//! the temp directory; the file names are a stable wire format that external
//! watchers already understand, so they are not to be changed.

use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::session::cookies::safe_user_key;

/// A pending verification challenge published for an external resolver.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub user_id: String,
    pub job_name: String,
    /// Full-page screenshot showing the challenge.
    pub screenshot_path: String,
    pub task_id: String,
    /// Unix millis at publication.
    pub timestamp: i64,
}

#[derive(Deserialize, Debug)]
struct ChallengeResponse {
    code: String,
}

#[async_trait]
pub trait HandoffChannel: Send + Sync {
    /// Publish a challenge for external resolution. Returns the location the
    /// operator should be pointed at.
    async fn publish(&self, challenge: &Challenge) -> Result<String>;

    /// One non-blocking look for a response. Consuming: a returned code is
    /// removed from the channel so it can never be replayed.
    async fn try_take_response(&self, user_id: &str, task_id: &str) -> Result<Option<String>>;
}

/// File-based channel in the system temp directory.
pub struct FileHandoffChannel {
    dir: PathBuf,
}

impl FileHandoffChannel {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn in_temp_dir() -> Self {
        Self::new(std::env::temp_dir())
    }

    fn request_path(&self, user_id: &str, timestamp: i64) -> PathBuf {
        self.dir.join(format!(
            "boss_verification_request_{}_{}.json",
            safe_user_key(user_id),
            timestamp
        ))
    }

    fn response_path(&self, user_id: &str, task_id: &str) -> PathBuf {
        self.dir.join(format!(
            "boss_verification_response_{}_{}.json",
            safe_user_key(user_id),
            task_id
        ))
    }
}

#[async_trait]
impl HandoffChannel for FileHandoffChannel {
    async fn publish(&self, challenge: &Challenge) -> Result<String> {
        let path = self.request_path(&challenge.user_id, challenge.timestamp);
        let json = serde_json::to_string_pretty(challenge)?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("writing verification request {}", path.display()))?;
        info!("verify: 📨 challenge published at {}", path.display());
        Ok(path.display().to_string())
    }

    async fn try_take_response(&self, user_id: &str, task_id: &str) -> Result<Option<String>> {
        let path = self.response_path(user_id, task_id);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        // Consume before parsing so a malformed file is not re-read forever.
        if let Err(e) = tokio::fs::remove_file(&path).await {
            debug!("verify: could not remove response file: {}", e);
        }

        let response: ChallengeResponse = serde_json::from_str(&contents)
            .with_context(|| format!("parsing verification response {}", path.display()))?;
        let code = response.code.trim().to_string();
        if code.is_empty() {
            return Ok(None);
        }
        info!("verify: 🔑 response received for task {}", task_id);
        Ok(Some(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_channel() -> FileHandoffChannel {
        let dir = std::env::temp_dir().join(format!("zhipin-verify-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        FileHandoffChannel::new(dir)
    }

    fn challenge(user: &str, task: &str) -> Challenge {
        Challenge {
            user_id: user.to_string(),
            job_name: "市场总监".to_string(),
            screenshot_path: "/tmp/shot.png".to_string(),
            task_id: task.to_string(),
            timestamp: 1_700_000_000_000,
        }
    }

    #[tokio::test]
    async fn test_publish_writes_wire_format_file_name() {
        let ch = temp_channel();
        let path = ch.publish(&challenge("u@1", "t1")).await.unwrap();
        assert!(path.ends_with("boss_verification_request_u_1_1700000000000.json"));
        let contents = std::fs::read_to_string(&path).unwrap();
        let v: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(v["taskId"], "t1");
        assert_eq!(v["jobName"], "市场总监");
    }

    #[tokio::test]
    async fn test_response_is_consumed_once() {
        let ch = temp_channel();
        let path = ch.response_path("alice", "t42");
        std::fs::write(&path, r#"{"code": "123456"}"#).unwrap();

        assert_eq!(
            ch.try_take_response("alice", "t42").await.unwrap().as_deref(),
            Some("123456")
        );
        // File removed: a second take finds nothing.
        assert!(ch.try_take_response("alice", "t42").await.unwrap().is_none());
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_missing_response_is_none() {
        let ch = temp_channel();
        assert!(ch.try_take_response("bob", "t0").await.unwrap().is_none());
    }
}
