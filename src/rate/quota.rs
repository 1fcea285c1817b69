//! External per-account delivery quota.
//!
//! Unlike the in-process rate gates, the quota store is authoritative across
//! processes: `check` failing (or erroring) aborts the whole run, never just
//! one posting. `consume` errors after a verified send are logged and
//! swallowed so a ledger hiccup cannot un-send a message.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use chrono::Local;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Deliveries already consumed today. Used to seed the rate controller.
    async fn used_today(&self, user: &str) -> Result<u32>;

    /// `Ok(true)` when at least one delivery remains. Callers treat `Err`
    /// the same as `Ok(false)`: fail closed.
    async fn check(&self, user: &str) -> Result<bool>;

    /// Record one consumed delivery.
    async fn consume(&self, user: &str) -> Result<()>;
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct QuotaLedger {
    date: String,
    used: u32,
}

impl QuotaLedger {
    fn today() -> Self {
        Self { date: Local::now().format("%Y-%m-%d").to_string(), used: 0 }
    }
}

/// File-backed quota store: one `{user}.json` ledger per account under
/// `~/.zhipin-pilot/quota/`, guarded by an exclusive flock so concurrent
/// runs for the same account cannot double-spend.
pub struct FileQuotaStore {
    dir: PathBuf,
    daily_limit: u32,
}

impl FileQuotaStore {
    pub fn new(dir: PathBuf, daily_limit: u32) -> Self {
        Self { dir, daily_limit }
    }

    fn ledger_path(&self, user: &str) -> PathBuf {
        let safe: String = user
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", safe))
    }

    /// One locked read-modify-write of the ledger, with a short retry in
    /// case a concurrent run for the same account holds the lock. File
    /// locking is blocking so the whole transaction runs on the blocking
    /// pool.
    async fn with_ledger(&self, user: &str, increment: bool) -> Result<QuotaLedger> {
        let path = self.ledger_path(user);
        let dir = self.dir.clone();

        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(100))
            .with_max_elapsed_time(Some(Duration::from_secs(3)))
            .build();

        backoff::future::retry(policy, || {
            let path = path.clone();
            let dir = dir.clone();
            async move {
                tokio::task::spawn_blocking(move || ledger_transaction(&dir, &path, increment))
                    .await
                    .map_err(|e| anyhow!("quota ledger task panicked: {}", e))
                    .and_then(|r| r)
                    .map_err(|e| {
                        warn!("quota: ledger access failed, retrying: {}", e);
                        backoff::Error::transient(e)
                    })
            }
        })
        .await
    }
}

fn ledger_transaction(dir: &PathBuf, path: &PathBuf, increment: bool) -> Result<QuotaLedger> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating quota dir {}", dir.display()))?;

    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(path)
        .with_context(|| format!("opening quota ledger {}", path.display()))?;
    file.lock_exclusive()
        .with_context(|| format!("locking quota ledger {}", path.display()))?;

    let result = (|| -> Result<QuotaLedger> {
        let contents = std::fs::read_to_string(path)?;
        let mut ledger: QuotaLedger = if contents.trim().is_empty() {
            QuotaLedger::today()
        } else {
            serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!("quota: corrupt ledger {} ({}), resetting", path.display(), e);
                QuotaLedger::today()
            })
        };

        let today = Local::now().format("%Y-%m-%d").to_string();
        if ledger.date != today {
            debug!("quota: ledger rollover {} -> {}", ledger.date, today);
            ledger = QuotaLedger { date: today, used: 0 };
        }

        if increment {
            ledger.used += 1;
        }
        std::fs::write(path, serde_json::to_string_pretty(&ledger)?)?;
        Ok(ledger)
    })();

    // Unlock before returning either way.
    let _ = fs2::FileExt::unlock(&file);
    result
}

#[async_trait]
impl QuotaStore for FileQuotaStore {
    async fn used_today(&self, user: &str) -> Result<u32> {
        let ledger = self.with_ledger(user, false).await?;
        Ok(ledger.used)
    }

    async fn check(&self, user: &str) -> Result<bool> {
        let ledger = self.with_ledger(user, false).await?;
        let ok = ledger.used < self.daily_limit;
        if !ok {
            info!(
                "quota: '{}' exhausted ({}/{} used today)",
                user, ledger.used, self.daily_limit
            );
        }
        Ok(ok)
    }

    async fn consume(&self, user: &str) -> Result<()> {
        let ledger = self.with_ledger(user, true).await?;
        info!("quota: '{}' consumed 1 ({}/{} today)", user, ledger.used, self.daily_limit);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(limit: u32) -> FileQuotaStore {
        let dir = std::env::temp_dir().join(format!("zhipin-quota-{}", uuid::Uuid::new_v4()));
        FileQuotaStore::new(dir, limit)
    }

    #[tokio::test]
    async fn test_fresh_ledger_starts_at_zero() {
        let store = temp_store(5);
        assert_eq!(store.used_today("alice").await.unwrap(), 0);
        assert!(store.check("alice").await.unwrap());
    }

    #[tokio::test]
    async fn test_consume_counts_up_to_the_limit() {
        let store = temp_store(2);
        store.consume("bob").await.unwrap();
        assert!(store.check("bob").await.unwrap());
        store.consume("bob").await.unwrap();
        assert!(!store.check("bob").await.unwrap());
        assert_eq!(store.used_today("bob").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_users_have_separate_ledgers() {
        let store = temp_store(1);
        store.consume("carol").await.unwrap();
        assert!(!store.check("carol").await.unwrap());
        assert!(store.check("dave").await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_ledger_resets_instead_of_failing() {
        let store = temp_store(5);
        let path = store.ledger_path("eve");
        std::fs::create_dir_all(&store.dir).unwrap();
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(store.used_today("eve").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stale_date_rolls_over() {
        let store = temp_store(5);
        let path = store.ledger_path("frank");
        std::fs::create_dir_all(&store.dir).unwrap();
        std::fs::write(&path, r#"{"date":"2020-01-01","used":5}"#).unwrap();
        assert_eq!(store.used_today("frank").await.unwrap(), 0);
        assert!(store.check("frank").await.unwrap());
    }

    #[test]
    fn test_user_key_is_sanitized() {
        let store = temp_store(1);
        let path = store.ledger_path("user@邮箱/../x");
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(name, "user_______x.json");
    }
}
