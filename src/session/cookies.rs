//! Per-account cookie persistence.
//!
//! After a successful QR login the browser cookies are saved to
//! `~/.zhipin-pilot/sessions/{user}.json`. Subsequent runs replay that jar
//! into a fresh page before navigating, so the account stays logged in
//! without showing a QR code again until the session actually expires.

use std::path::PathBuf;

use chromiumoxide::Page;
use tracing::{info, warn};

use crate::core::config::data_dir;

/// The site's login token cookie. Present with a real value only for
/// authenticated sessions.
pub const LOGIN_COOKIE: &str = "wt2";

// ─────────────────────────────────────────────────────────────────────────────
// Paths
// ─────────────────────────────────────────────────────────────────────────────

/// Filesystem-safe key derived from a user id.
pub fn safe_user_key(user: &str) -> String {
    user.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect()
}

pub fn sessions_dir() -> Option<PathBuf> {
    data_dir().map(|d| d.join("sessions"))
}

/// Full path of the cookie jar for a user.
pub fn session_path(user: &str) -> Option<PathBuf> {
    sessions_dir().map(|d| d.join(format!("{}.json", safe_user_key(user))))
}

// ─────────────────────────────────────────────────────────────────────────────
// Expiry
// ─────────────────────────────────────────────────────────────────────────────

/// Drop cookies whose `expires` timestamp is already in the past.
/// `-1` marks a session cookie with no persistent expiry; those are kept.
pub fn drop_expired(raw_cookies: Vec<serde_json::Value>) -> Vec<serde_json::Value> {
    let now = chrono::Utc::now().timestamp() as f64;
    let before = raw_cookies.len();
    let kept: Vec<serde_json::Value> = raw_cookies
        .into_iter()
        .filter(|c| match c.get("expires").and_then(|e| e.as_f64()) {
            Some(exp) if exp > 0.0 => exp > now,
            _ => true,
        })
        .collect();
    if kept.len() < before {
        info!("session: dropped {} expired cookies", before - kept.len());
    }
    kept
}

/// The jar still carries a plausible login token.
pub fn has_login_token(raw_cookies: &[serde_json::Value]) -> bool {
    raw_cookies.iter().any(|c| {
        c.get("name").and_then(|n| n.as_str()) == Some(LOGIN_COOKIE)
            && c.get("value")
                .and_then(|v| v.as_str())
                .map(|v| v.len() > 10)
                .unwrap_or(false)
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Load / save / inject
// ─────────────────────────────────────────────────────────────────────────────

/// Load the stored cookie jar for a user, with expired cookies filtered out.
/// Returns `None` when no usable jar exists.
pub fn load_raw(user: &str) -> Option<Vec<serde_json::Value>> {
    let path = session_path(user)?;
    if !path.exists() {
        return None;
    }
    let content = std::fs::read_to_string(&path).ok()?;
    let cookies: Vec<serde_json::Value> = serde_json::from_str(&content).ok()?;
    let cookies = drop_expired(cookies);
    if cookies.is_empty() {
        return None;
    }
    info!(
        "session: 🍪 loaded {} cookies for '{}' ({})",
        cookies.len(),
        user,
        path.display()
    );
    Some(cookies)
}

/// Snapshot the page's current cookies into the user's jar.
pub async fn save_from_page(page: &Page, user: &str) -> anyhow::Result<()> {
    let cookies = page.get_cookies().await?;
    let raw: Vec<serde_json::Value> = cookies
        .iter()
        .filter_map(|c| serde_json::to_value(c).ok())
        .collect();

    let path = session_path(user)
        .ok_or_else(|| anyhow::anyhow!("home directory unavailable for session store"))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, serde_json::to_string_pretty(&raw)?)?;
    info!("session: 💾 saved {} cookies for '{}'", raw.len(), user);
    Ok(())
}

/// Delete the stored jar so the next run triggers a fresh QR login.
pub fn invalidate(user: &str) {
    if let Some(path) = session_path(user) {
        if path.exists() {
            match std::fs::remove_file(&path) {
                Ok(()) => info!("session: 🗑️  removed stale session for '{}'", user),
                Err(e) => warn!("session: failed to remove {}: {}", path.display(), e),
            }
        }
    }
}

/// Inject stored cookies into a live page before navigation.
///
/// Cookies are deserialized into chromiumoxide [`CookieParam`]s and set via
/// the `Network.setCookies` CDP command. Any individual cookie that fails to
/// deserialize is skipped so a partially-malformed jar never blocks a run.
pub async fn inject_into_page(page: &Page, raw_cookies: &[serde_json::Value]) {
    use chromiumoxide::cdp::browser_protocol::network::{CookieParam, SetCookiesParams};

    let cookie_params: Vec<CookieParam> = raw_cookies
        .iter()
        .filter_map(|v| serde_json::from_value::<CookieParam>(v.clone()).ok())
        .collect();

    if cookie_params.is_empty() {
        warn!("session: stored jar contained no valid CookieParams — skipping injection");
        return;
    }

    let count = cookie_params.len();
    match page.execute(SetCookiesParams::new(cookie_params)).await {
        Ok(_) => info!("session: 💉 injected {} cookies", count),
        Err(e) => warn!("session: failed to inject cookies: {}", e),
    }
}

/// Number of cookies currently on the page; 0 on any error.
pub async fn cookie_count(page: &Page) -> usize {
    page.get_cookies().await.map(|c| c.len()).unwrap_or(0)
}

/// Value of the login token cookie on the live page, if any.
pub async fn live_login_token(page: &Page) -> Option<String> {
    let cookies = page.get_cookies().await.ok()?;
    cookies.iter().find_map(|c| {
        serde_json::to_value(c).ok().and_then(|v| {
            if v.get("name").and_then(|n| n.as_str()) == Some(LOGIN_COOKIE) {
                v.get("value").and_then(|s| s.as_str()).map(|s| s.to_string())
            } else {
                None
            }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_safe_user_key() {
        assert_eq!(safe_user_key("alice_01"), "alice_01");
        assert_eq!(safe_user_key("user@example.com"), "user_example_com");
        assert_eq!(safe_user_key("用户"), "__");
    }

    #[test]
    fn test_drop_expired_keeps_session_cookies() {
        let now = chrono::Utc::now().timestamp() as f64;
        let jar = vec![
            json!({"name": "a", "value": "1", "expires": -1.0}),
            json!({"name": "b", "value": "2", "expires": now + 3600.0}),
            json!({"name": "c", "value": "3", "expires": now - 3600.0}),
            json!({"name": "d", "value": "4"}),
        ];
        let kept = drop_expired(jar);
        let names: Vec<&str> = kept
            .iter()
            .filter_map(|c| c.get("name").and_then(|n| n.as_str()))
            .collect();
        assert_eq!(names, vec!["a", "b", "d"]);
    }

    #[test]
    fn test_login_token_detection() {
        let now = chrono::Utc::now().timestamp() as f64;
        let live = vec![json!({"name": "wt2", "value": "DW9qKj3qL0aVdR8mXe2P", "expires": now + 86400.0})];
        assert!(has_login_token(&live));

        // Placeholder-length values do not count as a live session.
        let stub = vec![json!({"name": "wt2", "value": "x"})];
        assert!(!has_login_token(&stub));
        assert!(!has_login_token(&[]));
    }
}
