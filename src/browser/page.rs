//! Page interaction helpers shared by the login, search and delivery flows.
//!
//! Most DOM work goes through `page.evaluate` with small JS snippets instead
//! of element handles: the site re-renders list nodes aggressively and stale
//! element references are the most common failure mode.

use std::time::Duration;

use anyhow::Result;
use chromiumoxide::Page;
use rand::prelude::*;
use tracing::debug;

/// Quote a CSS selector for safe embedding in a JS snippet.
pub fn js_quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

pub async fn eval_string(page: &Page, js: &str) -> Result<String> {
    Ok(page.evaluate(js).await?.into_value::<String>()?)
}

pub async fn eval_json(page: &Page, js: &str) -> Result<serde_json::Value> {
    Ok(page.evaluate(js).await?.into_value::<serde_json::Value>()?)
}

/// `true` / `false` from a JS expression; any error counts as `false`.
pub async fn eval_bool(page: &Page, js: &str) -> bool {
    match page.evaluate(js).await {
        Ok(v) => v.into_value::<bool>().unwrap_or(false),
        Err(e) => {
            debug!("eval_bool failed: {}", e);
            false
        }
    }
}

/// Element exists in the DOM (visible or not).
pub async fn exists(page: &Page, selector: &str) -> bool {
    let js = format!("!!document.querySelector({})", js_quote(selector));
    eval_bool(page, &js).await
}

/// Element exists and has a non-empty layout box.
pub async fn is_visible(page: &Page, selector: &str) -> bool {
    let js = format!(
        r#"(() => {{
            const el = document.querySelector({});
            if (!el) return false;
            const r = el.getBoundingClientRect();
            const style = window.getComputedStyle(el);
            return r.width > 0 && r.height > 0 && style.display !== 'none' && style.visibility !== 'hidden';
        }})()"#,
        js_quote(selector)
    );
    eval_bool(page, &js).await
}

pub async fn count(page: &Page, selector: &str) -> u64 {
    let js = format!("document.querySelectorAll({}).length", js_quote(selector));
    match eval_json(page, &js).await {
        Ok(v) => v.as_u64().unwrap_or(0),
        Err(_) => 0,
    }
}

pub async fn inner_text(page: &Page, selector: &str) -> Option<String> {
    let js = format!(
        r#"(() => {{
            const el = document.querySelector({});
            return el ? el.innerText.trim() : null;
        }})()"#,
        js_quote(selector)
    );
    match eval_json(page, &js).await {
        Ok(serde_json::Value::String(s)) => Some(s),
        _ => None,
    }
}

/// JS-level click on the first match. Returns `false` when nothing matched.
pub async fn click(page: &Page, selector: &str) -> bool {
    let js = format!(
        r#"(() => {{
            const el = document.querySelector({});
            if (!el) return false;
            el.click();
            return true;
        }})()"#,
        js_quote(selector)
    );
    eval_bool(page, &js).await
}

pub async fn scroll_to_bottom(page: &Page) -> Result<()> {
    page.evaluate("window.scrollTo(0, document.body.scrollHeight);")
        .await?;
    Ok(())
}

/// Humanized sleep: uniform between `min_ms` and `max_ms`.
pub async fn sleep_range(min_ms: u64, max_ms: u64) {
    let ms = if max_ms > min_ms {
        rand::rng().random_range(min_ms..=max_ms)
    } else {
        min_ms
    };
    tokio::time::sleep(Duration::from_millis(ms)).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_quote_escapes_quotes() {
        assert_eq!(js_quote("a[href*='/web/']"), r#""a[href*='/web/']""#);
        assert_eq!(js_quote(r#"div[title="x"]"#), r#""div[title=\"x\"]""#);
    }

    #[tokio::test]
    async fn test_sleep_range_degenerate_bounds() {
        // max <= min falls back to min without panicking.
        let start = tokio::time::Instant::now();
        sleep_range(10, 10).await;
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn test_sleep_range_samples_within_bounds() {
        let start = tokio::time::Instant::now();
        sleep_range(5, 20).await;
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(5));
    }
}
