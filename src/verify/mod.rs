//! Verification challenge detection and human-in-the-loop resolution.
//!
//! The site interrupts deliveries with SMS-code checks. Detection looks at
//! the live page; resolution screenshots the challenge, publishes it on the
//! [`channel::HandoffChannel`], waits for a code, and submits it. An
//! unresolved challenge aborts the run: continuing to click through a
//! security check is how accounts get banned.

pub mod channel;

use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use chrono::Local;
use tracing::{info, warn};

use crate::browser::page as pg;
use crate::core::types::RunAbort;
use crate::notify::{BehaviorEvent, EventSink};
use crate::session::cookies::safe_user_key;
use channel::{Challenge, HandoffChannel};

/// How long the external resolver has to produce a code.
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(300);
const RESPONSE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// SMS-code inputs in the order the site has been seen rendering them.
const SMS_INPUT_SELECTORS: &[&str] = &[
    "input[name='phoneCode']",
    "input[class*='ipt-sms']",
    "input[placeholder*='验证码']",
    "input[placeholder*='短信验证码']",
];

/// The page is currently showing a verification challenge: an SMS input, a
/// challenge-looking title, or a challenge URL.
pub async fn challenge_present(page: &Page) -> bool {
    for sel in SMS_INPUT_SELECTORS {
        if pg::is_visible(page, sel).await {
            return true;
        }
    }

    if let Ok(Some(title)) = page.get_title().await {
        if title.contains("验证") || title.contains("安全") {
            return true;
        }
    }

    let url = page.url().await.ok().flatten().unwrap_or_default();
    ["verify", "captcha", "security"]
        .iter()
        .any(|p| url.contains(p))
}

/// Poll the channel until a code arrives or `deadline` passes. Channel errors
/// are logged and treated as "no response yet".
pub async fn poll_for_code(
    channel: &dyn HandoffChannel,
    user_id: &str,
    task_id: &str,
    deadline: tokio::time::Instant,
) -> Option<String> {
    loop {
        match channel.try_take_response(user_id, task_id).await {
            Ok(Some(code)) => return Some(code),
            Ok(None) => {}
            Err(e) => warn!("verify: response poll failed: {}", e),
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(RESPONSE_POLL_INTERVAL).await;
    }
}

/// Resolve a detected challenge end to end. `Err` always carries
/// [`RunAbort::VerificationUnresolved`]; the caller must end the run.
pub async fn resolve_challenge(
    page: &Page,
    channel: &dyn HandoffChannel,
    events: &dyn EventSink,
    user_id: &str,
    job_name: &str,
) -> Result<(), RunAbort> {
    let screenshot_path = capture_challenge(page, user_id).await;
    let task_id = uuid::Uuid::new_v4().to_string();

    let challenge = Challenge {
        user_id: user_id.to_string(),
        job_name: job_name.to_string(),
        screenshot_path: screenshot_path.clone().unwrap_or_default(),
        task_id: task_id.clone(),
        timestamp: chrono::Utc::now().timestamp_millis(),
    };

    let request_location = channel
        .publish(&challenge)
        .await
        .map_err(|e| RunAbort::VerificationUnresolved(format!("handoff publish failed: {}", e)))?;

    // Stable stdout marker; wrapper processes watch for this line.
    println!("🔐 VERIFICATION_CODE_REQUIRED: {}", request_location);
    events
        .emit(
            BehaviorEvent::new(user_id, "verification", "requested", job_name)
                .with_extra(serde_json::json!({ "taskId": task_id })),
        )
        .await;

    let deadline = tokio::time::Instant::now() + RESPONSE_TIMEOUT;
    let Some(code) = poll_for_code(channel, user_id, &task_id, deadline).await else {
        events
            .emit(BehaviorEvent::new(user_id, "verification", "failed", "no code received"))
            .await;
        return Err(RunAbort::VerificationUnresolved(
            "no verification code received before the deadline".to_string(),
        ));
    };

    submit_code(page, &code).await?;
    events
        .emit(BehaviorEvent::new(user_id, "verification", "success", job_name))
        .await;
    Ok(())
}

/// Full-page screenshot of the challenge, for the external resolver.
async fn capture_challenge(page: &Page, user_id: &str) -> Option<String> {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let path = std::env::temp_dir().join(format!(
        "boss_captcha_{}_{}.png",
        safe_user_key(user_id),
        stamp
    ));
    let params = ScreenshotParams::builder()
        .format(CaptureScreenshotFormat::Png)
        .full_page(true)
        .build();
    match page.save_screenshot(params, &path).await {
        Ok(_) => {
            info!("verify: 📷 challenge screenshot at {}", path.display());
            Some(path.display().to_string())
        }
        Err(e) => {
            warn!("verify: challenge screenshot failed: {}", e);
            None
        }
    }
}

/// Type the code into the SMS input, submit, and confirm the challenge is
/// gone.
async fn submit_code(page: &Page, code: &str) -> Result<(), RunAbort> {
    let mut filled = false;
    for sel in SMS_INPUT_SELECTORS {
        if !pg::is_visible(page, sel).await {
            continue;
        }
        let js = format!(
            r#"(() => {{
                const el = document.querySelector({});
                if (!el) return false;
                el.focus();
                el.value = {};
                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return true;
            }})()"#,
            pg::js_quote(sel),
            pg::js_quote(code)
        );
        if pg::eval_bool(page, &js).await {
            filled = true;
            break;
        }
    }
    if !filled {
        return Err(RunAbort::VerificationUnresolved(
            "SMS input disappeared before the code could be entered".to_string(),
        ));
    }

    pg::sleep_range(500, 1000).await;

    let submitted = pg::eval_bool(
        page,
        r#"(() => {
            const direct = document.querySelector("button[type='submit']");
            if (direct) { direct.click(); return true; }
            for (const btn of document.querySelectorAll('button, .btn, [role="button"]')) {
                const t = (btn.innerText || '').trim();
                if (t.includes('提交') || t.includes('确认') || t.includes('验证')) {
                    btn.click();
                    return true;
                }
            }
            return false;
        })()"#,
    )
    .await;
    if !submitted {
        return Err(RunAbort::VerificationUnresolved(
            "no submit button found for the verification code".to_string(),
        ));
    }

    pg::sleep_range(2000, 3000).await;

    if challenge_present(page).await {
        return Err(RunAbort::VerificationUnresolved(
            "challenge still present after submitting the code".to_string(),
        ));
    }
    info!("verify: ✅ challenge cleared");
    Ok(())
}
