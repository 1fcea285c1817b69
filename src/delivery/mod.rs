//! Delivery executor: open the posting's detail page, start a chat, write
//! the greeting, optionally attach the image resume, send, and verify the
//! send actually happened.
//!
//! Every exit path closes the detail tab. Anything verification-related
//! escalates to a run abort instead of being retried: hammering a security
//! check is the one thing guaranteed to burn the account.

pub mod composer;

use std::time::Duration;

use chromiumoxide::Page;
use tracing::{debug, info, warn};

use crate::browser::{page as pg, BrowserHandle};
use crate::core::config::PilotConfig;
use crate::core::types::{DeliveryVerdict, FailReason, Posting, SkipReason};
use crate::matcher::blacklist::Blacklist;
use crate::matcher::recruiter_inactive;
use crate::notify::{BehaviorEvent, EventSink};
use crate::verify;
use crate::verify::channel::HandoffChannel;
use composer::{ComposeRequest, MessageComposer};

const SITE_ORIGIN: &str = "https://www.zhipin.com";

/// Chat entry button on the detail page. `立即沟通` is the not-yet-contacted
/// state; `继续沟通` means a conversation already exists.
const CHAT_BUTTON_SELECTORS: &[&str] = &["a.btn-startchat", "a.op-btn-chat"];
const CHAT_BUTTON_TEXT: &str = "立即沟通";
const CHAT_BUTTON_RETRIES: usize = 5;

/// The conversation view, across the site's layout variants.
const CHAT_DIALOG_SELECTORS: &[&str] = &[
    ".chat-conversation",
    ".dialog-wrap",
    ".chat-box",
    ".conversation-wrap",
    "#chat-input",
    ".chat-input",
    ".dialog-container",
];
const CHAT_URL_PARTS: &[&str] = &["/chat/", "/im/", "/message/"];
const DIALOG_WAIT_POLLS: usize = 30;

/// Message input candidates, checked in order.
const INPUT_SELECTORS: &[&str] = &[
    "#chat-input",
    "div.chat-input[contenteditable='true']",
    "div[contenteditable='true']",
    "textarea.input-area",
    "textarea",
];
const INPUT_WAIT_POLLS: usize = 20;
const INPUT_FAST_POLLS: usize = 5;

/// Inputs that look like message boxes but must never receive the greeting.
const INPUT_EXCLUSION_JS: &str = r#"
    (el) => {
        const cls = (el.className || '').toString();
        if (cls.includes('ipt-search') || cls.includes('search') || cls.includes('ipt-sms')) return true;
        const name = el.getAttribute('name') || '';
        if (name === 'query' || name === 'phoneCode') return true;
        const ph = el.getAttribute('placeholder') || '';
        if (ph.includes('搜索') || ph.includes('验证码')) return true;
        return false;
    }
"#;

const SEND_BUTTON_SELECTORS: &[&str] = &[
    "div.send-message",
    "button[type='send'].btn-send",
    "button.btn-send",
];

const RESUME_FILE_INPUT_XPATH: &str = "//div[@aria-label='发送图片']//input[@type='file']";

// ─────────────────────────────────────────────────────────────────────────────
// Send verification (pure)
// ─────────────────────────────────────────────────────────────────────────────

/// Signals scraped from the page right after clicking send.
#[derive(Debug, Default, Clone, Copy)]
pub struct SendSignals {
    pub error_toast: bool,
    pub success_indicator: bool,
    pub input_cleared: bool,
    pub message_in_list: bool,
    pub chat_url: bool,
}

/// Decide whether the greeting was actually sent.
///
/// An error toast vetoes everything. Otherwise a positive indicator passes,
/// and so does a cleared input combined with either the message appearing in
/// the conversation or the page being on a chat URL.
pub fn confirms_send(s: &SendSignals) -> bool {
    if s.error_toast {
        return false;
    }
    s.success_indicator || (s.input_cleared && (s.message_in_list || s.chat_url))
}

// ─────────────────────────────────────────────────────────────────────────────
// Executor
// ─────────────────────────────────────────────────────────────────────────────

pub struct DeliveryExecutor<'a> {
    pub browser: &'a BrowserHandle,
    pub cfg: &'a PilotConfig,
    pub blacklist: &'a Blacklist,
    pub composer: Option<&'a dyn MessageComposer>,
    pub channel: &'a dyn HandoffChannel,
    pub events: &'a dyn EventSink,
    pub user: &'a str,
}

impl<'a> DeliveryExecutor<'a> {
    /// Attempt one delivery. Never panics, never leaves the detail tab open.
    pub async fn deliver(&self, posting: &Posting) -> DeliveryVerdict {
        // Blacklist recheck right before spending a page load: the list may
        // have grown since the posting was scraped.
        if let Some(entry) = self.blacklist.company_hit(&posting.company) {
            return DeliveryVerdict::Skipped(SkipReason::CompanyBlacklisted(entry.to_string()));
        }
        if let Some(entry) = self.blacklist.title_hit(&posting.title) {
            return DeliveryVerdict::Skipped(SkipReason::TitleBlacklisted(entry.to_string()));
        }

        let Some(href) = posting.detail_href.as_deref() else {
            return DeliveryVerdict::Failed(FailReason::DetailPage("card has no detail link".into()));
        };
        if !href.starts_with("/job_detail/") {
            return DeliveryVerdict::Failed(FailReason::DetailPage(format!(
                "unexpected detail link '{}'",
                href
            )));
        }
        let url = format!("{}{}", SITE_ORIGIN, href);

        let page = match self.browser.new_page("about:blank").await {
            Ok(p) => p,
            Err(e) => return DeliveryVerdict::Failed(FailReason::Navigation(e.to_string())),
        };

        let verdict = self.deliver_on_page(&page, posting, &url).await;

        if let Err(e) = page.close().await {
            debug!("delivery: detail tab close failed: {}", e);
        }

        self.events
            .emit(
                BehaviorEvent::new(
                    self.user,
                    "delivery",
                    match &verdict {
                        DeliveryVerdict::Sent => "success",
                        DeliveryVerdict::Skipped(_) => "skipped",
                        DeliveryVerdict::Failed(_) => "failed",
                        DeliveryVerdict::Abort(_) => "aborted",
                    },
                    &posting.label(),
                )
                .with_extra(serde_json::json!({ "title": posting.title })),
            )
            .await;
        verdict
    }

    async fn deliver_on_page(&self, page: &Page, posting: &Posting, url: &str) -> DeliveryVerdict {
        info!("📨 delivering to {}", posting.label());

        if let Err(e) = page.goto(url).await {
            return DeliveryVerdict::Failed(FailReason::DetailPage(e.to_string()));
        }
        pg::sleep_range(2000, 4000).await;

        // Dead-recruiter check with the detail page's fresher activity text.
        if self.cfg.filter_dead_hr {
            let activity = pg::inner_text(page, ".boss-active-time, .job-boss-info .name-box span")
                .await
                .unwrap_or_else(|| posting.recruiter_activity.clone());
            if recruiter_inactive(&activity, &self.cfg.dead_status) {
                return DeliveryVerdict::Skipped(SkipReason::InactiveRecruiter(activity));
            }
        }

        // The JD must be read before the chat opens; the conversation view
        // replaces the detail content.
        let description = pg::inner_text(page, ".job-sec-text, .job-detail-section .text")
            .await
            .unwrap_or_default();

        let request = ComposeRequest {
            user_id: self.user.to_string(),
            job_name: posting.title.clone(),
            company: posting.company.clone(),
            job_description: description,
        };
        let Some(greeting) =
            composer::resolve_greeting(self.composer, &request, &self.cfg.say_hi).await
        else {
            return DeliveryVerdict::Skipped(SkipReason::EmptyMessage);
        };

        let dialog_confirmed = match self.open_chat(page).await {
            Ok(confirmed) => confirmed,
            Err(verdict) => return verdict,
        };

        match self.wait_for_input(page, posting).await {
            Ok(selector) => {
                if !fill_message(page, &selector, &greeting).await {
                    return DeliveryVerdict::Failed(FailReason::InputMissing);
                }

                if self.cfg.send_img_resume {
                    self.attach_resume(page).await;
                }

                self.send_and_verify(page, &greeting).await
            }
            Err(verdict) => stage_input_failure(verdict, dialog_confirmed),
        }
    }

    /// Click the chat entry button, dismissing the login overlay the site
    /// throws in front of it. Retries because the button hydrates late.
    ///
    /// Returns whether the conversation view was positively detected after
    /// the click. An unconfirmed view is not fatal: some layout variants
    /// render the input without any known dialog container, so the caller
    /// still runs the scripted input scan, which carries its own send
    /// verification.
    async fn open_chat(&self, page: &Page) -> Result<bool, DeliveryVerdict> {
        for attempt in 0..CHAT_BUTTON_RETRIES {
            crate::session::dismiss_login_dialog(page).await;

            for sel in CHAT_BUTTON_SELECTORS {
                let js = format!(
                    r#"(() => {{
                        const el = document.querySelector({});
                        if (!el) return false;
                        const t = (el.innerText || '').trim();
                        if (!t.includes({})) return false;
                        el.click();
                        return true;
                    }})()"#,
                    pg::js_quote(sel),
                    pg::js_quote(CHAT_BUTTON_TEXT)
                );
                if pg::eval_bool(page, &js).await {
                    debug!("delivery: chat button clicked via {} (attempt {})", sel, attempt + 1);
                    pg::sleep_range(1000, 2000).await;
                    crate::session::dismiss_login_dialog(page).await;

                    if self.wait_for_dialog(page).await {
                        return Ok(true);
                    }
                    warn!("delivery: conversation view not detected — trying the input directly");
                    return Ok(false);
                }
            }
            pg::sleep_range(1000, 2000).await;
        }
        Err(DeliveryVerdict::Failed(FailReason::ChatButtonMissing))
    }

    /// Wait for the conversation view: either a known dialog element or a
    /// chat-looking URL.
    async fn wait_for_dialog(&self, page: &Page) -> bool {
        for _ in 0..DIALOG_WAIT_POLLS {
            for sel in CHAT_DIALOG_SELECTORS {
                if pg::exists(page, sel).await {
                    return true;
                }
            }
            let url = page.url().await.ok().flatten().unwrap_or_default();
            if CHAT_URL_PARTS.iter().any(|p| url.contains(p)) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(1000)).await;
        }
        false
    }

    /// Wait for a usable message input. Every poll also checks for a
    /// verification challenge; detecting one hands control to the resolver
    /// and aborts the run if it cannot be cleared.
    async fn wait_for_input(&self, page: &Page, posting: &Posting) -> Result<String, DeliveryVerdict> {
        for poll in 0..INPUT_WAIT_POLLS {
            if verify::challenge_present(page).await {
                warn!("⚠️  verification challenge during delivery to {}", posting.label());
                return match verify::resolve_challenge(
                    page,
                    self.channel,
                    self.events,
                    self.user,
                    &posting.title,
                )
                .await
                {
                    Ok(()) => continue_input_search(page).await.ok_or(
                        DeliveryVerdict::Failed(FailReason::InputMissing),
                    ),
                    Err(abort) => Err(DeliveryVerdict::Abort(abort)),
                };
            }

            if let Some(selector) = find_usable_input(page).await {
                return Ok(selector);
            }

            // First few polls are fast; the input usually hydrates quickly.
            if poll < INPUT_FAST_POLLS {
                pg::sleep_range(500, 1000).await;
            } else {
                pg::sleep_range(1000, 1500).await;
            }
        }
        Err(DeliveryVerdict::Failed(FailReason::InputMissing))
    }

    /// Attach the image resume through the hidden file input. Best-effort:
    /// a missing input or upload error only skips the attachment.
    async fn attach_resume(&self, page: &Page) {
        let Some(path) = self.cfg.resume_image_path.as_deref() else {
            warn!("delivery: send_img_resume set but resume_image_path is empty");
            return;
        };
        if !std::path::Path::new(path).exists() {
            warn!("delivery: resume image {} not found", path);
            return;
        }

        use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;

        let input = match page.find_xpath(RESUME_FILE_INPUT_XPATH).await {
            Ok(el) => el,
            Err(e) => {
                debug!("delivery: no image upload input on this chat: {}", e);
                return;
            }
        };
        let params = SetFileInputFilesParams::builder()
            .file(path)
            .backend_node_id(input.backend_node_id)
            .build();
        match params {
            Ok(params) => match page.execute(params).await {
                Ok(_) => {
                    info!("delivery: 🖼️  image resume attached");
                    pg::sleep_range(2000, 3000).await;
                }
                Err(e) => warn!("delivery: resume upload failed: {}", e),
            },
            Err(e) => warn!("delivery: file upload params invalid: {}", e),
        }
    }

    /// Click send, scrape the post-send signals, and fall back to direct JS
    /// manipulation once before giving up.
    async fn send_and_verify(&self, page: &Page, greeting: &str) -> DeliveryVerdict {
        let mut clicked = false;
        for sel in SEND_BUTTON_SELECTORS {
            if pg::click(page, sel).await {
                debug!("delivery: send clicked via {}", sel);
                clicked = true;
                break;
            }
        }
        if !clicked {
            // Some layouts send on Enter only; simulate it.
            let _ = page
                .evaluate(
                    r#"(() => {
                        const el = document.activeElement;
                        if (!el) return;
                        const ev = new KeyboardEvent('keydown', { key: 'Enter', keyCode: 13, bubbles: true });
                        el.dispatchEvent(ev);
                    })()"#,
                )
                .await;
        }

        pg::sleep_range(2000, 3000).await;
        let signals = scrape_send_signals(page, greeting).await;
        if confirms_send(&signals) {
            info!("✅ greeting sent");
            return DeliveryVerdict::Sent;
        }
        debug!("delivery: first send not confirmed ({:?}), trying JS fallback", signals);

        // Fallback: drive the send handler directly.
        let _ = page
            .evaluate(
                r#"(() => {
                    for (const sel of ['div.send-message', 'button.btn-send', "button[type='send']"]) {
                        const btn = document.querySelector(sel);
                        if (btn) {
                            btn.dispatchEvent(new MouseEvent('click', { bubbles: true, cancelable: true }));
                            return;
                        }
                    }
                })()"#,
            )
            .await;
        pg::sleep_range(2000, 3000).await;

        let signals = scrape_send_signals(page, greeting).await;
        if confirms_send(&signals) {
            info!("✅ greeting sent (fallback)");
            DeliveryVerdict::Sent
        } else {
            DeliveryVerdict::Failed(FailReason::SendNotVerified)
        }
    }
}

/// Attribute an input-wait failure to the right stage: when the conversation
/// view was never confirmed, a missing input means the view itself never
/// opened, not that a rendered view lacked an input.
fn stage_input_failure(verdict: DeliveryVerdict, dialog_confirmed: bool) -> DeliveryVerdict {
    match verdict {
        DeliveryVerdict::Failed(FailReason::InputMissing) if !dialog_confirmed => {
            DeliveryVerdict::Failed(FailReason::DialogMissing)
        }
        other => other,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Page helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Find the first visible input candidate that is not excluded (search boxes,
/// SMS inputs). Returns its selector.
async fn find_usable_input(page: &Page) -> Option<String> {
    for sel in INPUT_SELECTORS {
        let js = format!(
            r#"(() => {{
                const excluded = {};
                const el = document.querySelector({});
                if (!el) return false;
                const r = el.getBoundingClientRect();
                if (r.width === 0 || r.height === 0) return false;
                return !excluded(el);
            }})()"#,
            INPUT_EXCLUSION_JS,
            pg::js_quote(sel)
        );
        if pg::eval_bool(page, &js).await {
            return Some(sel.to_string());
        }
    }
    None
}

async fn continue_input_search(page: &Page) -> Option<String> {
    for _ in 0..INPUT_FAST_POLLS {
        if let Some(sel) = find_usable_input(page).await {
            return Some(sel);
        }
        pg::sleep_range(500, 1000).await;
    }
    None
}

/// Fill the greeting with humanized pacing: click, focus, clear, set value
/// with framework events. Falls back to char-by-char typing when the value
/// does not stick (some inputs only accept trusted-looking key events).
async fn fill_message(page: &Page, selector: &str, greeting: &str) -> bool {
    if !pg::click(page, selector).await {
        return false;
    }
    pg::sleep_range(1000, 3000).await;

    let focus_js = format!(
        "(() => {{ const el = document.querySelector({}); if (el) el.focus(); }})()",
        pg::js_quote(selector)
    );
    let _ = page.evaluate(focus_js).await;
    pg::sleep_range(500, 1000).await;

    let set_js = format!(
        r#"(() => {{
            const el = document.querySelector({});
            if (!el) return false;
            if (el.isContentEditable) {{
                el.innerText = '';
                el.innerText = {};
            }} else {{
                el.value = '';
                el.value = {};
            }}
            el.dispatchEvent(new Event('input', {{ bubbles: true }}));
            el.dispatchEvent(new Event('change', {{ bubbles: true }}));
            const current = el.isContentEditable ? el.innerText : el.value;
            return current.length > 0;
        }})()"#,
        pg::js_quote(selector),
        pg::js_quote(greeting),
        pg::js_quote(greeting)
    );
    pg::sleep_range(200, 500).await;
    if pg::eval_bool(page, &set_js).await {
        return true;
    }

    // Char-by-char fallback through real key events.
    debug!("delivery: direct value set rejected, typing character by character");
    if let Ok(element) = page.find_element(selector).await {
        if element.click().await.is_err() {
            return false;
        }
        for ch in greeting.chars() {
            if element.type_str(ch.to_string()).await.is_err() {
                return false;
            }
            pg::sleep_range(100, 300).await;
        }
        return true;
    }
    false
}

/// Scrape all send-verification signals in one JS pass.
async fn scrape_send_signals(page: &Page, greeting: &str) -> SendSignals {
    let js = format!(
        r#"(() => {{
            const sent = {};
            const toastText = Array.from(document.querySelectorAll('.toast, .message-error, .error-tip'))
                .map(el => el.innerText || '')
                .join(' ');
            const errorToast = toastText.includes('失败') || toastText.includes('异常') || toastText.includes('频繁');
            const successIndicator = !!document.querySelector('.message-success, .sent-success, .chat-status-success');
            let inputCleared = false;
            for (const sel of ['#chat-input', 'div[contenteditable=\'true\']', 'textarea']) {{
                const el = document.querySelector(sel);
                if (el) {{
                    const v = el.isContentEditable ? el.innerText : el.value;
                    inputCleared = (v || '').trim().length === 0;
                    break;
                }}
            }}
            let messageInList = false;
            const needle = sent.slice(0, 20);
            for (const msg of document.querySelectorAll('.message-item, .item-myself, .chat-message')) {{
                if ((msg.innerText || '').includes(needle)) {{ messageInList = true; break; }}
            }}
            return JSON.stringify({{ errorToast, successIndicator, inputCleared, messageInList }});
        }})()"#,
        pg::js_quote(greeting)
    );

    let mut signals = SendSignals::default();
    if let Ok(raw) = pg::eval_string(page, &js).await {
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(&raw) {
            signals.error_toast = v["errorToast"].as_bool().unwrap_or(false);
            signals.success_indicator = v["successIndicator"].as_bool().unwrap_or(false);
            signals.input_cleared = v["inputCleared"].as_bool().unwrap_or(false);
            signals.message_in_list = v["messageInList"].as_bool().unwrap_or(false);
        }
    }
    let url = page.url().await.ok().flatten().unwrap_or_default();
    signals.chat_url = CHAT_URL_PARTS.iter().any(|p| url.contains(p));
    signals
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_toast_vetoes_everything() {
        let s = SendSignals {
            error_toast: true,
            success_indicator: true,
            input_cleared: true,
            message_in_list: true,
            chat_url: true,
        };
        assert!(!confirms_send(&s));
    }

    #[test]
    fn test_success_indicator_alone_passes() {
        let s = SendSignals { success_indicator: true, ..Default::default() };
        assert!(confirms_send(&s));
    }

    #[test]
    fn test_cleared_input_needs_corroboration() {
        // Cleared input by itself proves nothing (it may never have been filled).
        let s = SendSignals { input_cleared: true, ..Default::default() };
        assert!(!confirms_send(&s));

        let s = SendSignals { input_cleared: true, message_in_list: true, ..Default::default() };
        assert!(confirms_send(&s));

        let s = SendSignals { input_cleared: true, chat_url: true, ..Default::default() };
        assert!(confirms_send(&s));
    }

    #[test]
    fn test_message_in_list_without_cleared_input_fails() {
        // An old identical greeting in the history must not count as a send.
        let s = SendSignals { message_in_list: true, ..Default::default() };
        assert!(!confirms_send(&s));
    }

    #[test]
    fn test_no_signals_fails() {
        assert!(!confirms_send(&SendSignals::default()));
    }

    #[test]
    fn test_unconfirmed_view_reports_dialog_stage() {
        let v = stage_input_failure(DeliveryVerdict::Failed(FailReason::InputMissing), false);
        assert!(matches!(v, DeliveryVerdict::Failed(FailReason::DialogMissing)));
    }

    #[test]
    fn test_confirmed_view_keeps_input_stage() {
        let v = stage_input_failure(DeliveryVerdict::Failed(FailReason::InputMissing), true);
        assert!(matches!(v, DeliveryVerdict::Failed(FailReason::InputMissing)));
    }

    #[test]
    fn test_aborts_pass_through_stage_attribution() {
        use crate::core::types::RunAbort;
        let v = stage_input_failure(DeliveryVerdict::Abort(RunAbort::QuotaExhausted), false);
        assert!(matches!(v, DeliveryVerdict::Abort(RunAbort::QuotaExhausted)));
    }
}
