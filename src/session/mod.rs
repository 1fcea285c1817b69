//! Authenticated session lifecycle: cookie replay, QR login, slider
//! challenges, and the headless relaunch after an interactive login.
//!
//! The happy path never shows a browser window: a stored cookie jar is
//! replayed into a headless page and verified live. Only when that fails does
//! the flow fall back to a headed browser with a QR code handed to the
//! operator through the filesystem.

pub mod cookies;

use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use tracing::{debug, info, warn};

use crate::browser::{page as pg, BrowserHandle};
use crate::core::config::{data_dir, PilotConfig};
use crate::core::types::RunAbort;
use crate::session::cookies::safe_user_key;

const HOME_URL: &str = "https://www.zhipin.com";
const LOGIN_URL: &str = "https://www.zhipin.com/web/user/?ka=header-login";
const SLIDER_URL_PART: &str = "/web/user/safe/verify-slider";

/// How long the operator has to scan the QR code.
const QR_LOGIN_TIMEOUT: Duration = Duration::from_secs(15 * 60);
/// Login poll cadence.
const QR_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// With no scan progress for this long, reload the login page: the remote
/// code rotates server-side and an expired screenshot can never be scanned.
const QR_REFRESH_INTERVAL: Duration = Duration::from_secs(90);
/// Slider challenges are left to self-resolve (or the operator) this long.
const SLIDER_TIMEOUT: Duration = Duration::from_secs(5 * 60);

const LOGIN_DIALOG_MASK: &str = ".boss-login-dialog-mask";
const LOGIN_DIALOG: &str = ".boss-login-dialog";

/// Selectors that identify the QR code element on the login page, most
/// specific first.
const QR_SELECTORS: &[&str] = &[".login-qrcode", "canvas", ".qrcode-img", "#qrcode"];

/// Any of these present means the page is rendered for a logged-in user.
const LOGGED_IN_MARKERS: &[&str] = &[
    "div.job-list-container",
    ".user-avatar",
    ".nav-figure",
    "a[ka='header-home-logo']",
    "a[href*='/web/user/safe']",
    ".menu-user",
    "[class*='user-name']",
];

// ─────────────────────────────────────────────────────────────────────────────
// State reporting
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginState {
    ReplayingSession,
    SessionAlive,
    SessionStale,
    AwaitingScan,
    SliderChallenge,
    LoggedIn,
    RelaunchingHeadless,
    TimedOut,
}

fn log_state(state: LoginState) {
    match state {
        LoginState::ReplayingSession => info!("🔁 replaying stored session cookies"),
        LoginState::SessionAlive => info!("✅ stored session is live — no login needed"),
        LoginState::SessionStale => info!("🍂 stored session is stale — falling back to QR login"),
        LoginState::AwaitingScan => info!("📱 waiting for QR scan"),
        LoginState::SliderChallenge => info!("🧩 slider challenge detected — waiting for resolution"),
        LoginState::LoggedIn => info!("🎉 login confirmed"),
        LoginState::RelaunchingHeadless => info!("🕶️  relaunching headless with fresh cookies"),
        LoginState::TimedOut => warn!("⏰ login timed out"),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session handle
// ─────────────────────────────────────────────────────────────────────────────

/// A live, authenticated browser session.
pub struct Session {
    pub browser: BrowserHandle,
    pub page: Page,
    pub user: String,
}

impl Session {
    pub async fn close(&mut self) {
        let _ = self.page.clone().close().await;
        self.browser.close().await;
    }
}

/// Where the QR image for the operator is written.
pub fn qr_image_path(user: &str) -> Option<PathBuf> {
    data_dir().map(|d| d.join(format!("qr_{}.png", safe_user_key(user))))
}

/// Where the login status marker (`waiting` / `success` / `failed`) is written.
pub fn login_status_path(user: &str) -> Option<PathBuf> {
    data_dir().map(|d| d.join(format!("login_status_{}.txt", safe_user_key(user))))
}

fn write_login_status(user: &str, status: &str) {
    let Some(path) = login_status_path(user) else { return };
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    if let Err(e) = std::fs::write(&path, status) {
        warn!("session: could not write login status file: {}", e);
    }
}

fn profile_dir(user: &str) -> Option<PathBuf> {
    data_dir().map(|d| d.join("profiles").join(safe_user_key(user)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry point
// ─────────────────────────────────────────────────────────────────────────────

/// Establish an authenticated session: replay the stored jar when possible,
/// otherwise run the interactive QR flow.
///
/// `login_only` skips the post-login headless relaunch so the operator keeps
/// the headed window they just scanned in.
///
/// When `allow_interactive_login` is off and the stored session is dead, the
/// call fails fast with [`RunAbort::SessionLost`] instead of parking a headed
/// browser on a QR code nobody is watching. `--login-only` runs exist to
/// create a session, so they are always interactive.
pub async fn ensure_authenticated(cfg: &PilotConfig, login_only: bool) -> Result<Session, RunAbort> {
    let user = cfg.resolve_user_id();
    let want_headless = cfg.resolve_headless();
    let interactive = login_only || cfg.allow_interactive_login;

    // Fast path: stored cookies replayed into a headless page.
    if let Some(jar) = cookies::load_raw(&user) {
        if cookies::has_login_token(&jar) {
            log_state(LoginState::ReplayingSession);
            match replay_session(&user, &jar, want_headless).await {
                Ok(Some(session)) => {
                    log_state(LoginState::SessionAlive);
                    return Ok(session);
                }
                Ok(None) => {
                    log_state(LoginState::SessionStale);
                    cookies::invalidate(&user);
                }
                Err(e) => {
                    warn!("session: replay attempt failed: {}", e);
                    cookies::invalidate(&user);
                }
            }
        } else {
            // Jar without a login token cannot authenticate anything.
            log_state(LoginState::SessionStale);
            cookies::invalidate(&user);
        }
    }

    // Cold start: interactive QR login in a headed browser.
    if !interactive {
        return Err(RunAbort::SessionLost(
            "stored session is dead and interactive login is disallowed".to_string(),
        ));
    }
    let session = qr_login(&user).await?;
    log_state(LoginState::LoggedIn);

    if want_headless && !login_only {
        log_state(LoginState::RelaunchingHeadless);
        return relaunch_headless(session, &user).await;
    }
    Ok(session)
}

/// Replay a cookie jar into a fresh browser and verify the session live.
/// `Ok(None)` means the browser worked but the session is dead.
async fn replay_session(
    user: &str,
    jar: &[serde_json::Value],
    headless: bool,
) -> anyhow::Result<Option<Session>> {
    let mut browser = BrowserHandle::launch(headless, profile_dir(user).as_deref()).await?;
    let page = browser.new_page("about:blank").await?;

    cookies::inject_into_page(&page, jar).await;
    page.goto(HOME_URL).await?;
    pg::sleep_range(3000, 5000).await;

    if session_is_live(&page).await {
        return Ok(Some(Session { browser, page, user: user.to_string() }));
    }
    let _ = page.close().await;
    browser.close().await;
    Ok(None)
}

/// Logged-in markers present, no login dialog, and a live login token.
async fn session_is_live(page: &Page) -> bool {
    if login_dialog_visible(page).await {
        return false;
    }
    for sel in LOGGED_IN_MARKERS {
        if pg::exists(page, sel).await {
            return true;
        }
    }
    matches!(cookies::live_login_token(page).await, Some(token) if token.len() > 10)
}

pub async fn login_dialog_visible(page: &Page) -> bool {
    pg::is_visible(page, LOGIN_DIALOG_MASK).await || pg::is_visible(page, LOGIN_DIALOG).await
}

/// Dismiss the login dialog that the site overlays on some actions.
/// Cascade: close button, cancel button, mask click, then surgical node
/// removal as the last resort.
pub async fn dismiss_login_dialog(page: &Page) -> bool {
    if !login_dialog_visible(page).await {
        return true;
    }
    for sel in [
        ".boss-login-dialog .icon-close",
        ".boss-login-dialog .close",
        ".boss-login-dialog .cancel",
        LOGIN_DIALOG_MASK,
    ] {
        if pg::click(page, sel).await {
            pg::sleep_range(500, 1000).await;
            if !login_dialog_visible(page).await {
                debug!("session: login dialog dismissed via {}", sel);
                return true;
            }
        }
    }
    let removed = pg::eval_bool(
        page,
        r#"(() => {
            let removed = false;
            for (const sel of ['.boss-login-dialog-mask', '.boss-login-dialog']) {
                document.querySelectorAll(sel).forEach(el => { el.remove(); removed = true; });
            }
            document.body.style.overflow = 'auto';
            return removed;
        })()"#,
    )
    .await;
    if removed {
        debug!("session: login dialog removed from the DOM");
    }
    !login_dialog_visible(page).await
}

// ─────────────────────────────────────────────────────────────────────────────
// QR flow
// ─────────────────────────────────────────────────────────────────────────────

async fn qr_login(user: &str) -> Result<Session, RunAbort> {
    write_login_status(user, "waiting");

    let mut browser = BrowserHandle::launch(false, profile_dir(user).as_deref())
        .await
        .map_err(|e| RunAbort::SessionLost(format!("browser launch failed: {}", e)))?;
    let page = browser
        .new_page(LOGIN_URL)
        .await
        .map_err(|e| RunAbort::SessionLost(format!("login page failed to open: {}", e)))?;
    pg::sleep_range(3000, 5000).await;

    capture_qr(&page, user).await;
    log_state(LoginState::AwaitingScan);

    let deadline = tokio::time::Instant::now() + QR_LOGIN_TIMEOUT;
    let mut last_qr_refresh = tokio::time::Instant::now();
    let mut last_cookie_count = cookies::cookie_count(&page).await;

    loop {
        if tokio::time::Instant::now() >= deadline {
            log_state(LoginState::TimedOut);
            write_login_status(user, "failed");
            let _ = page.close().await;
            browser.close().await;
            return Err(RunAbort::LoginTimeout);
        }

        tokio::time::sleep(QR_POLL_INTERVAL).await;

        let url = page.url().await.ok().flatten().unwrap_or_default();

        // A slider challenge replaces the login page mid-flow.
        if url.contains(SLIDER_URL_PART) {
            log_state(LoginState::SliderChallenge);
            if !wait_for_slider(&page).await {
                write_login_status(user, "failed");
                let _ = page.close().await;
                browser.close().await;
                return Err(RunAbort::VerificationUnresolved(
                    "slider challenge not resolved during login".to_string(),
                ));
            }
            continue;
        }

        if login_succeeded(&page, &url).await {
            write_login_status(user, "success");
            if let Err(e) = cookies::save_from_page(&page, user).await {
                warn!("session: cookie save after login failed: {}", e);
            }
            return Ok(Session { browser, page, user: user.to_string() });
        }

        // The site drops auxiliary cookies while the code is being scanned;
        // growth means progress and only the screenshot needs refreshing.
        // A full interval with no progress means the code likely expired
        // server-side, and a stale page cannot be rescued by re-capturing it.
        let count = cookies::cookie_count(&page).await;
        let grew = count > last_cookie_count && count <= 15;
        last_cookie_count = count.max(last_cookie_count);
        match qr_refresh_due(grew, last_qr_refresh.elapsed()) {
            Some(QrRefresh::Recapture) => {
                capture_qr(&page, user).await;
                last_qr_refresh = tokio::time::Instant::now();
            }
            Some(QrRefresh::Reload) => {
                info!("session: 🔄 QR stale — reloading the login page for a fresh code");
                if let Err(e) = page.reload().await {
                    warn!("session: login page reload failed: {}", e);
                }
                pg::sleep_range(2000, 4000).await;
                capture_qr(&page, user).await;
                last_qr_refresh = tokio::time::Instant::now();
            }
            None => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QrRefresh {
    /// Scan in progress; re-screenshot the rotated code.
    Recapture,
    /// No progress for a full interval; force a fresh code via page reload.
    Reload,
}

fn qr_refresh_due(cookies_grew: bool, since_last_refresh: Duration) -> Option<QrRefresh> {
    if cookies_grew {
        Some(QrRefresh::Recapture)
    } else if since_last_refresh >= QR_REFRESH_INTERVAL {
        Some(QrRefresh::Reload)
    } else {
        None
    }
}

/// Three independent success signals, any one is enough:
/// 1. the URL left the login page while staying on the site,
/// 2. a logged-in page marker rendered,
/// 3. a live login token cookie appeared.
async fn login_succeeded(page: &Page, url: &str) -> bool {
    if url.contains("zhipin.com") && !url.contains("/web/user/") && !url.contains(SLIDER_URL_PART) {
        debug!("session: login signal — navigated away from login page ({})", url);
        return true;
    }
    for sel in LOGGED_IN_MARKERS {
        if pg::exists(page, sel).await {
            debug!("session: login signal — marker {}", sel);
            return true;
        }
    }
    if matches!(cookies::live_login_token(page).await, Some(t) if t.len() > 10) {
        debug!("session: login signal — login token cookie present");
        return true;
    }
    false
}

/// Screenshot the login QR for the operator. When the QR element cannot be
/// located the whole page is captured instead; the code is still scannable.
async fn capture_qr(page: &Page, user: &str) {
    let Some(path) = qr_image_path(user) else { return };
    if let Some(parent) = path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let mut found = None;
    for sel in QR_SELECTORS {
        if pg::is_visible(page, sel).await {
            found = Some(*sel);
            break;
        }
    }
    match found {
        Some(sel) => debug!("session: QR element located via {}", sel),
        None => debug!("session: QR element not located — capturing full page"),
    }

    let params = ScreenshotParams::builder()
        .format(CaptureScreenshotFormat::Png)
        .full_page(true)
        .build();
    match page.save_screenshot(params, &path).await {
        Ok(_) => info!("session: 📷 QR code written to {}", path.display()),
        Err(e) => warn!("session: QR screenshot failed: {}", e),
    }
}

/// Poll until the slider page goes away. Some challenges self-resolve; the
/// rest need the operator, which is why the window is headed here.
async fn wait_for_slider(page: &Page) -> bool {
    let deadline = tokio::time::Instant::now() + SLIDER_TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_secs(5)).await;
        let url = page.url().await.ok().flatten().unwrap_or_default();
        if !url.contains(SLIDER_URL_PART) {
            info!("session: slider challenge resolved");
            return true;
        }
    }
    false
}

// ─────────────────────────────────────────────────────────────────────────────
// Headless relaunch
// ─────────────────────────────────────────────────────────────────────────────

/// Swap the headed login browser for a headless one carrying the same
/// cookies. Unattended runs should not keep a visible window around.
async fn relaunch_headless(mut headed: Session, user: &str) -> Result<Session, RunAbort> {
    let jar = cookies::load_raw(user)
        .ok_or_else(|| RunAbort::SessionLost("cookie jar vanished after login".to_string()))?;
    headed.close().await;

    match replay_session(user, &jar, true).await {
        Ok(Some(session)) => Ok(session),
        Ok(None) => Err(RunAbort::SessionLost(
            "headless relaunch could not verify the fresh session".to_string(),
        )),
        Err(e) => Err(RunAbort::SessionLost(format!("headless relaunch failed: {}", e))),
    }
}
