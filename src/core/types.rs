use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Domain types shared across the crawl → match → gate → deliver pipeline.
// ---------------------------------------------------------------------------

/// One job card scraped from the search result list.
///
/// Everything here comes from the listing page; the detail page (description,
/// recruiter activity on the detail view) is fetched lazily by the delivery
/// executor because opening detail pages is the expensive, rate-limited part.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Posting {
    pub title: String,
    pub company: String,
    /// Raw salary text as displayed, already font-decoded (e.g. `15-25K·14薪`).
    pub salary_text: String,
    pub tags: Vec<String>,
    pub recruiter_name: String,
    /// Activity suffix shown next to the recruiter name (e.g. `刚刚活跃`).
    pub recruiter_activity: String,
    /// Relative detail link (`/job_detail/…`) when the card exposes one.
    pub detail_href: Option<String>,
}

impl Posting {
    pub fn label(&self) -> String {
        format!("{}·{}", self.company, self.title)
    }
}

/// Result of running a title through the keyword matcher.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOutcome {
    pub matched: bool,
    /// 1.0 prefix / 0.8 keyword+role / 0.7 whole-word / 0.6 relaxed.
    pub score: f64,
    /// Which scheme fired (1-5); 0 when nothing matched.
    pub scheme: u8,
}

impl MatchOutcome {
    pub fn miss() -> Self {
        Self { matched: false, score: 0.0, scheme: 0 }
    }

    pub fn hit(score: f64, scheme: u8) -> Self {
        Self { matched: true, score, scheme }
    }
}

// ---------------------------------------------------------------------------
// Error taxonomy
// ---------------------------------------------------------------------------

/// Failures that end the entire run. Everything else is scoped to one
/// keyword or one posting and handled by the orchestrator loop.
#[derive(Debug, Error)]
pub enum RunAbort {
    #[error("login timed out before a live session was established")]
    LoginTimeout,

    #[error("session lost: {0}")]
    SessionLost(String),

    #[error("verification challenge unresolved: {0}")]
    VerificationUnresolved(String),

    #[error("external delivery quota exhausted or unverifiable")]
    QuotaExhausted,
}

/// Why a posting was deliberately not delivered. Skips are expected,
/// logged at info, and never counted as errors.
#[derive(Debug, Error)]
pub enum SkipReason {
    #[error("title no longer matches keyword on re-check")]
    KeywordMismatch,

    #[error("company matches blacklist entry '{0}'")]
    CompanyBlacklisted(String),

    #[error("title matches blacklist entry '{0}'")]
    TitleBlacklisted(String),

    #[error("salary '{0}' outside the expected range")]
    SalaryOutOfRange(String),

    #[error("recruiter inactive: {0}")]
    InactiveRecruiter(String),

    #[error("rate gate: {0}")]
    RateGated(String),

    #[error("composed message empty and no fallback greeting configured")]
    EmptyMessage,
}

/// Why a delivery attempt failed mid-flight. Failures are logged at warn
/// and the run moves on to the next posting.
#[derive(Debug, Error)]
pub enum FailReason {
    #[error("detail page failed to open: {0}")]
    DetailPage(String),

    #[error("chat button never became clickable")]
    ChatButtonMissing,

    #[error("conversation view never opened after the chat button was clicked")]
    DialogMissing,

    #[error("message input never appeared in the conversation view")]
    InputMissing,

    #[error("send could not be verified from page signals")]
    SendNotVerified,

    #[error("navigation error: {0}")]
    Navigation(String),
}

/// Outcome of one delivery attempt. Control flow in the orchestrator
/// switches on this instead of unwinding through error types.
#[derive(Debug)]
pub enum DeliveryVerdict {
    /// Message send was observed and verified. The only variant that
    /// consumes quota.
    Sent,
    Skipped(SkipReason),
    Failed(FailReason),
    Abort(RunAbort),
}

impl DeliveryVerdict {
    pub fn is_sent(&self) -> bool {
        matches!(self, DeliveryVerdict::Sent)
    }
}

/// Per-posting record kept for the end-of-run report.
#[derive(Debug)]
pub struct DeliveryOutcome {
    pub company: String,
    pub title: String,
    pub verdict: DeliveryVerdict,
    pub at: DateTime<Utc>,
}

/// Aggregated run summary, logged and emitted via the event sink when the
/// run ends (normally or via abort).
#[derive(Debug, Default)]
pub struct RunReport {
    pub sent: usize,
    pub skipped: usize,
    pub failed: usize,
    pub outcomes: Vec<DeliveryOutcome>,
    /// Set when the run ended early via a fatal abort.
    pub aborted: Option<String>,
}

impl RunReport {
    pub fn record(&mut self, company: &str, title: &str, verdict: DeliveryVerdict) {
        match &verdict {
            DeliveryVerdict::Sent => self.sent += 1,
            DeliveryVerdict::Skipped(_) => self.skipped += 1,
            DeliveryVerdict::Failed(_) => self.failed += 1,
            DeliveryVerdict::Abort(_) => {}
        }
        self.outcomes.push(DeliveryOutcome {
            company: company.to_string(),
            title: title.to_string(),
            verdict,
            at: Utc::now(),
        });
    }

    pub fn summary(&self) -> String {
        format!(
            "sent={} skipped={} failed={} total={}{}",
            self.sent,
            self.skipped,
            self.failed,
            self.outcomes.len(),
            self.aborted
                .as_deref()
                .map(|a| format!(" aborted=\"{}\"", a))
                .unwrap_or_default()
        )
    }
}
