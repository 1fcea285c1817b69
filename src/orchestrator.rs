//! Run orchestration: authenticate once, then walk every configured city and
//! keyword, filtering and delivering posting by posting.
//!
//! Failure scoping is deliberate and asymmetric. Local gate denials and
//! per-posting failures skip one posting. A keyword that overruns its time
//! budget is dropped. Only session loss, unresolved verification, and an
//! exhausted (or unverifiable) external quota end the run.

use std::time::Duration;

use tracing::{error, info, warn};

use crate::core::config::{PilotConfig, SearchCodes};
use crate::core::types::{DeliveryVerdict, Posting, RunAbort, RunReport, SkipReason};
use crate::delivery::composer::MessageComposer;
use crate::delivery::DeliveryExecutor;
use crate::matcher::blacklist::{learn_from_rejections, Blacklist};
use crate::matcher::{salary, JobMatcher};
use crate::notify::{BehaviorEvent, EventSink};
use crate::rate::quota::QuotaStore;
use crate::rate::RateController;
use crate::search;
use crate::session::{ensure_authenticated, Session};
use crate::verify::channel::HandoffChannel;

/// Ceiling per city+keyword pair so one pathological search cannot eat the
/// whole run. Checked between postings, never mid-delivery: an attempt that
/// already started must finish its bookkeeping (tab close, quota consume)
/// before the keyword is dropped.
const KEYWORD_TIME_BUDGET: Duration = Duration::from_secs(30 * 60);

fn budget_exhausted(deadline: tokio::time::Instant) -> bool {
    tokio::time::Instant::now() >= deadline
}

pub struct Orchestrator {
    cfg: PilotConfig,
    codes: SearchCodes,
    user: String,
    matcher: JobMatcher,
    blacklist: Blacklist,
    rate: RateController,
    quota: Box<dyn QuotaStore>,
    composer: Option<Box<dyn MessageComposer>>,
    channel: Box<dyn HandoffChannel>,
    events: Box<dyn EventSink>,
}

impl Orchestrator {
    pub fn new(
        cfg: PilotConfig,
        quota: Box<dyn QuotaStore>,
        composer: Option<Box<dyn MessageComposer>>,
        channel: Box<dyn HandoffChannel>,
        events: Box<dyn EventSink>,
    ) -> Self {
        let codes = cfg.normalize();
        let user = cfg.resolve_user_id();
        let matcher = JobMatcher::new(cfg.keyword_matching_mode);
        let blacklist = Blacklist::new(
            cfg.blacklist_companies.clone(),
            cfg.blacklist_titles.clone(),
        );
        let rate = RateController::from_config(&cfg);
        Self {
            cfg,
            codes,
            user,
            matcher,
            blacklist,
            rate,
            quota,
            composer,
            channel,
            events,
        }
    }

    /// Execute the full run and return the report. Never panics; every abort
    /// path lands in `report.aborted`.
    pub async fn run(mut self) -> RunReport {
        let mut report = RunReport::default();

        let mut session = match ensure_authenticated(&self.cfg, false).await {
            Ok(s) => s,
            Err(abort) => {
                error!("run aborted before start: {}", abort);
                report.aborted = Some(abort.to_string());
                self.emit_summary(&report).await;
                return report;
            }
        };

        // Grow the company blacklist from past rejections before searching.
        learn_from_rejections(&session.page, &mut self.blacklist).await;

        // Seed today's local count from the shared ledger so a restart does
        // not grant a fresh daily budget.
        match self.quota.used_today(&self.user).await {
            Ok(used) => self.rate.seed_daily_count(used),
            Err(e) => warn!("quota seed failed, starting from 0: {}", e),
        }

        let cities = self.codes.cities.clone();
        let keywords = self.cfg.keywords.clone();
        'run: for (city_name, city_code) in &cities {
            for keyword in &keywords {
                info!("🏙️  {} / '{}'", city_name, keyword);
                let deadline = tokio::time::Instant::now() + KEYWORD_TIME_BUDGET;
                if let Err(abort) = self
                    .process_keyword(&mut session, city_code, keyword, deadline, &mut report)
                    .await
                {
                    error!("run aborted: {}", abort);
                    report.aborted = Some(abort.to_string());
                    break 'run;
                }
            }
        }

        session.close().await;
        info!("🏁 run finished: {}", report.summary());
        self.emit_summary(&report).await;
        report
    }

    async fn process_keyword(
        &mut self,
        session: &mut Session,
        city_code: &str,
        keyword: &str,
        deadline: tokio::time::Instant,
        report: &mut RunReport,
    ) -> Result<(), RunAbort> {
        let postings = match search::load_all_postings(&session.page, &self.codes, city_code, keyword)
            .await
        {
            Ok(p) => p,
            Err(e) => {
                warn!("search for '{}' failed, skipping keyword: {}", keyword, e);
                return Ok(());
            }
        };

        for posting in postings {
            // Cooperative budget checkpoint: only between postings, so a
            // delivery in flight always settles before the keyword is dropped.
            if budget_exhausted(deadline) {
                warn!("keyword '{}' exceeded its time budget — moving on", keyword);
                break;
            }

            let verdict = self.handle_posting(session, keyword, &posting).await?;
            let is_sent = verdict.is_sent();
            report.record(&posting.company, &posting.title, verdict);

            if is_sent {
                self.settle_sent().await;
                let wait = self.rate.recommended_wait();
                info!("⏳ pacing: waiting {:.0}s before the next delivery", wait.as_secs_f64());
                // The pacing sleep never outlives the keyword budget.
                let until = std::cmp::min(deadline, tokio::time::Instant::now() + wait);
                tokio::time::sleep_until(until).await;
            }
        }
        Ok(())
    }

    /// Post-send bookkeeping: external ledger first, local pacing state
    /// second. Consume errors are swallowed — the message is already out.
    async fn settle_sent(&mut self) {
        if let Err(e) = self.quota.consume(&self.user).await {
            warn!("quota consume failed (continuing): {}", e);
        }
        self.rate.record_delivery();
    }

    /// The full gate chain for one posting. `Err` means the run must end.
    async fn handle_posting(
        &mut self,
        session: &Session,
        keyword: &str,
        posting: &Posting,
    ) -> Result<DeliveryVerdict, RunAbort> {
        let outcome = self.matcher.match_title(&posting.title, keyword);
        if !outcome.matched {
            return Ok(DeliveryVerdict::Skipped(SkipReason::KeywordMismatch));
        }

        if let Some(entry) = self.blacklist.company_hit(&posting.company) {
            return Ok(DeliveryVerdict::Skipped(SkipReason::CompanyBlacklisted(
                entry.to_string(),
            )));
        }
        if let Some(entry) = self.blacklist.title_hit(&posting.title) {
            return Ok(DeliveryVerdict::Skipped(SkipReason::TitleBlacklisted(
                entry.to_string(),
            )));
        }

        if salary::salary_not_expected(
            &posting.salary_text,
            self.cfg.expected_salary_min(),
            self.cfg.expected_salary_max(),
        ) {
            return Ok(DeliveryVerdict::Skipped(SkipReason::SalaryOutOfRange(
                posting.salary_text.clone(),
            )));
        }

        if let Err(denied) = self.rate.can_deliver(outcome.score) {
            info!("⛔ {} — {}", posting.label(), denied);
            return Ok(DeliveryVerdict::Skipped(SkipReason::RateGated(denied.to_string())));
        }

        // External quota is fail-closed: an unverifiable ledger ends the run
        // rather than risking an over-quota delivery.
        match self.quota.check(&self.user).await {
            Ok(true) => {}
            Ok(false) => return Err(RunAbort::QuotaExhausted),
            Err(e) => {
                error!("quota check failed, treating as exhausted: {}", e);
                return Err(RunAbort::QuotaExhausted);
            }
        }

        let executor = DeliveryExecutor {
            browser: &session.browser,
            cfg: &self.cfg,
            blacklist: &self.blacklist,
            composer: self.composer.as_deref(),
            channel: self.channel.as_ref(),
            events: self.events.as_ref(),
            user: &self.user,
        };
        match executor.deliver(posting).await {
            DeliveryVerdict::Abort(abort) => Err(abort),
            verdict => Ok(verdict),
        }
    }

    async fn emit_summary(&self, report: &RunReport) {
        self.events
            .emit(
                BehaviorEvent::new(
                    &self.user,
                    "run_summary",
                    if report.aborted.is_some() { "aborted" } else { "completed" },
                    &report.summary(),
                )
                .with_extra(serde_json::json!({
                    "sent": report.sent,
                    "skipped": report.skipped,
                    "failed": report.failed,
                })),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::NullSink;
    use crate::rate::quota::FileQuotaStore;

    fn test_orchestrator(quota_dir: std::path::PathBuf) -> Orchestrator {
        let mut cfg = PilotConfig::default();
        cfg.user_id = format!("orch-{}", uuid::Uuid::new_v4());
        Orchestrator::new(
            cfg,
            Box::new(FileQuotaStore::new(quota_dir, 5)),
            None,
            Box::new(crate::verify::channel::FileHandoffChannel::in_temp_dir()),
            Box::new(NullSink),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_flips_only_after_the_full_window() {
        let deadline = tokio::time::Instant::now() + KEYWORD_TIME_BUDGET;
        assert!(!budget_exhausted(deadline));
        tokio::time::advance(KEYWORD_TIME_BUDGET - Duration::from_secs(1)).await;
        assert!(!budget_exhausted(deadline));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(budget_exhausted(deadline));
    }

    #[tokio::test]
    async fn test_sent_bookkeeping_always_reaches_the_ledger() {
        // A verified send settles into the external ledger even when the
        // keyword budget has already lapsed; the budget only stops the loop
        // from starting the next posting.
        let dir = std::env::temp_dir().join(format!("zp-orch-{}", uuid::Uuid::new_v4()));
        let mut orch = test_orchestrator(dir);
        let deadline = tokio::time::Instant::now(); // already expired
        assert!(budget_exhausted(deadline));

        orch.settle_sent().await;
        let used = orch.quota.used_today(&orch.user).await.unwrap();
        assert_eq!(used, 1);
    }
}
