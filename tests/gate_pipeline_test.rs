//! The filter chain a posting walks through before any browser work:
//! keyword match, blacklists, salary band, then the local rate gates.

use zhipin_pilot::config::{MatchMode, PilotConfig};
use zhipin_pilot::matcher::blacklist::Blacklist;
use zhipin_pilot::matcher::{salary, JobMatcher};
use zhipin_pilot::rate::RateController;

fn init_logger() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

#[test]
fn unrelated_occupation_is_rejected_despite_shared_characters() {
    init_logger();
    let matcher = JobMatcher::new(MatchMode::Standard);

    // A head-chef posting shares the 总X surface shape with 总监 but must not
    // match a marketing-director keyword.
    let outcome = matcher.match_title("市场品牌区域总厨", "市场总监");
    assert!(!outcome.matched);

    // The real thing still scores full marks.
    let outcome = matcher.match_title("市场总监（华北）", "市场总监");
    assert!(outcome.matched);
    assert_eq!(outcome.score, 1.0);
}

#[test]
fn pipeline_order_blacklist_before_salary() {
    init_logger();
    let bl = Blacklist::new(vec!["外包集团".into()], vec!["驻场".into()]);

    // Blacklisted company short-circuits even when the salary would pass.
    assert!(bl.company_hit("某某外包集团有限公司").is_some());
    assert!(bl.title_hit("Java开发（驻场）").is_some());
    assert!(!salary::salary_not_expected("20-40K", Some(15), Some(50)));
}

#[test]
fn salary_band_edges() {
    // Touching bands intersect: a 15-25K posting meets a 25-30K expectation.
    assert!(!salary::salary_not_expected("15-25K", Some(25), Some(30)));
    // Off-by-one below.
    assert!(salary::salary_not_expected("15-24K", Some(25), Some(30)));
    // Year-end bonus suffix never changes the verdict.
    assert!(!salary::salary_not_expected("15-25K·13薪", Some(25), Some(30)));
}

#[test]
fn rate_gates_release_in_manual_mode() {
    init_logger();
    let mut cfg = PilotConfig::default();
    cfg.enable_auto_delivery = false;
    cfg.min_match_score = 0.9;

    let mut rc = RateController::from_config(&cfg);
    rc.seed_daily_count(10_000);
    // Manual mode ignores score, caps and intervals alike.
    assert!(rc.can_deliver(0.1).is_ok());
}

#[test]
fn rate_gate_score_threshold_uses_config() {
    let mut cfg = PilotConfig::default();
    cfg.min_match_score = 0.75;
    cfg.delivery_time_range = None;

    let mut rc = RateController::from_config(&cfg);
    // 0.7 whole-word hit is below a 0.75 threshold.
    assert!(rc.can_deliver(0.7).is_err());
    assert!(rc.can_deliver(0.8).is_ok());
}
