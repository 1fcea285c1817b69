//! Process-local delivery pacing: score threshold, time window, daily and
//! hourly caps, minimum interval, and the jittered recommended wait.
//!
//! These gates only ever skip the current posting — the account-wide budget
//! lives in the external quota store ([`quota`]) and aborts the whole run
//! when exhausted.

pub mod quota;

use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, NaiveTime, Timelike};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::config::PilotConfig;

/// A gate said no. The posting is skipped; nothing here is fatal.
#[derive(Debug, Error, PartialEq)]
pub enum GateDenied {
    #[error("match score {score:.2} below threshold {min:.2}")]
    BelowThreshold { score: f64, min: f64 },

    #[error("outside delivery window {0}")]
    OutsideWindow(String),

    #[error("daily cap reached ({0})")]
    DailyCapReached(u32),

    #[error("hourly cap reached ({0})")]
    HourlyCapReached(u32),

    #[error("minimum interval not elapsed ({remaining}s remaining)")]
    IntervalNotElapsed { remaining: i64 },
}

pub struct RateController {
    /// `false` = manual mode: every gate is bypassed.
    enabled: bool,
    min_score: f64,
    window: Option<(NaiveTime, NaiveTime)>,
    daily_cap: u32,
    hourly_cap: u32,
    min_interval: Duration,

    day: NaiveDate,
    daily_count: u32,
    hour_started: DateTime<Local>,
    hourly_count: u32,
    last_delivery: Option<DateTime<Local>>,
}

impl RateController {
    pub fn from_config(cfg: &PilotConfig) -> Self {
        let now = Local::now();
        Self {
            enabled: cfg.enable_auto_delivery,
            min_score: cfg.min_match_score,
            window: parse_window(cfg.delivery_time_range.as_deref()),
            daily_cap: cfg.max_daily_deliveries,
            hourly_cap: cfg.max_hourly_deliveries,
            min_interval: Duration::from_secs(cfg.min_delivery_interval_secs),
            day: now.date_naive(),
            daily_count: 0,
            hour_started: now,
            hourly_count: 0,
            last_delivery: None,
        }
    }

    /// Seed today's count from the external quota store so a restarted
    /// process doesn't get a fresh daily budget.
    pub fn seed_daily_count(&mut self, used_today: u32) {
        info!("rate: seeding daily count from quota store: {}", used_today);
        self.daily_count = used_today;
    }

    /// Run every gate in order. Manual mode (auto-delivery disabled) bypasses
    /// them all — the operator asked for every matched posting.
    pub fn can_deliver(&mut self, score: f64) -> Result<(), GateDenied> {
        self.can_deliver_at(score, Local::now())
    }

    fn can_deliver_at(&mut self, score: f64, now: DateTime<Local>) -> Result<(), GateDenied> {
        if !self.enabled {
            debug!("rate: auto-delivery disabled — gates bypassed (manual mode)");
            return Ok(());
        }

        self.rollover(now);

        if score < self.min_score {
            return Err(GateDenied::BelowThreshold { score, min: self.min_score });
        }

        if let Some((start, end)) = self.window {
            let t = now.time();
            if t < start || t > end {
                return Err(GateDenied::OutsideWindow(format!(
                    "{}-{}",
                    start.format("%H:%M"),
                    end.format("%H:%M")
                )));
            }
        }

        if self.daily_count >= self.daily_cap {
            return Err(GateDenied::DailyCapReached(self.daily_cap));
        }

        if self.hourly_count >= self.hourly_cap {
            return Err(GateDenied::HourlyCapReached(self.hourly_cap));
        }

        if let Some(last) = self.last_delivery {
            let elapsed = (now - last).num_seconds();
            let required = self.min_interval.as_secs() as i64;
            if elapsed < required {
                return Err(GateDenied::IntervalNotElapsed { remaining: required - elapsed });
            }
        }

        Ok(())
    }

    /// Bump the counters after a verified send.
    pub fn record_delivery(&mut self) {
        self.record_delivery_at(Local::now());
    }

    fn record_delivery_at(&mut self, now: DateTime<Local>) {
        self.rollover(now);
        self.daily_count += 1;
        self.hourly_count += 1;
        self.last_delivery = Some(now);
        info!(
            "rate: delivery recorded (today {}/{}, this hour {}/{})",
            self.daily_count, self.daily_cap, self.hourly_count, self.hourly_cap
        );
    }

    /// Lazy clock rollover: fresh day resets the daily count, a full hour
    /// since the window opened resets the hourly count.
    fn rollover(&mut self, now: DateTime<Local>) {
        let today = now.date_naive();
        if today != self.day {
            info!("rate: new day {} — daily count reset", today);
            self.day = today;
            self.daily_count = 0;
        }
        if (now - self.hour_started).num_seconds() > 3600 {
            self.hour_started = now;
            self.hourly_count = 0;
        }
    }

    /// Interval with ±20% uniform jitter so the send cadence never looks
    /// metronomic.
    pub fn recommended_wait(&self) -> Duration {
        use rand::prelude::*;
        let mut rng = rand::rng();
        let factor: f64 = rng.random_range(0.8..=1.2);
        self.min_interval.mul_f64(factor)
    }

    pub fn daily_count(&self) -> u32 {
        self.daily_count
    }
}

/// Parse `"HH:MM-HH:MM"`. `None`, parse errors, `00:00-00:00` and
/// `00:00-23:59` all mean "no window restriction".
fn parse_window(range: Option<&str>) -> Option<(NaiveTime, NaiveTime)> {
    let range = range?.trim();
    if range.is_empty() {
        return None;
    }
    let Some((start_s, end_s)) = range.split_once('-') else {
        warn!("rate: unparseable delivery window '{}' — unrestricted", range);
        return None;
    };
    let parse = |s: &str| NaiveTime::parse_from_str(s.trim(), "%H:%M").ok();
    match (parse(start_s), parse(end_s)) {
        (Some(start), Some(end)) => {
            let unrestricted = start.num_seconds_from_midnight() == 0
                && (end.num_seconds_from_midnight() == 0
                    || (end.hour() == 23 && end.minute() == 59));
            if unrestricted {
                None
            } else {
                Some((start, end))
            }
        }
        _ => {
            warn!("rate: unparseable delivery window '{}' — unrestricted", range);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn cfg() -> PilotConfig {
        PilotConfig::default()
    }

    fn at(h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 8, 23, h, m, 0).unwrap()
    }

    #[test]
    fn test_score_threshold() {
        let mut rc = RateController::from_config(&cfg());
        assert!(rc.can_deliver_at(0.8, at(10, 0)).is_ok());
        assert_eq!(
            rc.can_deliver_at(0.6, at(10, 0)),
            Err(GateDenied::BelowThreshold { score: 0.6, min: 0.7 })
        );
    }

    #[test]
    fn test_manual_mode_bypasses_every_gate() {
        let mut c = cfg();
        c.enable_auto_delivery = false;
        c.delivery_time_range = Some("09:00-10:00".into());
        let mut rc = RateController::from_config(&c);
        rc.seed_daily_count(10_000);
        // Terrible score, outside the window, daily cap blown — still allowed.
        assert!(rc.can_deliver_at(0.0, at(23, 0)).is_ok());
    }

    #[test]
    fn test_time_window() {
        let mut c = cfg();
        c.delivery_time_range = Some("09:00-18:00".into());
        let mut rc = RateController::from_config(&c);
        assert!(rc.can_deliver_at(0.9, at(12, 0)).is_ok());
        assert!(matches!(
            rc.can_deliver_at(0.9, at(8, 59)),
            Err(GateDenied::OutsideWindow(_))
        ));
        assert!(matches!(
            rc.can_deliver_at(0.9, at(18, 1)),
            Err(GateDenied::OutsideWindow(_))
        ));
    }

    #[test]
    fn test_default_window_values_mean_unrestricted() {
        assert!(parse_window(None).is_none());
        assert!(parse_window(Some("00:00-00:00")).is_none());
        assert!(parse_window(Some("00:00-23:59")).is_none());
        assert!(parse_window(Some("garbage")).is_none());
        assert!(parse_window(Some("09:00-18:00")).is_some());
    }

    #[test]
    fn test_daily_cap_and_rollover() {
        let mut c = cfg();
        c.max_daily_deliveries = 2;
        c.max_hourly_deliveries = 100;
        c.min_delivery_interval_secs = 0;
        let mut rc = RateController::from_config(&c);

        rc.record_delivery_at(at(10, 0));
        rc.record_delivery_at(at(10, 1));
        assert_eq!(rc.can_deliver_at(0.9, at(10, 2)), Err(GateDenied::DailyCapReached(2)));

        // Next day: count resets lazily on the next check.
        let tomorrow = Local.with_ymd_and_hms(2026, 8, 24, 9, 0, 0).unwrap();
        assert!(rc.can_deliver_at(0.9, tomorrow).is_ok());
        assert_eq!(rc.daily_count(), 0);
    }

    #[test]
    fn test_seeded_daily_count_survives_restart_semantics() {
        let mut c = cfg();
        c.max_daily_deliveries = 100;
        let mut rc = RateController::from_config(&c);
        rc.seed_daily_count(100);
        assert_eq!(rc.can_deliver_at(0.9, at(10, 0)), Err(GateDenied::DailyCapReached(100)));
    }

    #[test]
    fn test_hourly_cap_resets_after_an_hour() {
        let mut c = cfg();
        c.max_hourly_deliveries = 1;
        c.min_delivery_interval_secs = 0;
        let mut rc = RateController::from_config(&c);
        rc.hour_started = at(10, 0);

        rc.record_delivery_at(at(10, 5));
        assert_eq!(rc.can_deliver_at(0.9, at(10, 6)), Err(GateDenied::HourlyCapReached(1)));
        // 61 minutes after the hour window opened.
        assert!(rc.can_deliver_at(0.9, at(11, 1)).is_ok());
    }

    #[test]
    fn test_minimum_interval() {
        let mut c = cfg();
        c.min_delivery_interval_secs = 300;
        let mut rc = RateController::from_config(&c);

        // First delivery has no predecessor: allowed.
        assert!(rc.can_deliver_at(0.9, at(10, 0)).is_ok());
        rc.record_delivery_at(at(10, 0));

        assert!(matches!(
            rc.can_deliver_at(0.9, at(10, 2)),
            Err(GateDenied::IntervalNotElapsed { .. })
        ));
        assert!(rc.can_deliver_at(0.9, at(10, 5)).is_ok());
    }

    #[test]
    fn test_recommended_wait_stays_within_jitter_bounds() {
        let mut c = cfg();
        c.min_delivery_interval_secs = 300;
        let rc = RateController::from_config(&c);
        for _ in 0..200 {
            let w = rc.recommended_wait().as_secs_f64();
            assert!((240.0..=360.0).contains(&w), "wait {}s outside ±20%", w);
        }
    }

    /// Property: with a daily cap of N, at most N deliveries are ever allowed
    /// within one day no matter how the checks interleave.
    #[test]
    fn test_daily_cap_property() {
        let mut c = cfg();
        c.max_daily_deliveries = 7;
        c.max_hourly_deliveries = 1000;
        c.min_delivery_interval_secs = 0;
        let mut rc = RateController::from_config(&c);

        let mut allowed = 0;
        for i in 0..50u32 {
            let now = at(9, 0) + chrono::Duration::minutes(i as i64);
            if rc.can_deliver_at(0.9, now).is_ok() {
                rc.record_delivery_at(now);
                allowed += 1;
            }
        }
        assert_eq!(allowed, 7);
    }
}
