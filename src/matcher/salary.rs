//! Salary text parsing and the expected-salary filter.
//!
//! Listing salaries arrive as display text (`15-25K·14薪`, `300-500元/天`,
//! sometimes with anti-scrape private-use font glyphs for digits) and are
//! compared against the user's expected monthly band in K.

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

/// Working days per month used to convert a monthly K band to a daily wage.
const WORKDAYS_PER_MONTH: f64 = 21.75;

/// Map private-use font glyphs (U+E000..U+E009) back to ASCII digits.
pub fn decode_salary(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{E000}'..='\u{E009}' => {
                char::from(b'0' + (c as u32 - 0xE000) as u8)
            }
            other => other,
        })
        .collect()
}

static YEAR_BONUS_RE: OnceLock<Regex> = OnceLock::new();

/// Strip the year-end bonus suffix (`·14薪`, `·13薪`, …).
pub fn remove_year_bonus(salary: &str) -> String {
    if !salary.contains('薪') {
        return salary.to_string();
    }
    YEAR_BONUS_RE
        .get_or_init(|| Regex::new(r"·\d+薪").expect("valid bonus regex"))
        .replace_all(salary, "")
        .into_owned()
}

/// Only K-band and per-day salaries are comparable; everything else
/// (面议, 千/月, …) fails the format check.
pub fn is_comparable_format(salary: &str) -> bool {
    salary.contains('K') || salary.contains('k') || salary.contains("元/天")
}

/// Drop the K unit and anything from the first `·` on.
pub fn clean_salary_text(salary: &str) -> String {
    let s = salary.replace(['K', 'k'], "");
    match s.find('·') {
        Some(idx) => s[..idx].to_string(),
        None => s,
    }
}

/// `"15-25"` → `[15, 25]`; non-digit noise inside each side is stripped.
/// Sides that hold no digits at all are dropped.
pub fn parse_salary_range(salary: &str) -> Vec<i64> {
    salary
        .split('-')
        .filter_map(|part| {
            let digits: String = part.chars().filter(|c| c.is_ascii_digit()).collect();
            digits.parse::<i64>().ok()
        })
        .collect()
}

fn monthly_k_to_daily(k: i64) -> i64 {
    (k as f64 * 1000.0 / WORKDAYS_PER_MONTH).round() as i64
}

/// The posting's `[min, max]` band cannot intersect the expected band.
///
/// * band shorter than 2 values (parse failure, open-ended text) → out of range
/// * no expected minimum → never out of range
/// * daily wages: the expected K band is converted to a daily wage; this
///   needs both bounds, so a missing expected max is also out of range
pub fn is_salary_out_of_range(
    band: &[i64],
    expected_min: Option<i64>,
    expected_max: Option<i64>,
    daily: bool,
) -> bool {
    let (Some(&job_min), Some(&job_max)) = (band.first(), band.get(1)) else {
        return true;
    };
    let Some(mut min) = expected_min else {
        return false;
    };
    let mut max = expected_max;
    if daily {
        let Some(m) = max else { return true };
        max = Some(monthly_k_to_daily(m));
        min = monthly_k_to_daily(min);
    }
    if job_max < min {
        return true;
    }
    matches!(max, Some(m) if job_min > m)
}

/// Full filter: `true` means the posting's salary does not meet expectations
/// and should be skipped. Unparseable text counts as not meeting them.
pub fn salary_not_expected(raw: &str, expected_min: Option<i64>, expected_max: Option<i64>) -> bool {
    if expected_min.is_none() {
        return false;
    }

    let salary = remove_year_bonus(raw);
    if !is_comparable_format(&salary) {
        debug!("salary: '{}' not in a comparable format — filtered", raw);
        return true;
    }

    let salary = clean_salary_text(&salary);
    let daily = salary.contains("元/天");
    let salary = salary.replace("元/天", "");

    let band = parse_salary_range(&salary);
    is_salary_out_of_range(&band, expected_min, expected_max, daily)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_private_use_digits() {
        let encoded = "\u{E001}\u{E005}-\u{E002}\u{E005}K";
        assert_eq!(decode_salary(encoded), "15-25K");
    }

    #[test]
    fn test_remove_year_bonus() {
        assert_eq!(remove_year_bonus("15-25K·14薪"), "15-25K");
        assert_eq!(remove_year_bonus("15-25K"), "15-25K");
    }

    #[test]
    fn test_parse_salary_range() {
        assert_eq!(parse_salary_range("15-25"), vec![15, 25]);
        assert_eq!(parse_salary_range("300-500"), vec![300, 500]);
        assert_eq!(parse_salary_range("面议"), Vec::<i64>::new());
    }

    #[test]
    fn test_band_inside_expectation_passes() {
        assert!(!salary_not_expected("15-25K·14薪", Some(15), Some(30)));
        assert!(!salary_not_expected("20-40K", Some(15), None));
    }

    #[test]
    fn test_band_below_minimum_is_filtered() {
        assert!(salary_not_expected("8-12K", Some(15), Some(30)));
    }

    #[test]
    fn test_band_above_maximum_is_filtered() {
        assert!(salary_not_expected("35-50K", Some(15), Some(30)));
    }

    #[test]
    fn test_no_expectation_never_filters() {
        assert!(!salary_not_expected("面议", None, None));
    }

    #[test]
    fn test_unparseable_with_expectation_is_filtered() {
        assert!(salary_not_expected("面议", Some(15), Some(30)));
        assert!(salary_not_expected("5千-8千", Some(15), Some(30)));
    }

    #[test]
    fn test_daily_wage_conversion() {
        // 15K/month ≈ 690/day, 30K/month ≈ 1379/day.
        assert!(!salary_not_expected("700-1300元/天", Some(15), Some(30)));
        assert!(salary_not_expected("300-500元/天", Some(15), Some(30)));
        // Daily comparison needs both expected bounds.
        assert!(salary_not_expected("700-1300元/天", Some(15), None));
    }

    #[test]
    fn test_open_ended_band_is_filtered() {
        // "25K以上" leaves a single number after cleaning.
        assert!(salary_not_expected("25K以上", Some(15), Some(30)));
    }
}
