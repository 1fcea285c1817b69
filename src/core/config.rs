use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// PilotConfig — file-based config loader (zhipin-pilot.json) with env fallback
// ---------------------------------------------------------------------------

pub const ENV_CONFIG_PATH: &str = "ZHIPIN_PILOT_CONFIG";
pub const ENV_USER_ID: &str = "ZHIPIN_PILOT_USER";
pub const ENV_HEADLESS: &str = "ZHIPIN_PILOT_HEADLESS";
pub const ENV_CHROME_EXECUTABLE: &str = "CHROME_EXECUTABLE";

/// Keyword matching strictness. Selects which matcher schemes are enabled.
#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchMode {
    /// Prefix match only.
    Strict,
    /// Prefix + keyword-with-role + whole-word (default).
    #[default]
    Standard,
    /// All schemes including the relaxed split/combination ones.
    Flexible,
}

/// Message Composer (smart greeting) sub-config.
#[derive(Deserialize, Clone, Debug, Default)]
#[serde(default)]
pub struct ComposerConfig {
    pub enabled: bool,
    /// HTTP endpoint that turns (title, company, description) into a greeting.
    pub endpoint: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Top-level config loaded from `zhipin-pilot.json`.
///
/// Every human-readable filter value (city names, salary bands, …) is
/// translated into site query codes exactly once at startup via
/// [`PilotConfig::normalize`]; the rest of the crate only ever sees codes.
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct PilotConfig {
    /// Account identifier; used for the session file, quota ledger and the
    /// verification handoff file names.
    pub user_id: String,

    pub keywords: Vec<String>,
    /// Human-readable city names; resolved against the built-in table and
    /// `custom_city_code`.
    pub cities: Vec<String>,
    /// User-supplied overrides / additions for the city code table.
    pub custom_city_code: HashMap<String, String>,

    // Search filters (human-readable; numeric strings pass through as codes).
    pub job_type: String,
    pub salary: String,
    pub experience: Vec<String>,
    pub degree: Vec<String>,
    pub scale: Vec<String>,
    pub stage: Vec<String>,
    pub industry: Vec<String>,

    /// Expected salary band in K/month: `[min]` or `[min, max]`. Empty means
    /// no salary filtering.
    pub expected_salary: Vec<i64>,

    /// Static greeting used whenever the composer is disabled or fails.
    pub say_hi: String,
    pub composer: ComposerConfig,

    /// `false` puts the run in manual mode: the rate gates are bypassed
    /// entirely and every matched posting is handed to the executor.
    pub enable_auto_delivery: bool,
    pub keyword_matching_mode: MatchMode,
    pub min_match_score: f64,
    pub max_daily_deliveries: u32,
    pub max_hourly_deliveries: u32,
    pub min_delivery_interval_secs: u64,
    /// `"HH:MM-HH:MM"`; unset, `00:00-00:00` and `00:00-23:59` all mean
    /// unrestricted.
    pub delivery_time_range: Option<String>,

    pub filter_dead_hr: bool,
    /// Activity texts that mark a recruiter as inactive (e.g. `半年前活跃`).
    pub dead_status: Vec<String>,

    pub send_img_resume: bool,
    pub resume_image_path: Option<String>,

    pub blacklist_companies: Vec<String>,
    pub blacklist_titles: Vec<String>,

    /// Headless for unattended runs; interactive login always flips to headed.
    pub headless: bool,
    /// Whether a dead stored session may fall back to the interactive QR
    /// login. Unattended deployments turn this off so the run fails fast
    /// instead of blocking on a QR code nobody is watching.
    pub allow_interactive_login: bool,
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            keywords: Vec::new(),
            cities: Vec::new(),
            custom_city_code: HashMap::new(),
            job_type: String::new(),
            salary: String::new(),
            experience: Vec::new(),
            degree: Vec::new(),
            scale: Vec::new(),
            stage: Vec::new(),
            industry: Vec::new(),
            expected_salary: Vec::new(),
            say_hi: String::new(),
            composer: ComposerConfig::default(),
            enable_auto_delivery: true,
            keyword_matching_mode: MatchMode::Standard,
            min_match_score: 0.7,
            max_daily_deliveries: 100,
            max_hourly_deliveries: 10,
            min_delivery_interval_secs: 300,
            delivery_time_range: None,
            filter_dead_hr: false,
            dead_status: Vec::new(),
            send_img_resume: false,
            resume_image_path: None,
            blacklist_companies: Vec::new(),
            blacklist_titles: Vec::new(),
            headless: true,
            allow_interactive_login: true,
        }
    }
}

impl PilotConfig {
    /// User id: JSON field → `ZHIPIN_PILOT_USER` env var → `"default"`.
    pub fn resolve_user_id(&self) -> String {
        if !self.user_id.trim().is_empty() {
            return self.user_id.trim().to_string();
        }
        std::env::var(ENV_USER_ID)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "default".to_string())
    }

    /// Headless: `ZHIPIN_PILOT_HEADLESS` env var overrides the JSON field.
    pub fn resolve_headless(&self) -> bool {
        match std::env::var(ENV_HEADLESS) {
            Ok(v) => !matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "0" | "false" | "no" | "off"
            ),
            Err(_) => self.headless,
        }
    }

    pub fn expected_salary_min(&self) -> Option<i64> {
        self.expected_salary.first().copied()
    }

    pub fn expected_salary_max(&self) -> Option<i64> {
        self.expected_salary.get(1).copied()
    }

    /// Translate every human-readable filter value into site query codes.
    /// Unknown values are dropped with a warning so one typo never sinks a
    /// whole run.
    pub fn normalize(&self) -> SearchCodes {
        let mut cities = Vec::new();
        for name in &self.cities {
            let code = self
                .custom_city_code
                .get(name)
                .cloned()
                .or_else(|| lookup(CITY_CODES, name));
            match code {
                Some(code) => cities.push((name.clone(), code)),
                None => warn!("config: unknown city '{}' — skipped", name),
            }
        }

        SearchCodes {
            cities,
            job_type: resolve_one(JOB_TYPE_CODES, &self.job_type, "job_type"),
            salary: resolve_one(SALARY_CODES, &self.salary, "salary"),
            experience: resolve_many(EXPERIENCE_CODES, &self.experience, "experience"),
            degree: resolve_many(DEGREE_CODES, &self.degree, "degree"),
            scale: resolve_many(SCALE_CODES, &self.scale, "scale"),
            stage: resolve_many(STAGE_CODES, &self.stage, "stage"),
            // No stable public name table for industries; numeric codes only.
            industry: self
                .industry
                .iter()
                .filter(|v| {
                    let ok = is_numeric_code(v);
                    if !ok {
                        warn!("config: industry '{}' is not a numeric code — skipped", v);
                    }
                    ok
                })
                .cloned()
                .collect(),
        }
    }
}

/// Filter values translated to site query codes, computed once at startup.
#[derive(Debug, Clone, Default)]
pub struct SearchCodes {
    /// `(display name, code)` pairs, in configured order.
    pub cities: Vec<(String, String)>,
    pub job_type: Option<String>,
    pub salary: Option<String>,
    pub experience: Vec<String>,
    pub degree: Vec<String>,
    pub scale: Vec<String>,
    pub stage: Vec<String>,
    pub industry: Vec<String>,
}

// ---------------------------------------------------------------------------
// Code tables
// ---------------------------------------------------------------------------

const CITY_CODES: &[(&str, &str)] = &[
    ("全国", "100010000"),
    ("北京", "101010100"),
    ("上海", "101020100"),
    ("天津", "101030100"),
    ("重庆", "101040100"),
    ("广州", "101280100"),
    ("深圳", "101280600"),
    ("杭州", "101210100"),
    ("成都", "101270100"),
    ("武汉", "101200100"),
    ("西安", "101110100"),
    ("南京", "101190100"),
    ("苏州", "101190400"),
    ("长沙", "101250100"),
    ("郑州", "101180100"),
    ("青岛", "101120200"),
    ("济南", "101120100"),
    ("合肥", "101220100"),
    ("厦门", "101230200"),
    ("东莞", "101281600"),
    ("佛山", "101280800"),
];

const SALARY_CODES: &[(&str, &str)] = &[
    ("不限", "0"),
    ("3K以下", "402"),
    ("3-5K", "403"),
    ("5-10K", "404"),
    ("10-20K", "405"),
    ("20-50K", "406"),
    ("50K以上", "407"),
];

const EXPERIENCE_CODES: &[(&str, &str)] = &[
    ("不限", "0"),
    ("经验不限", "101"),
    ("应届生", "102"),
    ("1年以内", "103"),
    ("1-3年", "104"),
    ("3-5年", "105"),
    ("5-10年", "106"),
    ("10年以上", "107"),
    ("在校生", "108"),
];

const DEGREE_CODES: &[(&str, &str)] = &[
    ("不限", "0"),
    ("初中及以下", "209"),
    ("中专/中技", "208"),
    ("高中", "206"),
    ("大专", "202"),
    ("本科", "203"),
    ("硕士", "204"),
    ("博士", "205"),
];

const SCALE_CODES: &[(&str, &str)] = &[
    ("不限", "0"),
    ("0-20人", "301"),
    ("20-99人", "302"),
    ("100-499人", "303"),
    ("500-999人", "304"),
    ("1000-9999人", "305"),
    ("10000人以上", "306"),
];

const STAGE_CODES: &[(&str, &str)] = &[
    ("不限", "0"),
    ("未融资", "801"),
    ("天使轮", "802"),
    ("A轮", "803"),
    ("B轮", "804"),
    ("C轮", "805"),
    ("D轮及以上", "806"),
    ("已上市", "807"),
    ("不需要融资", "808"),
];

const JOB_TYPE_CODES: &[(&str, &str)] = &[("不限", "0"), ("全职", "1901"), ("兼职", "1903")];

fn is_numeric_code(v: &str) -> bool {
    !v.is_empty() && v.chars().all(|c| c.is_ascii_digit())
}

fn lookup(table: &[(&str, &str)], name: &str) -> Option<String> {
    if is_numeric_code(name) {
        // Raw code passthrough.
        return Some(name.to_string());
    }
    table
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, c)| c.to_string())
}

fn resolve_one(table: &[(&str, &str)], value: &str, field: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    match lookup(table, value) {
        Some(code) if code != "0" => Some(code),
        Some(_) => None, // "不限" — omit the parameter entirely
        None => {
            warn!("config: unknown {} '{}' — skipped", field, value);
            None
        }
    }
}

fn resolve_many(table: &[(&str, &str)], values: &[String], field: &str) -> Vec<String> {
    values
        .iter()
        .filter_map(|v| resolve_one(table, v, field))
        .collect()
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Load `zhipin-pilot.json` from standard locations.
///
/// Search order (first found wins):
/// 1. `ZHIPIN_PILOT_CONFIG` env var path
/// 2. `./zhipin-pilot.json` (process cwd)
/// 3. `../zhipin-pilot.json` (one level up)
///
/// Missing file → `PilotConfig::default()` (silent, env-var fallbacks apply).
/// Parse error → log a warning, return `PilotConfig::default()`.
pub fn load_pilot_config() -> PilotConfig {
    let candidates: Vec<PathBuf> = {
        let mut v = vec![
            PathBuf::from("zhipin-pilot.json"),
            PathBuf::from("../zhipin-pilot.json"),
        ];
        if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
            v.insert(0, PathBuf::from(env_path));
        }
        v
    };

    for path in &candidates {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<PilotConfig>(&contents) {
                Ok(cfg) => {
                    info!("zhipin-pilot.json loaded from {}", path.display());
                    return cfg;
                }
                Err(e) => {
                    warn!(
                        "zhipin-pilot.json parse error at {}: {} — using defaults",
                        path.display(),
                        e
                    );
                    return PilotConfig::default();
                }
            },
            Err(_) => continue, // not found at this path — try next
        }
    }

    PilotConfig::default()
}

/// Root data directory: `~/.zhipin-pilot/` (sessions, quota ledger, events).
pub fn data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".zhipin-pilot"))
}

/// Optional override for the Chromium-family browser executable.
/// Only returns a value when `CHROME_EXECUTABLE` points at an existing path.
pub fn chrome_executable_override() -> Option<String> {
    let p = std::env::var(ENV_CHROME_EXECUTABLE).ok()?;
    let p = p.trim();
    if p.is_empty() {
        return None;
    }
    if Path::new(p).exists() {
        Some(p.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_city_normalization_builtin_and_custom() {
        let mut cfg = PilotConfig::default();
        cfg.cities = vec!["北京".into(), "霍格沃茨".into(), "雄安".into()];
        cfg.custom_city_code.insert("雄安".into(), "101271111".into());

        let codes = cfg.normalize();
        assert_eq!(codes.cities.len(), 2);
        assert_eq!(codes.cities[0], ("北京".to_string(), "101010100".to_string()));
        assert_eq!(codes.cities[1], ("雄安".to_string(), "101271111".to_string()));
    }

    #[test]
    fn test_unrestricted_filters_are_omitted() {
        let mut cfg = PilotConfig::default();
        cfg.salary = "不限".into();
        cfg.degree = vec!["本科".into(), "不限".into()];

        let codes = cfg.normalize();
        assert!(codes.salary.is_none());
        assert_eq!(codes.degree, vec!["203".to_string()]);
    }

    #[test]
    fn test_numeric_codes_pass_through() {
        let mut cfg = PilotConfig::default();
        cfg.salary = "405".into();
        cfg.industry = vec!["100020".into(), "互联网".into()];

        let codes = cfg.normalize();
        assert_eq!(codes.salary.as_deref(), Some("405"));
        assert_eq!(codes.industry, vec!["100020".to_string()]);
    }

    #[test]
    fn test_defaults() {
        let cfg = PilotConfig::default();
        assert!(cfg.enable_auto_delivery);
        assert_eq!(cfg.min_match_score, 0.7);
        assert_eq!(cfg.max_daily_deliveries, 100);
        assert_eq!(cfg.max_hourly_deliveries, 10);
        assert_eq!(cfg.min_delivery_interval_secs, 300);
        assert_eq!(cfg.keyword_matching_mode, MatchMode::Standard);
        assert!(cfg.allow_interactive_login);
    }
}
