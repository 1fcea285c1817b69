//! Keyword → job title matching.
//!
//! Titles are scored by a fixed ladder of schemes, most precise first; the
//! first scheme that fires wins. CJK has no whitespace word boundaries, so
//! "whole word" checks test whether the characters adjacent to the keyword
//! occurrence are themselves Han characters.

pub mod blacklist;
pub mod salary;

use std::sync::OnceLock;

use aho_corasick::AhoCorasick;
use tracing::debug;

use crate::core::config::MatchMode;
use crate::core::types::MatchOutcome;

/// Role suffixes that commonly follow a domain keyword in a title
/// (市场 + 总监, 运营 + 专员, …).
const ROLE_WORDS: &[&str] = &[
    "总监", "经理", "主管", "负责人", "专员", "助理", "专家", "工程师", "运营", "营销", "推广",
    "策划",
];

/// Obviously unrelated occupations. A title containing one of these only
/// matches when the keyword is its main part, because many of them collide
/// with legitimate role words character-wise (总厨 vs 总监 etc.).
const EXCLUDE_WORDS: &[&str] = &[
    "总厨", "厨师", "服务员", "保安", "保洁", "司机", "快递", "外卖", "收银", "理货", "仓管",
];

static EXCLUDE_MATCHER: OnceLock<AhoCorasick> = OnceLock::new();

fn exclude_matcher() -> &'static AhoCorasick {
    EXCLUDE_MATCHER.get_or_init(|| AhoCorasick::new(EXCLUDE_WORDS).expect("valid exclude words"))
}

/// Han character range used for word-boundary checks.
pub fn is_cjk(c: char) -> bool {
    ('\u{4E00}'..='\u{9FA5}').contains(&c)
}

/// First occurrence of `needle` in `haystack`, as a char index.
fn find_chars(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    (0..=haystack.len() - needle.len()).find(|&i| &haystack[i..i + needle.len()] == needle)
}

/// Both neighbours of `[start, end)` in `title` are non-Han (or the edge).
fn is_whole_word(title: &[char], start: usize, end: usize) -> bool {
    let boundary_before = start == 0 || !is_cjk(title[start - 1]);
    let boundary_after = end >= title.len() || !is_cjk(title[end]);
    boundary_before && boundary_after
}

#[derive(Debug, Clone, Copy)]
struct EnabledSchemes {
    prefix: bool,
    keyword_role: bool,
    whole_word: bool,
    split: bool,
    short_combo: bool,
}

impl EnabledSchemes {
    fn for_mode(mode: MatchMode) -> Self {
        match mode {
            MatchMode::Strict => Self {
                prefix: true,
                keyword_role: false,
                whole_word: false,
                split: false,
                short_combo: false,
            },
            MatchMode::Standard => Self {
                prefix: true,
                keyword_role: true,
                whole_word: true,
                split: false,
                short_combo: false,
            },
            MatchMode::Flexible => Self {
                prefix: true,
                keyword_role: true,
                whole_word: true,
                split: true,
                short_combo: true,
            },
        }
    }
}

pub struct JobMatcher {
    schemes: EnabledSchemes,
}

impl JobMatcher {
    pub fn new(mode: MatchMode) -> Self {
        Self {
            schemes: EnabledSchemes::for_mode(mode),
        }
    }

    /// Score `title` against one configured keyword.
    ///
    /// Scheme ladder (first hit wins):
    /// 1. keyword is the title prefix → 1.0
    /// 2. title contains keyword + role word → 0.8
    /// 3. title contains keyword as a whole word → 0.7
    /// 4. long keywords only: keyword splits into core + role word and the
    ///    core appears as a (left-bounded) word with the role word after it → 0.6
    /// 5. short keywords only: keyword + role word appears with a left
    ///    boundary before the keyword → 0.6
    pub fn match_title(&self, title: &str, keyword: &str) -> MatchOutcome {
        if title.is_empty() || keyword.is_empty() {
            return MatchOutcome::miss();
        }

        let s = self.schemes;
        let title_chars: Vec<char> = title.chars().collect();
        let keyword_chars: Vec<char> = keyword.chars().collect();

        // Exclude words take priority over every scheme: a title naming an
        // unrelated occupation matches only when the keyword is its main part.
        if exclude_matcher().is_match(title) {
            let main_part = title.starts_with(keyword)
                || ["总监", "经理", "主管", "负责人"]
                    .iter()
                    .any(|role| title.contains(&format!("{}{}", keyword, role)));
            if main_part {
                debug!("matcher: '{}' keeps excluded title '{}' (main part)", keyword, title);
                return MatchOutcome::hit(1.0, 1);
            }
            debug!("matcher: '{}' rejected by exclude word in '{}'", keyword, title);
            return MatchOutcome::miss();
        }

        // Scheme 1: prefix (long and short keywords alike).
        if s.prefix && title.starts_with(keyword) {
            return MatchOutcome::hit(1.0, 1);
        }

        // Scheme 2: keyword immediately followed by a role word.
        if s.keyword_role {
            for role in ROLE_WORDS {
                if title.contains(&format!("{}{}", keyword, role)) {
                    return MatchOutcome::hit(0.8, 2);
                }
            }
        }

        // Scheme 3: keyword as a whole word (boundaries on both sides).
        if s.whole_word {
            if let Some(idx) = find_chars(&title_chars, &keyword_chars) {
                if is_whole_word(&title_chars, idx, idx + keyword_chars.len()) {
                    return MatchOutcome::hit(0.7, 3);
                }
            }
        }

        if keyword_chars.len() >= 3 {
            // Scheme 4: split a long keyword into core + role word; match the
            // core as a left-bounded word with the role word somewhere after.
            if s.split {
                for role in ROLE_WORDS {
                    let role_chars: Vec<char> = role.chars().collect();
                    if keyword_chars.len() <= role_chars.len() || !keyword.ends_with(role) {
                        continue;
                    }
                    let core = &keyword_chars[..keyword_chars.len() - role_chars.len()];
                    if core.len() < 2 {
                        continue;
                    }
                    if !title.contains(role) {
                        continue;
                    }
                    if let Some(core_idx) = find_chars(&title_chars, core) {
                        let core_end = core_idx + core.len();
                        let boundary_before = core_idx == 0 || !is_cjk(title_chars[core_idx - 1]);
                        let boundary_after =
                            core_end >= title_chars.len() || !is_cjk(title_chars[core_end]);
                        let role_after =
                            find_chars(&title_chars[core_end..], &role_chars).is_some();
                        if boundary_before && (boundary_after || role_after) {
                            return MatchOutcome::hit(0.6, 4);
                        }
                    }
                }
            }
        } else {
            // Scheme 5: short keyword + role word combination, left-bounded.
            if s.short_combo {
                for role in ROLE_WORDS {
                    if !title.contains(&format!("{}{}", keyword, role)) {
                        continue;
                    }
                    if let Some(idx) = find_chars(&title_chars, &keyword_chars) {
                        if idx == 0 || !is_cjk(title_chars[idx - 1]) {
                            return MatchOutcome::hit(0.6, 5);
                        }
                    }
                }
            }
        }

        MatchOutcome::miss()
    }
}

/// Recruiter activity text names a configured inactive state.
pub fn recruiter_inactive(activity: &str, dead_status: &[String]) -> bool {
    !activity.is_empty() && dead_status.iter().any(|s| activity.contains(s.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn standard() -> JobMatcher {
        JobMatcher::new(MatchMode::Standard)
    }

    #[test]
    fn test_prefix_match_scores_full() {
        let m = standard();
        let r = m.match_title("市场总监（华东区）", "市场总监");
        assert!(r.matched);
        assert_eq!(r.score, 1.0);
        assert_eq!(r.scheme, 1);
    }

    #[test]
    fn test_keyword_plus_role_scores_point_eight() {
        let m = standard();
        let r = m.match_title("高级市场经理", "市场");
        assert!(r.matched);
        assert_eq!(r.score, 0.8);
        assert_eq!(r.scheme, 2);
    }

    #[test]
    fn test_whole_word_needs_boundaries() {
        let m = standard();
        // "/" is a boundary on both sides.
        let r = m.match_title("电商/运营", "运营");
        assert!(r.matched);
        assert_eq!(r.scheme, 3);

        // Embedded between Han characters on both sides — no boundary.
        let r = m.match_title("集运营销岗", "运营");
        assert!(!r.matched);
    }

    #[test]
    fn test_exclude_word_blocks_superficial_overlap() {
        // "市场品牌区域总厨" shares the 总X shape with 总监 but names a chef.
        let m = standard();
        let r = m.match_title("市场品牌区域总厨", "市场总监");
        assert!(!r.matched);
        assert_eq!(r.score, 0.0);
    }

    #[test]
    fn test_exclude_word_overridden_when_keyword_is_main_part() {
        let m = standard();
        // Title starts with the keyword, so the exclude word downstream is ignored.
        let r = m.match_title("厨师长", "厨师");
        assert!(r.matched);
        assert_eq!(r.score, 1.0);
    }

    #[test]
    fn test_strict_mode_is_prefix_only() {
        let m = JobMatcher::new(MatchMode::Strict);
        assert!(m.match_title("市场总监", "市场总监").matched);
        assert!(!m.match_title("高级市场总监", "市场总监").matched);
    }

    #[test]
    fn test_flexible_split_scheme() {
        let m = JobMatcher::new(MatchMode::Flexible);
        // keyword 市场总监 splits into core 市场 + role 总监; title has the core
        // left-bounded with the role word after it.
        let r = m.match_title("市场部总监", "市场总监");
        assert!(r.matched);
        assert_eq!(r.score, 0.6);
        assert_eq!(r.scheme, 4);

        // Standard mode must not fire scheme 4.
        assert!(!standard().match_title("市场部总监", "市场总监").matched);
    }

    #[test]
    fn test_flexible_short_combo_needs_left_boundary() {
        let m = JobMatcher::new(MatchMode::Flexible);
        // 前端 sits mid-title after a Han char, but scheme 2 already covers
        // keyword+role, so pick a case where only scheme 5's boundary check
        // differs: keyword embedded after Han char with role word present.
        let r = m.match_title("大前端经理", "前端");
        // scheme 2 fires first on 前端+经理 regardless of boundary.
        assert!(r.matched);
        assert_eq!(r.scheme, 2);
    }

    #[test]
    fn test_empty_inputs_never_match() {
        let m = standard();
        assert!(!m.match_title("", "市场").matched);
        assert!(!m.match_title("市场总监", "").matched);
    }

    #[test]
    fn test_keyword_length_uses_chars_not_bytes() {
        // Two Han chars are 6 bytes; they must take the short-keyword path
        // (scheme 4 unavailable, scheme 5 available in flexible mode).
        let m = JobMatcher::new(MatchMode::Flexible);
        let r = m.match_title("电商销售运营主管", "运营");
        assert!(r.matched);
    }

    #[test]
    fn test_recruiter_inactive() {
        let dead = vec!["半年前活跃".to_string(), "年前活跃".to_string()];
        assert!(recruiter_inactive("HR·半年前活跃", &dead));
        assert!(!recruiter_inactive("HR·刚刚活跃", &dead));
        assert!(!recruiter_inactive("", &dead));
    }
}
