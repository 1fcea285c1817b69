//! Company / title blacklists, plus the best-effort rejection-learning scan.
//!
//! Company matching is deliberately bidirectional (`黑名单项 ⊇ 公司名` or
//! `公司名 ⊇ 黑名单项`) because chat lists truncate long company names; title
//! matching is plain one-way containment.

use std::time::Duration;

use chromiumoxide::Page;
use tracing::{info, warn};

use crate::matcher::is_cjk;

#[derive(Debug, Default, Clone)]
pub struct Blacklist {
    companies: Vec<String>,
    titles: Vec<String>,
}

impl Blacklist {
    pub fn new(companies: Vec<String>, titles: Vec<String>) -> Self {
        Self { companies, titles }
    }

    /// Bidirectional substring match; returns the matching entry.
    pub fn company_hit(&self, company: &str) -> Option<&str> {
        let company = company.trim();
        if company.is_empty() {
            return None;
        }
        self.companies
            .iter()
            .map(|e| e.trim())
            .filter(|e| !e.is_empty())
            .find(|e| e.contains(company) || company.contains(*e))
    }

    /// One-way containment: the title contains a blacklisted token.
    pub fn title_hit(&self, title: &str) -> Option<&str> {
        let title = title.trim();
        if title.is_empty() {
            return None;
        }
        self.titles
            .iter()
            .map(|e| e.trim())
            .filter(|e| !e.is_empty())
            .find(|e| title.contains(*e))
    }

    /// Add a company learned from a rejection message. Truncation ellipses
    /// are stripped and too-short fragments rejected so chat-list noise
    /// never blacklists half the market.
    pub fn learn_company(&mut self, company: &str) {
        // Already covered by an existing (possibly shorter) entry.
        if self.companies.iter().any(|e| company.contains(e.as_str())) {
            return;
        }
        let cleaned = company.replace("...", "").replace('…', "");
        if !looks_like_company_name(&cleaned) {
            return;
        }
        info!("blacklist: 🚫 learned company '{}'", cleaned);
        self.companies.push(cleaned);
    }

    pub fn company_count(&self) -> usize {
        self.companies.len()
    }
}

/// At least two consecutive Han characters or four consecutive latin letters.
fn looks_like_company_name(name: &str) -> bool {
    let mut han_run = 0usize;
    let mut latin_run = 0usize;
    for c in name.chars() {
        if is_cjk(c) {
            han_run += 1;
            latin_run = 0;
            if han_run >= 2 {
                return true;
            }
        } else if c.is_ascii_alphabetic() {
            latin_run += 1;
            han_run = 0;
            if latin_run >= 4 {
                return true;
            }
        } else {
            han_run = 0;
            latin_run = 0;
        }
    }
    false
}

/// Does a recruiter's last message read like a rejection?
///
/// Positive cues are broad (不 / 感谢 / 但 / 遗憾 / 需要本 / 对不) with two
/// narrow carve-outs (不是 / 不生) that appear in ordinary small talk.
pub fn is_rejection_message(message: &str) -> bool {
    let positive = ["不", "感谢", "但", "遗憾", "需要本", "对不"]
        .iter()
        .any(|p| message.contains(p));
    let carve_out = message.contains("不是") || message.contains("不生");
    positive && !carve_out
}

const CHAT_URL: &str = "https://www.zhipin.com/web/geek/chat";

/// Upper bound on scroll rounds through the chat list.
const MAX_SCAN_ROUNDS: usize = 40;

/// Scan the conversation list for rejection messages and add the matching
/// companies to the blacklist. Strictly best-effort: every failure is logged
/// and swallowed, the run continues with whatever was learned so far.
pub async fn learn_from_rejections(page: &Page, blacklist: &mut Blacklist) {
    if let Err(e) = page.goto(CHAT_URL).await {
        warn!("blacklist: chat list unavailable for learning scan: {}", e);
        return;
    }
    tokio::time::sleep(Duration::from_secs(3)).await;

    let before = blacklist.company_count();

    for _ in 0..MAX_SCAN_ROUNDS {
        let batch = scrape_chat_rows(page).await;
        for (company, message) in &batch {
            if is_rejection_message(message) {
                info!("blacklist: rejection from '{}': {}", company, message);
                blacklist.learn_company(company);
            }
        }

        match chat_list_finished(page).await {
            Ok(true) => break,
            Ok(false) => {}
            Err(e) => {
                warn!("blacklist: learning scan stopped early: {}", e);
                break;
            }
        }

        if let Err(e) = page
            .evaluate("window.scrollTo(0, document.body.scrollHeight);")
            .await
        {
            warn!("blacklist: scroll during learning scan failed: {}", e);
            break;
        }
        tokio::time::sleep(Duration::from_millis(1500)).await;
    }

    info!(
        "blacklist: learning scan done — {} companies ({} new)",
        blacklist.company_count(),
        blacklist.company_count() - before
    );
}

/// `(company, last message)` pairs currently rendered in the chat list.
async fn scrape_chat_rows(page: &Page) -> Vec<(String, String)> {
    let js = r#"
        (() => {
            const rows = [];
            const items = document.querySelectorAll('div[role="listitem"], li.chat-item, .geek-chat-list li');
            for (const item of items) {
                const company = item.querySelector('.title-box .name-box span:last-child, .company-name, .title .name');
                const message = item.querySelector('.gray, .last-msg-text, .content .text');
                if (company && message) {
                    rows.push([company.innerText.trim(), message.innerText.trim()]);
                }
            }
            return JSON.stringify(rows);
        })()
    "#;

    let raw = match page.evaluate(js).await {
        Ok(v) => v.into_value::<String>().unwrap_or_default(),
        Err(e) => {
            warn!("blacklist: chat row extraction failed: {}", e);
            return Vec::new();
        }
    };
    serde_json::from_str(&raw).unwrap_or_default()
}

async fn chat_list_finished(page: &Page) -> anyhow::Result<bool> {
    let js = r#"
        (() => {
            const el = document.querySelector('.finished-text, .load-more-text');
            return el ? el.innerText.trim() : '';
        })()
    "#;
    let text = page.evaluate(js).await?.into_value::<String>()?;
    Ok(text == "没有更多了")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_company_match_is_bidirectional() {
        let bl = Blacklist::new(vec!["某某科技有限公司".into()], vec![]);
        // Blacklist entry contains the (truncated) listing name…
        assert!(bl.company_hit("某某科技").is_some());
        // …and the listing name contains the blacklist entry.
        assert!(bl.company_hit("某某科技有限公司北京分公司").is_some());
        assert!(bl.company_hit("别的公司").is_none());
    }

    #[test]
    fn test_title_match_is_one_way() {
        let bl = Blacklist::new(vec![], vec!["外包".into()]);
        assert!(bl.title_hit("Java开发（外包）").is_some());
        assert!(bl.title_hit("Java开发").is_none());
    }

    #[test]
    fn test_rejection_phrases() {
        assert!(is_rejection_message("感谢您的投递，但很遗憾…"));
        assert!(is_rejection_message("抱歉，不太合适"));
        assert!(is_rejection_message("我们需要本地候选人"));
        // Carve-outs: ordinary chatter containing 不是/不生.
        assert!(!is_rejection_message("这个岗位不是远程的哦"));
        assert!(!is_rejection_message("你好，请问方便聊聊吗"));
    }

    #[test]
    fn test_learned_companies_are_validated() {
        let mut bl = Blacklist::default();
        bl.learn_company("字节…");
        assert_eq!(bl.company_count(), 1);
        // Single Han char + punctuation: rejected.
        bl.learn_company("某…");
        assert_eq!(bl.company_count(), 1);
        // Latin needs ≥ 4 letters.
        bl.learn_company("AB12");
        assert_eq!(bl.company_count(), 1);
        bl.learn_company("Acme Inc");
        assert_eq!(bl.company_count(), 2);
    }

    #[test]
    fn test_learning_skips_already_covered() {
        let mut bl = Blacklist::new(vec!["外包公司".into()], vec![]);
        bl.learn_company("外包公司上海分部");
        assert_eq!(bl.company_count(), 1);
    }
}
