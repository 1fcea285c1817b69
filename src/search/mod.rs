//! Search-result harvesting: build the filtered search URL, scroll the
//! endless list until it stops growing, and scrape every job card in one
//! JS pass.

use std::time::Duration;

use chromiumoxide::Page;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use tracing::{debug, info, warn};

use crate::browser::page as pg;
use crate::core::config::SearchCodes;
use crate::core::types::Posting;
use crate::matcher::salary::decode_salary;

const SEARCH_BASE: &str = "https://www.zhipin.com/web/geek/job";

const NAV_TIMEOUT: Duration = Duration::from_secs(30);
/// Scroll loop bounds: the list virtualizes poorly past a few hundred cards
/// and some city/keyword pairs page forever.
const MAX_SCROLL_ATTEMPTS: usize = 50;
const MAX_SCROLL_TIME: Duration = Duration::from_secs(5 * 60);

const JOB_CARD_SELECTOR: &str = "ul.rec-job-list li.job-card-box, ul.job-list-box li.job-card-wrapper";

/// Compose the search URL for one city and keyword. Multi-valued filters are
/// comma-joined; empty filters are omitted entirely.
pub fn build_search_url(codes: &SearchCodes, city_code: &str, keyword: &str) -> String {
    let mut params: Vec<(&str, String)> = vec![("city", city_code.to_string())];

    if let Some(v) = &codes.job_type {
        params.push(("jobType", v.clone()));
    }
    if let Some(v) = &codes.salary {
        params.push(("salary", v.clone()));
    }
    for (name, values) in [
        ("experience", &codes.experience),
        ("degree", &codes.degree),
        ("scale", &codes.scale),
        ("stage", &codes.stage),
        ("industry", &codes.industry),
    ] {
        if !values.is_empty() {
            params.push((name, values.join(",")));
        }
    }

    let mut url = format!("{}?", SEARCH_BASE);
    for (i, (name, value)) in params.iter().enumerate() {
        if i > 0 {
            url.push('&');
        }
        url.push_str(name);
        url.push('=');
        url.push_str(value);
    }
    url.push_str("&query=");
    url.push_str(&utf8_percent_encode(keyword, NON_ALPHANUMERIC).to_string());
    url
}

/// Navigate to the search results and scroll until the card count stops
/// growing, then scrape every card. Scroll errors end the loop gracefully
/// with whatever has loaded so far.
pub async fn load_all_postings(
    page: &Page,
    codes: &SearchCodes,
    city_code: &str,
    keyword: &str,
) -> anyhow::Result<Vec<Posting>> {
    let url = build_search_url(codes, city_code, keyword);
    info!("🔎 search: {}", url);

    tokio::time::timeout(NAV_TIMEOUT, page.goto(&url))
        .await
        .map_err(|_| anyhow::anyhow!("search page navigation timed out"))??;
    pg::sleep_range(3000, 6000).await;

    let started = tokio::time::Instant::now();
    let mut last_count = pg::count(page, JOB_CARD_SELECTOR).await;

    for attempt in 0..MAX_SCROLL_ATTEMPTS {
        if started.elapsed() >= MAX_SCROLL_TIME {
            info!("search: scroll time budget exhausted at {} cards", last_count);
            break;
        }
        if let Err(e) = pg::scroll_to_bottom(page).await {
            warn!("search: scroll failed, keeping {} cards: {}", last_count, e);
            break;
        }
        pg::sleep_range(2000, 4000).await;

        let count = pg::count(page, JOB_CARD_SELECTOR).await;
        debug!("search: scroll {} — {} cards", attempt + 1, count);
        if count <= last_count {
            // Plateau: the list stopped growing.
            break;
        }
        last_count = count;
    }

    let postings = scrape_cards(page).await?;
    info!("search: '{}' in city {} — {} postings", keyword, city_code, postings.len());
    Ok(postings)
}

/// Scrape every rendered job card in a single JS evaluation. One round trip
/// instead of per-card element handles, which go stale as the list rerenders.
async fn scrape_cards(page: &Page) -> anyhow::Result<Vec<Posting>> {
    let js = r#"
        (() => {
            const cards = document.querySelectorAll('ul.rec-job-list li.job-card-box, ul.job-list-box li.job-card-wrapper');
            const out = [];
            for (const card of cards) {
                const pick = (sels) => {
                    for (const s of sels) {
                        const el = card.querySelector(s);
                        if (el && el.innerText.trim()) return el.innerText.trim();
                    }
                    return '';
                };
                const title = pick(['.job-name', '.job-title .job-name', 'a.job-name']);
                const company = pick(['.boss-name ~ .company-name', '.company-name', '.comp-name']);
                const salary = pick(['.job-salary', '.salary']);
                const recruiter = pick(['.job-info-bottom .boss-name', '.info-public', '.boss-name']);
                const tags = Array.from(card.querySelectorAll('.tag-list li, .job-card-footer .tag-list li'))
                    .map(t => t.innerText.trim())
                    .filter(t => t);
                const link = card.querySelector("a[href*='/job_detail/']");
                out.push({
                    title,
                    company,
                    salary,
                    recruiter,
                    tags,
                    href: link ? link.getAttribute('href') : null,
                });
            }
            return JSON.stringify(out);
        })()
    "#;

    let raw = pg::eval_string(page, js).await?;
    let rows: Vec<serde_json::Value> = serde_json::from_str(&raw)?;

    let postings = rows
        .into_iter()
        .map(|row| {
            let text = |k: &str| {
                row.get(k)
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string()
            };
            // Recruiter renders as "name·activity" or "name\nactivity".
            let recruiter_raw = text("recruiter");
            let (recruiter_name, recruiter_activity) = split_recruiter(&recruiter_raw);

            Posting {
                title: text("title"),
                company: text("company"),
                salary_text: decode_salary(&text("salary")),
                tags: row
                    .get("tags")
                    .and_then(|v| v.as_array())
                    .map(|a| {
                        a.iter()
                            .filter_map(|t| t.as_str().map(|s| s.to_string()))
                            .collect()
                    })
                    .unwrap_or_default(),
                recruiter_name,
                recruiter_activity,
                detail_href: row
                    .get("href")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
            }
        })
        .filter(|p| !p.title.is_empty())
        .collect();
    Ok(postings)
}

/// Split `"张三·刚刚活跃"` into name and activity.
fn split_recruiter(raw: &str) -> (String, String) {
    let raw = raw.replace('\n', "·");
    match raw.split_once('·') {
        Some((name, activity)) => (name.trim().to_string(), activity.trim().to_string()),
        None => (raw.trim().to_string(), String::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes() -> SearchCodes {
        SearchCodes {
            cities: vec![("北京".into(), "101010100".into())],
            job_type: Some("1901".into()),
            salary: Some("405".into()),
            experience: vec!["104".into(), "105".into()],
            degree: vec![],
            scale: vec![],
            stage: vec![],
            industry: vec![],
        }
    }

    #[test]
    fn test_search_url_joins_multivalued_filters() {
        let url = build_search_url(&codes(), "101010100", "市场总监");
        assert!(url.starts_with("https://www.zhipin.com/web/geek/job?"));
        assert!(url.contains("city=101010100"));
        assert!(url.contains("jobType=1901"));
        assert!(url.contains("salary=405"));
        assert!(url.contains("experience=104,105"));
        // Empty filters are omitted entirely.
        assert!(!url.contains("degree="));
        // CJK keyword is percent-encoded.
        assert!(url.ends_with("&query=%E5%B8%82%E5%9C%BA%E6%80%BB%E7%9B%91"));
    }

    #[test]
    fn test_search_url_minimal() {
        let bare = SearchCodes::default();
        let url = build_search_url(&bare, "101020100", "rust");
        assert_eq!(
            url,
            "https://www.zhipin.com/web/geek/job?city=101020100&query=rust"
        );
    }

    #[test]
    fn test_split_recruiter() {
        assert_eq!(
            split_recruiter("张三·刚刚活跃"),
            ("张三".to_string(), "刚刚活跃".to_string())
        );
        assert_eq!(
            split_recruiter("李四\n半年前活跃"),
            ("李四".to_string(), "半年前活跃".to_string())
        );
        assert_eq!(split_recruiter("王五"), ("王五".to_string(), String::new()));
    }
}
