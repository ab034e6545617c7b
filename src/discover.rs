//! Search-results pagination and listing URL harvesting.
//!
//! Walks a search URL page by page, collecting unique detail-page URLs,
//! and stops early once a configured number of consecutive pages
//! contribute nothing new. Result sites lie about their page counts, so
//! "no new URLs" is a more reliable stop signal than any advertised
//! total.

use anyhow::{Context, Result};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use std::path::Path;
use url::Url;

use crate::config::DiscoverConfig;
use crate::fetch::Fetcher;

static DETAIL_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?:https?://[^"'\s\\]+)?/homedetails/[^"'\s\\]+?_zpid/?"#).unwrap()
});

/// Accumulates unique URLs across pages and tracks the empty-page streak.
#[derive(Default)]
struct Harvest {
    urls: Vec<String>,
    seen: HashSet<String>,
    empty_streak: u32,
}

impl Harvest {
    /// Absorb one page's URLs; returns how many were new.
    fn absorb(&mut self, page_urls: &[String]) -> usize {
        let mut new = 0;
        for url in page_urls {
            if self.seen.insert(url.clone()) {
                self.urls.push(url.clone());
                new += 1;
            }
        }
        if new == 0 {
            self.empty_streak += 1;
        } else {
            self.empty_streak = 0;
        }
        new
    }
}

pub struct Discoverer {
    fetcher: Fetcher,
    config: DiscoverConfig,
}

impl Discoverer {
    pub fn new(fetcher: Fetcher, config: DiscoverConfig) -> Self {
        Self { fetcher, config }
    }

    /// Walk the search results, returning unique listing URLs in first-seen
    /// order.
    pub async fn discover(&self, search_url: &str, max_pages: Option<u32>) -> Result<Vec<String>> {
        let max_pages = max_pages.unwrap_or(self.config.max_pages);
        let mut harvest = Harvest::default();

        for page in 1..=max_pages {
            let page_url = paginated_url(search_url, page)?;
            let content = match self.fetcher.fetch(&page_url, &format!("search_p{page}")).await {
                Ok(content) => content,
                // A failure on page 1 means the source is unreachable; a
                // later page failing just ends pagination early.
                Err(e) if page == 1 => {
                    return Err(e).with_context(|| format!("Failed to fetch search page {page}"))
                }
                Err(e) => {
                    println!("Page {page} failed ({e}), stopping pagination");
                    break;
                }
            };

            let page_urls = listing_urls(&content.body, search_url)?;
            let new = harvest.absorb(&page_urls);
            println!(
                "Page {page}: {} results, {new} new ({} total)",
                page_urls.len(),
                harvest.urls.len()
            );

            if harvest.empty_streak >= self.config.empty_page_tolerance {
                println!(
                    "Stopping: {} consecutive pages with no new URLs",
                    harvest.empty_streak
                );
                break;
            }
            if harvest.urls.len() >= self.config.max_results {
                println!("Stopping: reached max_results ({})", self.config.max_results);
                harvest.urls.truncate(self.config.max_results);
                break;
            }
            if page < max_pages && self.config.page_delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.config.page_delay_ms))
                    .await;
            }
        }

        Ok(harvest.urls)
    }
}

/// Build the URL for result page `page`.
///
/// Search URLs that embed a JSON query state get their page number set
/// inside it; anything else gets a plain `page` query parameter. Page 1
/// is the URL as given.
pub fn paginated_url(base: &str, page: u32) -> Result<String> {
    if page <= 1 {
        return Ok(base.to_string());
    }

    let mut parsed = Url::parse(base).with_context(|| format!("Invalid search URL: {base}"))?;

    let state_param = parsed
        .query_pairs()
        .find(|(k, _)| k == "searchQueryState")
        .map(|(_, v)| v.into_owned());

    if let Some(state_str) = state_param {
        if let Ok(mut state) = serde_json::from_str::<serde_json::Value>(&state_str) {
            if let Some(obj) = state.as_object_mut() {
                obj.entry("pagination")
                    .or_insert_with(|| serde_json::json!({}))
                    .as_object_mut()
                    .map(|p| p.insert("currentPage".to_string(), serde_json::json!(page)));
                let others: Vec<(String, String)> = parsed
                    .query_pairs()
                    .filter(|(k, _)| k != "searchQueryState")
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect();
                parsed.query_pairs_mut().clear();
                for (k, v) in others {
                    parsed.query_pairs_mut().append_pair(&k, &v);
                }
                parsed
                    .query_pairs_mut()
                    .append_pair("searchQueryState", &state.to_string());
                return Ok(parsed.to_string());
            }
        }
    }

    let separator = if parsed.query().is_some() { '&' } else { '?' };
    Ok(format!("{base}{separator}page={page}"))
}

/// All detail-page URLs found in a search results page, in document order,
/// with relative links resolved against the search URL's origin.
pub fn listing_urls(body: &str, base: &str) -> Result<Vec<String>> {
    let base_url = Url::parse(base).with_context(|| format!("Invalid search URL: {base}"))?;
    // Embedded JSON escapes its slashes, so normalize before matching.
    let body = body.replace("\\/", "/");
    let mut seen = HashSet::new();
    let mut urls = Vec::new();
    for m in DETAIL_URL_RE.find_iter(&body) {
        let raw = m.as_str().to_string();
        let absolute = if raw.starts_with("http") {
            raw
        } else {
            match base_url.join(&raw) {
                Ok(u) => u.to_string(),
                Err(_) => continue,
            }
        };
        if seen.insert(absolute.clone()) {
            urls.push(absolute);
        }
    }
    Ok(urls)
}

/// Write a URL list file with a comment header to an explicit path.
pub fn write_url_list(path: &Path, search_url: &str, urls: &[String]) -> Result<()> {
    let mut out = String::new();
    out.push_str(&format!("# URLs extracted from: {search_url}\n"));
    out.push_str(&format!("# Total properties: {}\n", urls.len()));
    out.push_str(&format!(
        "# Extracted on: {}\n\n",
        Utc::now().format("%Y-%m-%d %H:%M:%S")
    ));
    for url in urls {
        out.push_str(url);
        out.push('\n');
    }
    std::fs::write(path, out)
        .with_context(|| format!("Failed to write URL list: {}", path.display()))?;
    Ok(())
}

/// Write a timestamped URL list under the data directory.
pub fn save_url_list(dir: &Path, search_url: &str, urls: &[String]) -> Result<std::path::PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create data directory: {}", dir.display()))?;
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("urls_list_{timestamp}.txt"));
    write_url_list(&path, search_url, urls)?;
    Ok(path)
}

/// Read a URL list file, skipping comment and blank lines.
pub fn load_url_list(path: &Path) -> Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read URL list: {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}
