//! `browse` action: public web search.
//!
//! Scraping a search engine's HTML is fragile, so the engine sits behind
//! [`SearchProvider`]. [`DuckDuckGoSearch`] uses the no-key HTML endpoint.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::errors::ActionError;

/// Default DuckDuckGo HTML endpoint.
pub const DUCKDUCKGO_BASE_URL: &str = "https://html.duckduckgo.com";

/// Results returned when `numResults` is absent.
pub const DEFAULT_NUM_RESULTS: usize = 5;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

const SEARCH_TIMEOUT: Duration = Duration::from_secs(30);

// ─── Provider Trait ─────────────────────────────────────────────────────────

/// One search result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, num_results: usize) -> Result<Vec<SearchHit>, ActionError>;
}

/// Run a search and shape it as the `browse` result. Failures become an
/// `error` field next to an empty result list rather than an error result.
pub async fn browse(provider: &dyn SearchProvider, query: &str, num_results: usize) -> Value {
    tracing::info!(query, num_results, "searching the web");
    match provider.search(query, num_results).await {
        Ok(hits) => json!({ "query": query, "results": hits }),
        Err(e) => {
            tracing::warn!(query, error = %e, "web search failed");
            json!({
                "query": query,
                "error": format!("Search failed: {e}"),
                "results": [],
            })
        }
    }
}

// ─── DuckDuckGo ─────────────────────────────────────────────────────────────

pub struct DuckDuckGoSearch {
    http: reqwest::Client,
    base_url: String,
    title_re: Regex,
    snippet_re: Regex,
    tag_re: Regex,
}

impl DuckDuckGoSearch {
    /// Build a provider against `base_url` (no trailing slash).
    pub fn new(base_url: impl Into<String>) -> Result<Self, ActionError> {
        let http = reqwest::Client::builder()
            .timeout(SEARCH_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ActionError::Search {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            title_re: compile(r#"<a class="result__a" href="(.*?)".*?>(.*?)</a>"#)?,
            snippet_re: compile(r#"<a class="result__snippet".*?>(.*?)</a>"#)?,
            tag_re: compile(r"<[^>]*>")?,
        })
    }

    /// Decode entities, then strip any markup they revealed.
    fn clean(&self, fragment: &str) -> String {
        let decoded = html_escape::decode_html_entities(fragment);
        self.tag_re.replace_all(&decoded, "").into_owned()
    }

    /// Pair titles with snippets in document order.
    fn parse_results(&self, html: &str, num_results: usize) -> Vec<SearchHit> {
        let titles = self
            .title_re
            .captures_iter(html)
            .take(num_results)
            .map(|c| (c[1].to_string(), self.clean(&c[2])));
        let snippets = self
            .snippet_re
            .captures_iter(html)
            .take(num_results)
            .map(|c| self.clean(&c[1]));

        titles
            .zip(snippets)
            .map(|((url, title), snippet)| SearchHit {
                title,
                url,
                snippet,
            })
            .collect()
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearch {
    async fn search(&self, query: &str, num_results: usize) -> Result<Vec<SearchHit>, ActionError> {
        let url = format!("{}/html/?q={}", self.base_url, urlencoding::encode(query));

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ActionError::Search {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ActionError::Search {
                reason: format!(
                    "Search request failed: {}",
                    status.canonical_reason().unwrap_or("Unknown status")
                ),
            });
        }

        let html = response.text().await.map_err(|e| ActionError::Search {
            reason: e.to_string(),
        })?;

        let hits = self.parse_results(&html, num_results);
        tracing::debug!(query, hits = hits.len(), "web search parsed");
        Ok(hits)
    }
}

fn compile(pattern: &str) -> Result<Regex, ActionError> {
    Regex::new(pattern).map_err(|e| ActionError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

// ─── Tests ──────────────────────────────────────────────────────────────────
