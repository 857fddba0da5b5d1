//! Code-forge search adapter.
//!
//! Queries the GitHub repository-search endpoint. `GITHUB_TOKEN`, when set,
//! raises the rate limit; results come back ordered by stars.

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

const SEARCH_URL: &str = "https://api.github.com/search/repositories";

#[derive(Error, Debug)]
pub enum ForgeError {
    #[error("search request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("search returned status {0}")]
    Status(reqwest::StatusCode),
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    pub full_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub stargazers_count: u64,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    items: Vec<SearchHit>,
}

pub async fn search(client: &Client, query: &str, limit: usize) -> Result<Vec<SearchHit>, ForgeError> {
    let per_page = limit.to_string();
    let mut request = client
        .get(SEARCH_URL)
        .query(&[
            ("q", query),
            ("sort", "stars"),
            ("order", "desc"),
            ("per_page", per_page.as_str()),
        ])
        .header(reqwest::header::USER_AGENT, crate::USER_AGENT)
        .header(reqwest::header::ACCEPT, "application/vnd.github+json");

    if let Ok(token) = std::env::var("GITHUB_TOKEN") {
        request = request.bearer_auth(token);
    }

    let resp = request.send().await?;
    if !resp.status().is_success() {
        return Err(ForgeError::Status(resp.status()));
    }

    let parsed: SearchResponse = resp.json().await?;
    Ok(parsed.items)
}
