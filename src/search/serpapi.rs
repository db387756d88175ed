//! SerpAPI Client
//!
//! Google web search through SerpAPI's JSON endpoint. Used by the research
//! flows to collect candidate pages for funding calls, grants and similar
//! opportunities.

use std::time::Duration;

use futures::FutureExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::utils::with_retry;

const SERPAPI_BASE: &str = "https://serpapi.com";
const MAX_ATTEMPTS: u32 = 3;

/// Errors that can occur during search operations
#[derive(Debug, Error)]
pub enum SearchError {
    #[error("SerpAPI key not configured")]
    NoApiKey,

    #[error("Search request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse search results: {0}")]
    ParseError(String),
}

/// One organic web result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebResult {
    pub title: String,
    pub link: String,
    pub snippet: String,
    /// Source domain
    pub source: Option<String>,
    /// Date if available
    pub date: Option<String>,
}

/// SerpAPI client for web search
#[derive(Clone)]
pub struct SerpApiClient {
    client: Client,
    api_key: String,
    api_base: String,
    max_results: usize,
    retry_delay: Duration,
}

impl SerpApiClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            api_base: SERPAPI_BASE.to_string(),
            max_results: 3,
            retry_delay: Duration::from_secs(1),
        }
    }

    /// Configure client from config; `None` when no key is set.
    pub fn from_config(config: &crate::config::SearchConfig) -> Option<Self> {
        if config.serpapi_key.is_empty() {
            return None;
        }

        Some(Self::new(config.serpapi_key.clone()).with_max_results(config.max_results))
    }

    /// Set maximum results per search
    pub fn with_max_results(mut self, max: usize) -> Self {
        self.max_results = max.max(1);
        self
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Search Google and return up to `max_results` organic results.
    ///
    /// Transport failures and 5xx responses are retried with backoff; a query
    /// with no organic results yields an empty list.
    pub async fn search(&self, query: &str) -> Result<Vec<WebResult>, SearchError> {
        if self.api_key.is_empty() {
            return Err(SearchError::NoApiKey);
        }

        info!(query = %query, "Searching Google via SerpAPI");

        let url = format!("{}/search.json", self.api_base);
        let params = vec![
            ("engine".to_string(), "google".to_string()),
            ("q".to_string(), query.to_string()),
            ("num".to_string(), self.max_results.to_string()),
            ("api_key".to_string(), self.api_key.clone()),
        ];
        let client = self.client.clone();

        let body: serde_json::Value = with_retry(
            move || {
                let client = client.clone();
                let url = url.clone();
                let params = params.clone();
                async move {
                    let response = client
                        .get(&url)
                        .query(&params)
                        .send()
                        .await
                        .map_err(|e| SearchError::RequestFailed(e.to_string()))?;

                    let status = response.status();
                    if !status.is_success() {
                        let text = response.text().await.unwrap_or_default();
                        return Err(SearchError::RequestFailed(format!("HTTP {}: {}", status, text)));
                    }

                    response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| SearchError::ParseError(e.to_string()))
                }
                .boxed()
            },
            MAX_ATTEMPTS,
            self.retry_delay,
        )
        .await?;

        debug!("Raw search response received");

        if let Some(error) = body.get("error").and_then(|v| v.as_str()) {
            // SerpAPI reports "no results" as an error string on a 200
            if error.contains("hasn't returned any results") {
                return Ok(Vec::new());
            }
            return Err(SearchError::RequestFailed(error.to_string()));
        }

        let results = parse_organic_results(&body, self.max_results)?;
        info!(count = results.len(), "Web search completed");
        Ok(results)
    }
}

fn parse_organic_results(body: &serde_json::Value, max_results: usize) -> Result<Vec<WebResult>, SearchError> {
    let organic_results = match body.get("organic_results") {
        Some(value) => value,
        None => return Ok(Vec::new()),
    };

    let results_array = organic_results
        .as_array()
        .ok_or_else(|| SearchError::ParseError("Expected array of results".to_string()))?;

    let results = results_array
        .iter()
        .take(max_results)
        .filter_map(|result| {
            let link = result.get("link").and_then(|v| v.as_str())?.to_string();

            let title = result
                .get("title")
                .and_then(|v| v.as_str())
                .unwrap_or("Untitled")
                .to_string();

            let snippet = result
                .get("snippet")
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();

            let source = result
                .get("source")
                .and_then(|v| v.as_str())
                .map(String::from)
                .or_else(|| link.split('/').nth(2).map(String::from));

            let date = result.get("date").and_then(|v| v.as_str()).map(String::from);

            Some(WebResult { title, link, snippet, source, date })
        })
        .collect();

    Ok(results)
}
