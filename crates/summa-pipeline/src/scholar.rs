//! Evidence search client and the Retrieving stage driver.
//!
//! The HTTP client targets the Semantic Scholar graph search endpoint. The
//! two run queries (raw question, refined query) are issued concurrently as a
//! latency optimization; the merge is keyed by record id in fixed query
//! order, so completion order never affects the resulting evidence set.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::evidence::{
    build_dual_queries, merge_query_results, EvidenceRecord, RetrievalOutcome, RetrievalStatus,
};

const SEARCH_FIELDS: &str = "paperId,title,authors,year,abstract,citationCount,externalIds,url";

/// Literature-search collaborator interface.
#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search(&self, query: &str) -> Result<Vec<EvidenceRecord>>;
}

/// Semantic Scholar `/graph/v1/paper/search` client.
pub struct SemanticScholarClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    per_query_limit: usize,
    timeout: Duration,
}

impl SemanticScholarClient {
    pub fn new(settings: &Settings) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: settings.semantic_scholar_base_url.clone(),
            api_key: settings.semantic_scholar_api_key.clone(),
            per_query_limit: settings.per_query_limit.clamp(1, 100),
            timeout: settings.semantic_scholar_timeout,
        }
    }
}

#[async_trait]
impl SearchClient for SemanticScholarClient {
    async fn search(&self, query: &str) -> Result<Vec<EvidenceRecord>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let url = format!(
            "{}/graph/v1/paper/search",
            self.base_url.trim_end_matches('/')
        );
        let limit = self.per_query_limit.to_string();
        let mut request = self
            .client
            .get(&url)
            .query(&[("query", query), ("limit", &limit), ("fields", SEARCH_FIELDS)])
            .timeout(self.timeout);
        if let Some(key) = self.api_key.as_deref() {
            request = request.header("x-api-key", key);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("search request failed for query '{query}'"))?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            bail!("search HTTP {status} for query '{query}': {detail}");
        }

        let payload: Value = response
            .json()
            .await
            .with_context(|| format!("search response was not JSON for query '{query}'"))?;
        let records = parse_search_payload(&payload, query);
        debug!(query = %query, count = records.len(), "search results parsed");
        Ok(records)
    }
}

/// Parse a search response body, skipping records without the citation-grade
/// minimum (non-empty title, integer year, at least one author name).
pub fn parse_search_payload(payload: &Value, source_query: &str) -> Vec<EvidenceRecord> {
    let Some(data) = payload.get("data").and_then(Value::as_array) else {
        return Vec::new();
    };
    data.iter()
        .filter_map(|item| parse_record(item, source_query))
        .collect()
}

fn parse_record(item: &Value, source_query: &str) -> Option<EvidenceRecord> {
    let title = item.get("title")?.as_str()?.trim();
    let year = item.get("year")?.as_i64()?;
    if title.is_empty() {
        return None;
    }

    let authors: Vec<String> = item
        .get("authors")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|author| author.get("name"))
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if authors.is_empty() {
        return None;
    }

    let doi = item
        .get("externalIds")
        .and_then(|ids| ids.get("DOI"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Some(EvidenceRecord {
        paper_id: item
            .get("paperId")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        title: title.to_string(),
        authors,
        year: year as i32,
        abstract_text: item
            .get("abstract")
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default()
            .to_string(),
        citation_count: item.get("citationCount").and_then(Value::as_u64),
        doi,
        url: item
            .get("url")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        source_query: source_query.to_string(),
    })
}

/// Run the Retrieving stage: issue the dual queries concurrently and merge.
///
/// Per-query failures are collected, not propagated; an empty merged set is
/// reported as `NoGroundedCitationsFound` and the run continues into the
/// sentinel-citation path.
pub async fn retrieve_evidence(
    client: &dyn SearchClient,
    question: &str,
    refined_query: Option<&str>,
) -> RetrievalOutcome {
    let queries = build_dual_queries(question, refined_query);
    if queries.is_empty() {
        return RetrievalOutcome {
            status: RetrievalStatus::NoGroundedCitationsFound,
            message: "no grounded citations found".into(),
            queries,
            errors: vec!["question and refined query are both empty".into()],
            papers: Default::default(),
        };
    }

    let mut errors: Vec<String> = Vec::new();
    let mut result_sets: Vec<Vec<EvidenceRecord>> = Vec::new();
    if queries.len() == 2 {
        let (first, second) = tokio::join!(client.search(&queries[0]), client.search(&queries[1]));
        for (query, result) in queries.iter().zip([first, second]) {
            collect_result(query, result, &mut result_sets, &mut errors);
        }
    } else {
        let result = client.search(&queries[0]).await;
        collect_result(&queries[0], result, &mut result_sets, &mut errors);
    }

    let papers = merge_query_results(result_sets);
    if papers.is_empty() {
        let message = if errors.is_empty() {
            "no grounded citations found".to_string()
        } else {
            "no grounded citations found (API failure or empty results)".to_string()
        };
        return RetrievalOutcome {
            status: RetrievalStatus::NoGroundedCitationsFound,
            message,
            queries,
            errors,
            papers,
        };
    }

    RetrievalOutcome {
        status: RetrievalStatus::Ok,
        message: format!("retrieved {} grounded papers", papers.len()),
        queries,
        errors,
        papers,
    }
}

fn collect_result(
    query: &str,
    result: Result<Vec<EvidenceRecord>>,
    result_sets: &mut Vec<Vec<EvidenceRecord>>,
    errors: &mut Vec<String>,
) {
    match result {
        Ok(records) => result_sets.push(records),
        Err(err) => {
            warn!(query = %query, error = %format!("{err:#}"), "evidence query failed");
            errors.push(format!("{err:#}"));
        }
    }
}
