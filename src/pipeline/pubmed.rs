//! Bibliographic lookup against NCBI E-utilities (PubMed).
//!
//! A lookup is two requests: `esearch` turns a query into PubMed ids, then
//! `esummary` fetches title/authors/journal/date/DOI for those ids. Both
//! use the JSON response mode.
//!
//! NCBI allows about three requests per second without an API key. Every
//! clone of a [`PubMedClient`] shares one pacer, so concurrent lookups from
//! the task runner are spaced out instead of collecting 429s.

use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

const EUTILS_BASE: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// Minimum spacing between two E-utilities requests.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(400);

/// One bibliographic record as returned by a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paper {
    pub pmid: String,
    pub title: String,
    /// Authors as `"Last, Initials"`.
    pub authors: Vec<String>,
    pub journal: String,
    pub year: String,
    pub doi: Option<String>,
}

/// Finds papers matching a free-text query.
#[async_trait]
pub trait BibliographySource: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Paper>>;
}

/// PubMed E-utilities client.
#[derive(Debug, Clone)]
pub struct PubMedClient {
    http: reqwest::Client,
    base_url: String,
    email: Option<String>,
    min_interval: Duration,
    /// Earliest instant the next request may be sent.
    next_slot: Arc<Mutex<Instant>>,
}

impl PubMedClient {
    pub fn new(email: Option<String>) -> Result<Self> {
        Self::with_base_url(EUTILS_BASE, email)
    }

    pub fn with_base_url(base_url: impl Into<String>, email: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("slide2thesis/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PipelineError::Internal(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            email,
            min_interval: DEFAULT_MIN_INTERVAL,
            next_slot: Arc::new(Mutex::new(Instant::now())),
        })
    }

    /// Change the request spacing.
    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    /// Reserve the next request slot and wait for it.
    async fn pace(&self) {
        let slot = {
            let mut next = self
                .next_slot
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            let slot = (*next).max(Instant::now());
            *next = slot + self.min_interval;
            slot
        };
        tokio::time::sleep_until(slot).await;
    }

    async fn get_json(&self, query: &str, endpoint: &str, params: &[(&str, String)]) -> Result<Value> {
        let mut request = self
            .http
            .get(format!("{}/{}", self.base_url, endpoint))
            .query(&[("db", "pubmed"), ("retmode", "json"), ("tool", "slide2thesis")])
            .query(params);
        if let Some(email) = &self.email {
            request = request.query(&[("email", email.as_str())]);
        }

        let lookup_err = |detail: String| PipelineError::Lookup {
            query: query.to_string(),
            detail,
        };
        self.pace().await;
        let response = request
            .send()
            .await
            .map_err(|e| lookup_err(e.to_string()))?
            .error_for_status()
            .map_err(|e| lookup_err(e.to_string()))?;
        response.json().await.map_err(|e| lookup_err(e.to_string()))
    }
}

#[async_trait]
impl BibliographySource for PubMedClient {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<Paper>> {
        let search = self
            .get_json(
                query,
                "esearch.fcgi",
                &[
                    ("term", query.to_string()),
                    ("retmax", max_results.to_string()),
                    ("sort", "relevance".to_string()),
                ],
            )
            .await?;
        let ids = parse_search_ids(&search);
        debug!("PubMed '{}': {} id(s)", query, ids.len());
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let summary = self
            .get_json(query, "esummary.fcgi", &[("id", ids.join(","))])
            .await?;
        Ok(parse_summaries(&summary, &ids))
    }
}

/// Ids from an `esearch` JSON reply.
pub fn parse_search_ids(reply: &Value) -> Vec<String> {
    reply["esearchresult"]["idlist"]
        .as_array()
        .map(|ids| {
            ids.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Records from an `esummary` JSON reply, in `ids` order.
pub fn parse_summaries(reply: &Value, ids: &[String]) -> Vec<Paper> {
    ids.iter()
        .filter_map(|id| {
            let doc = reply["result"].get(id)?;
            let title = doc["title"].as_str()?.trim().trim_end_matches('.').to_string();

            let authors = doc["authors"]
                .as_array()
                .map(|list| {
                    list.iter()
                        .filter(|a| a["authtype"].as_str().unwrap_or("Author") == "Author")
                        .filter_map(|a| a["name"].as_str())
                        .map(format_author)
                        .collect()
                })
                .unwrap_or_default();

            let journal = doc["fulljournalname"]
                .as_str()
                .or_else(|| doc["source"].as_str())
                .unwrap_or_default()
                .to_string();
            let year = doc["pubdate"]
                .as_str()
                .and_then(|d| d.get(..4))
                .filter(|y| y.chars().all(|c| c.is_ascii_digit()))
                .unwrap_or_default()
                .to_string();
            let doi = doc["articleids"].as_array().and_then(|list| {
                list.iter()
                    .find(|a| a["idtype"].as_str() == Some("doi"))
                    .and_then(|a| a["value"].as_str())
                    .map(str::to_string)
            });

            Some(Paper {
                pmid: id.clone(),
                title,
                authors,
                journal,
                year,
                doi,
            })
        })
        .collect()
}

/// `"Smith JA"` → `"Smith, JA"`.
fn format_author(name: &str) -> String {
    match name.trim().rsplit_once(' ') {
        Some((last, initials)) if initials.chars().all(|c| c.is_ascii_uppercase()) => {
            format!("{last}, {initials}")
        }
        _ => name.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_search_ids() {
        let reply = json!({"esearchresult": {"count": "2", "idlist": ["111", "222"]}});
        assert_eq!(parse_search_ids(&reply), vec!["111", "222"]);
        assert!(parse_search_ids(&json!({})).is_empty());
    }

    #[test]
    fn parses_summary_fields() {
        let reply = json!({
            "result": {
                "uids": ["111"],
                "111": {
                    "title": "Deep learning for protein folding.",
                    "authors": [
                        {"name": "Smith JA", "authtype": "Author"},
                        {"name": "van der Berg K", "authtype": "Author"},
                        {"name": "Folding Consortium", "authtype": "CollectiveName"}
                    ],
                    "fulljournalname": "Nature methods",
                    "source": "Nat Methods",
                    "pubdate": "2021 Mar 4",
                    "articleids": [
                        {"idtype": "pubmed", "value": "111"},
                        {"idtype": "doi", "value": "10.1038/s41592-021-01000-1"}
                    ]
                }
            }
        });
        let papers = parse_summaries(&reply, &["111".to_string(), "999".to_string()]);
        assert_eq!(papers.len(), 1);
        let p = &papers[0];
        assert_eq!(p.title, "Deep learning for protein folding");
        assert_eq!(p.authors, vec!["Smith, JA", "van der Berg, K"]);
        assert_eq!(p.journal, "Nature methods");
        assert_eq!(p.year, "2021");
        assert_eq!(p.doi.as_deref(), Some("10.1038/s41592-021-01000-1"));
    }

    #[cfg(feature = "server")]
    mod http {
        use super::*;
        use axum::extract::{Query, State};
        use axum::routing::get;
        use axum::{Json, Router};
        use std::collections::HashMap;

        type Log = Arc<Mutex<Vec<(Instant, String, HashMap<String, String>)>>>;

        fn record(log: &Log, endpoint: &str, params: HashMap<String, String>) {
            log.lock().unwrap().push((Instant::now(), endpoint.to_string(), params));
        }

        /// Local E-utilities stand-in that records every request.
        async fn eutils() -> (String, Log) {
            let log: Log = Arc::default();
            let app = Router::new()
                .route(
                    "/esearch.fcgi",
                    get(|State(log): State<Log>, Query(params): Query<HashMap<String, String>>| async move {
                        record(&log, "esearch", params);
                        Json(json!({"esearchresult": {"idlist": ["111"]}}))
                    }),
                )
                .route(
                    "/esummary.fcgi",
                    get(|State(log): State<Log>, Query(params): Query<HashMap<String, String>>| async move {
                        record(&log, "esummary", params);
                        Json(json!({"result": {"111": {"title": "Folding", "pubdate": "2020"}}}))
                    }),
                )
                .with_state(log.clone());
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            (format!("http://{addr}"), log)
        }

        #[tokio::test]
        async fn concurrent_lookups_are_spaced_out() {
            let (base, log) = eutils().await;
            let client = PubMedClient::with_base_url(base, None)
                .unwrap()
                .with_min_interval(Duration::from_millis(60));
            let other = client.clone();

            let (a, b) = tokio::join!(
                client.search("protein folding", 3),
                other.search("deep learning", 3)
            );
            assert_eq!(a.unwrap()[0].pmid, "111");
            assert_eq!(b.unwrap()[0].year, "2020");

            let log = log.lock().unwrap();
            assert_eq!(log.len(), 4);
            let mut times: Vec<Instant> = log.iter().map(|(at, _, _)| *at).collect();
            times.sort();
            for pair in times.windows(2) {
                let gap = pair[1] - pair[0];
                assert!(gap >= Duration::from_millis(50), "requests {gap:?} apart");
            }
        }

        #[tokio::test]
        async fn search_sorts_by_relevance() {
            let (base, log) = eutils().await;
            let client = PubMedClient::with_base_url(base, Some("lab@example.org".into()))
                .unwrap()
                .with_min_interval(Duration::ZERO);
            client.search("attention", 2).await.unwrap();

            let log = log.lock().unwrap();
            let (_, endpoint, params) = &log[0];
            assert_eq!(endpoint, "esearch");
            assert_eq!(params["sort"], "relevance");
            assert_eq!(params["retmax"], "2");
            assert_eq!(params["email"], "lab@example.org");
        }
    }
}
