use reqwest::blocking::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::error::FetchError;
use crate::models::{RawRecord, SearchRequest};
use crate::pacing::{Clock, RetryPolicy};

// --- Provider trait ---

/// Anything that can turn a search into raw listing rows.
pub trait SourceProvider: Send {
    fn fetch_listings(&self, request: &SearchRequest) -> Result<Vec<RawRecord>, FetchError>;
    fn name(&self) -> &str;
}

// --- JobSpy API provider ---

const SEARCH_PATH: &str = "/api/v1/search_jobs";

/// Client for a JobSpy-compatible scraping service.
#[derive(Debug)]
pub struct JobSpyApiProvider {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl JobSpyApiProvider {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            client,
        })
    }

    fn query_pairs(request: &SearchRequest) -> Vec<(&'static str, String)> {
        let mut pairs: Vec<(&'static str, String)> = request
            .site_names
            .iter()
            .map(|site| ("site_name", site.clone()))
            .collect();
        pairs.push(("search_term", request.search_term.clone()));
        pairs.push(("location", request.location.clone()));
        pairs.push(("results_wanted", request.results_wanted.to_string()));
        pairs.push(("hours_old", request.hours_old.to_string()));
        pairs.push(("country_indeed", request.country_indeed.clone()));
        pairs
    }
}

impl SourceProvider for JobSpyApiProvider {
    fn fetch_listings(&self, request: &SearchRequest) -> Result<Vec<RawRecord>, FetchError> {
        let mut builder = self
            .client
            .get(format!("{}{}", self.base_url, SEARCH_PATH))
            .query(&Self::query_pairs(request));
        if let Some(key) = &self.api_key {
            builder = builder.header("x-api-key", key);
        }

        let response = builder.send()?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().unwrap_or_default();
            return Err(FetchError::Provider { status, body });
        }

        let body: Value = response
            .json()
            .map_err(|e| FetchError::Malformed(e.to_string()))?;
        parse_listing_body(body)
    }

    fn name(&self) -> &str {
        &self.base_url
    }
}

/// Accepts `{"jobs": [...]}` or a bare array of row objects.
pub fn parse_listing_body(body: Value) -> Result<Vec<RawRecord>, FetchError> {
    let rows = match body {
        Value::Array(rows) => rows,
        Value::Object(mut object) => match object.remove("jobs") {
            Some(Value::Array(rows)) => rows,
            Some(Value::Null) | None => Vec::new(),
            Some(other) => {
                return Err(FetchError::Malformed(format!(
                    "'jobs' is not an array: {}",
                    type_name(&other)
                )));
            }
        },
        Value::Null => Vec::new(),
        other => {
            return Err(FetchError::Malformed(format!(
                "expected an object or array, got {}",
                type_name(&other)
            )));
        }
    };

    rows.into_iter()
        .enumerate()
        .map(|(i, row)| match row {
            Value::Object(record) => Ok(record),
            other => Err(FetchError::Malformed(format!(
                "row {} is {}, not an object",
                i,
                type_name(&other)
            ))),
        })
        .collect()
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// --- Partition fetcher ---

/// Result of fetching one partition.
#[derive(Debug)]
pub enum FetchOutcome {
    Records(Vec<RawRecord>),
    Empty,
    Failed(String),
}

impl FetchOutcome {
    /// Collapses empty and failed into no rows.
    pub fn into_records(self) -> Vec<RawRecord> {
        match self {
            FetchOutcome::Records(records) => records,
            FetchOutcome::Empty | FetchOutcome::Failed(_) => Vec::new(),
        }
    }

    pub fn failure_reason(&self) -> Option<&str> {
        match self {
            FetchOutcome::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

pub struct PartitionFetcher {
    provider: Box<dyn SourceProvider>,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    hours_old: u32,
    country_indeed: String,
}

impl PartitionFetcher {
    pub fn new(provider: Box<dyn SourceProvider>, retry: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            provider,
            retry,
            clock,
            hours_old: 720,
            country_indeed: "india".to_string(),
        }
    }

    /// Recency window and country hint sent with every search.
    pub fn with_search_window(mut self, hours_old: u32, country_indeed: &str) -> Self {
        self.hours_old = hours_old;
        self.country_indeed = country_indeed.to_string();
        self
    }

    /// Never fails: provider errors are logged and reported as [`FetchOutcome::Failed`].
    pub fn fetch(&self, sources: &[String], query: &str, location: &str, limit: usize) -> FetchOutcome {
        let request = SearchRequest {
            site_names: sources.to_vec(),
            search_term: query.to_string(),
            location: location.to_string(),
            results_wanted: limit,
            hours_old: self.hours_old,
            country_indeed: self.country_indeed.clone(),
        };

        info!(location, provider = self.provider.name(), "Scraping jobs");
        let result = self.retry.retry(self.clock.as_ref(), "fetch", || {
            self.provider.fetch_listings(&request)
        });

        match result {
            Ok(records) if records.is_empty() => {
                warn!(location, "No jobs found");
                FetchOutcome::Empty
            }
            Ok(records) => {
                info!(location, count = records.len(), "Found jobs");
                FetchOutcome::Records(records)
            }
            Err(e) => {
                error!(location, error = %e, "Error scraping jobs");
                FetchOutcome::Failed(e.to_string())
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{rows, ScriptedProvider};
    use super::*;
    use crate::pacing::ManualClock;
    use chrono::Utc;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(provider: ScriptedProvider, retry: RetryPolicy, clock: &ManualClock) -> PartitionFetcher {
        PartitionFetcher::new(Box::new(provider), retry, Arc::new(clock.clone()))
    }

    fn sites() -> Vec<String> {
        vec!["naukri".to_string(), "linkedin".to_string()]
    }

    #[test]
    fn test_parse_body_wrapped_and_bare() {
        let wrapped = parse_listing_body(json!({"count": 1, "jobs": [{"id": "a"}]})).unwrap();
        assert_eq!(wrapped.len(), 1);
        let bare = parse_listing_body(json!([{"id": "a"}, {"id": "b"}])).unwrap();
        assert_eq!(bare.len(), 2);
        assert!(parse_listing_body(json!({"count": 0})).unwrap().is_empty());
        assert!(parse_listing_body(json!({"jobs": null})).unwrap().is_empty());
        assert!(parse_listing_body(Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_parse_body_rejects_malformed() {
        assert!(matches!(parse_listing_body(json!("oops")), Err(FetchError::Malformed(_))));
        assert!(matches!(parse_listing_body(json!({"jobs": "x"})), Err(FetchError::Malformed(_))));
        assert!(matches!(parse_listing_body(json!([{"id": "a"}, 3])), Err(FetchError::Malformed(_))));
    }

    #[test]
    fn test_query_pairs_repeat_site_name() {
        let request = SearchRequest {
            site_names: sites(),
            search_term: "product manager".into(),
            location: "Pune, IN".into(),
            results_wanted: 10,
            hours_old: 720,
            country_indeed: "india".into(),
        };
        let pairs = JobSpyApiProvider::query_pairs(&request);
        assert_eq!(pairs[0], ("site_name", "naukri".to_string()));
        assert_eq!(pairs[1], ("site_name", "linkedin".to_string()));
        assert!(pairs.contains(&("hours_old", "720".to_string())));
        assert!(pairs.contains(&("country_indeed", "india".to_string())));
    }

    async fn search(server_uri: String, api_key: Option<String>) -> Result<Vec<RawRecord>, FetchError> {
        // The blocking client must not run on an async worker thread
        tokio::task::spawn_blocking(move || {
            let provider = JobSpyApiProvider::new(&server_uri, api_key, Duration::from_secs(5))?;
            provider.fetch_listings(&SearchRequest {
                site_names: sites(),
                search_term: "product manager".into(),
                location: "Pune, IN".into(),
                results_wanted: 10,
                hours_old: 720,
                country_indeed: "india".into(),
            })
        })
        .await
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_provider_sends_search_on_the_wire() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/search_jobs"))
            .and(query_param("search_term", "product manager"))
            .and(query_param("location", "Pune, IN"))
            .and(query_param("results_wanted", "10"))
            .and(header("x-api-key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "count": 2,
                "jobs": [{"id": "nk-1"}, {"id": "li-2"}],
            })))
            .expect(1)
            .mount(&server)
            .await;

        let records = search(server.uri(), Some("secret".into())).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["id"], "li-2");

        let requests = server.received_requests().await.unwrap();
        let site_names: Vec<String> = requests[0]
            .url
            .query_pairs()
            .filter(|(key, _)| key == "site_name")
            .map(|(_, value)| value.into_owned())
            .collect();
        assert_eq!(site_names, sites());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_provider_omits_key_header_without_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let records = search(server.uri(), Some("  ".into())).await.unwrap();
        assert!(records.is_empty());

        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].headers.get("x-api-key").is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_provider_error_status_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502).set_body_string("upstream blocked"))
            .mount(&server)
            .await;

        match search(server.uri(), None).await {
            Err(FetchError::Provider { status, body }) => {
                assert_eq!(status, 502);
                assert_eq!(body, "upstream blocked");
            }
            other => panic!("expected provider error, got {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_provider_non_json_body_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>rate limited</html>"))
            .mount(&server)
            .await;

        let result = search(server.uri(), None).await;
        assert!(matches!(result, Err(FetchError::Malformed(_))));
    }

    #[test]
    fn test_fetch_passes_request_through() {
        let clock = ManualClock::new(Utc::now());
        let provider = ScriptedProvider::new().respond("Pune, IN", Ok(rows("p", 3)));
        let fetcher = fetcher(provider.clone(), RetryPolicy::single_attempt(), &clock)
            .with_search_window(48, "india");

        let outcome = fetcher.fetch(&sites(), "product manager", "Pune, IN", 10);
        assert_eq!(outcome.into_records().len(), 3);

        let calls = provider.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].site_names, sites());
        assert_eq!(calls[0].results_wanted, 10);
        assert_eq!(calls[0].hours_old, 48);
        assert_eq!(calls[0].country_indeed, "india");
    }

    #[test]
    fn test_fetch_empty_and_failed_both_yield_no_records() {
        let clock = ManualClock::new(Utc::now());
        let provider = ScriptedProvider::new().respond("Chennai, IN", Err("503".into()));
        let fetcher = fetcher(provider, RetryPolicy::single_attempt(), &clock);

        let empty = fetcher.fetch(&sites(), "pm", "Pune, IN", 10);
        assert!(matches!(empty, FetchOutcome::Empty));
        assert!(empty.into_records().is_empty());

        let failed = fetcher.fetch(&sites(), "pm", "Chennai, IN", 10);
        assert_eq!(failed.failure_reason(), Some("Malformed provider response: 503"));
        assert!(failed.into_records().is_empty());
    }

    #[test]
    fn test_fetch_retries_when_configured() {
        let clock = ManualClock::new(Utc::now());
        let provider = ScriptedProvider::new()
            .respond("Mumbai, IN", Err("timeout".into()))
            .respond("Mumbai, IN", Ok(rows("m", 2)));
        let fetcher = fetcher(provider.clone(), RetryPolicy::with_attempts(3), &clock);

        let outcome = fetcher.fetch(&sites(), "pm", "Mumbai, IN", 10);
        assert_eq!(outcome.into_records().len(), 2);
        assert_eq!(provider.calls().len(), 2);
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(1)]);
    }
}
