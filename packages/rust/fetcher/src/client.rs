//! Paginated, rate-limited client for the actor catalog listing endpoint.
//!
//! Pagination continues until the endpoint returns an empty page. A fixed
//! delay is applied between page requests to respect the source's rate
//! limits. Page fetches are retried with exponential backoff; exhausting the
//! retries aborts the fetch (and only the fetch — nothing already persisted
//! is touched). The fetch is not restartable mid-page: callers re-fetch from
//! page 1 on failure.

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info, instrument, warn};

use actorlens_shared::{ActorLensError, ActorRecord, Result, SourceConfig};

use crate::normalize::{RawActor, normalize};

/// User-Agent string for catalog requests.
const USER_AGENT: &str = concat!("actorlens/", env!("CARGO_PKG_VERSION"));

/// Base delay for page-level retry backoff.
const RETRY_BASE_DELAY_MS: u64 = 250;

/// Summary of a completed catalog fetch.
#[derive(Debug)]
pub struct FetchResult {
    /// Normalized actor records, in catalog order.
    pub actors: Vec<ActorRecord>,
    /// Number of non-empty pages fetched.
    pub pages_fetched: usize,
    /// Raw records skipped because they failed validation.
    pub skipped_invalid: usize,
}

/// HTTP client for the source catalog.
pub struct SourceClient {
    config: SourceConfig,
    client: Client,
}

impl SourceClient {
    /// Create a new client with the given configuration.
    pub fn new(config: SourceConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| {
                ActorLensError::Network(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { config, client })
    }

    /// Fetch the whole catalog, page by page, until an empty page.
    ///
    /// Malformed individual records are skipped and logged; they never abort
    /// the fetch of subsequent records.
    #[instrument(skip_all, fields(base_url = %self.config.base_url))]
    pub async fn fetch_all(&self) -> Result<FetchResult> {
        let mut actors: Vec<ActorRecord> = Vec::new();
        let mut skipped_invalid = 0usize;
        let mut page = 1u32;

        info!(
            page_size = self.config.page_size,
            rate_limit_ms = self.config.rate_limit_ms,
            "starting catalog fetch"
        );

        loop {
            if page > 1 && self.config.rate_limit_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.rate_limit_ms)).await;
            }

            let items = self.fetch_page_with_retry(page).await?;
            if items.is_empty() {
                break;
            }

            debug!(page, items = items.len(), "page fetched");
            for raw in items {
                match normalize(raw) {
                    Ok(record) => actors.push(record),
                    Err(e) => {
                        warn!(page, error = %e, "skipping malformed actor record");
                        skipped_invalid += 1;
                    }
                }
            }

            page += 1;
        }

        let result = FetchResult {
            actors,
            pages_fetched: (page - 1) as usize,
            skipped_invalid,
        };

        info!(
            actors = result.actors.len(),
            pages = result.pages_fetched,
            skipped = result.skipped_invalid,
            "catalog fetch complete"
        );

        Ok(result)
    }

    /// Fetch one page, retrying transient failures with exponential backoff.
    async fn fetch_page_with_retry(&self, page: u32) -> Result<Vec<RawActor>> {
        let mut attempt = 0u32;
        loop {
            match self.fetch_page(page).await {
                Ok(items) => return Ok(items),
                Err(e) if attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = backoff_delay(attempt);
                    warn!(
                        page,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "page fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fetch a single page of raw actor records.
    pub async fn fetch_page(&self, page: u32) -> Result<Vec<RawActor>> {
        let url = format!(
            "{}/actors?page={page}&size={}",
            self.config.base_url.trim_end_matches('/'),
            self.config.page_size
        );

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ActorLensError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ActorLensError::Network(format!("{url}: HTTP {status}")));
        }

        response
            .json::<Vec<RawActor>>()
            .await
            .map_err(|e| ActorLensError::Network(format!("{url}: invalid listing body: {e}")))
    }
}

/// Exponential backoff delay for the given retry attempt (1-based).
fn backoff_delay(attempt: u32) -> Duration {
    Duration::from_millis(RETRY_BASE_DELAY_MS << (attempt - 1).min(6))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String) -> SourceConfig {
        SourceConfig {
            base_url,
            page_size: 2,
            rate_limit_ms: 0,
            max_retries: 1,
            timeout_secs: 5,
        }
    }

    #[test]
    fn backoff_grows_exponentially() {
        assert_eq!(backoff_delay(1), Duration::from_millis(250));
        assert_eq!(backoff_delay(2), Duration::from_millis(500));
        assert_eq!(backoff_delay(3), Duration::from_millis(1000));
        // Capped shift: very large attempts must not overflow.
        assert_eq!(backoff_delay(40), backoff_delay(7));
    }

    #[tokio::test]
    async fn fetch_all_paginates_until_empty_page() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/actors"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"name": "APT28", "aliases": ["Fancy Bear"], "description": "Espionage group."},
                {"name": "Lazarus Group", "description": "DPRK-linked."}
            ])))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/actors"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"name": "DOPPEL SPIDER", "description": "Ransomware operator."}
            ])))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/actors"))
            .and(query_param("page", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let client = SourceClient::new(test_config(server.uri())).unwrap();
        let result = client.fetch_all().await.unwrap();

        assert_eq!(result.actors.len(), 3);
        assert_eq!(result.pages_fetched, 2);
        assert_eq!(result.skipped_invalid, 0);
        assert_eq!(result.actors[0].name, "APT28");
        assert_eq!(result.actors[2].name, "DOPPEL SPIDER");
    }

    #[tokio::test]
    async fn malformed_record_is_skipped_not_fatal() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/actors"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"name": "", "description": "nameless"},
                {"name": "FIN7", "description": "Financially motivated."}
            ])))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/actors"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let client = SourceClient::new(test_config(server.uri())).unwrap();
        let result = client.fetch_all().await.unwrap();

        assert_eq!(result.actors.len(), 1);
        assert_eq!(result.actors[0].name, "FIN7");
        assert_eq!(result.skipped_invalid, 1);
    }

    #[tokio::test]
    async fn transient_page_failure_is_retried() {
        let server = MockServer::start().await;

        // First attempt at page 1 fails, the retry succeeds.
        Mock::given(method("GET"))
            .and(path("/actors"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/actors"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"name": "APT28"}
            ])))
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path("/actors"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;

        let client = SourceClient::new(test_config(server.uri())).unwrap();
        let result = client.fetch_all().await.unwrap();
        assert_eq!(result.actors.len(), 1);
    }

    #[tokio::test]
    async fn persistent_failure_aborts_fetch() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/actors"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = SourceClient::new(test_config(server.uri())).unwrap();
        let err = client.fetch_all().await.unwrap_err();
        assert!(err.to_string().contains("HTTP 503"));
    }
}
