use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::Context;
use chrono::NaiveDate;
use reqwest::{Client, StatusCode, header};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::error::{ApiError, ApiResult};
use crate::models::karbon::{ApiPage, Contact, EstimateRow, Timesheet, User};

/// Retry behavior for transient failures: total attempt ceiling and the
/// base for the exponential backoff (`base_delay * 2^attempt`).
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Rate limiting and server errors are worth retrying; everything else
    /// is a permanent answer.
    pub fn retryable(&self, status: StatusCode) -> bool {
        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

/// Authenticated Karbon API client. Requests are issued one at a time;
/// there is no fan-out anywhere in the pipeline.
pub struct KarbonClient {
    http: Client,
    base_url: String,
    retry: RetryPolicy,
    verbose: bool,
}

impl KarbonClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        info!("initializing Karbon client");

        let mut bearer =
            header::HeaderValue::from_str(&format!("Bearer {}", config.bearer_token))
                .context("building Authorization header value")?;
        bearer.set_sensitive(true);

        let mut access_key = header::HeaderValue::from_str(&config.access_key)
            .context("building AccessKey header value")?;
        access_key.set_sensitive(true);

        let mut headers = header::HeaderMap::new();
        headers.insert(header::AUTHORIZATION, bearer);
        headers.insert("AccessKey", access_key);
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );

        let http = Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            retry: config.retry.clone(),
            verbose: config.verbose,
        })
    }

    /// GET `endpoint` (a path-and-query relative to the base URL) and
    /// decode the body as JSON.
    ///
    /// 429 and 5xx responses, along with transport errors, are retried
    /// with exponential backoff up to the policy's attempt ceiling. Any
    /// other non-200 status fails immediately with its status and reason.
    pub async fn get(&self, endpoint: &str) -> ApiResult<serde_json::Value> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut last_reason = String::new();

        for attempt in 0..self.retry.max_attempts {
            match self.http.get(&url).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status == StatusCode::OK {
                        let text = resp.text().await.map_err(|e| ApiError::Transport {
                            endpoint: endpoint.to_string(),
                            source: e,
                        })?;
                        if self.verbose {
                            debug!(endpoint, body = %text, "raw API response");
                        }
                        return serde_json::from_str(&text).map_err(|e| ApiError::Decode {
                            endpoint: endpoint.to_string(),
                            source: e,
                        });
                    }

                    if !self.retry.retryable(status) {
                        return Err(ApiError::Status {
                            endpoint: endpoint.to_string(),
                            status: status.as_u16(),
                            reason: status
                                .canonical_reason()
                                .unwrap_or("unknown")
                                .to_string(),
                        });
                    }
                    last_reason = format!("HTTP {status}");
                }
                Err(e) => {
                    last_reason = e.to_string();
                }
            }

            let wait = self.retry.delay_for(attempt);
            warn!(
                endpoint,
                attempt = attempt + 1,
                reason = %last_reason,
                "transient failure, backing off {wait:?}"
            );
            tokio::time::sleep(wait).await;
        }

        Err(ApiError::RetriesExhausted {
            endpoint: endpoint.to_string(),
            attempts: self.retry.max_attempts,
            reason: last_reason,
        })
    }

    /// Materialize a paginated collection by following `@odata.nextLink`
    /// until the server stops supplying one.
    ///
    /// A failed first page is the caller's problem; a failure on any later
    /// page logs a warning and returns what was accumulated so far. A
    /// continuation link that was already followed terminates the loop.
    pub async fn fetch_all<T: DeserializeOwned>(&self, endpoint: &str) -> ApiResult<Vec<T>> {
        let mut items = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(endpoint.to_string());
        let mut pages = 0u32;

        while let Some(path) = next {
            if !visited.insert(path.clone()) {
                warn!(endpoint, link = %path, "continuation link repeats, stopping pagination");
                break;
            }

            let body = match self.get(&path).await {
                Ok(body) => body,
                Err(e) if pages == 0 => return Err(e),
                Err(e) => {
                    warn!(endpoint, error = %e, "pagination stopped early, keeping partial results");
                    break;
                }
            };

            let page: ApiPage<T> = match serde_json::from_value(body) {
                Ok(page) => page,
                Err(e) => {
                    let e = ApiError::Decode {
                        endpoint: path.clone(),
                        source: e,
                    };
                    if pages == 0 {
                        return Err(e);
                    }
                    warn!(endpoint, error = %e, "undecodable page, keeping partial results");
                    break;
                }
            };

            pages += 1;
            items.extend(page.value);
            info!(endpoint, page = pages, total = items.len(), "fetched page");

            next = page.next_link.as_deref().map(normalize_next_link);
        }

        Ok(items)
    }
}

/// Continuation links sometimes come back absolute; the client only wants
/// the path and query, with a leading slash.
fn normalize_next_link(link: &str) -> String {
    let stripped = match Url::parse(link) {
        Ok(url) => {
            let mut path = url.path().to_string();
            if let Some(query) = url.query() {
                path.push('?');
                path.push_str(query);
            }
            path
        }
        // Not an absolute URL, keep as-is.
        Err(_) => link.to_string(),
    };

    if stripped.starts_with('/') {
        stripped
    } else {
        format!("/{stripped}")
    }
}

/// Timesheets endpoint for an inclusive calendar-date window, expanded
/// with nested time entries. The OData filter covers start-of-day on
/// `start` through end-of-day on `end`, UTC.
pub fn timesheets_endpoint(start: NaiveDate, end: NaiveDate) -> String {
    let filter = format!("StartDate ge {start}T00:00:00Z and EndDate le {end}T23:59:59Z");
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("$filter", &filter)
        .append_pair("$expand", "TimeEntries")
        .finish();
    format!("/v3/Timesheets?{query}")
}

/// Fetch every timesheet in the window. This is the primary collection:
/// a hard failure here propagates so the run can exit non-zero.
pub async fn load_timesheets(
    client: &KarbonClient,
    start: NaiveDate,
    end: NaiveDate,
) -> ApiResult<Vec<Timesheet>> {
    info!(%start, %end, "fetching timesheets");
    let timesheets = client
        .fetch_all::<Timesheet>(&timesheets_endpoint(start, end))
        .await?;
    info!(count = timesheets.len(), "fetched timesheets for the date range");
    Ok(timesheets)
}

/// Build the client lookup from the contacts collection, one pass,
/// filtered server-side to client-type contacts. Failure degrades to an
/// empty map; reconciliation then falls back to the sentinel label.
pub async fn load_contacts(client: &KarbonClient) -> HashMap<String, String> {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("$filter", "ContactType eq 'Client'")
        .finish();
    let endpoint = format!("/v3/Contacts?{query}");

    let contacts = match client.fetch_all::<Contact>(&endpoint).await {
        Ok(contacts) => contacts,
        Err(e) => {
            warn!(error = %e, "failed to fetch contacts, client names will not resolve");
            return HashMap::new();
        }
    };

    let map: HashMap<String, String> = contacts
        .into_iter()
        .filter_map(|c| Some((c.contact_key?, c.full_name?)))
        .collect();
    info!(count = map.len(), "built client lookup");
    map
}

/// Build the worker lookup from the users collection. Same degradation
/// policy as [`load_contacts`].
pub async fn load_users(client: &KarbonClient) -> HashMap<String, String> {
    let users = match client.fetch_all::<User>("/v3/Users").await {
        Ok(users) => users,
        Err(e) => {
            warn!(error = %e, "failed to fetch users, worker names will not resolve");
            return HashMap::new();
        }
    };

    let map: HashMap<String, String> = users
        .into_iter()
        .filter_map(|u| Some((u.user_key?, u.name?)))
        .collect();
    info!(count = map.len(), "built worker lookup");
    map
}

/// Estimate rows for one work item. A missing summary (404, or any other
/// failure) is a legitimate business state, work not yet budgeted, so this
/// never propagates an error.
pub async fn load_estimate_summary(client: &KarbonClient, work_item_key: &str) -> Vec<EstimateRow> {
    let endpoint = format!("/v3/EstimateSummaries/{work_item_key}");

    match client.get(&endpoint).await {
        Ok(body) => match serde_json::from_value::<ApiPage<EstimateRow>>(body) {
            Ok(page) => page.value,
            Err(e) => {
                debug!(work_item_key, error = %e, "undecodable estimate summary, treating as unbudgeted");
                Vec::new()
            }
        },
        Err(e) => {
            debug!(work_item_key, error = %e, "no estimate summary, treating as unbudgeted");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    fn test_client(base_url: &str, max_attempts: u32) -> KarbonClient {
        let start = NaiveDate::from_ymd_opt(2024, 10, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 10, 31).unwrap();
        let mut config = Config::new("ak".into(), "bt".into(), start, end, false).unwrap();
        config.base_url = base_url.to_string();
        config.retry = RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(1),
        };
        KarbonClient::new(&config).unwrap()
    }

    // ── normalize_next_link ─────────────────────────────────────────

    #[test]
    fn next_link_absolute_url_is_stripped_to_path_and_query() {
        let link = "https://api.karbonhq.com/v3/Contacts?%24skip=100";
        assert_eq!(normalize_next_link(link), "/v3/Contacts?%24skip=100");
    }

    #[test]
    fn next_link_without_leading_slash_gets_one() {
        assert_eq!(normalize_next_link("v3/Users?page=2"), "/v3/Users?page=2");
    }

    #[test]
    fn next_link_path_passes_through() {
        assert_eq!(normalize_next_link("/v3/Users"), "/v3/Users");
    }

    // ── timesheets_endpoint ─────────────────────────────────────────

    #[test]
    fn timesheet_filter_covers_whole_days() {
        let start = NaiveDate::from_ymd_opt(2024, 10, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 10, 31).unwrap();
        let endpoint = timesheets_endpoint(start, end);

        assert!(endpoint.starts_with("/v3/Timesheets?"));
        let query = endpoint.split_once('?').unwrap().1;
        let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        assert!(pairs.contains(&(
            "$filter".to_string(),
            "StartDate ge 2024-10-01T00:00:00Z and EndDate le 2024-10-31T23:59:59Z".to_string()
        )));
        assert!(pairs.contains(&("$expand".to_string(), "TimeEntries".to_string())));
    }

    // ── retry behavior ──────────────────────────────────────────────

    #[tokio::test]
    async fn rate_limited_requests_stop_at_the_attempt_ceiling() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/v3/Users");
                then.status(429);
            })
            .await;

        let client = test_client(&server.base_url(), 3);
        let err = client.get("/v3/Users").await.unwrap_err();

        assert_eq!(mock.hits_async().await, 3);
        match err {
            ApiError::RetriesExhausted { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("expected RetriesExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn non_retryable_status_fails_on_first_attempt() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/v3/Users");
                then.status(403);
            })
            .await;

        let client = test_client(&server.base_url(), 3);
        let err = client.get("/v3/Users").await.unwrap_err();

        assert_eq!(mock.hits_async().await, 1);
        match err {
            ApiError::Status { status, .. } => assert_eq!(status, 403),
            other => panic!("expected Status, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn server_errors_are_retried_like_rate_limits() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/v3/Users");
                then.status(503);
            })
            .await;

        let client = test_client(&server.base_url(), 2);
        let err = client.get("/v3/Users").await.unwrap_err();

        assert_eq!(mock.hits_async().await, 2);
        assert!(matches!(err, ApiError::RetriesExhausted { attempts: 2, .. }));
    }

    // ── pagination ──────────────────────────────────────────────────

    #[tokio::test]
    async fn pagination_follows_absolute_next_link() {
        let server = MockServer::start_async().await;

        let page2 = server
            .mock_async(|when, then| {
                when.method(GET).path("/v3/Users").query_param("page", "2");
                then.status(200).json_body(json!({
                    "value": [{"UserKey": "U2", "Name": "Bob"}]
                }));
            })
            .await;
        let page1 = server
            .mock_async(|when, then| {
                when.method(GET).path("/v3/Users").query_param_missing("page");
                then.status(200).json_body(json!({
                    "value": [{"UserKey": "U1", "Name": "Alice"}],
                    "@odata.nextLink": format!("{}/v3/Users?page=2", server.base_url())
                }));
            })
            .await;

        let client = test_client(&server.base_url(), 3);
        let users: Vec<User> = client.fetch_all("/v3/Users").await.unwrap();

        assert_eq!(page1.hits_async().await, 1);
        assert_eq!(page2.hits_async().await, 1);
        assert_eq!(users.len(), 2);
        assert_eq!(users[1].name.as_deref(), Some("Bob"));
    }

    #[tokio::test]
    async fn repeated_next_link_terminates_pagination() {
        let server = MockServer::start_async().await;

        // The second page points back at itself forever.
        let page2 = server
            .mock_async(|when, then| {
                when.method(GET).path("/v3/Users").query_param("page", "2");
                then.status(200).json_body(json!({
                    "value": [{"UserKey": "U2", "Name": "Bob"}],
                    "@odata.nextLink": "/v3/Users?page=2"
                }));
            })
            .await;
        let page1 = server
            .mock_async(|when, then| {
                when.method(GET).path("/v3/Users").query_param_missing("page");
                then.status(200).json_body(json!({
                    "value": [{"UserKey": "U1", "Name": "Alice"}],
                    "@odata.nextLink": "/v3/Users?page=2"
                }));
            })
            .await;

        let client = test_client(&server.base_url(), 3);
        let users: Vec<User> = client.fetch_all("/v3/Users").await.unwrap();

        assert_eq!(page1.hits_async().await, 1);
        assert_eq!(page2.hits_async().await, 1);
        assert_eq!(users.len(), 2);
    }

    #[tokio::test]
    async fn failed_first_page_propagates() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v3/Contacts");
                then.status(404);
            })
            .await;

        let client = test_client(&server.base_url(), 3);
        let result: ApiResult<Vec<Contact>> = client.fetch_all("/v3/Contacts").await;
        assert!(matches!(result, Err(ApiError::Status { status: 404, .. })));
    }

    #[tokio::test]
    async fn failed_later_page_keeps_partial_results() {
        let server = MockServer::start_async().await;

        server
            .mock_async(|when, then| {
                when.method(GET).path("/v3/Users").query_param("page", "2");
                then.status(500);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v3/Users").query_param_missing("page");
                then.status(200).json_body(json!({
                    "value": [{"UserKey": "U1", "Name": "Alice"}],
                    "@odata.nextLink": "/v3/Users?page=2"
                }));
            })
            .await;

        let client = test_client(&server.base_url(), 2);
        let users: Vec<User> = client.fetch_all("/v3/Users").await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].user_key.as_deref(), Some("U1"));
    }

    // ── loaders ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn contact_loader_skips_items_without_keys() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v3/Contacts");
                then.status(200).json_body(json!({
                    "value": [
                        {"ContactKey": "C1", "FullName": "Acme"},
                        {"FullName": "No Key Co"},
                        {"ContactKey": "C3"}
                    ]
                }));
            })
            .await;

        let client = test_client(&server.base_url(), 3);
        let contacts = load_contacts(&client).await;
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts.get("C1").map(String::as_str), Some("Acme"));
    }

    #[tokio::test]
    async fn contact_loader_degrades_to_empty_on_failure() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v3/Contacts");
                then.status(401);
            })
            .await;

        let client = test_client(&server.base_url(), 3);
        let contacts = load_contacts(&client).await;
        assert!(contacts.is_empty());
    }

    #[tokio::test]
    async fn missing_estimate_summary_is_empty_not_an_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v3/EstimateSummaries/W404");
                then.status(404);
            })
            .await;

        let client = test_client(&server.base_url(), 3);
        let rows = load_estimate_summary(&client, "W404").await;
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn estimate_summary_rows_come_back_typed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/v3/EstimateSummaries/W1");
                then.status(200).json_body(json!({
                    "value": [
                        {"EstimateMinutes": 120.0, "ActualMinutes": 60.0},
                        {"EstimateMinutes": null, "ActualMinutes": 30.0}
                    ]
                }));
            })
            .await;

        let client = test_client(&server.base_url(), 3);
        let rows = load_estimate_summary(&client, "W1").await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].estimate_minutes, Some(120.0));
        assert_eq!(rows[1].estimate_minutes, None);
    }
}
