//! Bearer-authorized HTTP client for the Fabric REST and OneLake APIs
//!
//! Stateless with respect to credentials: every call takes the token
//! string, so the client can be exercised without a session.

use std::collections::HashSet;
use std::future::Future;
use std::ops::Range;

use futures::stream::{self, StreamExt};
use reqwest::header::HeaderMap;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::config::{Settings, MAX_FANOUT};

/// Any 2xx.
pub const SUCCESS: Range<u16> = 200..300;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("not authorized; sign in again")]
    Unauthorized,
    #[error("HTTP {status}: {}", summarize(.body))]
    UnexpectedStatus { status: u16, body: String },
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("{0} items have no on-demand job")]
    NotRunnable(String),
}

/// Pull `message` out of a JSON error body, else a trimmed prefix of it.
fn summarize(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: Option<String>,
        #[serde(rename = "errorCode")]
        error_code: Option<String>,
    }
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(ErrorBody {
            message: Some(message),
            error_code,
        }) => match error_code {
            Some(code) => format!("{} ({})", message, code),
            None => message,
        },
        _ => body.chars().take(200).collect(),
    }
}

/// Map a status to the error taxonomy. 401/403 are always `Unauthorized`,
/// even when the accepted range would include them.
pub fn check_status(status: u16, body: &str, accepted: &Range<u16>) -> Result<(), ApiError> {
    if status == 401 || status == 403 {
        return Err(ApiError::Unauthorized);
    }
    if !accepted.contains(&status) {
        return Err(ApiError::UnexpectedStatus {
            status,
            body: body.to_string(),
        });
    }
    Ok(())
}

/// Request payload.
pub enum Payload<'a> {
    Empty,
    Json(&'a serde_json::Value),
    Bytes(Vec<u8>),
}

/// Status, headers and raw body of an accepted response.
#[derive(Debug)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body).map_err(|e| ApiError::InvalidResponse(e.to_string()))
    }

    /// JSON body when present; 202/204 replies usually carry none.
    pub fn json_opt<T: DeserializeOwned>(&self) -> Option<T> {
        if self.body.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        serde_json::from_slice(&self.body).ok()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// One page of a list endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Page {
    value: Vec<serde_json::Value>,
    continuation_uri: Option<String>,
    continuation_token: Option<String>,
}

/// The page after `page`: the full URI when given, else the original request
/// with its `continuationToken` replaced. `None` ends traversal. A
/// `continuationUri` on another origin is never followed, so the bearer
/// token only goes to the API host.
fn next_page_url(original: &Url, page: &Page) -> Option<Url> {
    if let Some(uri) = page.continuation_uri.as_deref().filter(|u| !u.is_empty()) {
        return match Url::parse(uri) {
            Ok(url) if url.origin() == original.origin() => Some(url),
            Ok(url) => {
                tracing::warn!(
                    "Not following continuationUri on foreign origin {}",
                    url.origin().ascii_serialization()
                );
                None
            }
            Err(e) => {
                tracing::warn!("Ignoring unparseable continuationUri: {}", e);
                None
            }
        };
    }
    page.continuation_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .map(|token| with_continuation_token(original, token))
}

fn with_continuation_token(original: &Url, token: &str) -> Url {
    let kept: Vec<(String, String)> = original
        .query_pairs()
        .filter(|(k, _)| k != "continuationToken")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    let mut url = original.clone();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("continuationToken", token);
    url
}

/// Decode one list record, skipping it when it does not fit the type.
fn decode_record<T: DeserializeOwned>(value: serde_json::Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(record) => Some(record),
        Err(e) => {
            tracing::warn!("Skipping undecodable record: {}", e);
            None
        }
    }
}

/// Outcome of a [`fan_out`]: what succeeded, plus the first failure.
#[derive(Debug)]
pub struct FanOut<R> {
    pub results: Vec<R>,
    pub failed: usize,
    pub first_error: Option<ApiError>,
}

impl<R> FanOut<R> {
    /// The successes, unless there were failures and nothing succeeded.
    pub fn into_result(self) -> Result<Vec<R>, ApiError> {
        match self.first_error {
            Some(e) if self.results.is_empty() => Err(e),
            _ => Ok(self.results),
        }
    }
}

/// Run `task` for every parent with at most `limit` in flight. Failed tasks
/// are logged and contribute nothing; the caller sorts the aggregate.
pub async fn fan_out<P, R, F, Fut>(
    parents: impl IntoIterator<Item = P>,
    limit: usize,
    task: F,
) -> FanOut<R>
where
    F: FnMut(P) -> Fut,
    Fut: Future<Output = Result<R, ApiError>>,
{
    let empty = FanOut {
        results: Vec::new(),
        failed: 0,
        first_error: None,
    };
    stream::iter(parents)
        .map(task)
        .buffer_unordered(limit.clamp(1, MAX_FANOUT))
        .fold(empty, |mut acc, res| async move {
            match res {
                Ok(r) => acc.results.push(r),
                Err(e) => {
                    tracing::warn!("Fan-out sub-request failed: {}", e);
                    acc.failed += 1;
                    if acc.first_error.is_none() {
                        acc.first_error = Some(e);
                    }
                }
            }
            acc
        })
        .await
}

/// Authorized client for the Fabric REST API and OneLake.
pub struct FabricClient {
    http: reqwest::Client,
    api_base: String,
    onelake_base: String,
    fanout: usize,
    upload_chunk: usize,
}

impl FabricClient {
    pub fn new(http: reqwest::Client, settings: &Settings) -> Self {
        Self {
            http,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            onelake_base: settings.onelake_base.trim_end_matches('/').to_string(),
            fanout: settings.fanout(),
            upload_chunk: settings.upload_chunk(),
        }
    }

    pub fn fanout(&self) -> usize {
        self.fanout
    }

    pub fn upload_chunk(&self) -> usize {
        self.upload_chunk
    }

    /// Resolve an API path (`/workspaces?...`) against the versioned base.
    pub fn api_url(&self, path: &str) -> Result<Url, ApiError> {
        let raw = format!("{}{}", self.api_base, path);
        Url::parse(&raw).map_err(|e| ApiError::InvalidEndpoint(format!("{}: {}", raw, e)))
    }

    /// OneLake DFS URL for a file under an item's `Files` folder.
    pub fn onelake_file_url(
        &self,
        workspace_id: &str,
        item_id: &str,
        file_path: &str,
    ) -> Result<Url, ApiError> {
        let mut url = Url::parse(&self.onelake_base)
            .map_err(|e| ApiError::InvalidEndpoint(format!("{}: {}", self.onelake_base, e)))?;
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidEndpoint(self.onelake_base.clone()))?
            .pop_if_empty()
            .push(workspace_id)
            .push(item_id)
            .push("Files")
            .extend(file_path.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }

    /// Send one request and map the status. No retries.
    pub async fn send(
        &self,
        method: Method,
        url: Url,
        token: &str,
        payload: Payload<'_>,
        accepted: Range<u16>,
    ) -> Result<ApiResponse, ApiError> {
        let request_id = uuid::Uuid::new_v4();
        tracing::debug!("{} {} (request {})", method, url, request_id);

        let mut req = self
            .http
            .request(method, url)
            .bearer_auth(token)
            .header("x-ms-client-request-id", request_id.to_string());
        req = match payload {
            Payload::Empty => req,
            Payload::Json(body) => req.json(body),
            Payload::Bytes(bytes) => req.body(bytes),
        };

        let resp = req.send().await?;
        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let body = resp.bytes().await?.to_vec();

        check_status(status, &String::from_utf8_lossy(&body), &accepted)?;
        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }

    pub async fn get(&self, path: &str, token: &str) -> Result<ApiResponse, ApiError> {
        let url = self.api_url(path)?;
        self.send(Method::GET, url, token, Payload::Empty, SUCCESS).await
    }

    pub async fn post(
        &self,
        path: &str,
        token: &str,
        body: &serde_json::Value,
    ) -> Result<ApiResponse, ApiError> {
        let url = self.api_url(path)?;
        self.send(Method::POST, url, token, Payload::Json(body), SUCCESS)
            .await
    }

    pub async fn patch(
        &self,
        path: &str,
        token: &str,
        body: &serde_json::Value,
    ) -> Result<ApiResponse, ApiError> {
        let url = self.api_url(path)?;
        self.send(Method::PATCH, url, token, Payload::Json(body), SUCCESS)
            .await
    }

    pub async fn delete(&self, path: &str, token: &str) -> Result<ApiResponse, ApiError> {
        let url = self.api_url(path)?;
        self.send(Method::DELETE, url, token, Payload::Empty, SUCCESS)
            .await
    }

    /// Every record of a list endpoint, following continuation cursors.
    ///
    /// HTTP errors fail the call. A page that does not decode ends the
    /// traversal and what was gathered so far is returned.
    pub async fn get_all<T: DeserializeOwned>(
        &self,
        path: &str,
        token: &str,
    ) -> Result<Vec<T>, ApiError> {
        let original = self.api_url(path)?;
        let mut records = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(original.clone());

        while let Some(url) = next.take() {
            visited.insert(url.clone());
            let resp = self
                .send(Method::GET, url.clone(), token, Payload::Empty, SUCCESS)
                .await?;
            let page: Page = match serde_json::from_slice(&resp.body) {
                Ok(page) => page,
                Err(e) => {
                    tracing::warn!(
                        "Malformed page from {}, keeping {} records: {}",
                        url,
                        records.len(),
                        e
                    );
                    break;
                }
            };

            records.extend(page.value.iter().cloned().filter_map(decode_record));
            next = next_page_url(&original, &page).filter(|n| {
                let fresh = !visited.contains(n);
                if !fresh {
                    tracing::warn!("Cursor loops back to {}, stopping", n);
                }
                fresh
            });
        }

        Ok(records)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Rec {
        n: u32,
    }

    pub(crate) fn client(base: &str) -> FabricClient {
        FabricClient::new(reqwest::Client::new(), &Settings::for_base(base))
    }

    #[test]
    fn test_unauthorized_takes_priority() {
        assert!(matches!(
            check_status(401, "{}", &(200..500)),
            Err(ApiError::Unauthorized)
        ));
        assert!(matches!(
            check_status(403, "", &SUCCESS),
            Err(ApiError::Unauthorized)
        ));
    }

    #[test]
    fn test_unexpected_status_keeps_body() {
        match check_status(404, "missing", &SUCCESS) {
            Err(ApiError::UnexpectedStatus { status, body }) => {
                assert_eq!(status, 404);
                assert_eq!(body, "missing");
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(check_status(204, "", &SUCCESS).is_ok());
        assert!(check_status(404, "", &(200..500)).is_ok());
    }

    #[test]
    fn test_error_display_uses_service_message() {
        let err = ApiError::UnexpectedStatus {
            status: 400,
            body: r#"{"errorCode":"InvalidInput","message":"Name is taken"}"#.to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 400: Name is taken (InvalidInput)");
    }

    #[test]
    fn test_continuation_token_merges_into_original_query() {
        let original = Url::parse("https://api.example/v1/workspaces?roles=Admin").unwrap();
        let page = Page {
            value: vec![],
            continuation_uri: None,
            continuation_token: Some("tok 2".to_string()),
        };
        let next = next_page_url(&original, &page).unwrap();
        assert_eq!(
            next.as_str(),
            "https://api.example/v1/workspaces?roles=Admin&continuationToken=tok+2"
        );

        let again = with_continuation_token(&next, "tok3");
        let tokens: Vec<_> = again
            .query_pairs()
            .filter(|(k, _)| k == "continuationToken")
            .collect();
        assert_eq!(tokens.len(), 1);
    }

    #[test]
    fn test_continuation_uri_wins() {
        let original = Url::parse("https://api.example/v1/items").unwrap();
        let page = Page {
            value: vec![],
            continuation_uri: Some("https://api.example/v1/items?page=2".to_string()),
            continuation_token: Some("ignored".to_string()),
        };
        assert_eq!(
            next_page_url(&original, &page).unwrap().as_str(),
            "https://api.example/v1/items?page=2"
        );

        let last = Page {
            value: vec![],
            continuation_uri: Some(String::new()),
            continuation_token: None,
        };
        assert!(next_page_url(&original, &last).is_none());
    }

    #[test]
    fn test_foreign_continuation_uri_is_not_followed() {
        let original = Url::parse("https://api.example/v1/items").unwrap();
        let page = Page {
            value: vec![],
            continuation_uri: Some("https://attacker.example/v1/items?page=2".to_string()),
            continuation_token: None,
        };
        assert!(next_page_url(&original, &page).is_none());

        let other_port = Page {
            value: vec![],
            continuation_uri: Some("https://api.example:8443/v1/items?page=2".to_string()),
            continuation_token: None,
        };
        assert!(next_page_url(&original, &other_port).is_none());
    }

    #[test]
    fn test_onelake_url_encodes_segments() {
        let client = client("https://h.example");
        let url = client
            .onelake_file_url("ws", "item", "/raw/2024 data/a.csv")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://h.example/onelake/ws/item/Files/raw/2024%20data/a.csv"
        );
    }

    #[tokio::test]
    async fn test_get_all_follows_three_token_pages() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/things"))
            .and(query_param_is_missing("continuationToken"))
            .and(header("authorization", "Bearer T"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"value": [{"n": 1}, {"n": 2}], "continuationToken": "p2"}),
            ))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/things"))
            .and(query_param("continuationToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"value": [{"n": 3}], "continuationToken": "p3"}),
            ))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/things"))
            .and(query_param("continuationToken", "p3"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"value": [{"n": 4}, {"n": 5}]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let recs: Vec<Rec> = client(&server.uri()).get_all("/things", "T").await.unwrap();
        let ns: Vec<u32> = recs.iter().map(|r| r.n).collect();
        assert_eq!(ns, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_get_all_single_page_without_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/things"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"value": [{"n": 7}]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let recs: Vec<Rec> = client(&server.uri()).get_all("/things", "T").await.unwrap();
        assert_eq!(recs, vec![Rec { n: 7 }]);
    }

    #[tokio::test]
    async fn test_get_all_follows_continuation_uri() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/things"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"n": 1}],
                "continuationUri": format!("{}/v1/things-page-2", server.uri())
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/things-page-2"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"value": [{"n": 2}]})),
            )
            .mount(&server)
            .await;

        let recs: Vec<Rec> = client(&server.uri()).get_all("/things", "T").await.unwrap();
        assert_eq!(recs, vec![Rec { n: 1 }, Rec { n: 2 }]);
    }

    #[tokio::test]
    async fn test_get_all_keeps_token_on_api_host() {
        let server = MockServer::start().await;
        let foreign = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"value": [{"n": 9}]})))
            .expect(0)
            .mount(&foreign)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/things"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{"n": 1}],
                "continuationUri": format!("{}/v1/things?page=2", foreign.uri())
            })))
            .expect(1)
            .mount(&server)
            .await;

        let recs: Vec<Rec> = client(&server.uri()).get_all("/things", "SECRET").await.unwrap();
        assert_eq!(recs, vec![Rec { n: 1 }]);
        foreign.verify().await;
    }

    #[tokio::test]
    async fn test_get_all_stops_on_cursor_cycle() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param_is_missing("continuationToken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"value": [{"n": 1}], "continuationToken": "p2"}),
            ))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("continuationToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"value": [{"n": 2}], "continuationToken": "p3"}),
            ))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("continuationToken", "p3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"value": [{"n": 3}], "continuationToken": "p2"}),
            ))
            .expect(1)
            .mount(&server)
            .await;

        let recs: Vec<Rec> = client(&server.uri()).get_all("/things", "T").await.unwrap();
        let ns: Vec<u32> = recs.iter().map(|r| r.n).collect();
        assert_eq!(ns, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_malformed_page_truncates() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param_is_missing("continuationToken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"value": [{"n": 1}, {"bogus": true}], "continuationToken": "p2"}),
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("continuationToken", "p2"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let recs: Vec<Rec> = client(&server.uri()).get_all("/things", "T").await.unwrap();
        assert_eq!(recs, vec![Rec { n: 1 }]);
    }

    #[tokio::test]
    async fn test_get_all_surfaces_unauthorized() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let res: Result<Vec<Rec>, _> = client(&server.uri()).get_all("/things", "T").await;
        assert!(matches!(res, Err(ApiError::Unauthorized)));
    }

    #[tokio::test]
    async fn test_transport_failure_is_network_error() {
        let res = client("http://127.0.0.1:9").get("/things", "T").await;
        assert!(matches!(res, Err(ApiError::Transport(_))));
    }

    #[tokio::test]
    async fn test_fan_out_drops_failures() {
        let outcome = fan_out(0..5u32, 3, |n| async move {
            if n == 2 {
                Err(ApiError::Unauthorized)
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(outcome.failed, 1);
        let mut results = outcome.into_result().unwrap();
        results.sort();
        assert_eq!(results, vec![0, 1, 3, 4]);
    }

    #[tokio::test]
    async fn test_fan_out_all_failed_is_an_error() {
        let outcome = fan_out(0..3u32, 3, |_| async move {
            Err::<u32, _>(ApiError::Unauthorized)
        })
        .await;
        assert_eq!(outcome.failed, 3);
        assert!(matches!(outcome.into_result(), Err(ApiError::Unauthorized)));

        let nothing = fan_out(Vec::<u32>::new(), 3, |n| async move { Ok(n) }).await;
        assert_eq!(nothing.into_result().unwrap(), Vec::<u32>::new());
    }

    #[tokio::test]
    async fn test_fan_out_respects_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let results = fan_out(0..40u32, 64, |n| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, ApiError>(n)
            }
        })
        .await;
        assert_eq!(results.results.len(), 40);
        assert!(peak.load(Ordering::SeqCst) <= MAX_FANOUT);
    }
}
