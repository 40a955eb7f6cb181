//! Shared test doubles: scripted transports, static tokens, page builders and an
//! axum stub of the query and token endpoints.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::extract::{Form, Query, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use resilient_backfill::auth::TokenRefresher;
use resilient_backfill::fetcher::{
    FetcherError, FetcherResult, PageSource, QueryTransport, TransportResponse,
};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

// ---------------------------------------------------------------------------
// Page documents
// ---------------------------------------------------------------------------

/// Query response holding `count` customers with ids `first_id..`
pub fn customers_page(first_id: u32, count: u32) -> Value {
    let customers: Vec<Value> = (first_id..first_id + count)
        .map(|id| json!({"Id": id.to_string(), "DisplayName": format!("Customer {id}")}))
        .collect();
    json!({"QueryResponse": {"Customer": customers, "startPosition": 1}})
}

/// Query response holding customers with the given ids
pub fn customers_with_ids(ids: &[&str]) -> Value {
    let customers: Vec<Value> = ids
        .iter()
        .map(|id| json!({"Id": id, "DisplayName": format!("Customer {id}")}))
        .collect();
    json!({"QueryResponse": {"Customer": customers}})
}

// ---------------------------------------------------------------------------
// Scripted transport
// ---------------------------------------------------------------------------

/// One request seen by [`ScriptedTransport`]
#[derive(Debug, Clone)]
pub struct SentRequest {
    pub query: String,
    pub token: String,
    pub timeout: Duration,
}

/// Transport replaying a fixed list of outcomes; answers 500 once exhausted
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<FetcherResult<TransportResponse>>>,
    calls: Mutex<Vec<SentRequest>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<FetcherResult<TransportResponse>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> Vec<SentRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl QueryTransport for ScriptedTransport {
    async fn send(
        &self,
        query: &str,
        access_token: &str,
        timeout: Duration,
    ) -> FetcherResult<TransportResponse> {
        self.calls.lock().unwrap().push(SentRequest {
            query: query.to_string(),
            token: access_token.to_string(),
            timeout,
        });
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(TransportResponse::new(500, "script exhausted")))
    }

    fn endpoint(&self) -> String {
        "scripted://query".to_string()
    }
}

pub fn ok_json(body: Value) -> FetcherResult<TransportResponse> {
    Ok(TransportResponse::new(200, body.to_string()))
}

pub fn status(code: u16) -> FetcherResult<TransportResponse> {
    Ok(TransportResponse::new(code, format!("{{\"Fault\": \"status {code}\"}}")))
}

pub fn rate_limited(retry_after_secs: Option<u64>) -> FetcherResult<TransportResponse> {
    Ok(TransportResponse {
        status: 429,
        retry_after: retry_after_secs.map(Duration::from_secs),
        body: String::new(),
    })
}

pub fn network_error() -> FetcherResult<TransportResponse> {
    Err(FetcherError::NetworkError("connection reset".to_string()))
}

// ---------------------------------------------------------------------------
// Static tokens
// ---------------------------------------------------------------------------

/// Token refresher that hands out a fixed refresh result
pub struct StaticTokens {
    token: Mutex<String>,
    refresh_result: Option<String>,
    refreshes: AtomicUsize,
}

impl StaticTokens {
    pub fn new(token: &str, refresh_result: Option<&str>) -> Arc<Self> {
        Arc::new(Self {
            token: Mutex::new(token.to_string()),
            refresh_result: refresh_result.map(str::to_string),
            refreshes: AtomicUsize::new(0),
        })
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenRefresher for StaticTokens {
    fn access_token(&self) -> String {
        self.token.lock().unwrap().clone()
    }

    async fn refresh(&self) -> Option<String> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        let fresh = self.refresh_result.clone()?;
        *self.token.lock().unwrap() = fresh.clone();
        Some(fresh)
    }
}

// ---------------------------------------------------------------------------
// Scripted page source
// ---------------------------------------------------------------------------

/// Page source replaying page documents; reports an empty response once exhausted
pub struct ScriptedPages {
    pages: Mutex<VecDeque<FetcherResult<Value>>>,
    requests: Mutex<Vec<(String, u32, u32)>>,
}

impl ScriptedPages {
    pub fn new(pages: Vec<FetcherResult<Value>>) -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(pages.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// `(query, start_position, max_results)` per fetch
    pub fn requests(&self) -> Vec<(String, u32, u32)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn start_positions(&self) -> Vec<u32> {
        self.requests().into_iter().map(|(_, start, _)| start).collect()
    }
}

#[async_trait]
impl PageSource for ScriptedPages {
    async fn fetch_page(
        &self,
        query: &str,
        start_position: u32,
        max_results: u32,
    ) -> FetcherResult<Value> {
        self.requests
            .lock()
            .unwrap()
            .push((query.to_string(), start_position, max_results));
        self.pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(json!({"QueryResponse": {}})))
    }
}

pub fn exhausted() -> FetcherResult<Value> {
    Err(FetcherError::RetriesExhausted {
        attempts: 5,
        last_error: "HTTP error: status 503: busy".to_string(),
    })
}

// ---------------------------------------------------------------------------
// HTTP stub server
// ---------------------------------------------------------------------------

/// Request captured by [`StubServer`]
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: HeaderMap,
    pub query: HashMap<String, String>,
    pub form: HashMap<String, String>,
}

impl RecordedRequest {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn query_param(&self, name: &str) -> Option<String> {
        self.query.get(name).cloned()
    }

    pub fn form_param(&self, name: &str) -> Option<String> {
        self.form.get(name).cloned()
    }
}

/// Canned response served by [`StubServer`]
#[derive(Debug, Clone)]
pub struct StubResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Value,
}

impl StubResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body,
        }
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }
}

impl IntoResponse for StubResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap();
        let mut headers = HeaderMap::new();
        for (name, value) in &self.headers {
            headers.insert(
                HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        (status, headers, Json(self.body)).into_response()
    }
}

/// Shared by both routes so responses are served in script order
struct StubState {
    responses: Mutex<VecDeque<StubResponse>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl StubState {
    fn record(&self, request: RecordedRequest) -> StubResponse {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| StubResponse::json(500, json!({"error": "no scripted response"})))
    }
}

async fn query_handler(
    State(state): State<Arc<StubState>>,
    uri: Uri,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> StubResponse {
    state.record(RecordedRequest {
        method: "GET".to_string(),
        path: uri.path().to_string(),
        headers,
        query,
        form: HashMap::new(),
    })
}

async fn token_handler(
    State(state): State<Arc<StubState>>,
    uri: Uri,
    headers: HeaderMap,
    Form(form): Form<HashMap<String, String>>,
) -> StubResponse {
    state.record(RecordedRequest {
        method: "POST".to_string(),
        path: uri.path().to_string(),
        headers,
        query: HashMap::new(),
        form,
    })
}

/// Query and token endpoints answering from one ordered script
pub struct StubServer {
    addr: SocketAddr,
    state: Arc<StubState>,
}

impl StubServer {
    pub async fn start(responses: Vec<StubResponse>) -> Self {
        let state = Arc::new(StubState {
            responses: Mutex::new(VecDeque::from(responses)),
            requests: Mutex::new(Vec::new()),
        });

        let app = Router::new()
            .route("/v3/company/:realm/query", get(query_handler))
            .route("/oauth2/v1/tokens/bearer", post(token_handler))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }
}
