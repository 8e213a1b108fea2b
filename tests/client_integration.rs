use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use axum::{
    body::Body,
    extract::{RawQuery, State},
    http::{header, HeaderMap, StatusCode},
    response::Response,
    routing::get,
    Router,
};
use request_flow::{ExportClient, FlowError, FlowOptions, Page, RequestFlowHooks};
use serde_json::{json, Value as JsonValue};

#[derive(Clone)]
struct MockResponse {
    status: StatusCode,
    body: String,
    retry_after: Option<&'static str>,
    delay: Duration,
}

impl MockResponse {
    fn json(status: StatusCode, body: JsonValue) -> Self {
        Self::text(status, body.to_string())
    }

    fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            retry_after: None,
            delay: Duration::from_millis(0),
        }
    }

    fn with_retry_after(mut self, retry_after: &'static str) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Clone, Debug)]
struct RecordedRequest {
    query: Option<String>,
    authorization: Option<String>,
}

#[derive(Clone)]
struct MockState {
    responses: Arc<Mutex<VecDeque<MockResponse>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    hits: Arc<AtomicUsize>,
}

async fn history_handler(
    State(state): State<MockState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    state
        .requests
        .lock()
        .expect("request log mutex must not be poisoned")
        .push(RecordedRequest {
            query,
            authorization: headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned),
        });

    let response = {
        let mut queue = state
            .responses
            .lock()
            .expect("response queue mutex must not be poisoned");
        queue.pop_front().unwrap_or_else(|| {
            MockResponse::json(
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({"error": "no mock response available"}),
            )
        })
    };

    if !response.delay.is_zero() {
        tokio::time::sleep(response.delay).await;
    }

    let mut builder = Response::builder()
        .status(response.status)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(retry_after) = response.retry_after {
        builder = builder.header(header::RETRY_AFTER, retry_after);
    }
    builder
        .body(Body::from(response.body))
        .expect("mock response must build")
}

struct TestServer {
    base_url: String,
    hits: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    task: tokio::task::JoinHandle<()>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl TestServer {
    fn history_url(&self) -> String {
        format!("{}/api/conversations.history", self.base_url)
    }

    fn requests(&self) -> Vec<RecordedRequest> {
        self.requests
            .lock()
            .expect("request log mutex must not be poisoned")
            .clone()
    }
}

async fn spawn_server(responses: Vec<MockResponse>) -> TestServer {
    let state = MockState {
        responses: Arc::new(Mutex::new(responses.into())),
        requests: Arc::new(Mutex::new(Vec::new())),
        hits: Arc::new(AtomicUsize::new(0)),
    };

    let app = Router::new()
        .route("/api/conversations.history", get(history_handler))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind test listener");
    let address = listener.local_addr().expect("must have local addr");
    let task = tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("mock server must run");
    });

    TestServer {
        base_url: format!("http://{address}"),
        hits: state.hits,
        requests: state.requests,
        task,
    }
}

#[derive(Default)]
struct Recorder {
    failures: Vec<String>,
    statuses: Vec<String>,
}

impl RequestFlowHooks for Recorder {
    fn on_failure(&mut self, _attempt: u32, message: &str) {
        self.failures.push(message.to_owned());
    }

    fn on_completion(&mut self, _ok: bool, status: &str) {
        self.statuses.push(status.to_owned());
    }
}

fn client(options: FlowOptions) -> ExportClient<Recorder> {
    ExportClient::with_hooks(options, Recorder::default())
        .expect("client must build")
        .with_bearer("xoxp-test")
}

#[tokio::test]
async fn get_json_decodes_body_and_sends_bearer_token() {
    let server = spawn_server(vec![MockResponse::json(
        StatusCode::OK,
        json!({"ok": true, "messages": [{"text": "hi"}]}),
    )])
    .await;
    let mut client = client(FlowOptions::default());

    let body: JsonValue = client
        .get_json(&server.history_url(), &[("channel", "C024BE91L")])
        .await
        .expect("request must succeed");

    assert_eq!(body["messages"][0]["text"], "hi");
    assert_eq!(server.hits.load(Ordering::SeqCst), 1);
    let requests = server.requests();
    assert_eq!(requests[0].authorization.as_deref(), Some("Bearer xoxp-test"));
    assert_eq!(requests[0].query.as_deref(), Some("channel=C024BE91L"));
    assert_eq!(client.hooks().statuses, vec!["200".to_owned()]);
}

#[tokio::test]
async fn rate_limited_response_is_retried_and_raises_delay() {
    let server = spawn_server(vec![
        MockResponse::json(StatusCode::TOO_MANY_REQUESTS, json!({"ok": false}))
            .with_retry_after("0"),
        MockResponse::json(StatusCode::OK, json!({"ok": true})),
    ])
    .await;
    let mut client = client(FlowOptions::default());

    let completion = client
        .get(&server.history_url(), &[("channel", "C024BE91L")])
        .await
        .expect("request must succeed after rate limit");

    assert!(completion.ok);
    assert_eq!(completion.status, 200);
    assert_eq!(completion.size, completion.body.len() as u64);
    assert_eq!(server.hits.load(Ordering::SeqCst), 2);
    assert!((client.controller().post_request_delay() - 0.2).abs() < 1e-9);
    assert_eq!(client.hooks().statuses, vec!["429".to_owned(), "200".to_owned()]);
}

#[tokio::test]
async fn non_success_status_is_not_retried() {
    let server = spawn_server(vec![MockResponse::json(
        StatusCode::NOT_FOUND,
        json!({"ok": false, "error": "channel_not_found"}),
    )])
    .await;
    let mut client = client(FlowOptions::default());

    let err = client
        .get_json::<JsonValue, _>(&server.history_url(), &[("channel", "C024BE91L")])
        .await
        .expect_err("404 must surface as an error");

    match err {
        FlowError::Http { status, body } => {
            assert_eq!(status, 404);
            assert!(body.contains("channel_not_found"));
        }
        other => panic!("expected http error, got {other:?}"),
    }
    assert_eq!(server.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn request_timeout_is_retried_as_transport_failure() {
    let server = spawn_server(vec![
        MockResponse::json(StatusCode::OK, json!({"ok": true}))
            .with_delay(Duration::from_millis(300)),
        MockResponse::json(StatusCode::OK, json!({"ok": true, "retried": true})),
    ])
    .await;
    let mut client = client(FlowOptions {
        timeout_ms: 50,
        ..FlowOptions::default()
    });

    let body: JsonValue = client
        .get_json(&server.history_url(), &[("channel", "C024BE91L")])
        .await
        .expect("request must succeed after timeout");

    assert_eq!(body["retried"], true);
    assert_eq!(server.hits.load(Ordering::SeqCst), 2);
    assert_eq!(client.hooks().failures.len(), 1);
}

#[tokio::test]
async fn undecodable_body_is_malformed_response() {
    let server = spawn_server(vec![MockResponse::text(StatusCode::OK, "<html>oops</html>")]).await;
    let mut client = client(FlowOptions::default());

    let err = client
        .get_json::<JsonValue, _>(&server.history_url(), &[("channel", "C024BE91L")])
        .await
        .expect_err("html is not json");

    assert!(matches!(err, FlowError::MalformedResponse(_)), "{err:?}");
    assert_eq!(server.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn fetch_paginated_follows_cursor_until_blank() {
    let server = spawn_server(vec![
        MockResponse::json(
            StatusCode::OK,
            json!({
                "ok": true,
                "messages": [{"ts": "1"}, {"ts": "2"}],
                "response_metadata": {"next_cursor": "bmV4dA=="}
            }),
        ),
        MockResponse::json(
            StatusCode::OK,
            json!({
                "ok": true,
                "messages": [{"ts": "3"}],
                "response_metadata": {"next_cursor": ""}
            }),
        ),
    ])
    .await;
    let mut client = client(FlowOptions::default());

    client.begin_batch(&server.history_url(), None);
    let messages = client
        .fetch_paginated(&server.history_url(), &[("limit", "2")], |mut body| {
            let items = match body["messages"].take() {
                JsonValue::Array(items) => items,
                other => {
                    return Err(FlowError::MalformedResponse(format!(
                        "expected messages array, got {other}"
                    )))
                }
            };
            let cursor = body["response_metadata"]["next_cursor"]
                .as_str()
                .map(str::to_owned);
            Ok(Page::new(items, cursor))
        })
        .await
        .expect("pagination must succeed");
    client.end_batch();

    let ts: Vec<&str> = messages.iter().filter_map(|m| m["ts"].as_str()).collect();
    assert_eq!(ts, vec!["1", "2", "3"]);
    let queries: Vec<Option<String>> = server.requests().into_iter().map(|r| r.query).collect();
    assert_eq!(
        queries,
        vec![
            Some("limit=2".to_owned()),
            Some("limit=2&cursor=bmV4dA%3D%3D".to_owned()),
        ]
    );
    assert_eq!(client.controller().request_num(), 2);
}
