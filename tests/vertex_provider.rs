//! Vertex AI REST client against a local mock of the API.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wizard_harness::config::LlmConfig;
use wizard_harness::error::WizardError;
use wizard_harness::llm::{CacheRequest, LlmProvider, VertexProvider};

const LOCATION_PATH: &str = "projects/demo/locations/us-central1";

// ─── Mock API ───────────────────────────────────────────────────────

#[derive(Default)]
struct MockState {
    /// `(method, path, body)` of every request received.
    requests: Mutex<Vec<(Method, String, Value)>>,
    /// Answer this many generate calls with 500 before succeeding.
    fail_generate: AtomicUsize,
    /// Answer this many calls with 401 before checking the token.
    unauthorized: AtomicUsize,
    caches: Mutex<Vec<Value>>,
    next_cache: AtomicUsize,
}

impl MockState {
    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn last_body(&self) -> Value {
        self.requests
            .lock()
            .unwrap()
            .last()
            .map(|(_, _, body)| body.clone())
            .unwrap_or(Value::Null)
    }
}

fn api_error(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(json!({"error": {"code": status.as_u16(), "message": message}})),
    )
        .into_response()
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

async fn mock_api(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().trim_start_matches("/v1/").to_string();
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    state
        .requests
        .lock()
        .unwrap()
        .push((method.clone(), path.clone(), body.clone()));

    if take_one(&state.unauthorized) {
        return api_error(StatusCode::UNAUTHORIZED, "Request had invalid authentication credentials.");
    }
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if auth != "Bearer tok" {
        return api_error(StatusCode::UNAUTHORIZED, "bad token");
    }

    let caches_path = format!("{}/cachedContents", LOCATION_PATH);

    if method == Method::POST && path.ends_with(":generateContent") {
        if path.contains("/models/missing:") {
            return api_error(StatusCode::NOT_FOUND, "Publisher model not found");
        }
        if take_one(&state.fail_generate) {
            return api_error(StatusCode::INTERNAL_SERVER_ERROR, "backend error");
        }
        if let Some(cache) = body.get("cachedContent").and_then(|c| c.as_str()) {
            let known = state
                .caches
                .lock()
                .unwrap()
                .iter()
                .any(|c| c["name"] == cache);
            if !known {
                return api_error(StatusCode::NOT_FOUND, "CachedContent not found");
            }
        }
        return Json(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "hello "}, {"text": "world"}]},
                "finishReason": "STOP"
            }]
        }))
        .into_response();
    }

    if method == Method::POST && path == caches_path {
        let id = state.next_cache.fetch_add(1, Ordering::SeqCst);
        let ttl_secs: i64 = body["ttl"]
            .as_str()
            .and_then(|t| t.trim_end_matches('s').parse().ok())
            .unwrap_or(3600);
        let resource = json!({
            "name": format!("{}/{}", caches_path, id),
            "model": body["model"],
            "displayName": body["displayName"],
            "createTime": Utc::now().to_rfc3339(),
            "expireTime": (Utc::now() + chrono::Duration::seconds(ttl_secs)).to_rfc3339(),
        });
        state.caches.lock().unwrap().push(resource.clone());
        return Json(resource).into_response();
    }

    if method == Method::GET && path == caches_path {
        // One handle per page to exercise pagination.
        let start: usize = uri
            .query()
            .and_then(|q| {
                q.split('&')
                    .find_map(|kv| kv.strip_prefix("pageToken="))
                    .and_then(|t| t.parse().ok())
            })
            .unwrap_or(0);
        let caches = state.caches.lock().unwrap();
        let page: Vec<Value> = caches.iter().skip(start).take(1).cloned().collect();
        let mut response = json!({ "cachedContents": page });
        if start + 1 < caches.len() {
            response["nextPageToken"] = json!((start + 1).to_string());
        }
        return Json(response).into_response();
    }

    if method == Method::DELETE && path.starts_with(&caches_path) {
        let mut caches = state.caches.lock().unwrap();
        let before = caches.len();
        caches.retain(|c| c["name"] != path.as_str());
        if caches.len() == before {
            return api_error(StatusCode::NOT_FOUND, "CachedContent not found");
        }
        return Json(json!({})).into_response();
    }

    api_error(StatusCode::NOT_FOUND, "no such route")
}

async fn start_mock() -> (String, Arc<MockState>) {
    let state = Arc::new(MockState::default());
    let app = Router::new().fallback(mock_api).with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    (format!("http://{}", addr), state)
}

fn provider(endpoint: &str, token: &str) -> VertexProvider {
    let config = LlmConfig {
        project: Some("demo".into()),
        location: "us-central1".into(),
        endpoint: Some(endpoint.to_string()),
        access_token: Some(token.to_string()),
        timeout_secs: 5,
        max_retries: 2,
        ..LlmConfig::default()
    };
    VertexProvider::new(&config)
        .unwrap()
        .with_backoff_base(Duration::from_millis(10))
}

fn cache_request() -> CacheRequest {
    CacheRequest {
        model: "gemini-2.5-flash".into(),
        display_name: "wiz-repo-abc".into(),
        system_instruction: "You analyze code.".into(),
        contents: "File index:\n\n- a.py".into(),
        ttl: Duration::from_secs(7200),
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_generate_sends_user_content_and_joins_parts() {
    let (endpoint, mock) = start_mock().await;
    let vertex = provider(&endpoint, "tok");

    let text = vertex.generate("gemini-2.5-flash", "Explain").await.unwrap();
    assert_eq!(text, "hello world");

    let requests = mock.requests.lock().unwrap();
    let (method, path, body) = &requests[0];
    assert_eq!(*method, Method::POST);
    assert_eq!(
        path,
        &format!(
            "{}/publishers/google/models/gemini-2.5-flash:generateContent",
            LOCATION_PATH
        )
    );
    assert_eq!(body["contents"][0]["role"], "user");
    assert_eq!(body["contents"][0]["parts"][0]["text"], "Explain");
    assert_eq!(body["generationConfig"]["maxOutputTokens"], 8192);
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let (endpoint, mock) = start_mock().await;
    let vertex = provider(&endpoint, "tok");

    mock.fail_generate.store(2, Ordering::SeqCst);
    assert_eq!(vertex.generate("m", "p").await.unwrap(), "hello world");
    assert_eq!(mock.request_count(), 3);

    mock.fail_generate.store(10, Ordering::SeqCst);
    let err = vertex.generate("m", "p").await.unwrap_err();
    assert!(matches!(err, WizardError::LlmCall(ref m) if m.contains("backend error")));
    assert_eq!(mock.request_count(), 6, "one attempt plus max_retries");
}

#[tokio::test]
async fn test_static_token_is_not_retried_on_401() {
    let (endpoint, mock) = start_mock().await;
    let vertex = provider(&endpoint, "wrong");

    let err = vertex.generate("m", "p").await.unwrap_err();
    assert_eq!(err.code(), "llm_error");
    assert!(err.to_string().contains("401"));
    assert_eq!(mock.request_count(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_command_token_reauthenticates_once() {
    let (endpoint, mock) = start_mock().await;
    let config = LlmConfig {
        project: Some("demo".into()),
        location: "us-central1".into(),
        endpoint: Some(endpoint),
        access_token: None,
        token_command: vec!["echo".into(), "tok".into()],
        timeout_secs: 5,
        ..LlmConfig::default()
    };
    let vertex = VertexProvider::new(&config).unwrap();

    mock.unauthorized.store(1, Ordering::SeqCst);
    assert_eq!(vertex.generate("m", "p").await.unwrap(), "hello world");
    assert_eq!(mock.request_count(), 2);

    mock.unauthorized.store(2, Ordering::SeqCst);
    let err = vertex.generate("m", "p").await.unwrap_err();
    assert!(err.to_string().contains("401"));
}

#[tokio::test]
async fn test_cache_lifecycle() {
    let (endpoint, mock) = start_mock().await;
    let vertex = provider(&endpoint, "tok");

    let handle = vertex.create_cache(&cache_request()).await.unwrap();
    assert_eq!(handle.name, format!("{}/cachedContents/0", LOCATION_PATH));
    assert_eq!(handle.model, "gemini-2.5-flash");
    assert_eq!(handle.display_name.as_deref(), Some("wiz-repo-abc"));
    assert!(handle.expire_time.unwrap() > Utc::now());
    let sent = mock.last_body();
    assert_eq!(sent["ttl"], "7200s");
    assert_eq!(
        sent["model"],
        format!("{}/publishers/google/models/gemini-2.5-flash", LOCATION_PATH)
    );
    assert_eq!(sent["systemInstruction"]["parts"][0]["text"], "You analyze code.");

    // A bare id expands to the full resource name.
    let answer = vertex
        .generate_cached("0", "gemini-2.5-flash", "Summarize")
        .await
        .unwrap();
    assert_eq!(answer, "hello world");
    assert_eq!(mock.last_body()["cachedContent"], handle.name);

    vertex.delete_cache(&handle.name).await.unwrap();
    let err = vertex.delete_cache(&handle.name).await.unwrap_err();
    assert!(matches!(err, WizardError::CacheNotFound(_)));

    let err = vertex
        .generate_cached(&handle.name, "gemini-2.5-flash", "Again")
        .await
        .unwrap_err();
    assert!(matches!(err, WizardError::CacheNotFound(_)));
}

#[tokio::test]
async fn test_list_follows_page_tokens() {
    let (endpoint, mock) = start_mock().await;
    let vertex = provider(&endpoint, "tok");
    for _ in 0..3 {
        vertex.create_cache(&cache_request()).await.unwrap();
    }

    let handles = vertex.list_caches().await.unwrap();
    let ids: Vec<&str> = handles.iter().map(|h| h.short_id()).collect();
    assert_eq!(ids, vec!["0", "1", "2"]);
    assert!(handles.iter().all(|h| h.model == "gemini-2.5-flash"));

    let list_calls = mock
        .requests
        .lock()
        .unwrap()
        .iter()
        .filter(|(m, _, _)| *m == Method::GET)
        .count();
    assert_eq!(list_calls, 3);
}

#[tokio::test]
async fn test_not_found_means_cache_miss_only_for_cached_calls() {
    let (endpoint, _mock) = start_mock().await;
    let vertex = provider(&endpoint, "tok");

    let err = vertex.generate("missing", "p").await.unwrap_err();
    assert_eq!(err.code(), "llm_error");

    let err = vertex
        .generate_cached("nope", "gemini-2.5-flash", "p")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "cache_not_found");
}
