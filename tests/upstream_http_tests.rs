use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use cardex::config::{RetryPolicy, UpstreamConfig};
use cardex::upstream::{CardQuery, DexRange, HttpCardSource, UpstreamClient};
use serde_json::json;
use tokio::task::JoinHandle;

/// Statuses to answer with, in order; once exhausted every request gets a page.
#[derive(Default)]
struct MockUpstream {
    script: Mutex<Vec<u16>>,
    hits: AtomicUsize,
    queries: Mutex<Vec<HashMap<String, String>>>,
    api_keys: Mutex<Vec<Option<String>>>,
}

async fn cards(
    State(mock): State<Arc<MockUpstream>>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    mock.hits.fetch_add(1, Ordering::SeqCst);
    mock.api_keys.lock().unwrap().push(
        headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
    );
    mock.queries.lock().unwrap().push(params.clone());

    let scripted = {
        let mut script = mock.script.lock().unwrap();
        (!script.is_empty()).then(|| script.remove(0))
    };
    if let Some(status) = scripted {
        let status = StatusCode::from_u16(status).unwrap();
        return (status, Json(json!({ "error": { "code": status.as_u16() } }))).into_response();
    }

    let page: usize = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let size: usize = params.get("pageSize").and_then(|p| p.parse().ok()).unwrap_or(250);
    let total = 5_usize;
    let start = (page - 1) * size;
    let data: Vec<_> = (start..total.min(start + size))
        .map(|i| json!({ "id": format!("sv1-{i}"), "nationalPokedexNumbers": [906] }))
        .collect();
    Json(json!({ "data": data, "page": page, "pageSize": size, "count": data.len(), "totalCount": total }))
        .into_response()
}

async fn spawn_mock_upstream(mock: Arc<MockUpstream>) -> (SocketAddr, JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("mock addr");
    let app = Router::new().route("/v2/cards", get(cards)).with_state(mock);
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock upstream");
    });
    (addr, handle)
}

fn config(addr: SocketAddr, page_size: u32) -> UpstreamConfig {
    UpstreamConfig {
        base_url: format!("http://{addr}/v2/cards"),
        api_key: Some("test-key".to_string()),
        page_size,
        page_pause_ms: 0,
        timeout_secs: 5,
        retry: RetryPolicy {
            max_retries: 3,
            base_delay_ms: 1,
            jitter_ms: 0,
        },
        ..UpstreamConfig::default()
    }
}

fn client(addr: SocketAddr, page_size: u32) -> UpstreamClient<HttpCardSource> {
    let config = config(addr, page_size);
    let source = HttpCardSource::new(&config).expect("http client");
    UpstreamClient::new(source, &config)
}

#[tokio::test]
async fn rate_limit_is_retried_then_succeeds() {
    let mock = Arc::new(MockUpstream {
        script: Mutex::new(vec![429, 503]),
        ..MockUpstream::default()
    });
    let (addr, handle) = spawn_mock_upstream(mock.clone()).await;

    let records = client(addr, 250)
        .fetch_all(&CardQuery::DexRange(DexRange::new(906, 1025)))
        .await
        .expect("retries should recover");
    assert_eq!(records.len(), 5);
    assert_eq!(mock.hits.load(Ordering::SeqCst), 3);

    let queries = mock.queries.lock().unwrap();
    let last = queries.last().expect("query params");
    assert_eq!(last["q"], "nationalPokedexNumbers:[906 TO 1025]");
    assert_eq!(last["orderBy"], "set.releaseDate,number");
    assert_eq!(last["pageSize"], "250");
    assert!(mock
        .api_keys
        .lock()
        .unwrap()
        .iter()
        .all(|key| key.as_deref() == Some("test-key")));
    handle.abort();
}

#[tokio::test]
async fn client_error_is_permanent_and_not_retried() {
    let mock = Arc::new(MockUpstream {
        script: Mutex::new(vec![400]),
        ..MockUpstream::default()
    });
    let (addr, handle) = spawn_mock_upstream(mock.clone()).await;

    let err = client(addr, 250)
        .fetch_all(&CardQuery::Name("Pikachu".to_string()))
        .await
        .expect_err("400 should fail");
    assert!(!err.is_transient());
    assert_eq!(err.status(), Some(400));
    assert_eq!(mock.hits.load(Ordering::SeqCst), 1);
    handle.abort();
}

#[tokio::test]
async fn retries_are_bounded() {
    let mock = Arc::new(MockUpstream {
        script: Mutex::new(vec![500; 10]),
        ..MockUpstream::default()
    });
    let (addr, handle) = spawn_mock_upstream(mock.clone()).await;

    let err = client(addr, 250)
        .total_count(&CardQuery::Dex(25))
        .await
        .expect_err("should exhaust retries");
    assert!(err.is_transient());
    // First attempt plus three retries.
    assert_eq!(mock.hits.load(Ordering::SeqCst), 4);
    handle.abort();
}

#[tokio::test]
async fn pages_until_total_count() {
    let mock = Arc::new(MockUpstream::default());
    let (addr, handle) = spawn_mock_upstream(mock.clone()).await;

    let records = client(addr, 2)
        .fetch_all(&CardQuery::Dex(906))
        .await
        .expect("paged fetch");
    let ids: Vec<_> = records.iter().map(|r| r["id"].as_str().unwrap().to_string()).collect();
    assert_eq!(ids, vec!["sv1-0", "sv1-1", "sv1-2", "sv1-3", "sv1-4"]);
    // Pages of 2, 2, 1: the short third page ends the loop.
    assert_eq!(mock.hits.load(Ordering::SeqCst), 3);

    let total = client(addr, 2).total_count(&CardQuery::Dex(906)).await.expect("count");
    assert_eq!(total, 5);
    let queries = mock.queries.lock().unwrap();
    assert_eq!(queries.last().unwrap()["pageSize"], "1");
    handle.abort();
}
