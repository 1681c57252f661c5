//! End-to-end retry behavior against a local server that changes its answer
//! between attempts.

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use pacx_http::{
    ExponentialBackoff, HttpError, HttpTransport, RetryPolicy, StaticToken, TransportConfig,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Clone, Default)]
struct Counter {
    hits: Arc<AtomicUsize>,
    attempts_seen: Arc<std::sync::Mutex<Vec<Option<String>>>>,
}

async fn throttled_twice(State(counter): State<Counter>, headers: HeaderMap) -> impl IntoResponse {
    let n = counter.hits.fetch_add(1, Ordering::SeqCst) + 1;
    counter.attempts_seen.lock().unwrap().push(
        headers
            .get("x-retry-attempt")
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned),
    );
    if n <= 2 {
        (
            StatusCode::TOO_MANY_REQUESTS,
            [("retry-after", "0")],
            r#"{"error":{"code":"0x80072322","message":"Number of requests exceeded the limit"}}"#,
        )
            .into_response()
    } else {
        (StatusCode::OK, r#"{"value":[{"name":"Contoso"}]}"#).into_response()
    }
}

async fn spawn(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn transport(addr: SocketAddr, max_retries: usize) -> HttpTransport {
    HttpTransport::builder(format!("http://{addr}/api/data/v9.2"))
        .with_config(TransportConfig::for_testing())
        .retry(Some(RetryPolicy {
            max_retries,
            backoff: ExponentialBackoff::fast(),
            ..RetryPolicy::default()
        }))
        .bearer_auth(StaticToken::new("t"))
        .build()
        .unwrap()
}

#[tokio::test]
async fn throttled_twice_then_ok_with_two_retries() {
    let counter = Counter::default();
    let app = Router::new()
        .route("/api/data/v9.2/accounts", get(throttled_twice))
        .with_state(counter.clone());
    let addr = spawn(app).await;

    let resp = transport(addr, 2).get("accounts").send().await.unwrap();

    assert_eq!(resp.status(), http::StatusCode::OK);
    assert_eq!(counter.hits.load(Ordering::SeqCst), 3);
    assert_eq!(
        *counter.attempts_seen.lock().unwrap(),
        vec![None, Some("1".to_owned()), Some("2".to_owned())]
    );
    let body: serde_json::Value = resp.json().unwrap();
    assert_eq!(body["value"][0]["name"], "Contoso");
}

#[tokio::test]
async fn throttled_with_one_retry_returns_last_429() {
    let counter = Counter::default();
    let app = Router::new()
        .route("/api/data/v9.2/accounts", get(throttled_twice))
        .with_state(counter.clone());
    let addr = spawn(app).await;

    let resp = transport(addr, 1).get("accounts").send().await.unwrap();

    assert_eq!(resp.status(), http::StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(counter.hits.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn server_error_is_not_retried() {
    let counter = Counter::default();
    let hits = Arc::clone(&counter.hits);
    let app = Router::new().route(
        "/api/data/v9.2/accounts",
        get(move || {
            let hits = Arc::clone(&hits);
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                (StatusCode::INTERNAL_SERVER_ERROR, "boom")
            }
        }),
    );
    let addr = spawn(app).await;

    let err = transport(addr, 2).get("accounts").send().await.unwrap_err();

    assert!(matches!(err, HttpError::Status { .. }));
    assert_eq!(err.status(), Some(http::StatusCode::INTERNAL_SERVER_ERROR));
    assert_eq!(counter.hits.load(Ordering::SeqCst), 1);
}
