use std::sync::Arc;
use std::time::Duration;

use plugin_platform::host::{
    AdaptiveRetryFetcher, FetchError, FetchOptions, HostCapabilityRouter, HostStatsStore, HostTool,
    InMemoryHostStats, JsonFileHostStats, RetryPolicy, SnapshotTabs,
};
use plugin_platform::logger::{Logger, MemoryLogger};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const HOST: &str = "127.0.0.1";

fn fast_policy(probe_url: &str) -> RetryPolicy {
    RetryPolicy {
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        probe_url: probe_url.to_string(),
        probe_timeout: Duration::from_secs(2),
        ..RetryPolicy::default()
    }
}

async fn gets(server: &MockServer) -> usize {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.method.as_str() == "GET")
        .count()
}

#[tokio::test]
async fn records_the_attempt_that_succeeded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .mount(&server)
        .await;

    let stats = Arc::new(InMemoryHostStats::default());
    let fetcher = AdaptiveRetryFetcher::new(stats.clone(), fast_policy(&server.uri()));

    let data = fetcher
        .fetch_with_retry(&format!("{}/data", server.uri()), &FetchOptions::default())
        .await
        .unwrap();
    assert_eq!(data, json!({"ok": true}));
    assert_eq!(stats.history(HOST).await, vec![3]);
    assert_eq!(gets(&server).await, 3);
}

#[tokio::test]
async fn unreachable_network_stops_after_five_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let stats = Arc::new(InMemoryHostStats::default());
    let fetcher = AdaptiveRetryFetcher::new(stats.clone(), fast_policy("http://127.0.0.1:1/"));

    let err = fetcher
        .fetch_with_retry(&format!("{}/data", server.uri()), &FetchOptions::default())
        .await
        .unwrap_err();
    assert!(err.is_connectivity());
    assert!(matches!(err, FetchError::Connectivity { attempts: 5, .. }));
    assert_eq!(gets(&server).await, 5);
    assert!(stats.history(HOST).await.is_empty());
}

#[tokio::test]
async fn exhausted_budget_returns_the_last_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    // Any answer to the probe, even a 404, means the network is up.
    let fetcher = AdaptiveRetryFetcher::new(
        Arc::new(InMemoryHostStats::default()),
        fast_policy(&server.uri()),
    );

    let err = fetcher
        .fetch_with_retry(&format!("{}/missing", server.uri()), &FetchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Status { status: 404, .. }));
    assert_eq!(gets(&server).await, 10);
}

#[tokio::test]
async fn flaky_history_widens_the_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let stats = Arc::new(InMemoryHostStats::default().with_history(HOST, vec![2, 9, 4]));
    let fetcher = AdaptiveRetryFetcher::new(stats, fast_policy(&server.uri()));

    assert!(
        fetcher
            .fetch_with_retry(&server.uri(), &FetchOptions::default())
            .await
            .is_err()
    );
    assert_eq!(gets(&server).await, 14);
}

#[tokio::test]
async fn undecodable_body_consumes_an_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([1, 2, 3])))
        .mount(&server)
        .await;

    let stats = Arc::new(InMemoryHostStats::default());
    let fetcher = AdaptiveRetryFetcher::new(stats.clone(), fast_policy(&server.uri()));

    let data = fetcher
        .fetch_with_retry(&server.uri(), &FetchOptions::default())
        .await
        .unwrap();
    assert_eq!(data, json!([1, 2, 3]));
    assert_eq!(stats.history(HOST).await, vec![2]);
}

#[tokio::test]
async fn bad_urls_fail_without_a_request() {
    let fetcher = AdaptiveRetryFetcher::new(
        Arc::new(InMemoryHostStats::default()),
        fast_policy("http://127.0.0.1:1/"),
    );
    assert!(matches!(
        fetcher.fetch_with_retry("not a url", &FetchOptions::default()).await,
        Err(FetchError::InvalidUrl { .. })
    ));
    assert!(matches!(
        fetcher.fetch_with_retry("data:text/plain,hi", &FetchOptions::default()).await,
        Err(FetchError::MissingHost(_))
    ));
}

#[tokio::test]
async fn history_survives_a_restart() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("host_stats.json");
    {
        let stats = Arc::new(JsonFileHostStats::open(file.clone(), 50).await);
        let fetcher = AdaptiveRetryFetcher::new(stats, fast_policy(&server.uri()));
        fetcher
            .fetch_with_retry(&server.uri(), &FetchOptions::default())
            .await
            .unwrap();
    }

    let reopened = JsonFileHostStats::open(file, 50).await;
    assert_eq!(reopened.history(HOST).await, vec![1]);
}

#[tokio::test]
async fn host_fetch_wraps_the_payload() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/summaries"))
        .and(header("x-plugin", "news"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 42})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/article"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body><h1>Captured</h1></body></html>"))
        .mount(&server)
        .await;

    let tabs = Arc::new(SnapshotTabs::new());
    let fetcher = Arc::new(AdaptiveRetryFetcher::new(
        Arc::new(InMemoryHostStats::default()),
        fast_policy(&server.uri()),
    ));
    let router = HostCapabilityRouter::new(
        tabs.clone(),
        fetcher,
        Logger::new(MemoryLogger::new()),
        "platform://index.html",
    );

    let out = router
        .invoke(
            HostTool::HostFetch,
            &json!({
                "url": format!("{}/api/summaries", server.uri()),
                "method": "POST",
                "headers": {"x-plugin": "news"},
                "body": {"text": "long read"}
            }),
        )
        .await
        .unwrap();
    assert_eq!(out, json!({"data": {"id": 42}}));

    tabs.capture(&reqwest::Client::new(), &format!("{}/article", server.uri()))
        .await
        .unwrap();
    let page = router.call("getActivePageContent", vec![json!("h1")]).await.unwrap();
    assert_eq!(page, json!({"html": "<h1>Captured</h1>"}));
}
