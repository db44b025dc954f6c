//! Integration tests for `HttpClient` calls wrapped in a `ResilientTransport`
//!
//! The HTTP server is real (wiremock); the transport runs on a `MockClock`
//! so backoff and `Retry-After` waits advance mock time only.

use std::time::Duration;

use rxflow_common::{CircuitState, FailureKind, MockClock, ResilientTransport};
use rxflow_domain::DependencyConfig;
use rxflow_infra::transport::transport_for;
use rxflow_infra::HttpClient;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn dependency() -> DependencyConfig {
    DependencyConfig {
        max_retries: 3,
        backoff_factor_ms: 1_000,
        max_jitter_ms: 0,
        failure_threshold: 2,
        ..DependencyConfig::default()
    }
}

fn transport(dependency: &DependencyConfig) -> (ResilientTransport<MockClock>, MockClock) {
    let clock = MockClock::new();
    let transport = transport_for("labels", dependency, clock.clone()).expect("transport");
    (transport, clock)
}

fn client() -> HttpClient {
    HttpClient::builder().timeout(Duration::from_secs(5)).build().expect("http client")
}

async fn fetch(
    transport: &ResilientTransport<MockClock>,
    client: &HttpClient,
    url: &str,
) -> Result<Value, FailureKind> {
    transport.execute(|| client.get_json::<Value>(url)).await
}

/// Validates that transient 503s are retried until the dependency recovers.
///
/// Assertions:
/// - Two 503 responses followed by a 200 yields the decoded body
/// - Backoff waits follow the exponential schedule (1s + 2s)
/// - The breaker records a success and stays closed
#[tokio::test]
async fn retries_transient_statuses_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/label/aspirin"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/label/aspirin"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"count": 4})))
        .expect(1)
        .mount(&server)
        .await;

    let (transport, clock) = transport(&dependency());
    let body = fetch(&transport, &client(), &format!("{}/label/aspirin", server.uri()))
        .await
        .expect("eventual success");

    assert_eq!(body["count"], 4);
    assert_eq!(clock.elapsed(), Duration::from_secs(3));
    let stats = transport.stats();
    assert_eq!(stats.breaker.state, CircuitState::Closed);
    assert_eq!(stats.breaker.failure_count, 0);
    assert_eq!(stats.limiter.minute_used, 3);
}

#[tokio::test]
async fn not_found_is_reported_without_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such drug"))
        .expect(1)
        .mount(&server)
        .await;

    let (transport, clock) = transport(&dependency());
    let err = fetch(&transport, &client(), &server.uri()).await.unwrap_err();

    assert!(err.is_not_found(), "{err:?}");
    assert!(err.to_string().contains("no such drug"));
    assert_eq!(clock.elapsed(), Duration::ZERO);
    assert_eq!(transport.breaker().metrics().total_failures, 0);
}

#[tokio::test]
async fn retry_after_header_sets_the_minimum_wait() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "12"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&server)
        .await;

    let (transport, clock) = transport(&dependency());
    fetch(&transport, &client(), &server.uri()).await.expect("success after 429");

    assert_eq!(clock.elapsed(), Duration::from_secs(12));
}

#[tokio::test]
async fn client_errors_fail_fast_and_trip_the_breaker() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad query"))
        .expect(2)
        .mount(&server)
        .await;

    let (transport, _clock) = transport(&dependency());
    let client = client();
    for _ in 0..2 {
        let err = fetch(&transport, &client, &server.uri()).await.unwrap_err();
        assert!(matches!(err, FailureKind::ClientError { status: Some(400), .. }), "{err:?}");
    }

    // Threshold reached: the third call never reaches the server.
    let err = fetch(&transport, &client, &server.uri()).await.unwrap_err();
    assert!(matches!(err, FailureKind::CircuitOpen { .. }), "{err:?}");
    assert_eq!(transport.breaker().state(), CircuitState::Open);
}

#[tokio::test]
async fn cancellation_interrupts_backoff() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&server)
        .await;

    let (transport, _clock) = transport(&dependency());
    let client = client();
    let url = server.uri();
    let cancel = CancellationToken::new();

    // The first attempt fires the token; the 502 then sends the call into
    // backoff, which must end immediately instead of retrying.
    let err = transport
        .execute_cancellable(
            || {
                cancel.cancel();
                client.get_json::<Value>(&url)
            },
            &cancel,
        )
        .await
        .unwrap_err();

    assert_eq!(err, FailureKind::Cancelled);
    assert_eq!(server.received_requests().await.map_or(0, |r| r.len()), 1);
    assert_eq!(transport.breaker().metrics().total_failures, 0);
}
