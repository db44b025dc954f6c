//! Item pipeline that looks each identifier up over HTTP

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use rxflow_common::{Clock, FailureKind, ResilientTransport, SystemClock};
use rxflow_core::{ItemCancelled, ItemPipeline};
use rxflow_domain::ItemOutcome;
use rxflow_infra::HttpClient;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const PLACEHOLDER: &str = "{id}";

/// GET `<url template with {id}>` for every item through one transport
///
/// Not-found responses become skipped items; every other transport failure
/// is recorded as a failed item with the failure's message. A call cut short
/// by the run's cancellation is abandoned and left pending.
pub struct HttpLookupPipeline<C: Clock = SystemClock> {
    transport: Arc<ResilientTransport<C>>,
    client: HttpClient,
    url_template: String,
}

impl<C: Clock> HttpLookupPipeline<C> {
    pub fn new(
        transport: Arc<ResilientTransport<C>>,
        client: HttpClient,
        url_template: impl Into<String>,
    ) -> Self {
        Self { transport, client, url_template: url_template.into() }
    }

    pub fn url_for(&self, item: &str) -> String {
        self.url_template.replace(PLACEHOLDER, item)
    }
}

#[async_trait]
impl<C: Clock> ItemPipeline<String> for HttpLookupPipeline<C> {
    async fn process(&self, item: &String, cancel: &CancellationToken) -> anyhow::Result<ItemOutcome> {
        let url = self.url_for(item);
        let client = &self.client;
        let result =
            self.transport.execute_cancellable(|| client.get_json::<Value>(&url), cancel).await;

        Ok(match result {
            Ok(body) => ItemOutcome::success(item.clone(), summarize(&body)),
            Err(FailureKind::NotFound { message }) => {
                debug!(item = %item, %message, "item not found");
                ItemOutcome::skipped(item.clone(), "not found")
            }
            Err(FailureKind::Cancelled) => return Err(ItemCancelled.into()),
            Err(failure) => ItemOutcome::failure(item.clone(), failure.to_string()),
        })
    }
}

/// Short description of a lookup response
fn summarize(body: &Value) -> String {
    if let Some(total) = body.pointer("/meta/results/total").and_then(Value::as_u64) {
        return format!("{total} results");
    }
    match body.get("results").and_then(Value::as_array) {
        Some(results) => format!("{} results", results.len()),
        None => "ok".to_string(),
    }
}

/// One identifier per line; blank lines and `#` comments are ignored
pub fn read_items(path: &Path) -> anyhow::Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read items from {}", path.display()))?;
    Ok(contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// Stable batch id for an items file and URL template
pub fn derive_batch_id(items: &Path, url_template: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(items.to_string_lossy().as_bytes());
    hasher.update(b"\n");
    hasher.update(url_template.as_bytes());
    let digest = hasher.finalize();
    format!("batch-{}", hex::encode(&digest.as_bytes()[..8]))
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::time::{Duration, Instant};

    use rxflow_common::MockClock;
    use rxflow_core::{BatchCoordinator, BatchError, InMemoryCheckpointRepository};
    use rxflow_domain::{DependencyConfig, OutcomeKind};
    use rxflow_infra::transport::transport_for;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn pipeline(template: String) -> HttpLookupPipeline<MockClock> {
        let dependency =
            DependencyConfig { max_retries: 1, max_jitter_ms: 0, ..DependencyConfig::default() };
        let transport = transport_for("labels", &dependency, MockClock::new()).unwrap();
        HttpLookupPipeline::new(Arc::new(transport), HttpClient::new().unwrap(), template)
    }

    #[tokio::test]
    async fn maps_responses_to_outcomes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/label.json"))
            .and(query_param("search", "aspirin"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"meta": {"results": {"total": 12}}})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/label.json"))
            .and(query_param("search", "unobtainium"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/label.json"))
            .and(query_param("search", "broken"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let pipeline = pipeline(format!("{}/label.json?search={{id}}", server.uri()));

        let cancel = CancellationToken::new();
        let found = pipeline.process(&"aspirin".to_string(), &cancel).await.unwrap();
        assert_eq!(found.kind, OutcomeKind::Success("12 results".into()));

        let missing = pipeline.process(&"unobtainium".to_string(), &cancel).await.unwrap();
        assert_eq!(missing.kind, OutcomeKind::Skipped("not found".into()));

        let failed = pipeline.process(&"broken".to_string(), &cancel).await.unwrap();
        match failed.kind {
            OutcomeKind::Failure(reason) => {
                assert!(reason.contains("server error (status 500) after 2 attempt(s)"), "{reason}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    /// Validates Ctrl-C stops a lookup stuck in retry backoff.
    ///
    /// Assertions:
    /// - The batch is interrupted well before the first backoff ends.
    /// - The item is not recorded as failed and stays pending.
    #[tokio::test]
    async fn cancellation_abandons_retrying_item() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dependency = DependencyConfig {
            max_retries: 3,
            backoff_factor_ms: 2_000,
            max_jitter_ms: 0,
            ..DependencyConfig::default()
        };
        let transport = transport_for("labels", &dependency, SystemClock).unwrap();
        let pipeline = Arc::new(HttpLookupPipeline::new(
            Arc::new(transport),
            HttpClient::new().unwrap(),
            format!("{}/drugs/{{id}}", server.uri()),
        ));
        let repository = Arc::new(InMemoryCheckpointRepository::new());
        let coordinator = BatchCoordinator::new(repository.clone(), "cancel-test", "test");

        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            canceller.cancel();
        });

        let started = Instant::now();
        let err = coordinator.run(&["a".to_string()], pipeline.as_ref(), &cancel).await.unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(1), "took {:?}", started.elapsed());
        assert!(matches!(err, BatchError::Interrupted(_)));
        let record = repository.get("cancel-test").unwrap();
        assert!(record.processed.is_empty());
        assert!(record.failed.is_empty());
    }

    #[test]
    fn summarize_prefers_meta_total() {
        assert_eq!(summarize(&serde_json::json!({"results": [1, 2, 3]})), "3 results");
        assert_eq!(summarize(&serde_json::json!({"name": "x"})), "ok");
    }

    #[test]
    fn read_items_skips_blanks_and_comments() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# nightly list\naspirin\n\n  ibuprofen  \n#warfarin").unwrap();

        assert_eq!(read_items(file.path()).unwrap(), vec!["aspirin", "ibuprofen"]);
    }

    #[test]
    fn batch_id_is_stable_and_valid() {
        let a = derive_batch_id(Path::new("drugs.txt"), "http://x/{id}");
        let b = derive_batch_id(Path::new("drugs.txt"), "http://x/{id}");
        let c = derive_batch_id(Path::new("other.txt"), "http://x/{id}");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), "batch-".len() + 16);
        assert!(rxflow_domain::validate_batch_id(&a).is_ok());
    }
}
