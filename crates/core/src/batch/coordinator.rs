//! Batch coordinator: drives items through a pipeline with checkpointing
//!
//! Items already present in the checkpoint are skipped without invoking the
//! pipeline. Every other item is attempted exactly once per run and its
//! outcome is persisted before the next outcome is recorded.

use std::any::Any;
use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use rxflow_common::resilience::{Clock, SystemClock};
use rxflow_domain::{BatchResult, BatchStatus, ItemOutcome};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use super::checkpoint::CheckpointStore;
use super::error::{BatchError, ItemCancelled};
use super::ports::{CheckpointRepository, ItemPipeline, WorkItem};

/// Runs one batch, resuming from its checkpoint when one exists
pub struct BatchCoordinator {
    repository: Arc<dyn CheckpointRepository>,
    clock: Arc<dyn Clock>,
    batch_id: String,
    source: String,
}

impl BatchCoordinator {
    /// Create a coordinator for `batch_id`
    ///
    /// `source` is an opaque description stored in the checkpoint (a file
    /// path, a query).
    pub fn new(
        repository: Arc<dyn CheckpointRepository>,
        batch_id: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            repository,
            clock: Arc::new(SystemClock),
            batch_id: batch_id.into(),
            source: source.into(),
        }
    }

    /// Use `clock` for checkpoint timestamps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    /// Process `items` one at a time in input order
    ///
    /// Cancellation is checked before each pending item and handed to the
    /// pipeline. When it fires the checkpoint is flushed as `interrupted` and
    /// the partial result comes back as [`BatchError::Interrupted`]; an item
    /// the pipeline abandoned with [`ItemCancelled`] is not recorded.
    #[instrument(skip_all, fields(batch_id = %self.batch_id))]
    pub async fn run<I, P>(
        &self,
        items: &[I],
        pipeline: &P,
        cancel: &CancellationToken,
    ) -> Result<BatchResult, BatchError>
    where
        I: WorkItem,
        P: ItemPipeline<I> + ?Sized,
    {
        let mut store = self.open(distinct_count(items)).await?;
        if store.status() == BatchStatus::Completed {
            return Ok(store.summary());
        }
        info!(resumed = store.processed_count(), "batch run starting");

        let mut seen = HashSet::new();
        for item in items {
            let item_id = item.item_id();
            if !seen.insert(item_id.clone()) || store.is_processed(&item_id) {
                continue;
            }
            if cancel.is_cancelled() {
                return Err(interrupt(store).await);
            }
            let Some(outcome) = process_item(pipeline, item, &item_id, cancel).await else {
                return Err(interrupt(store).await);
            };
            store.record(outcome).await?;
        }

        finish(store).await
    }

    /// Process `items` with up to `workers` concurrent tasks
    ///
    /// Workers pull from one shared queue and send outcomes to a single
    /// writer that owns the checkpoint. Once `cancel` fires no new item is
    /// started; items already in flight finish and are recorded unless their
    /// pipeline abandons them, in which case they go back on the queue.
    #[instrument(skip_all, fields(batch_id = %self.batch_id, workers = workers))]
    pub async fn run_concurrent<I, P>(
        &self,
        items: Vec<I>,
        pipeline: Arc<P>,
        workers: usize,
        cancel: &CancellationToken,
    ) -> Result<BatchResult, BatchError>
    where
        I: WorkItem + 'static,
        P: ItemPipeline<I> + ?Sized + 'static,
    {
        let mut store = self.open(distinct_count(&items)).await?;
        if store.status() == BatchStatus::Completed {
            return Ok(store.summary());
        }

        let mut seen = HashSet::new();
        let pending: VecDeque<(String, I)> = items
            .into_iter()
            .filter_map(|item| {
                let item_id = item.item_id();
                (seen.insert(item_id.clone()) && !store.is_processed(&item_id))
                    .then_some((item_id, item))
            })
            .collect();
        let workers = workers.clamp(1, pending.len().max(1));
        info!(resumed = store.processed_count(), pending = pending.len(), workers, "batch run starting");

        let queue = Arc::new(Mutex::new(pending));
        // Stops workers on cancellation or when the writer gives up
        let stop = cancel.child_token();
        let (tx, mut rx) = mpsc::channel::<ItemOutcome>(workers * 2);

        let mut tasks = JoinSet::new();
        for _ in 0..workers {
            let queue = Arc::clone(&queue);
            let pipeline = Arc::clone(&pipeline);
            let stop = stop.clone();
            let tx = tx.clone();
            tasks.spawn(async move {
                loop {
                    if stop.is_cancelled() {
                        break;
                    }
                    let Some((item_id, item)) = queue.lock().pop_front() else {
                        break;
                    };
                    let Some(outcome) = process_item(pipeline.as_ref(), &item, &item_id, &stop).await
                    else {
                        queue.lock().push_front((item_id, item));
                        stop.cancel();
                        break;
                    };
                    if tx.send(outcome).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(tx);

        let mut persist_error = None;
        while let Some(outcome) = rx.recv().await {
            if let Err(err) = store.record(outcome).await {
                error!(error = %err, "failed to persist checkpoint, stopping workers");
                persist_error = Some(err);
                stop.cancel();
                break;
            }
        }
        drop(rx);

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "batch worker task failed");
            }
        }

        if let Some(err) = persist_error {
            return Err(BatchError::Persistence(err));
        }
        let remaining = queue.lock().len();
        if remaining > 0 {
            return Err(interrupt(store).await);
        }
        finish(store).await
    }

    async fn open(&self, total: usize) -> Result<CheckpointStore, BatchError> {
        let store = CheckpointStore::open_with_clock(
            Arc::clone(&self.repository),
            &self.batch_id,
            &self.source,
            total,
            Arc::clone(&self.clock),
        )
        .await?;
        Ok(store)
    }
}

async fn finish(mut store: CheckpointStore) -> Result<BatchResult, BatchError> {
    store.mark_completed().await?;
    let result = store.summary();
    info!(
        successful = result.successful,
        failed = result.failed,
        skipped = result.skipped,
        "batch completed"
    );
    Ok(result)
}

/// Flush the checkpoint as interrupted and build the error to return
async fn interrupt(mut store: CheckpointStore) -> BatchError {
    if let Err(err) = store.mark_interrupted().await {
        return BatchError::Persistence(err);
    }
    let result = store.summary();
    warn!(processed = result.processed(), total = result.total, "batch interrupted");
    BatchError::Interrupted(result)
}

fn distinct_count<I: WorkItem>(items: &[I]) -> usize {
    items.iter().map(WorkItem::item_id).collect::<HashSet<_>>().len()
}

/// Run the pipeline on one item; errors and panics become failures
///
/// Returns `None` when the pipeline abandoned the item after cancellation.
async fn process_item<I, P>(
    pipeline: &P,
    item: &I,
    item_id: &str,
    cancel: &CancellationToken,
) -> Option<ItemOutcome>
where
    I: WorkItem,
    P: ItemPipeline<I> + ?Sized,
{
    let outcome = match AssertUnwindSafe(pipeline.process(item, cancel)).catch_unwind().await {
        Ok(Ok(mut outcome)) => {
            if outcome.item_id != item_id {
                warn!(item_id, reported = %outcome.item_id, "pipeline reported a different item id");
                outcome.item_id = item_id.to_string();
            }
            outcome
        }
        Ok(Err(err)) if err.chain().any(|cause| cause.is::<ItemCancelled>()) => {
            info!(item_id, "item abandoned after cancellation, left pending");
            return None;
        }
        Ok(Err(err)) => {
            warn!(item_id, error = %err, "item failed");
            ItemOutcome::failure(item_id, format!("{err:#}"))
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(item_id, panic = %message, "item pipeline panicked");
            ItemOutcome::failure(item_id, format!("pipeline panicked: {message}"))
        }
    };
    Some(outcome)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use rxflow_domain::{CheckpointRecord, RxflowError};

    use super::*;
    use crate::batch::memory::InMemoryCheckpointRepository;

    /// Pipeline that records invocations and misbehaves on request
    #[derive(Default)]
    struct ScriptedPipeline {
        calls: Mutex<Vec<String>>,
        fail: HashSet<String>,
        panic_on: HashSet<String>,
        not_found: HashSet<String>,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    impl ScriptedPipeline {
        fn failing(ids: &[&str]) -> Self {
            Self { fail: ids.iter().map(|s| s.to_string()).collect(), ..Self::default() }
        }

        fn cancelling_after(n: usize, token: CancellationToken) -> Self {
            Self { cancel_after: Some((n, token)), ..Self::default() }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().clone()
        }
    }

    #[async_trait]
    impl ItemPipeline<String> for ScriptedPipeline {
        async fn process(
            &self,
            item: &String,
            _cancel: &CancellationToken,
        ) -> anyhow::Result<ItemOutcome> {
            let count = {
                let mut calls = self.calls.lock();
                calls.push(item.clone());
                calls.len()
            };
            if let Some((n, token)) = &self.cancel_after {
                if count == *n {
                    token.cancel();
                }
            }
            if self.panic_on.contains(item) {
                panic!("bad input {item}");
            }
            if self.fail.contains(item) {
                anyhow::bail!("lookup failed for {item}");
            }
            if self.not_found.contains(item) {
                return Ok(ItemOutcome::skipped(item.as_str(), "not found"));
            }
            Ok(ItemOutcome::success(item.as_str(), format!("processed {item}")))
        }
    }

    /// Pipeline that succeeds on the first item, then waits on every later
    /// item until the run is cancelled, like a transport stuck in backoff
    #[derive(Default)]
    struct StallingPipeline {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ItemPipeline<String> for StallingPipeline {
        async fn process(
            &self,
            item: &String,
            cancel: &CancellationToken,
        ) -> anyhow::Result<ItemOutcome> {
            let count = {
                let mut calls = self.calls.lock();
                calls.push(item.clone());
                calls.len()
            };
            if count > 1 {
                tokio::select! {
                    () = cancel.cancelled() => return Err(ItemCancelled.into()),
                    () = tokio::time::sleep(Duration::from_secs(3600)) => {}
                }
            }
            Ok(ItemOutcome::success(item.as_str(), "done"))
        }
    }

    fn cancel_after(delay: Duration) -> CancellationToken {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            canceller.cancel();
        });
        token
    }

    fn items(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("item-{i}")).collect()
    }

    fn coordinator(repo: &Arc<InMemoryCheckpointRepository>) -> BatchCoordinator {
        BatchCoordinator::new(repo.clone(), "batch-1", "unit-test")
    }

    #[tokio::test]
    async fn test_run_processes_all_items_in_order() {
        let repo = Arc::new(InMemoryCheckpointRepository::new());
        let pipeline = ScriptedPipeline::default();

        let result = coordinator(&repo)
            .run(&items(3), &pipeline, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.status, BatchStatus::Completed);
        assert_eq!(result.successful, 3);
        assert_eq!(pipeline.calls(), items(3));
        let saved = repo.get("batch-1").unwrap();
        assert_eq!(saved.processed, items(3));
        assert!(saved.completed_at.is_some());
    }

    /// Validates a failing item is recorded and the run continues.
    ///
    /// Assertions:
    /// - Item 4 of 10 fails; the other 9 succeed.
    /// - The run completes and reports the failure reason.
    #[tokio::test]
    async fn test_failing_item_does_not_abort_run() {
        let repo = Arc::new(InMemoryCheckpointRepository::new());
        let pipeline = ScriptedPipeline::failing(&["item-4"]);

        let result = coordinator(&repo)
            .run(&items(10), &pipeline, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.status, BatchStatus::Completed);
        assert_eq!(result.successful + result.skipped, 9);
        assert_eq!(result.failed, 1);
        assert_eq!(result.errors[0].item_id, "item-4");
        assert!(result.errors[0].reason.contains("lookup failed for item-4"));
        assert_eq!(pipeline.calls().len(), 10);
    }

    #[tokio::test]
    async fn test_panicking_item_becomes_failure() {
        let repo = Arc::new(InMemoryCheckpointRepository::new());
        let pipeline = ScriptedPipeline {
            panic_on: ["item-2".to_string()].into_iter().collect(),
            ..ScriptedPipeline::default()
        };

        let result = coordinator(&repo)
            .run(&items(3), &pipeline, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.successful, 2);
        assert_eq!(result.errors[0].reason, "pipeline panicked: bad input item-2");
    }

    #[tokio::test]
    async fn test_skipped_items_are_counted_separately() {
        let repo = Arc::new(InMemoryCheckpointRepository::new());
        let pipeline = ScriptedPipeline {
            not_found: ["item-1".to_string()].into_iter().collect(),
            ..ScriptedPipeline::default()
        };

        let result = coordinator(&repo)
            .run(&items(2), &pipeline, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.skipped, 1);
        assert_eq!(result.successful, 1);
        let saved = repo.get("batch-1").unwrap();
        assert_eq!(saved.skipped[0].reason, "not found");
    }

    /// Validates resumption never re-invokes the pipeline for recorded items.
    ///
    /// Assertions:
    /// - A checkpoint with 7 of 10 processed resumes at item 8.
    /// - Final counts cover all 10 items.
    #[tokio::test]
    async fn test_resume_continues_after_recorded_items() {
        let repo = Arc::new(InMemoryCheckpointRepository::new());
        let token = CancellationToken::new();
        let first = ScriptedPipeline::cancelling_after(7, token.clone());
        let err = coordinator(&repo).run(&items(10), &first, &token).await.unwrap_err();
        assert!(matches!(err, BatchError::Interrupted(ref r) if r.processed() == 7));

        let second = ScriptedPipeline::default();
        let result = coordinator(&repo)
            .run(&items(10), &second, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(second.calls(), vec!["item-8", "item-9", "item-10"]);
        assert_eq!(result.status, BatchStatus::Completed);
        assert_eq!(result.successful, 10);
    }

    #[tokio::test]
    async fn test_interrupt_persists_exactly_attempted_items() {
        let repo = Arc::new(InMemoryCheckpointRepository::new());
        let token = CancellationToken::new();
        let pipeline = ScriptedPipeline::cancelling_after(3, token.clone());

        let err = coordinator(&repo).run(&items(10), &pipeline, &token).await.unwrap_err();

        let saved = repo.get("batch-1").unwrap();
        assert_eq!(saved.status, BatchStatus::Interrupted);
        assert_eq!(saved.processed.len(), pipeline.calls().len());
        assert_eq!(saved.processed.len(), 3);
        assert_eq!(err.partial_result().unwrap().status, BatchStatus::Interrupted);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_attempts_nothing() {
        let repo = Arc::new(InMemoryCheckpointRepository::new());
        let token = CancellationToken::new();
        token.cancel();
        let pipeline = ScriptedPipeline::default();

        let err = coordinator(&repo).run(&items(2), &pipeline, &token).await.unwrap_err();

        assert!(matches!(err, BatchError::Interrupted(_)));
        assert!(pipeline.calls().is_empty());
        assert!(repo.get("batch-1").unwrap().processed.is_empty());
    }

    /// Validates an item abandoned mid-call stays pending for resume.
    ///
    /// Assertions:
    /// - The run stops as soon as the token fires, not after the item's wait.
    /// - Only the finished item is in the checkpoint; nothing is failed.
    /// - Resuming attempts the abandoned item again.
    #[tokio::test(start_paused = true)]
    async fn test_cancelled_item_is_left_pending() {
        let repo = Arc::new(InMemoryCheckpointRepository::new());
        let pipeline = StallingPipeline::default();
        let token = cancel_after(Duration::from_millis(100));
        let started = tokio::time::Instant::now();

        let err = coordinator(&repo).run(&items(3), &pipeline, &token).await.unwrap_err();

        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(matches!(err, BatchError::Interrupted(ref r) if r.processed() == 1));
        let saved = repo.get("batch-1").unwrap();
        assert_eq!(saved.status, BatchStatus::Interrupted);
        assert_eq!(saved.processed, vec!["item-1"]);
        assert!(saved.failed.is_empty());

        let resumed = ScriptedPipeline::default();
        let result = coordinator(&repo)
            .run(&items(3), &resumed, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(resumed.calls(), vec!["item-2", "item-3"]);
        assert_eq!(result.successful, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_concurrent_requeues_abandoned_items() {
        let repo = Arc::new(InMemoryCheckpointRepository::new());
        let pipeline = Arc::new(StallingPipeline::default());
        let token = cancel_after(Duration::from_millis(100));

        let err = coordinator(&repo)
            .run_concurrent(items(6), Arc::clone(&pipeline), 2, &token)
            .await
            .unwrap_err();

        assert!(matches!(err, BatchError::Interrupted(_)));
        let saved = repo.get("batch-1").unwrap();
        assert_eq!(saved.processed, vec!["item-1"]);
        assert!(saved.failed.is_empty());

        let resumed = Arc::new(ScriptedPipeline::default());
        let result = coordinator(&repo)
            .run_concurrent(items(6), Arc::clone(&resumed), 2, &CancellationToken::new())
            .await
            .unwrap();
        let mut calls = resumed.calls();
        calls.sort();
        assert_eq!(calls, vec!["item-2", "item-3", "item-4", "item-5", "item-6"]);
        assert_eq!(result.successful, 6);
    }

    #[tokio::test]
    async fn test_duplicate_ids_attempted_once() {
        let repo = Arc::new(InMemoryCheckpointRepository::new());
        let pipeline = ScriptedPipeline::default();
        let input: Vec<String> = ["a", "b", "a", "c", "b"].iter().map(|s| s.to_string()).collect();

        let result = coordinator(&repo).run(&input, &pipeline, &CancellationToken::new()).await.unwrap();

        assert_eq!(pipeline.calls(), vec!["a", "b", "c"]);
        assert_eq!(result.total, 3);
        assert_eq!(result.successful, 3);
    }

    #[tokio::test]
    async fn test_completed_batch_is_not_rerun() {
        let repo = Arc::new(InMemoryCheckpointRepository::new());
        coordinator(&repo)
            .run(&items(2), &ScriptedPipeline::default(), &CancellationToken::new())
            .await
            .unwrap();

        let pipeline = ScriptedPipeline::default();
        let result = coordinator(&repo).run(&items(2), &pipeline, &CancellationToken::new()).await.unwrap();

        assert!(pipeline.calls().is_empty());
        assert_eq!(result.status, BatchStatus::Completed);
        assert_eq!(result.successful, 2);
    }

    #[tokio::test]
    async fn test_pipeline_outcome_id_is_normalised() {
        struct WrongId;

        #[async_trait]
        impl ItemPipeline<String> for WrongId {
            async fn process(
                &self,
                _item: &String,
                _cancel: &CancellationToken,
            ) -> anyhow::Result<ItemOutcome> {
                Ok(ItemOutcome::success("other", "done"))
            }
        }

        let repo = Arc::new(InMemoryCheckpointRepository::new());
        coordinator(&repo).run(&items(1), &WrongId, &CancellationToken::new()).await.unwrap();
        assert_eq!(repo.get("batch-1").unwrap().processed, vec!["item-1"]);
    }

    #[tokio::test]
    async fn test_run_concurrent_processes_every_item_once() {
        let repo = Arc::new(InMemoryCheckpointRepository::new());
        let pipeline = Arc::new(ScriptedPipeline::failing(&["item-5"]));

        let result = coordinator(&repo)
            .run_concurrent(items(20), Arc::clone(&pipeline), 4, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.status, BatchStatus::Completed);
        assert_eq!(result.successful, 19);
        assert_eq!(result.failed, 1);
        let mut calls = pipeline.calls();
        calls.sort();
        calls.dedup();
        assert_eq!(calls.len(), 20);
        assert_eq!(repo.get("batch-1").unwrap().processed.len(), 20);
    }

    #[tokio::test]
    async fn test_run_concurrent_interrupt_records_in_flight_items() {
        let repo = Arc::new(InMemoryCheckpointRepository::new());
        let token = CancellationToken::new();
        let pipeline = Arc::new(ScriptedPipeline::cancelling_after(5, token.clone()));

        let err = coordinator(&repo)
            .run_concurrent(items(50), Arc::clone(&pipeline), 3, &token)
            .await
            .unwrap_err();

        let saved = repo.get("batch-1").unwrap();
        assert!(matches!(err, BatchError::Interrupted(_)));
        assert_eq!(saved.status, BatchStatus::Interrupted);
        assert_eq!(saved.processed.len(), pipeline.calls().len());
        assert!(saved.processed.len() < 50);

        let resumed = Arc::new(ScriptedPipeline::default());
        let result = coordinator(&repo)
            .run_concurrent(items(50), Arc::clone(&resumed), 3, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.processed(), 50);
        assert_eq!(resumed.calls().len() + pipeline.calls().len(), 50);
    }

    #[tokio::test]
    async fn test_persistence_failure_surfaces() {
        struct BrokenRepository {
            inner: InMemoryCheckpointRepository,
            allowed_saves: usize,
            saves: AtomicUsize,
        }

        #[async_trait]
        impl CheckpointRepository for BrokenRepository {
            async fn load(&self, batch_id: &str) -> rxflow_domain::Result<Option<CheckpointRecord>> {
                self.inner.load(batch_id).await
            }

            async fn save(&self, record: &CheckpointRecord) -> rxflow_domain::Result<()> {
                if self.saves.fetch_add(1, Ordering::SeqCst) >= self.allowed_saves {
                    return Err(RxflowError::Storage("disk full".into()));
                }
                self.inner.save(record).await
            }

            async fn list(&self) -> rxflow_domain::Result<Vec<CheckpointRecord>> {
                self.inner.list().await
            }

            async fn delete(&self, batch_id: &str) -> rxflow_domain::Result<bool> {
                self.inner.delete(batch_id).await
            }
        }

        let repo = Arc::new(BrokenRepository {
            inner: InMemoryCheckpointRepository::new(),
            allowed_saves: 2,
            saves: AtomicUsize::new(0),
        });
        let pipeline = ScriptedPipeline::default();
        let err = BatchCoordinator::new(repo.clone(), "batch-1", "s")
            .run(&items(5), &pipeline, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, BatchError::Persistence(RxflowError::Storage(_))));
        assert_eq!(pipeline.calls().len(), 2);
        assert_eq!(repo.inner.get("batch-1").unwrap().processed, vec!["item-1"]);
    }
}
