//! Bounded background worker pool for memory extraction.
//!
//! Batches handed off by the pending buffer go into a bounded queue served by
//! a fixed number of workers. Extraction for one (persona, user) scope is
//! serialized through a per-scope lock so two overlapping batches cannot both
//! add the same fact. Transient failures are retried with exponential
//! backoff; anything else is logged and the batch is dropped.
//!
//! The pool owns its own `CancellationToken`: request cancellation never
//! reaches a batch once it has been accepted.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use mnemo_types::config::ExtractionConfig;
use mnemo_types::error::MemoryError;
use mnemo_types::memory::{MemoryScope, PendingBatch};

use super::buffer::ExtractionSink;
use super::pipeline::ExtractionPipeline;
use super::store::MemoryRepository;

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Retry rules for a failed extraction run.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl RetryPolicy {
    /// `attempt` is 1-based. Only transient errors are retried.
    pub fn should_retry(&self, attempt: u32, error: &MemoryError) -> bool {
        attempt < self.max_attempts && error.is_transient()
    }

    /// Delay after the given failed attempt: base, 2x base, 4x base, ...
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.backoff_base.saturating_mul(2u32.pow(exponent))
    }
}

// ---------------------------------------------------------------------------
// ExtractionWorkerPool
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub workers: usize,
    pub queue_capacity: usize,
    pub retry: RetryPolicy,
}

impl From<&ExtractionConfig> for WorkerSettings {
    fn from(config: &ExtractionConfig) -> Self {
        Self {
            workers: config.workers.max(1),
            queue_capacity: config.queue_capacity.max(1),
            retry: RetryPolicy {
                max_attempts: config.max_attempts.max(1),
                backoff_base: Duration::from_millis(config.backoff_base_ms),
            },
        }
    }
}

pub struct ExtractionWorkerPool {
    sender: mpsc::Sender<PendingBatch>,
    cancel: CancellationToken,
    handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl ExtractionWorkerPool {
    /// Spawn the workers. Must be called inside a Tokio runtime.
    pub fn start<R: MemoryRepository + 'static>(
        pipeline: Arc<ExtractionPipeline<R>>,
        settings: WorkerSettings,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(settings.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let scope_locks = Arc::new(DashMap::new());
        let cancel = CancellationToken::new();

        let handles = (0..settings.workers.max(1))
            .map(|id| {
                let worker = Worker {
                    id,
                    pipeline: pipeline.clone(),
                    receiver: receiver.clone(),
                    scope_locks: scope_locks.clone(),
                    cancel: cancel.clone(),
                    retry: settings.retry.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        tracing::debug!(
            workers = settings.workers,
            queue_capacity = settings.queue_capacity,
            "extraction worker pool started"
        );

        Self {
            sender,
            cancel,
            handles: std::sync::Mutex::new(handles),
        }
    }

    /// Stop accepting batches, finish the queued ones, and join the workers.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let handles = match self.handles.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "extraction worker panicked");
            }
        }
        tracing::debug!("extraction worker pool stopped");
    }
}

impl ExtractionSink for ExtractionWorkerPool {
    fn submit(&self, batch: PendingBatch) -> Result<(), MemoryError> {
        if self.cancel.is_cancelled() {
            return Err(MemoryError::QueueUnavailable(
                "extraction workers are shutting down".to_string(),
            ));
        }
        self.sender.try_send(batch).map_err(|e| match e {
            TrySendError::Full(_) => {
                MemoryError::QueueUnavailable("extraction queue is full".to_string())
            }
            TrySendError::Closed(_) => {
                MemoryError::QueueUnavailable("extraction workers stopped".to_string())
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

struct Worker<R: MemoryRepository> {
    id: usize,
    pipeline: Arc<ExtractionPipeline<R>>,
    receiver: Arc<Mutex<mpsc::Receiver<PendingBatch>>>,
    scope_locks: Arc<DashMap<MemoryScope, Arc<Mutex<()>>>>,
    cancel: CancellationToken,
    retry: RetryPolicy,
}

impl<R: MemoryRepository + 'static> Worker<R> {
    async fn run(self) {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = self.next_batch() => next,
            };
            match next {
                Some(batch) => self.handle(batch).await,
                None => return,
            }
        }

        // Shutdown: accepted batches are still processed.
        self.receiver.lock().await.close();
        while let Some(batch) = self.next_batch().await {
            self.handle(batch).await;
        }
        tracing::trace!(worker = self.id, "extraction worker exited");
    }

    async fn next_batch(&self) -> Option<PendingBatch> {
        self.receiver.lock().await.recv().await
    }

    async fn handle(&self, batch: PendingBatch) {
        let scope = batch.scope();
        let lock = self
            .scope_locks
            .entry(scope.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        {
            let _guard = lock.lock().await;
            self.process_with_retry(&batch).await;
        }
        drop(lock);
        self.scope_locks
            .remove_if(&scope, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn process_with_retry(&self, batch: &PendingBatch) {
        let mut attempt = 1;
        loop {
            match self.pipeline.process(batch).await {
                Ok(_) => return,
                Err(e) if self.retry.should_retry(attempt, &e) && !self.cancel.is_cancelled() => {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(
                        worker = self.id,
                        conversation_id = %batch.conversation_id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "extraction failed, retrying"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            tracing::warn!(
                                conversation_id = %batch.conversation_id,
                                "shutdown during extraction backoff; batch dropped"
                            );
                            return;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!(
                        worker = self.id,
                        conversation_id = %batch.conversation_id,
                        persona_id = %batch.persona_id,
                        user_id = batch.user_id,
                        attempt,
                        error = %e,
                        "extraction failed; batch dropped"
                    );
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::box_provider::BoxLlmProvider;
    use crate::memory::box_embedder::BoxEmbedder;
    use crate::memory::extractor::ExtractionOptions;
    use crate::memory::service::MemoryService;
    use crate::memory::testing::{InMemoryRepository, KeywordEmbedder, ScriptedLlm};
    use mnemo_types::llm::LlmError;

    const ADD_COFFEE: &str =
        r#"{"actions": [{"action": "add", "type": "fact", "content": "likes coffee"}]}"#;

    fn settings(max_attempts: u32) -> WorkerSettings {
        WorkerSettings {
            workers: 2,
            queue_capacity: 8,
            retry: RetryPolicy {
                max_attempts,
                backoff_base: Duration::from_millis(5),
            },
        }
    }

    fn pool(repo: &Arc<InMemoryRepository>, llm: &Arc<ScriptedLlm>, max_attempts: u32) -> ExtractionWorkerPool {
        let service = MemoryService::new(repo.clone())
            .with_embedder(BoxEmbedder::new(Arc::new(KeywordEmbedder::new())));
        let pipeline = ExtractionPipeline::new(
            Arc::new(service),
            Arc::new(BoxLlmProvider::new(llm.clone())),
            ExtractionOptions::default(),
        );
        ExtractionWorkerPool::start(Arc::new(pipeline), settings(max_attempts))
    }

    fn batch(conversation_id: &str) -> PendingBatch {
        let mut batch = PendingBatch::new(conversation_id, &MemoryScope::new("P", 1));
        batch.push_turn("I love coffee", "Great!");
        batch
    }

    async fn wait_for(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(500),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(3), Duration::from_millis(2000));
    }

    #[test]
    fn test_only_transient_errors_retry() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_millis(1),
        };
        let transient = MemoryError::from(LlmError::Overloaded("busy".into()));
        let parse = MemoryError::ExtractionParse("eof".into());
        assert!(policy.should_retry(1, &transient));
        assert!(policy.should_retry(2, &transient));
        assert!(!policy.should_retry(3, &transient));
        assert!(!policy.should_retry(1, &parse));
    }

    #[tokio::test]
    async fn test_submitted_batch_is_processed() {
        let repo = Arc::new(InMemoryRepository::new());
        let llm = Arc::new(ScriptedLlm::new().reply(ADD_COFFEE));
        let pool = pool(&repo, &llm, 3);

        pool.submit(batch("c1")).unwrap();
        pool.shutdown().await;

        let rows = repo.snapshot();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content, "likes coffee");
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let repo = Arc::new(InMemoryRepository::new());
        let llm = Arc::new(
            ScriptedLlm::new()
                .fail(LlmError::RateLimited { retry_after_ms: None })
                .reply(ADD_COFFEE),
        );
        let pool = pool(&repo, &llm, 3);

        pool.submit(batch("c1")).unwrap();
        wait_for(|| repo.snapshot().len() == 1).await;
        pool.shutdown().await;
        assert_eq!(llm.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_parse_failure_is_not_retried() {
        let repo = Arc::new(InMemoryRepository::new());
        let llm = Arc::new(ScriptedLlm::new().reply("not json").reply(ADD_COFFEE));
        let pool = pool(&repo, &llm, 3);

        pool.submit(batch("c1")).unwrap();
        pool.shutdown().await;
        assert_eq!(llm.requests().len(), 1);
        assert!(repo.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_is_rejected() {
        let repo = Arc::new(InMemoryRepository::new());
        let llm = Arc::new(ScriptedLlm::new());
        let pool = pool(&repo, &llm, 1);
        pool.shutdown().await;

        assert!(matches!(
            pool.submit(batch("c1")),
            Err(MemoryError::QueueUnavailable(_))
        ));
    }
}
