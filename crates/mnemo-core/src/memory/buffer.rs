//! Per-conversation accumulation of chat turns.
//!
//! `PendingBuffer::accumulate` appends a turn pair to the conversation's
//! cached batch with an optimistic compare-and-set loop. When the batch
//! reaches the extraction threshold it is claimed (conditional delete on the
//! version that was read), handed to an [`ExtractionSink`], and restored to
//! the cache if the sink refuses it, so a full queue never drops turns.

use std::sync::Arc;
use std::time::Duration;

use mnemo_types::config::BufferConfig;
use mnemo_types::error::{MemoryError, RepositoryError};
use mnemo_types::memory::{MemoryScope, PendingBatch};

use super::cache::PendingCache;

/// Upper bound on compare-and-set retries for one accumulate call.
const MAX_CAS_ATTEMPTS: usize = 16;

/// Receiver of batches that reached the extraction threshold.
///
/// `submit` must not block: it either accepts the batch for background
/// processing or rejects it immediately.
pub trait ExtractionSink: Send + Sync {
    fn submit(&self, batch: PendingBatch) -> Result<(), MemoryError>;
}

/// What happened to the conversation's batch after an accumulate call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulateOutcome {
    /// Turn stored; threshold not reached yet.
    Buffered { round_count: u32 },
    /// Threshold reached; batch handed off and the buffer cleared.
    HandedOff { round_count: u32 },
    /// Threshold reached but the sink refused the batch; it was put back.
    Deferred { round_count: u32 },
    /// Extraction is not configured; nothing was buffered.
    Disabled,
}

/// Buffer tuning derived from `[buffer]` configuration.
#[derive(Debug, Clone)]
pub struct BufferSettings {
    pub threshold: u32,
    pub retention: Duration,
    pub key_prefix: String,
}

impl From<&BufferConfig> for BufferSettings {
    fn from(config: &BufferConfig) -> Self {
        Self {
            threshold: config.extract_threshold.max(1),
            retention: Duration::from_secs(config.retention_secs),
            key_prefix: config.key_prefix.clone(),
        }
    }
}

/// Cache-backed accumulator of recent chat turns per conversation.
pub struct PendingBuffer<C: PendingCache> {
    cache: Arc<C>,
    sink: Arc<dyn ExtractionSink>,
    settings: BufferSettings,
}

impl<C: PendingCache> PendingBuffer<C> {
    pub fn new(cache: Arc<C>, sink: Arc<dyn ExtractionSink>, settings: BufferSettings) -> Self {
        Self {
            cache,
            sink,
            settings,
        }
    }

    pub fn threshold(&self) -> u32 {
        self.settings.threshold
    }

    fn cache_key(&self, conversation_id: &str) -> String {
        format!("{}{}", self.settings.key_prefix, conversation_id)
    }

    /// Append one turn pair to the conversation's batch.
    #[tracing::instrument(
        name = "accumulate_turn",
        skip(self, scope, user_message, assistant_message),
        fields(persona_id = %scope.persona_id, user_id = scope.user_id)
    )]
    pub async fn accumulate(
        &self,
        conversation_id: &str,
        scope: &MemoryScope,
        user_message: &str,
        assistant_message: &str,
    ) -> Result<AccumulateOutcome, MemoryError> {
        if conversation_id.trim().is_empty() {
            return Err(MemoryError::InvalidInput(
                "conversation id must not be empty".to_string(),
            ));
        }

        let key = self.cache_key(conversation_id);

        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self.cache.get(&key).await?;
            let (mut batch, version) = match current {
                Some(entry) => (entry.batch, Some(entry.version)),
                None => (PendingBatch::new(conversation_id, scope), None),
            };
            batch.push_turn(user_message, assistant_message);
            let round_count = batch.round_count;

            if round_count < self.settings.threshold {
                let written = self
                    .cache
                    .compare_and_set(&key, &batch, version, self.settings.retention)
                    .await?;
                if written.is_some() {
                    tracing::debug!(round_count, "turn buffered");
                    return Ok(AccumulateOutcome::Buffered { round_count });
                }
                continue;
            }

            // Claim the stored batch so a concurrent caller cannot hand it off too.
            if let Some(version) = version {
                if !self.cache.remove_if_version(&key, version).await? {
                    continue;
                }
            }

            return match self.sink.submit(batch.clone()) {
                Ok(()) => {
                    tracing::info!(round_count, "extraction threshold reached, batch handed off");
                    Ok(AccumulateOutcome::HandedOff { round_count })
                }
                Err(e) => {
                    tracing::warn!(error = %e, round_count, "extraction sink rejected batch, restoring");
                    let round_count = self.restore(&key, batch).await?;
                    Ok(AccumulateOutcome::Deferred { round_count })
                }
            };
        }

        Err(RepositoryError::Conflict(format!(
            "pending batch for conversation '{conversation_id}' kept changing"
        ))
        .into())
    }

    /// Put a rejected batch back, ahead of any turns written since the claim.
    async fn restore(&self, key: &str, rejected: PendingBatch) -> Result<u32, MemoryError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let (merged, expected) = match self.cache.get(key).await? {
                Some(current) => {
                    let mut merged = rejected.clone();
                    merged.round_count += current.batch.round_count;
                    merged.turns.extend(current.batch.turns);
                    (merged, Some(current.version))
                }
                None => (rejected.clone(), None),
            };
            if self
                .cache
                .compare_and_set(key, &merged, expected, self.settings.retention)
                .await?
                .is_some()
            {
                return Ok(merged.round_count);
            }
        }
        Err(RepositoryError::Conflict(format!("could not restore pending batch '{key}'")).into())
    }

    /// Current batch for a conversation, if any.
    pub async fn peek(&self, conversation_id: &str) -> Result<Option<PendingBatch>, MemoryError> {
        let key = self.cache_key(conversation_id);
        Ok(self.cache.get(&key).await?.map(|entry| entry.batch))
    }

    /// Drop expired batches from the cache.
    pub async fn purge_expired(&self) -> Result<u64, MemoryError> {
        Ok(self.cache.purge_expired().await?)
    }
}
