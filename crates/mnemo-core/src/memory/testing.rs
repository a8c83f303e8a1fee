//! In-memory fakes for the memory ports, shared by unit tests in this crate.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;

use mnemo_types::error::{EmbeddingError, MemoryError, RepositoryError, VectorIndexError};
use mnemo_types::llm::{CompletionRequest, CompletionResponse, LlmError, Usage};
use mnemo_types::memory::{
    Memory, MemoryScope, MemorySource, MemoryStatus, MemoryType, PendingBatch,
};

use super::buffer::ExtractionSink;
use super::cache::{PendingCache, VersionedBatch};
use super::embedder::Embedder;
use super::similarity::cosine_similarity;
use super::store::MemoryRepository;
use super::vector::VectorIndex;
use crate::llm::provider::LlmProvider;

/// Build an active memory created `age_secs` ago.
pub fn memory_aged(scope: &MemoryScope, content: &str, age_secs: i64) -> Memory {
    let mut memory = Memory::new(scope, MemoryType::Fact, content, None, MemorySource::Auto);
    memory.created_at = Utc::now() - chrono::Duration::seconds(age_secs);
    memory.updated_at = memory.created_at;
    memory
}

/// Sleep for `delay_ms` milliseconds when set. Tests run with paused time.
async fn simulate_latency(delay_ms: &AtomicU64) {
    let ms = delay_ms.load(Ordering::SeqCst);
    if ms > 0 {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

fn newest_first(rows: &mut [Memory]) {
    rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
}

// ---------------------------------------------------------------------------
// Repository
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryRepository {
    rows: Mutex<Vec<Memory>>,
    pub fail_create: AtomicBool,
    pub fail_status_update: AtomicBool,
    pub fail_reads: AtomicBool,
    /// Latency added to scope reads.
    pub read_delay_ms: AtomicU64,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, memory: Memory) {
        self.rows.lock().unwrap().push(memory);
    }

    pub fn find(&self, id: &str) -> Option<Memory> {
        self.rows.lock().unwrap().iter().find(|m| m.id == id).cloned()
    }

    pub fn snapshot(&self) -> Vec<Memory> {
        self.rows.lock().unwrap().clone()
    }

    fn check_reads(&self) -> Result<(), RepositoryError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(RepositoryError::Connection);
        }
        Ok(())
    }

    fn modify(&self, id: &str, f: impl FnOnce(&mut Memory)) -> Result<(), RepositoryError> {
        let mut rows = self.rows.lock().unwrap();
        let row = rows
            .iter_mut()
            .find(|m| m.id == id && !m.is_deleted)
            .ok_or(RepositoryError::NotFound)?;
        f(row);
        Ok(())
    }
}

impl MemoryRepository for InMemoryRepository {
    async fn create(&self, memory: &Memory) -> Result<(), RepositoryError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(RepositoryError::Query("insert failed".to_string()));
        }
        self.insert(memory.clone());
        Ok(())
    }

    async fn batch_create(&self, memories: &[Memory]) -> Result<(), RepositoryError> {
        for memory in memories {
            self.create(memory).await?;
        }
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Memory>, RepositoryError> {
        self.check_reads()?;
        Ok(self.find(id).filter(|m| !m.is_deleted))
    }

    async fn get_active_by_scope(&self, scope: &MemoryScope) -> Result<Vec<Memory>, RepositoryError> {
        simulate_latency(&self.read_delay_ms).await;
        self.check_reads()?;
        let mut rows: Vec<Memory> = self
            .snapshot()
            .into_iter()
            .filter(|m| m.belongs_to(scope) && m.is_active())
            .collect();
        newest_first(&mut rows);
        Ok(rows)
    }

    async fn get_all_by_scope(&self, scope: &MemoryScope) -> Result<Vec<Memory>, RepositoryError> {
        self.check_reads()?;
        let mut rows: Vec<Memory> = self
            .snapshot()
            .into_iter()
            .filter(|m| m.belongs_to(scope) && !m.is_deleted)
            .collect();
        newest_first(&mut rows);
        Ok(rows)
    }

    async fn get_active_by_ids(
        &self,
        scope: &MemoryScope,
        ids: &[String],
    ) -> Result<Vec<Memory>, RepositoryError> {
        self.check_reads()?;
        // Deliberately id-ordered, not in the order the ids were given.
        let mut rows: Vec<Memory> = self
            .snapshot()
            .into_iter()
            .filter(|m| ids.contains(&m.id) && m.belongs_to(scope) && m.is_active())
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rows)
    }

    async fn update(&self, memory: &Memory) -> Result<(), RepositoryError> {
        let updated = memory.clone();
        self.modify(&memory.id, move |row| *row = updated)
    }

    async fn update_status(
        &self,
        id: &str,
        status: MemoryStatus,
        superseded_by: Option<&str>,
    ) -> Result<(), RepositoryError> {
        if self.fail_status_update.load(Ordering::SeqCst) {
            return Err(RepositoryError::Query("status update failed".to_string()));
        }
        self.modify(id, |row| {
            row.status = status;
            row.superseded_by = superseded_by.map(str::to_string);
            row.updated_at = Utc::now();
        })
    }

    async fn update_embedding(&self, id: &str, embedding: &str) -> Result<(), RepositoryError> {
        self.modify(id, |row| {
            row.embedding = Some(embedding.to_string());
            row.embedding_updated_at = Some(Utc::now());
        })
    }

    async fn soft_delete(&self, id: &str) -> Result<(), RepositoryError> {
        self.modify(id, |row| row.is_deleted = true)
    }

    async fn record_hits(&self, ids: &[String]) -> Result<(), RepositoryError> {
        let mut rows = self.rows.lock().unwrap();
        for row in rows.iter_mut().filter(|m| ids.contains(&m.id)) {
            row.hit_count += 1;
            row.last_hit_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn active_scopes(&self) -> Result<Vec<MemoryScope>, RepositoryError> {
        let mut scopes: Vec<MemoryScope> = Vec::new();
        for row in self.snapshot().iter().filter(|m| m.is_active()) {
            let scope = row.scope();
            if !scopes.contains(&scope) {
                scopes.push(scope);
            }
        }
        Ok(scopes)
    }
}

// ---------------------------------------------------------------------------
// Pending cache
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, (PendingBatch, u64, Instant)>>,
    next_version: AtomicU64,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap()
            .get(key)
            .is_some_and(|(_, _, expires)| *expires > Instant::now())
    }
}

impl PendingCache for InMemoryCache {
    async fn get(&self, key: &str) -> Result<Option<VersionedBatch>, RepositoryError> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.get(key).and_then(|(batch, version, expires)| {
            (*expires > Instant::now()).then(|| VersionedBatch {
                batch: batch.clone(),
                version: *version,
            })
        }))
    }

    async fn compare_and_set(
        &self,
        key: &str,
        batch: &PendingBatch,
        expected: Option<u64>,
        ttl: Duration,
    ) -> Result<Option<u64>, RepositoryError> {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        let live_version = entries
            .get(key)
            .filter(|(_, _, expires)| *expires > now)
            .map(|(_, version, _)| *version);
        if live_version != expected {
            return Ok(None);
        }
        let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        entries.insert(key.to_string(), (batch.clone(), version, now + ttl));
        Ok(Some(version))
    }

    async fn remove_if_version(&self, key: &str, version: u64) -> Result<bool, RepositoryError> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some((_, current, _)) if *current == version => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_expired(&self) -> Result<u64, RepositoryError> {
        let mut entries = self.entries.lock().unwrap();
        let before = entries.len();
        let now = Instant::now();
        entries.retain(|_, (_, _, expires)| *expires > now);
        Ok((before - entries.len()) as u64)
    }
}

// ---------------------------------------------------------------------------
// Embedder
// ---------------------------------------------------------------------------

/// Deterministic embedder: one dimension per concept, set when the text
/// mentions any of the concept's words.
pub struct KeywordEmbedder {
    concepts: Vec<&'static [&'static str]>,
    pub fail: AtomicBool,
    pub calls: AtomicUsize,
    pub delay_ms: AtomicU64,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self {
            concepts: vec![
                &["coffee", "drink", "tea", "espresso"],
                &["work", "remote", "job", "office"],
                &["dog", "cat", "pet"],
                &["berlin", "city", "moved", "live"],
            ],
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
            delay_ms: AtomicU64::new(0),
        }
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let text = text.to_lowercase();
        self.concepts
            .iter()
            .map(|words| {
                if words.iter().any(|w| text.contains(w)) {
                    1.0
                } else {
                    0.0
                }
            })
            .collect()
    }
}

impl Embedder for Arc<KeywordEmbedder> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        simulate_latency(&self.delay_ms).await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(EmbeddingError::Transport("connection refused".to_string()));
        }
        Ok(self.vector_for(text))
    }

    fn model_name(&self) -> &str {
        "keyword-test"
    }

    fn dimension(&self) -> usize {
        self.concepts.len()
    }
}

// ---------------------------------------------------------------------------
// Vector index
// ---------------------------------------------------------------------------

/// Brute-force in-memory index with switches for failure injection.
#[derive(Default)]
pub struct ScriptedIndex {
    entries: Mutex<HashMap<String, (MemoryScope, Vec<f32>)>>,
    forced: Mutex<Option<Vec<String>>>,
    dimension: Mutex<Option<usize>>,
    pub fail_search: AtomicBool,
    pub fail_upsert: AtomicBool,
    pub search_delay_ms: AtomicU64,
}

impl ScriptedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every search return exactly these ids.
    pub fn force_results(&self, ids: Vec<String>) {
        *self.forced.lock().unwrap() = Some(ids);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().unwrap().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl VectorIndex for Arc<ScriptedIndex> {
    async fn ensure_ready(&self, dimension: usize) -> Result<(), VectorIndexError> {
        let mut current = self.dimension.lock().unwrap();
        match *current {
            Some(expected) if expected != dimension => Err(VectorIndexError::DimensionMismatch {
                expected,
                actual: dimension,
            }),
            Some(_) => Ok(()),
            None => {
                *current = Some(dimension);
                Ok(())
            }
        }
    }

    async fn upsert(&self, id: &str, scope: &MemoryScope, vector: &[f32]) -> Result<(), VectorIndexError> {
        if self.fail_upsert.load(Ordering::SeqCst) {
            return Err(VectorIndexError::Backend("upsert failed".to_string()));
        }
        self.entries
            .lock()
            .unwrap()
            .insert(id.to_string(), (scope.clone(), vector.to_vec()));
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), VectorIndexError> {
        self.entries.lock().unwrap().remove(id);
        Ok(())
    }

    async fn search(
        &self,
        scope: &MemoryScope,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<String>, VectorIndexError> {
        simulate_latency(&self.search_delay_ms).await;
        if self.fail_search.load(Ordering::SeqCst) {
            return Err(VectorIndexError::Backend("search unavailable".to_string()));
        }
        if let Some(ids) = self.forced.lock().unwrap().clone() {
            return Ok(ids.into_iter().take(top_k).collect());
        }
        let entries = self.entries.lock().unwrap();
        let mut scored: Vec<(f64, String)> = entries
            .iter()
            .filter(|(_, (s, _))| s == scope)
            .map(|(id, (_, v))| (cosine_similarity(query, v), id.clone()))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(scored.into_iter().take(top_k).map(|(_, id)| id).collect())
    }
}

// ---------------------------------------------------------------------------
// LLM provider
// ---------------------------------------------------------------------------

/// Replays queued replies in order; answers `[]` once the queue is empty.
#[derive(Default)]
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, content: &str) -> Self {
        self.replies.lock().unwrap().push_back(Ok(content.to_string()));
        self
    }

    pub fn fail(self, error: LlmError) -> Self {
        self.replies.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl LlmProvider for Arc<ScriptedLlm> {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.replies.lock().unwrap().pop_front();
        let content = next.unwrap_or_else(|| Ok("[]".to_string()))?;
        Ok(CompletionResponse {
            id: "resp-1".to_string(),
            content,
            model: request.model.clone(),
            usage: Usage::default(),
        })
    }
}

// ---------------------------------------------------------------------------
// Extraction sink
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingSink {
    batches: Mutex<Vec<PendingBatch>>,
    reject: AtomicBool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<PendingBatch> {
        self.batches.lock().unwrap().clone()
    }
}

impl ExtractionSink for RecordingSink {
    fn submit(&self, batch: PendingBatch) -> Result<(), MemoryError> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(MemoryError::QueueUnavailable("queue full".to_string()));
        }
        self.batches.lock().unwrap().push(batch);
        Ok(())
    }
}
