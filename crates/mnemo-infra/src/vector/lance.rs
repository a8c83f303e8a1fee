//! LanceDB-backed `VectorIndex`.
//!
//! One collection per deployment. Search is a brute-force scan filtered by
//! persona and user, which LanceDB performs without a trained index; the
//! collection is small per scope, so no ANN index is built.

use std::path::Path;
use std::sync::Arc;

use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use futures_util::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use tokio::sync::Mutex;

use mnemo_core::memory::vector::VectorIndex;
use mnemo_types::config::{DistanceMetric, VectorIndexConfig};
use mnemo_types::error::VectorIndexError;
use mnemo_types::memory::MemoryScope;

use super::schema::{ID_COLUMN, item_field, memory_index_schema, stored_dimension};

/// An opened collection and the vector length it was created with.
#[derive(Clone)]
struct ReadyTable {
    table: lancedb::Table,
    dimension: usize,
}

pub struct LanceVectorIndex {
    db: lancedb::Connection,
    collection_name: String,
    /// Fixed dimension from configuration; 0 accepts whatever arrives first.
    configured_dimension: usize,
    metric: DistanceMetric,
    ready: Mutex<Option<ReadyTable>>,
}

fn backend(context: &str, e: impl std::fmt::Display) -> VectorIndexError {
    VectorIndexError::Backend(format!("{context}: {e}"))
}

/// Quote a string literal for a LanceDB filter expression.
fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn distance_type(metric: DistanceMetric) -> lancedb::DistanceType {
    match metric {
        DistanceMetric::L2 => lancedb::DistanceType::L2,
        DistanceMetric::InnerProduct => lancedb::DistanceType::Dot,
        DistanceMetric::Cosine => lancedb::DistanceType::Cosine,
    }
}

impl LanceVectorIndex {
    /// Open (or create) the LanceDB database at `path`.
    ///
    /// The collection itself is created lazily by `ensure_ready`.
    pub async fn open(path: &Path, config: &VectorIndexConfig) -> Result<Self, VectorIndexError> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| backend("failed to create index directory", e))?;
        let uri = path.to_str().ok_or_else(|| {
            VectorIndexError::Backend(format!("path contains invalid UTF-8: {}", path.display()))
        })?;
        let db = lancedb::connect(uri)
            .execute()
            .await
            .map_err(|e| backend("failed to connect", e))?;

        tracing::debug!(
            path = %path.display(),
            collection = %config.collection_name,
            metric = %config.metric,
            "vector index opened"
        );
        Ok(Self {
            db,
            collection_name: config.collection_name.clone(),
            configured_dimension: config.dimension,
            metric: config.metric,
            ready: Mutex::new(None),
        })
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    /// Open or create the collection for vectors of length `dimension`.
    async fn table_for(&self, dimension: usize) -> Result<lancedb::Table, VectorIndexError> {
        if self.configured_dimension != 0 && dimension != self.configured_dimension {
            return Err(VectorIndexError::DimensionMismatch {
                expected: self.configured_dimension,
                actual: dimension,
            });
        }

        let mut ready = self.ready.lock().await;
        if let Some(existing) = ready.as_ref() {
            if existing.dimension != dimension {
                return Err(VectorIndexError::DimensionMismatch {
                    expected: existing.dimension,
                    actual: dimension,
                });
            }
            return Ok(existing.table.clone());
        }

        let opened = match self.db.open_table(&self.collection_name).execute().await {
            Ok(table) => {
                let schema = table
                    .schema()
                    .await
                    .map_err(|e| backend("failed to read collection schema", e))?;
                let stored = stored_dimension(&schema).ok_or_else(|| {
                    VectorIndexError::Backend(format!(
                        "collection {} has no fixed-size vector column",
                        self.collection_name
                    ))
                })?;
                if stored != dimension {
                    return Err(VectorIndexError::DimensionMismatch {
                        expected: stored,
                        actual: dimension,
                    });
                }
                table
            }
            Err(lancedb::Error::TableNotFound { .. }) => {
                let width = i32::try_from(dimension)
                    .map_err(|_| backend("dimension out of range", dimension))?;
                let table = self
                    .db
                    .create_empty_table(&self.collection_name, Arc::new(memory_index_schema(width)))
                    .execute()
                    .await
                    .map_err(|e| backend("failed to create collection", e))?;
                tracing::info!(
                    collection = %self.collection_name,
                    dimension,
                    "vector collection created"
                );
                table
            }
            Err(e) => return Err(backend("failed to open collection", e)),
        };

        *ready = Some(ReadyTable {
            table: opened.clone(),
            dimension,
        });
        Ok(opened)
    }

    /// The collection if it already exists, without creating it.
    async fn existing_table(&self) -> Result<Option<lancedb::Table>, VectorIndexError> {
        if let Some(existing) = self.ready.lock().await.as_ref() {
            return Ok(Some(existing.table.clone()));
        }
        match self.db.open_table(&self.collection_name).execute().await {
            Ok(table) => Ok(Some(table)),
            Err(lancedb::Error::TableNotFound { .. }) => Ok(None),
            Err(e) => Err(backend("failed to open collection", e)),
        }
    }

    fn build_record_batch(
        id: &str,
        scope: &MemoryScope,
        vector: &[f32],
    ) -> Result<RecordBatch, VectorIndexError> {
        let width = i32::try_from(vector.len())
            .map_err(|_| backend("dimension out of range", vector.len()))?;
        let schema = Arc::new(memory_index_schema(width));

        let values = Float32Array::from(vector.to_vec());
        let vector_array = FixedSizeListArray::try_new(item_field(), width, Arc::new(values), None)
            .map_err(|e| backend("failed to build vector column", e))?;

        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from(vec![id.to_string()])),
                Arc::new(StringArray::from(vec![scope.persona_id.clone()])),
                Arc::new(Int64Array::from(vec![scope.user_id])),
                Arc::new(vector_array),
            ],
        )
        .map_err(|e| backend("failed to build record batch", e))
    }
}

fn validate_identity(id: &str, scope: &MemoryScope) -> Result<(), VectorIndexError> {
    if id.trim().is_empty() {
        return Err(VectorIndexError::InvalidIdentity("empty id".to_string()));
    }
    if scope.persona_id.trim().is_empty() {
        return Err(VectorIndexError::InvalidIdentity("empty persona id".to_string()));
    }
    if scope.user_id == 0 {
        return Err(VectorIndexError::InvalidIdentity("user id 0".to_string()));
    }
    Ok(())
}

impl VectorIndex for LanceVectorIndex {
    async fn ensure_ready(&self, dimension: usize) -> Result<(), VectorIndexError> {
        if dimension == 0 {
            return Err(VectorIndexError::DimensionMismatch {
                expected: self.configured_dimension,
                actual: 0,
            });
        }
        self.table_for(dimension).await.map(|_| ())
    }

    #[tracing::instrument(name = "index_upsert", skip(self, scope, vector), fields(scope = %scope))]
    async fn upsert(&self, id: &str, scope: &MemoryScope, vector: &[f32]) -> Result<(), VectorIndexError> {
        validate_identity(id, scope)?;
        let table = self.table_for(vector.len()).await?;

        table
            .delete(&format!("{ID_COLUMN} = {}", quote(id)))
            .await
            .map_err(|e| backend("failed to delete previous entry", e))?;

        let batch = Self::build_record_batch(id, scope, vector)?;
        let schema = batch.schema();
        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| backend("failed to insert entry", e))?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), VectorIndexError> {
        let Some(table) = self.existing_table().await? else {
            return Ok(());
        };
        table
            .delete(&format!("{ID_COLUMN} = {}", quote(id)))
            .await
            .map_err(|e| backend("failed to delete entry", e))?;
        Ok(())
    }

    #[tracing::instrument(name = "index_search", skip(self, scope, query), fields(scope = %scope))]
    async fn search(
        &self,
        scope: &MemoryScope,
        query: &[f32],
        top_k: usize,
    ) -> Result<Vec<String>, VectorIndexError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let table = self.table_for(query.len()).await?;

        let filter = format!(
            "persona_id = {} AND user_id = {}",
            quote(&scope.persona_id),
            scope.user_id
        );
        let results = table
            .vector_search(query)
            .map_err(|e| backend("vector search setup failed", e))?
            .distance_type(distance_type(self.metric))
            .only_if(filter)
            .limit(top_k)
            .execute()
            .await
            .map_err(|e| backend("vector search failed", e))?;

        let batches: Vec<RecordBatch> = results
            .try_collect()
            .await
            .map_err(|e| backend("failed to collect results", e))?;

        let mut ids = Vec::new();
        for batch in &batches {
            let Some(column) = batch
                .column_by_name(ID_COLUMN)
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            else {
                continue;
            };
            for i in 0..column.len() {
                if !column.is_null(i) {
                    ids.push(column.value(i).to_string());
                }
            }
        }
        ids.truncate(top_k);
        Ok(ids)
    }
}
