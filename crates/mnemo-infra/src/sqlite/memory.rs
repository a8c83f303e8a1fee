//! SQLite memory repository implementation.
//!
//! Implements `MemoryRepository` from `mnemo-core` using sqlx with split
//! read/write pools: raw queries, a private row struct, reads on the reader
//! pool and writes on the single-connection writer.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::Row;

use mnemo_core::memory::store::MemoryRepository;
use mnemo_types::error::RepositoryError;
use mnemo_types::memory::{Memory, MemoryScope, MemoryStatus};

use super::pool::DatabasePool;

/// SQLite-backed implementation of `MemoryRepository`.
pub struct SqliteMemoryRepository {
    pool: DatabasePool,
}

impl SqliteMemoryRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Private Row type for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct MemoryRow {
    id: String,
    persona_id: String,
    user_id: i64,
    memory_type: String,
    content: String,
    keywords: Option<String>,
    embedding: Option<String>,
    embedding_updated_at: Option<String>,
    source: String,
    status: String,
    superseded_by: Option<String>,
    hit_count: i64,
    last_hit_at: Option<String>,
    created_at: String,
    updated_at: String,
    is_deleted: i64,
}

impl MemoryRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            persona_id: row.try_get("persona_id")?,
            user_id: row.try_get("user_id")?,
            memory_type: row.try_get("memory_type")?,
            content: row.try_get("content")?,
            keywords: row.try_get("keywords")?,
            embedding: row.try_get("embedding")?,
            embedding_updated_at: row.try_get("embedding_updated_at")?,
            source: row.try_get("source")?,
            status: row.try_get("status")?,
            superseded_by: row.try_get("superseded_by")?,
            hit_count: row.try_get("hit_count")?,
            last_hit_at: row.try_get("last_hit_at")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            is_deleted: row.try_get("is_deleted")?,
        })
    }

    fn into_memory(self) -> Result<Memory, RepositoryError> {
        Ok(Memory {
            memory_type: self.memory_type.parse().map_err(RepositoryError::Query)?,
            source: self.source.parse().map_err(RepositoryError::Query)?,
            status: self.status.parse().map_err(RepositoryError::Query)?,
            embedding_updated_at: self
                .embedding_updated_at
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
            last_hit_at: self.last_hit_at.as_deref().map(parse_datetime).transpose()?,
            created_at: parse_datetime(&self.created_at)?,
            updated_at: parse_datetime(&self.updated_at)?,
            hit_count: u32::try_from(self.hit_count).unwrap_or(u32::MAX),
            is_deleted: self.is_deleted != 0,
            id: self.id,
            persona_id: self.persona_id,
            user_id: self.user_id,
            content: self.content,
            keywords: self.keywords,
            embedding: self.embedding,
            superseded_by: self.superseded_by,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn map_sqlx_error(e: sqlx::Error) -> RepositoryError {
    match e {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            RepositoryError::Connection
        }
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            RepositoryError::Conflict(db.message().to_string())
        }
        other => RepositoryError::Query(other.to_string()),
    }
}

fn rows_to_memories(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<Memory>, RepositoryError> {
    let mut memories = Vec::with_capacity(rows.len());
    for row in rows {
        let memory_row = MemoryRow::from_row(row).map_err(map_sqlx_error)?;
        memories.push(memory_row.into_memory()?);
    }
    Ok(memories)
}

const INSERT_MEMORY: &str = r#"INSERT INTO memories (id, persona_id, user_id, memory_type, content, keywords, embedding, embedding_updated_at, source, status, superseded_by, hit_count, last_hit_at, created_at, updated_at, is_deleted)
       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#;

fn bind_insert<'q>(
    query: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    memory: &'q Memory,
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    query
        .bind(memory.id.as_str())
        .bind(memory.persona_id.as_str())
        .bind(memory.user_id)
        .bind(memory.memory_type.to_string())
        .bind(memory.content.as_str())
        .bind(memory.keywords.as_deref())
        .bind(memory.embedding.as_deref())
        .bind(memory.embedding_updated_at.as_ref().map(format_datetime))
        .bind(memory.source.to_string())
        .bind(memory.status.to_string())
        .bind(memory.superseded_by.as_deref())
        .bind(i64::from(memory.hit_count))
        .bind(memory.last_hit_at.as_ref().map(format_datetime))
        .bind(format_datetime(&memory.created_at))
        .bind(format_datetime(&memory.updated_at))
        .bind(if memory.is_deleted { 1i64 } else { 0i64 })
}

// ---------------------------------------------------------------------------
// MemoryRepository implementation
// ---------------------------------------------------------------------------

impl MemoryRepository for SqliteMemoryRepository {
    async fn create(&self, memory: &Memory) -> Result<(), RepositoryError> {
        bind_insert(sqlx::query(INSERT_MEMORY), memory)
            .execute(&self.pool.writer)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn batch_create(&self, memories: &[Memory]) -> Result<(), RepositoryError> {
        let mut tx = self.pool.writer.begin().await.map_err(map_sqlx_error)?;
        for memory in memories {
            bind_insert(sqlx::query(INSERT_MEMORY), memory)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<Memory>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM memories WHERE id = ? AND is_deleted = 0")
            .bind(id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(map_sqlx_error)?;

        match row {
            Some(row) => {
                let memory_row = MemoryRow::from_row(&row).map_err(map_sqlx_error)?;
                Ok(Some(memory_row.into_memory()?))
            }
            None => Ok(None),
        }
    }

    async fn get_active_by_scope(&self, scope: &MemoryScope) -> Result<Vec<Memory>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM memories
               WHERE persona_id = ? AND user_id = ? AND status = 'active' AND is_deleted = 0
               ORDER BY created_at DESC, id DESC"#,
        )
        .bind(scope.persona_id.as_str())
        .bind(scope.user_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(map_sqlx_error)?;

        rows_to_memories(&rows)
    }

    async fn get_all_by_scope(&self, scope: &MemoryScope) -> Result<Vec<Memory>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT * FROM memories
               WHERE persona_id = ? AND user_id = ? AND is_deleted = 0
               ORDER BY created_at DESC, id DESC"#,
        )
        .bind(scope.persona_id.as_str())
        .bind(scope.user_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(map_sqlx_error)?;

        rows_to_memories(&rows)
    }

    async fn get_active_by_ids(
        &self,
        scope: &MemoryScope,
        ids: &[String],
    ) -> Result<Vec<Memory>, RepositoryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT * FROM memories WHERE persona_id = ? AND user_id = ? AND status = 'active' AND is_deleted = 0 AND id IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql)
            .bind(scope.persona_id.as_str())
            .bind(scope.user_id);
        for id in ids {
            query = query.bind(id.as_str());
        }

        let rows = query
            .fetch_all(&self.pool.reader)
            .await
            .map_err(map_sqlx_error)?;

        rows_to_memories(&rows)
    }

    async fn update(&self, memory: &Memory) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            r#"UPDATE memories
               SET memory_type = ?, content = ?, keywords = ?, embedding = ?, embedding_updated_at = ?,
                   status = ?, superseded_by = ?, updated_at = ?
               WHERE id = ? AND is_deleted = 0"#,
        )
        .bind(memory.memory_type.to_string())
        .bind(memory.content.as_str())
        .bind(memory.keywords.as_deref())
        .bind(memory.embedding.as_deref())
        .bind(memory.embedding_updated_at.as_ref().map(format_datetime))
        .bind(memory.status.to_string())
        .bind(memory.superseded_by.as_deref())
        .bind(format_datetime(&memory.updated_at))
        .bind(memory.id.as_str())
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn update_status(
        &self,
        id: &str,
        status: MemoryStatus,
        superseded_by: Option<&str>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE memories SET status = ?, superseded_by = ?, updated_at = ? WHERE id = ? AND is_deleted = 0",
        )
        .bind(status.to_string())
        .bind(superseded_by)
        .bind(format_datetime(&Utc::now()))
        .bind(id)
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn update_embedding(&self, id: &str, embedding: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE memories SET embedding = ?, embedding_updated_at = ? WHERE id = ? AND is_deleted = 0",
        )
        .bind(embedding)
        .bind(format_datetime(&Utc::now()))
        .bind(id)
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn soft_delete(&self, id: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE memories SET is_deleted = 1, updated_at = ? WHERE id = ? AND is_deleted = 0",
        )
        .bind(format_datetime(&Utc::now()))
        .bind(id)
        .execute(&self.pool.writer)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn record_hits(&self, ids: &[String]) -> Result<(), RepositoryError> {
        if ids.is_empty() {
            return Ok(());
        }
        let now = format_datetime(&Utc::now());
        let mut tx = self.pool.writer.begin().await.map_err(map_sqlx_error)?;
        for id in ids {
            sqlx::query("UPDATE memories SET hit_count = hit_count + 1, last_hit_at = ? WHERE id = ?")
                .bind(now.as_str())
                .bind(id.as_str())
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
        }
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn active_scopes(&self) -> Result<Vec<MemoryScope>, RepositoryError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"SELECT DISTINCT persona_id, user_id FROM memories
               WHERE status = 'active' AND is_deleted = 0
               ORDER BY persona_id, user_id"#,
        )
        .fetch_all(&self.pool.reader)
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows
            .into_iter()
            .map(|(persona_id, user_id)| MemoryScope::new(persona_id, user_id))
            .collect())
    }
}
