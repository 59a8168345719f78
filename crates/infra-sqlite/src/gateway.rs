// SQLite Persistence Gateway
//
// Read access to the prompt corpus plus the single transactional write
// path for finished provider calls.

use std::sync::Arc;

use sqlx::SqlitePool;
use tracing::debug;

use storybench_core::domain::{ModelId, PromptId, QuestionId, ResponseId, StoryId};
use storybench_core::error::{AppError, Result};
use storybench_core::port::{
    CallRecord, ModelRecord, PersistenceGateway, PromptRecord, QuestionRecord, StoryRecord,
    TimeProvider,
};

/// SQLite-backed persistence gateway
pub struct SqliteGateway {
    pool: SqlitePool,
    clock: Arc<dyn TimeProvider>,
}

/// Map sqlx errors to AppError with SQLite-specific detail
fn map_sqlx_error(e: sqlx::Error) -> AppError {
    match &e {
        sqlx::Error::Database(db_err) => {
            if let Some(code) = db_err.code() {
                match code.as_ref() {
                    // SQLITE_CONSTRAINT_UNIQUE, SQLITE_CONSTRAINT_PRIMARYKEY
                    "2067" | "1555" => {
                        return AppError::Conflict(format!(
                            "Unique constraint violation: {}",
                            db_err
                        ));
                    }
                    // SQLITE_CONSTRAINT_FOREIGNKEY
                    "787" | "3850" => {
                        return AppError::Validation(format!(
                            "Foreign key constraint violation: {}",
                            db_err
                        ));
                    }
                    // SQLITE_BUSY
                    "5" => {
                        return AppError::Database("database is locked (busy)".to_string());
                    }
                    // SQLITE_FULL
                    "13" => {
                        return AppError::Database("database or disk is full".to_string());
                    }
                    _ => {}
                }
            }
            AppError::Database(e.to_string())
        }
        sqlx::Error::RowNotFound => AppError::NotFound("Row not found".to_string()),
        _ => AppError::Database(e.to_string()),
    }
}

#[derive(sqlx::FromRow)]
struct StoryRow {
    id: i64,
    title: String,
    content: String,
}

#[derive(sqlx::FromRow)]
struct QuestionRow {
    id: i64,
    content: String,
}

#[derive(sqlx::FromRow)]
struct ModelRow {
    id: i64,
    name: String,
    provider: String,
    request_delay: f64,
}

#[derive(sqlx::FromRow)]
struct PromptRow {
    id: i64,
    model_id: i64,
    story_id: i64,
    question_id: i64,
    temperature: f64,
    max_tokens: i64,
    top_p: f64,
}

/// Response row, exposed for inspection and tooling
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ResponseRow {
    pub id: i64,
    pub prompt_id: i64,
    pub content: String,
    pub full_response: String,
    pub run_id: Option<String>,
    pub created_at: i64,
}

impl SqliteGateway {
    pub fn new(pool: SqlitePool, clock: Arc<dyn TimeProvider>) -> Self {
        Self { pool, clock }
    }

    // Seed helpers, used by tests and provisioning tooling.

    pub async fn insert_provider(&self, name: &str) -> Result<i64> {
        let result = sqlx::query("INSERT INTO providers (name) VALUES (?)")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.last_insert_rowid())
    }

    pub async fn insert_model(
        &self,
        name: &str,
        provider_id: i64,
        request_delay: f64,
    ) -> Result<ModelId> {
        let result = sqlx::query(
            "INSERT INTO models (name, provider_id, request_delay, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(name)
        .bind(provider_id)
        .bind(request_delay)
        .bind(self.clock.now_millis())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(result.last_insert_rowid())
    }

    pub async fn insert_story(&self, title: &str, content: &str) -> Result<StoryId> {
        let result =
            sqlx::query("INSERT INTO stories (title, content, created_at) VALUES (?, ?, ?)")
                .bind(title)
                .bind(content)
                .bind(self.clock.now_millis())
                .execute(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        Ok(result.last_insert_rowid())
    }

    pub async fn insert_question(&self, content: &str) -> Result<QuestionId> {
        let result = sqlx::query("INSERT INTO questions (content, created_at) VALUES (?, ?)")
            .bind(content)
            .bind(self.clock.now_millis())
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.last_insert_rowid())
    }

    /// Fetch a stored response (inspection, tooling, tests)
    pub async fn get_response(&self, id: ResponseId) -> Result<ResponseRow> {
        sqlx::query_as::<_, ResponseRow>(
            "SELECT id, prompt_id, content, full_response, run_id, created_at
             FROM responses WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .ok_or_else(|| AppError::NotFound(format!("Response {} not found", id)))
    }

    pub async fn prompt_count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM prompts")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    pub async fn response_count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM responses")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }
}

#[async_trait::async_trait]
impl PersistenceGateway for SqliteGateway {
    async fn get_story(&self, id: StoryId) -> Result<StoryRecord> {
        let row = sqlx::query_as::<_, StoryRow>(
            "SELECT id, title, content FROM stories WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .ok_or_else(|| AppError::NotFound(format!("Story {} not found", id)))?;

        Ok(StoryRecord {
            id: row.id,
            title: row.title,
            content: row.content,
        })
    }

    async fn get_question(&self, id: QuestionId) -> Result<QuestionRecord> {
        let row =
            sqlx::query_as::<_, QuestionRow>("SELECT id, content FROM questions WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?
                .ok_or_else(|| AppError::NotFound(format!("Question {} not found", id)))?;

        Ok(QuestionRecord {
            id: row.id,
            content: row.content,
        })
    }

    async fn get_model(&self, id: ModelId) -> Result<ModelRecord> {
        let row = sqlx::query_as::<_, ModelRow>(
            "SELECT m.id, m.name, p.name AS provider, m.request_delay
             FROM models m
             JOIN providers p ON p.id = m.provider_id
             WHERE m.id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .ok_or_else(|| AppError::NotFound(format!("Model {} not found", id)))?;

        Ok(ModelRecord {
            id: row.id,
            name: row.name,
            provider: row.provider,
            request_delay: row.request_delay,
        })
    }

    async fn get_prompt(&self, id: PromptId) -> Result<PromptRecord> {
        let row = sqlx::query_as::<_, PromptRow>(
            "SELECT id, model_id, story_id, question_id, temperature, max_tokens, top_p
             FROM prompts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?
        .ok_or_else(|| AppError::NotFound(format!("Prompt {} not found", id)))?;

        Ok(PromptRecord {
            id: row.id,
            model_id: row.model_id,
            story_id: row.story_id,
            question_id: row.question_id,
            temperature: row.temperature,
            max_tokens: row.max_tokens as u32,
            top_p: row.top_p,
        })
    }

    async fn save_prompt_and_response(&self, record: CallRecord) -> Result<ResponseId> {
        let now = self.clock.now_millis();
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let prompt_id = match record.reuse_prompt_id {
            Some(id) => {
                // rerun: the response attaches to the existing prompt row
                let exists: Option<i64> =
                    sqlx::query_scalar("SELECT id FROM prompts WHERE id = ?")
                        .bind(id)
                        .fetch_optional(&mut *tx)
                        .await
                        .map_err(map_sqlx_error)?;
                exists.ok_or_else(|| AppError::NotFound(format!("Prompt {} not found", id)))?
            }
            None => {
                let result = sqlx::query(
                    "INSERT INTO prompts
                     (model_id, story_id, question_id, temperature, max_tokens, top_p, request_payload, created_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(record.model_id)
                .bind(record.story_id)
                .bind(record.question_id)
                .bind(record.temperature)
                .bind(record.max_tokens as i64)
                .bind(record.top_p)
                .bind(&record.request_payload)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(map_sqlx_error)?;
                result.last_insert_rowid()
            }
        };

        let result = sqlx::query(
            "INSERT INTO responses (prompt_id, content, full_response, run_id, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(prompt_id)
        .bind(&record.response_text)
        .bind(&record.full_response)
        .bind(&record.run_id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        let response_id = result.last_insert_rowid();

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(response_id, prompt_id, "persisted prompt and response");
        Ok(response_id)
    }
}
