// Persistence Gateway Port
//
// Read access to the prompt corpus (stories, questions, models, prompts)
// and the single write path for finished provider calls.

use async_trait::async_trait;

use crate::domain::{ModelId, PromptId, QuestionId, ResponseId, StoryId};
use crate::error::Result;

/// Story row
#[derive(Debug, Clone, PartialEq)]
pub struct StoryRecord {
    pub id: StoryId,
    pub title: String,
    pub content: String,
}

/// Question row
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionRecord {
    pub id: QuestionId,
    pub content: String,
}

/// Model row, joined with its provider name
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRecord {
    pub id: ModelId,
    pub name: String,
    /// Vendor name as stored ("openai", "anthropic")
    pub provider: String,
    /// Seconds to pause between consecutive calls to this model
    pub request_delay: f64,
}

/// Prompt row, the persisted input of a past call
#[derive(Debug, Clone, PartialEq)]
pub struct PromptRecord {
    pub id: PromptId,
    pub model_id: ModelId,
    pub story_id: StoryId,
    pub question_id: QuestionId,
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
}

/// Arguments for the atomic prompt + response write
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub model_id: ModelId,
    pub story_id: StoryId,
    pub question_id: QuestionId,
    pub temperature: f64,
    pub max_tokens: u32,
    pub top_p: f64,
    /// Vendor request body exactly as sent
    pub request_payload: String,
    /// Extracted completion text
    pub response_text: String,
    /// Raw vendor reply body
    pub full_response: String,
    /// Rerun units link the response to the existing prompt row
    pub reuse_prompt_id: Option<PromptId>,
    pub run_id: Option<String>,
}

/// Persistence gateway interface
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn get_story(&self, id: StoryId) -> Result<StoryRecord>;

    async fn get_question(&self, id: QuestionId) -> Result<QuestionRecord>;

    async fn get_model(&self, id: ModelId) -> Result<ModelRecord>;

    async fn get_prompt(&self, id: PromptId) -> Result<PromptRecord>;

    /// Persist prompt and response in one transaction.
    ///
    /// When `reuse_prompt_id` is set the response attaches to that prompt
    /// row, otherwise a new prompt row is written first. Returns the new
    /// response id. Never partially applied.
    async fn save_prompt_and_response(&self, record: CallRecord) -> Result<ResponseId>;
}

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Mutex;

    /// In-memory gateway for unit tests
    pub struct MockGateway {
        stories: Mutex<HashMap<StoryId, StoryRecord>>,
        questions: Mutex<HashMap<QuestionId, QuestionRecord>>,
        models: Mutex<HashMap<ModelId, ModelRecord>>,
        prompts: Mutex<HashMap<PromptId, PromptRecord>>,
        saved: Mutex<Vec<CallRecord>>,
        next_response_id: AtomicI64,
        fail_save_with: Mutex<Option<String>>,
    }

    impl MockGateway {
        pub fn new() -> Self {
            Self {
                stories: Mutex::new(HashMap::new()),
                questions: Mutex::new(HashMap::new()),
                models: Mutex::new(HashMap::new()),
                prompts: Mutex::new(HashMap::new()),
                saved: Mutex::new(Vec::new()),
                next_response_id: AtomicI64::new(1),
                fail_save_with: Mutex::new(None),
            }
        }

        pub fn insert_story(&self, id: StoryId, title: &str, content: &str) {
            self.stories.lock().unwrap().insert(
                id,
                StoryRecord {
                    id,
                    title: title.to_string(),
                    content: content.to_string(),
                },
            );
        }

        pub fn insert_question(&self, id: QuestionId, content: &str) {
            self.questions.lock().unwrap().insert(
                id,
                QuestionRecord {
                    id,
                    content: content.to_string(),
                },
            );
        }

        pub fn insert_model(&self, id: ModelId, name: &str, provider: &str, request_delay: f64) {
            self.models.lock().unwrap().insert(
                id,
                ModelRecord {
                    id,
                    name: name.to_string(),
                    provider: provider.to_string(),
                    request_delay,
                },
            );
        }

        pub fn insert_prompt(&self, prompt: PromptRecord) {
            self.prompts.lock().unwrap().insert(prompt.id, prompt);
        }

        /// Make every subsequent save fail with a database error
        pub fn fail_saves(&self, message: &str) {
            *self.fail_save_with.lock().unwrap() = Some(message.to_string());
        }

        pub fn saved(&self) -> Vec<CallRecord> {
            self.saved.lock().unwrap().clone()
        }

        pub fn saved_count(&self) -> usize {
            self.saved.lock().unwrap().len()
        }
    }

    impl Default for MockGateway {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl PersistenceGateway for MockGateway {
        async fn get_story(&self, id: StoryId) -> Result<StoryRecord> {
            self.stories
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("Story {} not found", id)))
        }

        async fn get_question(&self, id: QuestionId) -> Result<QuestionRecord> {
            self.questions
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("Question {} not found", id)))
        }

        async fn get_model(&self, id: ModelId) -> Result<ModelRecord> {
            self.models
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("Model {} not found", id)))
        }

        async fn get_prompt(&self, id: PromptId) -> Result<PromptRecord> {
            self.prompts
                .lock()
                .unwrap()
                .get(&id)
                .cloned()
                .ok_or_else(|| AppError::NotFound(format!("Prompt {} not found", id)))
        }

        async fn save_prompt_and_response(&self, record: CallRecord) -> Result<ResponseId> {
            if let Some(message) = self.fail_save_with.lock().unwrap().clone() {
                return Err(AppError::Database(message));
            }
            self.saved.lock().unwrap().push(record);
            Ok(self.next_response_id.fetch_add(1, Ordering::SeqCst))
        }
    }
}
