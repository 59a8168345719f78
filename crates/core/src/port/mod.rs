// Port Layer - Interfaces for external dependencies

pub mod gateway;
pub mod id_provider; // For deterministic testing
pub mod model_client;
pub mod time_provider;

// Re-exports
pub use gateway::{
    CallRecord, ModelRecord, PersistenceGateway, PromptRecord, QuestionRecord, StoryRecord,
};
pub use id_provider::IdProvider;
pub use model_client::{ModelClient, ProviderError, ProviderReply, ProviderRequest};
pub use time_provider::TimeProvider;
