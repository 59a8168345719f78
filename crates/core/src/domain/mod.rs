// Domain Layer - Pure business logic and entities

pub mod error;
pub mod input;
pub mod job;
pub mod params;
pub mod provider;

// Re-exports
pub use error::DomainError;
pub use input::{JobInput, RerunPrompt};
pub use job::{
    Job, JobId, JobStatus, ModelId, PromptId, QuestionId, ResponseId, StoryId, UnitOutcome,
};
pub use params::{resolve_params, CallDefaults, CallParams, ParamError, StoredParams};
pub use provider::{ProviderKind, UnknownProvider};
