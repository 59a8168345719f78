// Application Layer - Use Cases and Business Logic

pub mod admission;
pub mod cancel;
pub mod constants;
pub mod driver;
pub mod engine;
pub mod executor;
pub mod janitor;
pub mod progress;
pub mod registry;

// Re-exports
pub use admission::AdmissionGate;
pub use cancel::{cancel_channel, CancelHandle, CancelToken};
pub use constants::{EngineConfig, WatchConfig};
pub use engine::{CreateJobRequest, CreateRerunJobRequest, JobEngine, StartOutcome};
pub use janitor::Janitor;
pub use progress::{ProgressChannel, WatchEvent, WatchEventKind};
pub use registry::{CancelOutcome, JobRegistry, StartDecision, StatusCounts};
