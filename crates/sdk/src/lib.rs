//! Storybench SDK - Rust Client Library
//!
//! Client for the Storybench daemon's JSON-RPC API.
//!
//! # Example
//!
//! ```no_run
//! use storybench_sdk::{CreateJobRequest, StorybenchClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Connect to daemon
//!     let client = StorybenchClient::connect("http://127.0.0.1:9630").await?;
//!
//!     // Register and start a batch
//!     let created = client
//!         .create_job(CreateJobRequest {
//!             model_id: 1,
//!             story_ids: vec![101, 102],
//!             question_id: 7,
//!             params: serde_json::Map::new(),
//!             description: Some("demo batch".to_string()),
//!             run_id: None,
//!         })
//!         .await?;
//!     client.start(&created.job_id).await?;
//!
//!     // Follow it to the end
//!     let mut watch = client.watch(&created.job_id).await?;
//!     while let Some(event) = watch.next().await {
//!         let event = event?;
//!         if let Some(job) = event.job {
//!             println!("{} {}%", job.status, job.progress);
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

mod client;
mod error;
mod types;

pub use client::{StorybenchClient, WatchStream};
pub use error::{Result, SdkError};
pub use types::{
    CancelJobResponse, CreateJobRequest, CreateJobResponse, CreateRerunJobRequest, JobStatus,
    RerunPrompt, StartJobResponse, StatsResponse, UnitOutcome, WatchEvent,
};
