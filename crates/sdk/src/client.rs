//! Storybench Client Implementation

use std::time::Duration;

use jsonrpsee::core::client::{ClientT, Subscription, SubscriptionClientT};
use jsonrpsee::core::traits::ToRpcParams;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use jsonrpsee::rpc_params;
use jsonrpsee::ws_client::{WsClient, WsClientBuilder};
use serde::Serialize;
use serde_json::value::RawValue;

use crate::error::{Result, SdkError};
use crate::types::{
    CancelJobResponse, CreateJobRequest, CreateJobResponse, CreateRerunJobRequest, JobStatus,
    StartJobResponse, StatsResponse, WatchEvent,
};

/// `rpc_params!` builds a positional parameter list; the daemon expects a
/// named object. This wrapper sends the request struct itself as the
/// params payload.
struct NamedParams<T>(T);

impl<T: Serialize> ToRpcParams for NamedParams<T> {
    fn to_rpc_params(self) -> std::result::Result<Option<Box<RawValue>>, serde_json::Error> {
        let json = serde_json::to_string(&self.0)?;
        RawValue::from_string(json).map(Some)
    }
}

#[derive(Serialize)]
struct JobIdParams {
    job_id: String,
}

fn ws_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}

/// Storybench Daemon Client
///
/// Provides a high-level interface to interact with the Storybench daemon.
///
/// # Example
///
/// ```no_run
/// use storybench_sdk::StorybenchClient;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = StorybenchClient::connect("http://127.0.0.1:9630").await?;
/// # Ok(())
/// # }
/// ```
pub struct StorybenchClient {
    client: HttpClient,
    ws_url: String,
}

impl StorybenchClient {
    /// Connect to the Storybench daemon
    ///
    /// # Arguments
    ///
    /// * `url` - RPC endpoint URL (e.g., `http://127.0.0.1:9630`)
    pub async fn connect(url: impl AsRef<str>) -> Result<Self> {
        let url = url.as_ref();

        let client = HttpClientBuilder::default()
            .request_timeout(Duration::from_secs(30))
            .build(url)
            .map_err(|e| SdkError::Connection(format!("Failed to create client: {}", e)))?;

        Ok(Self {
            client,
            ws_url: ws_url(url),
        })
    }

    /// Register a benchmark job
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use storybench_sdk::{StorybenchClient, CreateJobRequest};
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// # let client = StorybenchClient::connect("http://127.0.0.1:9630").await?;
    /// let response = client
    ///     .create_job(CreateJobRequest::new(1, vec![101, 102], 7))
    ///     .await?;
    ///
    /// println!("Job ID: {}", response.job_id);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn create_job(&self, request: CreateJobRequest) -> Result<CreateJobResponse> {
        let response = self
            .client
            .request("jobs.create.v1", NamedParams(request))
            .await?;

        Ok(response)
    }

    /// Register a rerun job that replays previously stored prompts
    pub async fn create_rerun_job(
        &self,
        request: CreateRerunJobRequest,
    ) -> Result<CreateJobResponse> {
        let response = self
            .client
            .request("jobs.create_rerun.v1", NamedParams(request))
            .await?;

        Ok(response)
    }

    /// Start a registered job
    ///
    /// Returns whether the job actually started or was queued behind the
    /// concurrency ceiling.
    pub async fn start(&self, job_id: impl Into<String>) -> Result<StartJobResponse> {
        let params = NamedParams(JobIdParams {
            job_id: job_id.into(),
        });
        let response = self.client.request("jobs.start.v1", params).await?;

        Ok(response)
    }

    /// Fetch a job snapshot
    pub async fn status(&self, job_id: impl Into<String>) -> Result<JobStatus> {
        let params = NamedParams(JobIdParams {
            job_id: job_id.into(),
        });
        let response = self.client.request("jobs.status.v1", params).await?;

        Ok(response)
    }

    /// Cancel a job
    ///
    /// Cancelling a terminal job is a no-op; the reply carries the status
    /// the job already had.
    pub async fn cancel(&self, job_id: impl Into<String>) -> Result<CancelJobResponse> {
        let params = NamedParams(JobIdParams {
            job_id: job_id.into(),
        });
        let response = self.client.request("jobs.cancel.v1", params).await?;

        Ok(response)
    }

    /// Fetch daemon-wide job counts
    pub async fn stats(&self) -> Result<StatsResponse> {
        let response = self.client.request("admin.stats.v1", rpc_params![]).await?;

        Ok(response)
    }

    /// Subscribe to progress events for a job
    ///
    /// Opens a WebSocket connection and streams [`WatchEvent`]s until the
    /// job reaches a terminal state or the watch window expires.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use storybench_sdk::StorybenchClient;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// # let client = StorybenchClient::connect("http://127.0.0.1:9630").await?;
    /// let mut watch = client.watch("job-123").await?;
    /// while let Some(event) = watch.next().await {
    ///     let event = event?;
    ///     if let Some(job) = &event.job {
    ///         println!("{}: {}%", job.status, job.progress);
    ///     }
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn watch(&self, job_id: impl Into<String>) -> Result<WatchStream> {
        let ws = WsClientBuilder::default()
            .build(&self.ws_url)
            .await
            .map_err(|e| SdkError::Connection(format!("Failed to open watch connection: {}", e)))?;

        let params = NamedParams(JobIdParams {
            job_id: job_id.into(),
        });
        let sub = ws
            .subscribe::<WatchEvent, _>("jobs.watch.v1", params, "jobs.unwatch.v1")
            .await?;

        Ok(WatchStream {
            _client: ws,
            sub,
        })
    }
}

/// Live stream of [`WatchEvent`]s for one job.
///
/// Holds its WebSocket connection open for as long as the stream lives.
#[derive(Debug)]
pub struct WatchStream {
    // Dropping the client tears down the connection, which closes the
    // subscription mid-stream.
    _client: WsClient,
    sub: Subscription<WatchEvent>,
}

impl WatchStream {
    /// Next event from the daemon. `None` once the subscription closes.
    pub async fn next(&mut self) -> Option<Result<WatchEvent>> {
        self.sub
            .next()
            .await
            .map(|event| event.map_err(SdkError::from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_rewrites_the_scheme() {
        assert_eq!(ws_url("http://127.0.0.1:9630"), "ws://127.0.0.1:9630");
        assert_eq!(ws_url("https://bench.example.com"), "wss://bench.example.com");
        assert_eq!(ws_url("ws://127.0.0.1:9630"), "ws://127.0.0.1:9630");
    }

    #[test]
    fn named_params_serialize_as_an_object() {
        let params = NamedParams(JobIdParams {
            job_id: "job-1".to_string(),
        });
        let raw = params.to_rpc_params().unwrap().unwrap();

        assert_eq!(raw.get(), r#"{"job_id":"job-1"}"#);
    }
}
