//! JSON-RPC Server
//!
//! JSON-RPC 2.0 over localhost TCP. Plain method calls work over HTTP or
//! WebSocket; the watch subscription needs the WebSocket transport.

use std::net::SocketAddr;
use std::sync::Arc;

use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::RpcModule;
use storybench_core::application::{JobEngine, ProgressChannel};
use tracing::info;

use crate::error::ServeError;
use crate::handler::RpcHandler;
use crate::types::{
    CancelJobParams, CreateJobParams, CreateRerunJobParams, JobStatusParams, StartJobParams,
    WatchParams,
};

const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 9630;

/// RPC Server Configuration
pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub fn new(
        config: RpcServerConfig,
        engine: Arc<JobEngine>,
        progress: Arc<ProgressChannel>,
    ) -> Self {
        Self {
            config,
            handler: Arc::new(RpcHandler::new(engine, progress)),
        }
    }

    /// Start the JSON-RPC server.
    ///
    /// Security: only binds to localhost by default (no external access).
    /// Returns the bound address (useful with port 0) and the handle that
    /// keeps the server alive.
    pub async fn start(self) -> Result<(SocketAddr, ServerHandle), ServeError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        info!(
            host = %self.config.host,
            port = %self.config.port,
            "Starting JSON-RPC server on TCP (localhost only)"
        );

        let server = Server::builder().build(&addr).await.map_err(|e| {
            ServeError::Bind {
                addr: addr.clone(),
                reason: e.to_string(),
            }
        })?;
        let local_addr = server.local_addr().map_err(|e| ServeError::Bind {
            addr,
            reason: e.to_string(),
        })?;

        let mut module = RpcModule::new(());

        // Register methods
        let handler = self.handler.clone();
        module
            .register_async_method("jobs.create.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: CreateJobParams = params.parse()?;
                    handler.create_job(req).await
                }
            })
            .map_err(|e| ServeError::register("jobs.create.v1", e))?;

        let handler = self.handler.clone();
        module
            .register_async_method("jobs.create_rerun.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: CreateRerunJobParams = params.parse()?;
                    handler.create_rerun_job(req).await
                }
            })
            .map_err(|e| ServeError::register("jobs.create_rerun.v1", e))?;

        let handler = self.handler.clone();
        module
            .register_async_method("jobs.start.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: StartJobParams = params.parse()?;
                    handler.start_job(req).await
                }
            })
            .map_err(|e| ServeError::register("jobs.start.v1", e))?;

        let handler = self.handler.clone();
        module
            .register_async_method("jobs.status.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: JobStatusParams = params.parse()?;
                    handler.job_status(req).await
                }
            })
            .map_err(|e| ServeError::register("jobs.status.v1", e))?;

        let handler = self.handler.clone();
        module
            .register_async_method("jobs.cancel.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: CancelJobParams = params.parse()?;
                    handler.cancel_job(req).await
                }
            })
            .map_err(|e| ServeError::register("jobs.cancel.v1", e))?;

        let handler = self.handler.clone();
        module
            .register_async_method("admin.stats.v1", move |_params, _, _| {
                let handler = handler.clone();
                async move { handler.stats().await }
            })
            .map_err(|e| ServeError::register("admin.stats.v1", e))?;

        // Progress subscription
        let handler = self.handler.clone();
        module
            .register_subscription(
                "jobs.watch.v1",
                "jobs.progress.v1",
                "jobs.unwatch.v1",
                move |params, pending, _, _| {
                    let handler = handler.clone();
                    async move {
                        let req: WatchParams = match params.parse() {
                            Ok(req) => req,
                            Err(e) => {
                                pending.reject(e).await;
                                return Ok(());
                            }
                        };
                        handler.watch(req, pending).await
                    }
                },
            )
            .map_err(|e| ServeError::register("jobs.watch.v1", e))?;

        info!(addr = %local_addr, "JSON-RPC server started successfully");

        let handle = server.start(module);
        Ok((local_addr, handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storybench_core::application::constants::{EngineConfig, WatchConfig};
    use storybench_core::application::JobRegistry;
    use storybench_core::port::gateway::mocks::MockGateway;
    use storybench_core::port::id_provider::mocks::SeqIdProvider;
    use storybench_core::port::model_client::mocks::{MockBehavior, MockModelClient};
    use storybench_core::port::time_provider::mocks::MockClock;

    fn server_on_any_port() -> RpcServer {
        let clock = Arc::new(MockClock::new(1_000_000));
        let registry = Arc::new(JobRegistry::new(clock.clone()));
        let engine = Arc::new(JobEngine::new(
            registry.clone(),
            Arc::new(MockGateway::new()),
            Arc::new(MockModelClient::new(MockBehavior::Success)),
            Arc::new(SeqIdProvider::new()),
            clock,
            EngineConfig::default(),
        ));
        let progress = Arc::new(ProgressChannel::new(registry, WatchConfig::default()));
        let config = RpcServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
        };
        RpcServer::new(config, engine, progress)
    }

    #[tokio::test]
    async fn starts_on_an_ephemeral_port_and_stops() {
        let (addr, handle) = server_on_any_port().start().await.unwrap();
        assert_ne!(addr.port(), 0);

        handle.stop().unwrap();
        handle.stopped().await;
    }
}
