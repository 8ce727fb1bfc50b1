//! JSON-RPC Server
//!
//! Serves the control methods over HTTP on localhost.

use crate::handler::RpcHandler;
use crate::types::{MetadataIdRequest, PutRollupRequest, RollupIdRequest};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::RpcModule;
use rollup_core::application::RollupControl;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

const DEFAULT_RPC_HOST: &str = "127.0.0.1";
pub const DEFAULT_RPC_PORT: u16 = 9527;

/// RPC Server Configuration
#[derive(Debug, Clone)]
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
    pub fn new(config: RpcServerConfig, control: Arc<RollupControl>) -> Self {
        Self {
            config,
            handler: Arc::new(RpcHandler::new(control)),
        }
    }

    /// Build the method table
    pub fn module(&self) -> Result<RpcModule<()>, String> {
        let mut module = RpcModule::new(());

        let handler = self.handler.clone();
        module
            .register_async_method("rollup.put.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: PutRollupRequest = params.parse()?;
                    handler.put_rollup(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("rollup.get.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: RollupIdRequest = params.parse()?;
                    handler.get_rollup(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("rollup.start.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: RollupIdRequest = params.parse()?;
                    handler.start_rollup(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("rollup.stop.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: RollupIdRequest = params.parse()?;
                    handler.stop_rollup(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        let handler = self.handler.clone();
        module
            .register_async_method("metadata.get.v1", move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: MetadataIdRequest = params.parse()?;
                    handler.get_metadata(req).await
                }
            })
            .map_err(|e| e.to_string())?;

        Ok(module)
    }

    /// Start the JSON-RPC server
    ///
    /// Returns the bound address (useful with port 0) and the server handle.
    pub async fn start(self) -> Result<(SocketAddr, ServerHandle), String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        info!(
            host = %self.config.host,
            port = %self.config.port,
            "Starting JSON-RPC server"
        );

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;
        let local_addr = server
            .local_addr()
            .map_err(|e| format!("Failed to read bound address: {}", e))?;

        let module = self.module()?;
        let handle = server.start(module);

        info!(addr = %local_addr, "JSON-RPC server started");
        Ok((local_addr, handle))
    }
}
