//! RPC Method Handlers
//!
//! Thin adapters from JSON-RPC params to `RollupControl` calls.

use crate::error::to_rpc_error;
use crate::types::{AcknowledgedResponse, MetadataIdRequest, PutRollupRequest, RollupIdRequest};
use jsonrpsee::types::ErrorObjectOwned;
use rollup_core::application::RollupControl;
use rollup_core::domain::{Rollup, RollupMetadata};
use std::sync::Arc;
use tracing::debug;

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    control: Arc<RollupControl>,
}

impl RpcHandler {
    pub fn new(control: Arc<RollupControl>) -> Self {
        Self { control }
    }

    /// rollup.put.v1
    pub async fn put_rollup(&self, params: PutRollupRequest) -> Result<Rollup, ErrorObjectOwned> {
        debug!(rollup_id = ?params.id, "rollup.put.v1");
        self.control.put(params).await.map_err(to_rpc_error)
    }

    /// rollup.get.v1
    pub async fn get_rollup(&self, params: RollupIdRequest) -> Result<Rollup, ErrorObjectOwned> {
        self.control
            .get(&params.rollup_id)
            .await
            .map_err(to_rpc_error)
    }

    /// rollup.start.v1
    pub async fn start_rollup(
        &self,
        params: RollupIdRequest,
    ) -> Result<AcknowledgedResponse, ErrorObjectOwned> {
        debug!(rollup_id = %params.rollup_id, "rollup.start.v1");
        self.control
            .start(&params.rollup_id)
            .await
            .map_err(to_rpc_error)?;
        Ok(AcknowledgedResponse::ok())
    }

    /// rollup.stop.v1
    pub async fn stop_rollup(
        &self,
        params: RollupIdRequest,
    ) -> Result<AcknowledgedResponse, ErrorObjectOwned> {
        debug!(rollup_id = %params.rollup_id, "rollup.stop.v1");
        self.control
            .stop(&params.rollup_id)
            .await
            .map_err(to_rpc_error)?;
        Ok(AcknowledgedResponse::ok())
    }

    /// metadata.get.v1
    pub async fn get_metadata(
        &self,
        params: MetadataIdRequest,
    ) -> Result<RollupMetadata, ErrorObjectOwned> {
        self.control
            .get_metadata(&params.metadata_id)
            .await
            .map_err(to_rpc_error)
    }
}
