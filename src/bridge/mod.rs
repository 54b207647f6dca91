//! HTTP client for the local bridge service that hosts the tool servers.
//!
//! - `client`: reqwest-based [`BridgeClient`] with per-endpoint timeouts
//! - `types`: request/response wire shapes

use crate::error::BridgeError;
use crate::types::{ServiceInfo, ToolInfo};
use async_trait::async_trait;
use serde_json::{Map, Value};

mod client;
pub mod types;

pub use client::BridgeClient;
pub use types::{CacheContextRequest, ExecuteResult, PageRange, SearchCacheRequest};

/// Tool-execution backend used by the dispatcher and the rewriter.
///
/// This trait lets tests provide deterministic results without network
/// calls while the production path uses [`BridgeClient`].
#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// Service catalogue for the capability prompt.
    async fn services(&self) -> Result<Vec<ServiceInfo>, BridgeError>;

    async fn list_tools(&self, service: &str) -> Result<Vec<ToolInfo>, BridgeError>;

    async fn execute(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
        server_name: Option<&str>,
    ) -> Result<ExecuteResult, BridgeError>;

    async fn cache_page(&self, cache_id: &str, range: PageRange) -> Result<Value, BridgeError>;

    async fn search_cache(&self, request: &SearchCacheRequest) -> Result<Value, BridgeError>;

    async fn cache_context(&self, request: &CacheContextRequest) -> Result<Value, BridgeError>;
}
