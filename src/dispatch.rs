//! Tool dispatch: route a parsed call to the bridge and classify the result.
//!
//! Errors never escape: every bridge failure becomes a
//! [`ToolOutcome::Failure`] so the model always gets feedback.

use crate::bridge::{
    CacheContextRequest, ExecuteResult, PageRange, SearchCacheRequest, ToolBackend,
};
use crate::error::BridgeError;
use crate::prompt::LIST_TOOLS;
use crate::textutil::tail_lines;
use crate::types::{FailureKind, ToolCall, ToolFailure, ToolOutcome, ToolSuccess};
use std::sync::Arc;

pub const GET_CACHED_RESULT: &str = "get_cached_result";
pub const SEARCH_CACHED_RESULT: &str = "search_cached_result";
pub const GET_CACHE_CONTEXT: &str = "get_cache_context";

/// Traceback lines kept for the model; the full trace is only logged.
pub const STACK_EXCERPT_LINES: usize = 10;

#[derive(Clone)]
pub struct ToolDispatcher {
    backend: Arc<dyn ToolBackend>,
}

impl ToolDispatcher {
    pub fn new(backend: Arc<dyn ToolBackend>) -> Self {
        Self { backend }
    }

    pub async fn dispatch(&self, call: &ToolCall) -> ToolOutcome {
        tracing::info!(tool = %call.name, service = ?call.target_service, "dispatching tool call");
        let result = match call.name.as_str() {
            LIST_TOOLS => self.list_tools(call).await,
            GET_CACHED_RESULT => self.cache_page(call).await,
            SEARCH_CACHED_RESULT => self.search_cache(call).await,
            GET_CACHE_CONTEXT => self.cache_context(call).await,
            _ => self.execute(call).await,
        };
        match result {
            Ok(success) => ToolOutcome::Success(success),
            Err(failure) => {
                tracing::warn!(
                    tool = %call.name,
                    kind = ?failure.kind,
                    "tool call failed: {}",
                    failure.message
                );
                ToolOutcome::Failure(failure)
            }
        }
    }

    async fn list_tools(&self, call: &ToolCall) -> Result<ToolSuccess, ToolFailure> {
        let service = call
            .str_arg("service_name")
            .or(call.target_service.as_deref())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| invalid_arguments("`service_name` is required"))?;
        let tools = self
            .backend
            .list_tools(service)
            .await
            .map_err(|err| failure_from_error(&err))?;
        Ok(ToolSuccess::Listing {
            service: service.to_string(),
            tools,
        })
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolSuccess, ToolFailure> {
        let result = self
            .backend
            .execute(&call.name, &call.arguments, call.target_service.as_deref())
            .await
            .map_err(|err| failure_from_error(&err))?;
        Ok(match result {
            ExecuteResult::Inline(value) => ToolSuccess::Value(value),
            ExecuteResult::Cached(cache) => {
                tracing::info!(
                    cache_id = %cache.cache_id,
                    size = cache.size_bytes,
                    "tool result deferred to cache"
                );
                ToolSuccess::Cached(cache)
            }
        })
    }

    async fn cache_page(&self, call: &ToolCall) -> Result<ToolSuccess, ToolFailure> {
        let cache_id = required_str(call, "cache_id")?;
        let range = PageRange {
            start: call.u64_arg("start"),
            end: call.u64_arg("end"),
        };
        self.backend
            .cache_page(cache_id, range)
            .await
            .map(ToolSuccess::Value)
            .map_err(|err| failure_from_error(&err))
    }

    async fn search_cache(&self, call: &ToolCall) -> Result<ToolSuccess, ToolFailure> {
        let request = SearchCacheRequest {
            cache_id: required_str(call, "cache_id")?.to_string(),
            keyword: required_str(call, "keyword")?.to_string(),
            case_sensitive: call.bool_arg("case_sensitive"),
            max_results: call.u64_arg("max_results"),
        };
        self.backend
            .search_cache(&request)
            .await
            .map(ToolSuccess::Value)
            .map_err(|err| failure_from_error(&err))
    }

    async fn cache_context(&self, call: &ToolCall) -> Result<ToolSuccess, ToolFailure> {
        let request = CacheContextRequest {
            cache_id: required_str(call, "cache_id")?.to_string(),
            line_num: call
                .u64_arg("line_num")
                .ok_or_else(|| invalid_arguments("`line_num` must be a non-negative integer"))?,
            context_lines: call.u64_arg("context_lines"),
        };
        self.backend
            .cache_context(&request)
            .await
            .map(ToolSuccess::Value)
            .map_err(|err| failure_from_error(&err))
    }
}

/// Classify a bridge error for the model.
///
/// The full traceback is logged here; only its tail is kept in the failure.
pub fn failure_from_error(err: &BridgeError) -> ToolFailure {
    let kind = match err {
        BridgeError::Timeout { .. } => FailureKind::TransportTimeout,
        BridgeError::Unreachable(_) => FailureKind::BridgeUnreachable,
        BridgeError::Status { .. } | BridgeError::Application(_) => FailureKind::Execution,
        BridgeError::InvalidResponse(_) => FailureKind::InvalidResponse,
    };
    match err.detail() {
        Some(detail) => {
            if let Some(traceback) = detail.traceback.as_deref() {
                tracing::warn!("bridge traceback:\n{traceback}");
            }
            ToolFailure {
                message: detail.message.clone(),
                kind,
                error_type: detail.error_type.clone(),
                stack_excerpt: detail
                    .traceback
                    .as_deref()
                    .map(|trace| tail_lines(trace, STACK_EXCERPT_LINES))
                    .filter(|excerpt| !excerpt.trim().is_empty()),
            }
        }
        None => ToolFailure {
            message: err.to_string(),
            kind,
            error_type: None,
            stack_excerpt: None,
        },
    }
}

fn required_str<'a>(call: &'a ToolCall, key: &str) -> Result<&'a str, ToolFailure> {
    call.str_arg(key)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| invalid_arguments(&format!("`{key}` is required")))
}

fn invalid_arguments(message: &str) -> ToolFailure {
    ToolFailure {
        message: message.to_string(),
        kind: FailureKind::InvalidArguments,
        error_type: None,
        stack_excerpt: None,
    }
}
