//! Wire types for the bridge service's JSON endpoints.

use serde::Serialize;
use serde_json::{Map, Value};

/// Body of `POST /execute`.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteRequest<'a> {
    pub name: &'a str,
    pub arguments: &'a Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_name: Option<&'a str>,
}

/// Body of `POST /search-cache`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchCacheRequest {
    pub cache_id: String,
    pub keyword: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub case_sensitive: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_results: Option<u64>,
}

/// Body of `POST /get-cache-context`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheContextRequest {
    pub cache_id: String,
    pub line_num: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_lines: Option<u64>,
}

/// Character window of `GET /result/{id}`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageRange {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

/// Body of the lifecycle endpoints.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ServerNameRequest<'a> {
    #[serde(rename = "serverName")]
    pub server_name: &'a str,
}

/// Body of `POST /config`.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct ConfigUpdateRequest<'a> {
    pub config: &'a Value,
}

/// Decoded `POST /execute` success.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecuteResult {
    Inline(Value),
    Cached(crate::types::CacheRef),
}

/// Success envelope with the `success` flag stripped.
pub type Envelope = Map<String, Value>;
