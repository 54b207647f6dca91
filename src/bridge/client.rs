use super::types::{
    ConfigUpdateRequest, Envelope, ExecuteRequest, ExecuteResult, PageRange, ServerNameRequest,
};
use super::{CacheContextRequest, SearchCacheRequest, ToolBackend};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, ErrorDetail};
use crate::textutil::preview;
use crate::types::{CacheRef, ServiceInfo, ToolInfo};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;

/// Client for the local bridge service.
#[derive(Debug, Clone)]
pub struct BridgeClient {
    http: reqwest::Client,
    base_url: String,
    timeouts: Timeouts,
}

#[derive(Debug, Clone, Copy)]
struct Timeouts {
    health: u64,
    discovery: u64,
    execute: u64,
    cache: u64,
}

impl BridgeClient {
    /// Build a client from resolved bridge configuration.
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url().trim_end_matches('/').to_string(),
            timeouts: Timeouts {
                health: config.health_timeout_secs,
                discovery: config.discovery_timeout_secs,
                execute: config.execute_timeout_secs,
                cache: config.cache_timeout_secs,
            },
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `GET /health`.
    pub async fn health(&self) -> Result<Envelope, BridgeError> {
        self.get("/health", &[], self.timeouts.health).await
    }

    /// `GET /config`: the tool-server configuration.
    pub async fn get_config(&self) -> Result<Value, BridgeError> {
        let mut envelope = self.get("/config", &[], self.timeouts.discovery).await?;
        envelope
            .remove("config")
            .ok_or_else(|| BridgeError::InvalidResponse("/config response has no `config`".into()))
    }

    /// `POST /config`: replace the tool-server configuration and reload.
    pub async fn set_config(&self, config: &Value) -> Result<Envelope, BridgeError> {
        self.post(
            "/config",
            &ConfigUpdateRequest { config },
            self.timeouts.discovery,
        )
        .await
    }

    pub async fn restart_server(&self, server_name: &str) -> Result<Envelope, BridgeError> {
        self.post(
            "/restart-server",
            &ServerNameRequest { server_name },
            self.timeouts.discovery,
        )
        .await
    }

    pub async fn shutdown_server(&self, server_name: &str) -> Result<Envelope, BridgeError> {
        self.post(
            "/shutdown-server",
            &ServerNameRequest { server_name },
            self.timeouts.discovery,
        )
        .await
    }

    async fn get(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
        secs: u64,
    ) -> Result<Envelope, BridgeError> {
        let url = format!("{}{endpoint}", self.base_url);
        let mut request = self.http.get(&url).timeout(Duration::from_secs(secs));
        if !query.is_empty() {
            request = request.query(query);
        }
        let response = request
            .send()
            .await
            .map_err(|e| BridgeError::from_reqwest(endpoint, secs, e))?;
        finish(endpoint, secs, response).await
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
        secs: u64,
    ) -> Result<Envelope, BridgeError> {
        let url = format!("{}{endpoint}", self.base_url);
        let response = self
            .http
            .post(&url)
            .timeout(Duration::from_secs(secs))
            .json(body)
            .send()
            .await
            .map_err(|e| BridgeError::from_reqwest(endpoint, secs, e))?;
        finish(endpoint, secs, response).await
    }
}

#[async_trait]
impl ToolBackend for BridgeClient {
    async fn services(&self) -> Result<Vec<ServiceInfo>, BridgeError> {
        let envelope = self.get("/tools", &[], self.timeouts.discovery).await?;
        take_field(envelope, "services", "/tools")
    }

    async fn list_tools(&self, service: &str) -> Result<Vec<ToolInfo>, BridgeError> {
        let envelope = self
            .get(
                "/tools",
                &[("serverName", service.to_string())],
                self.timeouts.discovery,
            )
            .await?;
        take_field(envelope, "tools", "/tools")
    }

    async fn execute(
        &self,
        name: &str,
        arguments: &Map<String, Value>,
        server_name: Option<&str>,
    ) -> Result<ExecuteResult, BridgeError> {
        let request = ExecuteRequest {
            name,
            arguments,
            server_name,
        };
        let mut envelope = self
            .post("/execute", &request, self.timeouts.execute)
            .await?;
        if envelope.get("result_type").and_then(Value::as_str) == Some("cached_reference") {
            let cache_id = envelope
                .get("cache_id")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
                .ok_or_else(|| {
                    BridgeError::InvalidResponse("cached_reference without `cache_id`".into())
                })?
                .to_string();
            return Ok(ExecuteResult::Cached(CacheRef {
                cache_id,
                size_bytes: envelope
                    .get("total_size")
                    .and_then(Value::as_u64)
                    .unwrap_or(0),
                kind: envelope
                    .get("cache_type")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            }));
        }
        Ok(ExecuteResult::Inline(
            envelope.remove("result").unwrap_or(Value::Null),
        ))
    }

    async fn cache_page(&self, cache_id: &str, range: PageRange) -> Result<Value, BridgeError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| BridgeError::Unreachable(format!("invalid bridge url: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| BridgeError::Unreachable("bridge url cannot take a path".into()))?
            .pop_if_empty()
            .push("result")
            .push(cache_id);
        let mut query = Vec::new();
        if let Some(start) = range.start {
            query.push(("start", start.to_string()));
        }
        if let Some(end) = range.end {
            query.push(("end", end.to_string()));
        }
        let secs = self.timeouts.cache;
        let response = self
            .http
            .get(url)
            .query(&query)
            .timeout(Duration::from_secs(secs))
            .send()
            .await
            .map_err(|e| BridgeError::from_reqwest("/result", secs, e))?;
        finish("/result", secs, response).await.map(Value::Object)
    }

    async fn search_cache(&self, request: &SearchCacheRequest) -> Result<Value, BridgeError> {
        self.post("/search-cache", request, self.timeouts.cache)
            .await
            .map(Value::Object)
    }

    async fn cache_context(&self, request: &CacheContextRequest) -> Result<Value, BridgeError> {
        self.post("/get-cache-context", request, self.timeouts.cache)
            .await
            .map(Value::Object)
    }
}

/// Decode a response into its envelope, turning non-2xx statuses and
/// `success: false` into errors with the bridge's detail.
async fn finish(
    endpoint: &str,
    secs: u64,
    response: reqwest::Response,
) -> Result<Envelope, BridgeError> {
    let status = response.status();
    let text = response
        .text()
        .await
        .map_err(|e| BridgeError::from_reqwest(endpoint, secs, e))?;
    let parsed = serde_json::from_str::<Value>(&text).ok();

    if !status.is_success() {
        let detail = parsed
            .as_ref()
            .and_then(failure_detail)
            .unwrap_or_else(|| {
                let body = text.trim();
                if body.is_empty() {
                    ErrorDetail::message(format!("HTTP error! status: {}", status.as_u16()))
                } else {
                    ErrorDetail::message(preview(body, 300))
                }
            });
        return Err(BridgeError::Status {
            code: status.as_u16(),
            detail,
        });
    }

    let Some(Value::Object(mut envelope)) = parsed else {
        return Err(BridgeError::InvalidResponse(format!(
            "{endpoint} returned a non-object body: {}",
            preview(&text, 120)
        )));
    };
    if envelope.remove("success") == Some(Value::Bool(false)) {
        let body = Value::Object(envelope);
        let detail = failure_detail(&body)
            .unwrap_or_else(|| ErrorDetail::message(format!("{endpoint} reported failure")));
        return Err(BridgeError::Application(detail));
    }
    Ok(envelope)
}

fn failure_detail(body: &Value) -> Option<ErrorDetail> {
    ["detail", "error", "message"]
        .iter()
        .filter_map(|key| body.get(*key))
        .find(|value| !value.is_null())
        .map(ErrorDetail::from_value)
}

fn take_field<T: DeserializeOwned>(
    mut envelope: Envelope,
    field: &str,
    endpoint: &str,
) -> Result<T, BridgeError> {
    let value = envelope.remove(field).ok_or_else(|| {
        BridgeError::InvalidResponse(format!("{endpoint} response has no `{field}`"))
    })?;
    serde_json::from_value(value)
        .map_err(|e| BridgeError::InvalidResponse(format!("{endpoint} `{field}`: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> BridgeClient {
        let addr = server.address();
        BridgeClient::new(&BridgeConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            ..BridgeConfig::default()
        })
    }

    #[tokio::test]
    async fn services_are_decoded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tools"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "services": [
                    {"name": "fs", "description": "Files", "is_core": true},
                    {"name": "web"}
                ]
            })))
            .mount(&server)
            .await;

        let services = client_for(&server).services().await.expect("services");
        assert_eq!(services.len(), 2);
        assert!(services[0].is_core);
        assert_eq!(services[1].name, "web");
        assert!(!services[1].is_core);
    }

    #[tokio::test]
    async fn list_tools_sends_server_name_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tools"))
            .and(query_param("serverName", "fs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "tools": [{"name": "read_file", "description": "Read", "inputSchema": {}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let tools = client_for(&server).list_tools("fs").await.expect("tools");
        assert_eq!(tools[0].name, "read_file");
    }

    #[tokio::test]
    async fn execute_returns_inline_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/execute"))
            .and(body_json(json!({"name": "add", "arguments": {"a": 1}})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"success": true, "result": 3})),
            )
            .mount(&server)
            .await;

        let mut args = Map::new();
        args.insert("a".into(), json!(1));
        let result = client_for(&server)
            .execute("add", &args, None)
            .await
            .expect("execute");
        assert_eq!(result, ExecuteResult::Inline(json!(3)));
    }

    #[tokio::test]
    async fn execute_forwards_server_name_and_decodes_cached_reference() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/execute"))
            .and(body_json(json!({"name": "dump", "arguments": {}, "server_name": "fs"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "result_type": "cached_reference",
                "cache_id": "abc",
                "cache_type": "text",
                "total_size": 50000,
                "message": "result cached"
            })))
            .mount(&server)
            .await;

        let result = client_for(&server)
            .execute("dump", &Map::new(), Some("fs"))
            .await
            .expect("execute");
        assert_eq!(
            result,
            ExecuteResult::Cached(CacheRef {
                cache_id: "abc".into(),
                size_bytes: 50_000,
                kind: Some("text".into()),
            })
        );
    }

    #[tokio::test]
    async fn status_error_with_string_detail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/execute"))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"detail": "tool `x` not found"})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .execute("x", &Map::new(), None)
            .await
            .unwrap_err();
        match err {
            BridgeError::Status { code, detail } => {
                assert_eq!(code, 404);
                assert_eq!(detail.message, "tool `x` not found");
                assert!(detail.error_type.is_none());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn status_error_with_structured_detail() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/execute"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "detail": {
                    "error": "division by zero",
                    "type": "ZeroDivisionError",
                    "traceback": "Traceback\n  File \"calc.py\", line 3\nZeroDivisionError"
                }
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .execute("calc", &Map::new(), None)
            .await
            .unwrap_err();
        let detail = err.detail().expect("detail");
        assert_eq!(detail.error_type.as_deref(), Some("ZeroDivisionError"));
        assert!(detail.traceback.as_deref().unwrap_or("").contains("calc.py"));
    }

    #[tokio::test]
    async fn status_error_without_json_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client_for(&server).health().await.unwrap_err();
        assert_eq!(err.to_string(), "status 503: HTTP error! status: 503");
    }

    #[tokio::test]
    async fn success_false_is_an_application_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/execute"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": false, "error": "bad arguments"})),
            )
            .mount(&server)
            .await;

        let err = client_for(&server)
            .execute("x", &Map::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Application(ref d) if d.message == "bad arguments"));
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"status": "ok"}))
                    .set_delay(Duration::from_millis(2500)),
            )
            .mount(&server)
            .await;

        let addr = server.address();
        let client = BridgeClient::new(&BridgeConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            health_timeout_secs: 1,
            ..BridgeConfig::default()
        });
        let err = client.health().await.unwrap_err();
        assert!(err.is_timeout(), "got: {err}");
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);
        let client = BridgeClient::new(&BridgeConfig {
            port,
            ..BridgeConfig::default()
        });

        let err = client.health().await.unwrap_err();
        assert!(err.is_unreachable(), "got: {err}");
    }

    #[tokio::test]
    async fn cache_page_uses_path_and_range_query() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/result/abc"))
            .and(query_param("start", "0"))
            .and(query_param("end", "8000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "content": "chunk",
                "has_more": true
            })))
            .mount(&server)
            .await;

        let page = client_for(&server)
            .cache_page(
                "abc",
                PageRange {
                    start: Some(0),
                    end: Some(8000),
                },
            )
            .await
            .expect("page");
        assert_eq!(page, json!({"content": "chunk", "has_more": true}));
    }

    #[tokio::test]
    async fn search_and_context_post_their_bodies() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search-cache"))
            .and(body_json(json!({"cache_id": "abc", "keyword": "fn"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "matches": [{"line": 3, "column": 1}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/get-cache-context"))
            .and(body_json(json!({"cache_id": "abc", "line_num": 3, "context_lines": 2})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "context": "a\nb\nc"})),
            )
            .mount(&server)
            .await;

        let client = client_for(&server);
        let found = client
            .search_cache(&SearchCacheRequest {
                cache_id: "abc".into(),
                keyword: "fn".into(),
                case_sensitive: None,
                max_results: None,
            })
            .await
            .expect("search");
        assert_eq!(found["matches"][0]["line"], 3);

        let context = client
            .cache_context(&CacheContextRequest {
                cache_id: "abc".into(),
                line_num: 3,
                context_lines: Some(2),
            })
            .await
            .expect("context");
        assert_eq!(context["context"], "a\nb\nc");
    }

    #[tokio::test]
    async fn config_and_lifecycle_endpoints() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/config"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "config": {"mcpServers": {}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/config"))
            .and(body_json(json!({"config": {"mcpServers": {}}})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"success": true, "message": "reloaded"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/restart-server"))
            .and(body_json(json!({"serverName": "fs"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let config = client.get_config().await.expect("config");
        assert_eq!(config, json!({"mcpServers": {}}));
        let reply = client.set_config(&config).await.expect("set");
        assert_eq!(reply.get("message"), Some(&json!("reloaded")));
        client.restart_server("fs").await.expect("restart");
    }
}
