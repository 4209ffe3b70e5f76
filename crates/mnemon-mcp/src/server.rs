//! Tool Dispatcher
//!
//! Validates tool calls, bounds concurrency with a FIFO semaphore,
//! enforces the soft per-call deadline, classifies failures into the
//! error ring buffer, and routes to the engine. Non-fatal failures come
//! back as `{ error: { code, message, details? } }` payloads; fatal ones
//! additionally end the session.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use mnemon_core::{Engine, EngineError, ErrorCategory, ErrorRecord, ErrorSeverity};
use serde_json::{Value, json};

use crate::protocol::types::{
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION, ToolDescription,
};
use crate::tools;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Dispatcher limits
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Concurrent tool executions; excess callers queue FIFO
    pub max_concurrency: usize,
    /// How long a caller may wait in the queue before `busy`
    pub acquire_timeout: Duration,
    /// Soft deadline per tool call
    pub call_deadline: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            acquire_timeout: Duration::from_secs(5),
            call_deadline: Duration::from_secs(10),
        }
    }
}

// ============================================================================
// DISPATCHER
// ============================================================================

/// The tool dispatcher
pub struct Dispatcher {
    engine: Arc<Engine>,
    semaphore: Arc<Semaphore>,
    config: DispatcherConfig,
    initialized: bool,
    fatal: bool,
}

impl Dispatcher {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self::with_config(engine, DispatcherConfig::default())
    }

    pub fn with_config(engine: Arc<Engine>, config: DispatcherConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            engine,
            config,
            initialized: false,
            fatal: false,
        }
    }

    /// Whether a fatal error was observed; the transport should close.
    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    /// Handle one JSON-RPC request; notifications return `None`.
    pub async fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!("handling request: {}", request.method);

        if !self.initialized
            && request.method != "initialize"
            && request.method != "notifications/initialized"
        {
            warn!("rejecting '{}': server not initialized", request.method);
            return Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::server_not_initialized(),
            ));
        }

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(),
            "notifications/initialized" => return None,
            "tools/list" => Ok(self.handle_tools_list()),
            "tools/call" => self.handle_tools_call(request.params).await,
            "ping" => Ok(json!({})),
            method => {
                warn!("unknown method: {}", method);
                Err(JsonRpcError::method_not_found())
            }
        };

        Some(match result {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(error) => JsonRpcResponse::error(request.id, error),
        })
    }

    fn handle_initialize(&mut self) -> Result<Value, JsonRpcError> {
        self.initialized = true;
        info!("session initialized");
        Ok(json!({
            "protocolVersion": PROTOCOL_VERSION,
            "serverInfo": {
                "name": "mnemon",
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {
                "tools": { "listChanged": false }
            },
            "instructions": "Mnemon is a long-term memory store. Use remember/recall for \
                             day-to-day memory, pin for load-bearing facts, feedback to \
                             grade recalled memories, and inject_context to build a \
                             budgeted prompt fragment."
        }))
    }

    fn handle_tools_list(&self) -> Value {
        let tools = vec![
            ToolDescription {
                name: "remember".into(),
                description: "Store a typed memory with tags, importance, and privacy scope.".into(),
                input_schema: tools::memory::remember_schema(),
            },
            ToolDescription {
                name: "recall".into(),
                description: "Hybrid search over stored memories; returns matching items.".into(),
                input_schema: tools::search::recall_schema(),
            },
            ToolDescription {
                name: "hybrid_search".into(),
                description: "Hybrid search with score detail and optional lexical/vector weight overrides.".into(),
                input_schema: tools::search::hybrid_schema(),
            },
            ToolDescription {
                name: "get".into(),
                description: "Fetch one memory by id.".into(),
                input_schema: tools::memory::get_schema(),
            },
            ToolDescription {
                name: "update".into(),
                description: "Patch whitelisted fields of a memory; content changes re-index and re-embed.".into(),
                input_schema: tools::memory::update_schema(),
            },
            ToolDescription {
                name: "forget".into(),
                description: "Soft-delete a memory, or hard-delete with hard=true and confirm=true.".into(),
                input_schema: tools::memory::forget_schema(),
            },
            ToolDescription {
                name: "pin".into(),
                description: "Pin a memory; pinned memories are never hard-deleted by cleanup.".into(),
                input_schema: tools::memory::pin_schema(),
            },
            ToolDescription {
                name: "unpin".into(),
                description: "Unpin a memory.".into(),
                input_schema: tools::memory::pin_schema(),
            },
            ToolDescription {
                name: "link".into(),
                description: "Create a directed typed link between two memories.".into(),
                input_schema: tools::links::link_schema(),
            },
            ToolDescription {
                name: "feedback".into(),
                description: "Record helpful/not-helpful feedback; drives usage counters and review scheduling.".into(),
                input_schema: tools::feedback::schema(),
            },
            ToolDescription {
                name: "export".into(),
                description: "Export memories as JSON, CSV, or Markdown.".into(),
                input_schema: tools::export::schema(),
            },
            ToolDescription {
                name: "inject_context".into(),
                description: "Build a token-budgeted system-message fragment from relevant memories.".into(),
                input_schema: tools::inject::schema(),
            },
            ToolDescription {
                name: "stats_memory".into(),
                description: "Store aggregates: counts by type, pinned, embeddings, database size.".into(),
                input_schema: tools::stats::memory_schema(),
            },
            ToolDescription {
                name: "stats_search".into(),
                description: "Per-query search buckets and latency percentiles.".into(),
                input_schema: tools::stats::search_schema(),
            },
            ToolDescription {
                name: "stats_errors".into(),
                description: "Recent classified errors and windowed severity counts.".into(),
                input_schema: tools::stats::errors_schema(),
            },
        ];
        json!({ "tools": tools })
    }

    async fn handle_tools_call(&mut self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params = params.ok_or_else(|| JsonRpcError::invalid_params("missing params"))?;
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| JsonRpcError::invalid_params("missing tool name"))?
            .to_string();
        let arguments = params.get("arguments").cloned();

        // Backpressure: bounded concurrency, FIFO queue, busy on timeout
        let permit = match tokio::time::timeout(
            self.config.acquire_timeout,
            self.semaphore.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(JsonRpcError::internal_error("semaphore closed"));
            }
            Err(_) => {
                let err = EngineError::Busy("dispatcher queue timeout".into());
                self.record_error(&name, &err);
                return Ok(error_envelope(&err));
            }
        };

        let started = Instant::now();
        let engine = self.engine.clone();
        let tool = name.clone();
        let task =
            tokio::task::spawn_blocking(move || route(&engine, &tool, arguments));

        let outcome = match tokio::time::timeout(self.config.call_deadline, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(EngineError::Fatal(format!("tool panicked: {join_err}"))),
            Err(_) => Err(EngineError::Cancelled),
        };
        drop(permit);

        let elapsed = started.elapsed();
        debug!(tool = %name, elapsed_ms = elapsed.as_millis() as u64, "tool call finished");

        match outcome {
            Ok(result) => Ok(result),
            Err(err) => {
                if matches!(err, EngineError::Fatal(_)) {
                    error!(tool = %name, "fatal error: {}", err);
                    self.fatal = true;
                } else {
                    self.record_error(&name, &err);
                }
                Ok(error_envelope(&err))
            }
        }
    }

    /// Classify and ring-buffer an error. NotFound and Cancelled are
    /// surfaced but never recorded as errors.
    fn record_error(&self, tool: &str, err: &EngineError) {
        let Some((severity, category)) = classify(err) else {
            return;
        };
        self.engine.metrics().errors.record(ErrorRecord {
            at: chrono::Utc::now(),
            code: err.code().to_string(),
            message: err.to_string(),
            severity,
            category,
            tool: Some(tool.to_string()),
        });
    }
}

// ============================================================================
// ROUTING
// ============================================================================

/// Route a tool call to its engine operation; runs on a worker thread.
fn route(engine: &Engine, name: &str, args: Option<Value>) -> Result<Value, EngineError> {
    match name {
        "remember" => tools::memory::execute_remember(engine, args),
        "recall" => tools::search::execute_recall(engine, args),
        "hybrid_search" => tools::search::execute_hybrid_search(engine, args),
        "get" => tools::memory::execute_get(engine, args),
        "update" => tools::memory::execute_update(engine, args),
        "forget" => tools::memory::execute_forget(engine, args),
        "pin" => tools::memory::execute_pin(engine, args),
        "unpin" => tools::memory::execute_unpin(engine, args),
        "link" => tools::links::execute_link(engine, args),
        "feedback" => tools::feedback::execute(engine, args),
        "export" => tools::export::execute(engine, args),
        "inject_context" => tools::inject::execute(engine, args),
        "stats_memory" => tools::stats::execute_memory(engine, args),
        "stats_search" => tools::stats::execute_search(engine, args),
        "stats_errors" => tools::stats::execute_errors(engine, args),
        other => Err(EngineError::Validation(format!("unknown tool: {other}"))),
    }
}

/// Severity and category for the ring buffer; `None` means the error is
/// surfaced but not recorded (NotFound, Cancelled).
fn classify(err: &EngineError) -> Option<(ErrorSeverity, ErrorCategory)> {
    match err {
        EngineError::Validation(_) => Some((ErrorSeverity::Low, ErrorCategory::Validation)),
        EngineError::Conflict(_) => Some((ErrorSeverity::Low, ErrorCategory::Validation)),
        EngineError::Busy(_) => Some((ErrorSeverity::Medium, ErrorCategory::Database)),
        EngineError::ProviderUnavailable(_) => {
            Some((ErrorSeverity::Medium, ErrorCategory::Embedding))
        }
        EngineError::Fatal(_) => Some((ErrorSeverity::Critical, ErrorCategory::Database)),
        EngineError::NotFound(_) | EngineError::Cancelled => None,
        _ => Some((ErrorSeverity::Medium, ErrorCategory::Other)),
    }
}

/// The wire shape for non-fatal failures
fn error_envelope(err: &EngineError) -> Value {
    json!({
        "error": {
            "code": err.code(),
            "message": err.to_string(),
        }
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use mnemon_core::{Config, ProviderKind};
    use tempfile::TempDir;

    fn dispatcher() -> (TempDir, Dispatcher) {
        let dir = TempDir::new().unwrap();
        let config = Config {
            db_path: dir.path().join("memory.db"),
            embedding_provider: ProviderKind::Fallback,
            ..Config::default()
        };
        let engine = Arc::new(Engine::open(config).unwrap());
        (dir, Dispatcher::new(engine))
    }

    fn request(method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: Some("2.0".into()),
            id: Some(json!(1)),
            method: method.into(),
            params: Some(params),
        }
    }

    async fn call_tool(dispatcher: &mut Dispatcher, name: &str, arguments: Value) -> Value {
        let response = dispatcher
            .handle_request(request(
                "tools/call",
                json!({ "name": name, "arguments": arguments }),
            ))
            .await
            .unwrap();
        assert!(response.error.is_none(), "unexpected rpc error");
        response.result.unwrap()
    }

    async fn init(dispatcher: &mut Dispatcher) {
        let response = dispatcher
            .handle_request(request("initialize", json!({})))
            .await
            .unwrap();
        assert!(response.error.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_requires_initialization() {
        let (_dir, mut dispatcher) = dispatcher();
        let response = dispatcher
            .handle_request(request("tools/list", json!({})))
            .await
            .unwrap();
        assert!(response.error.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_tools_list_names() {
        let (_dir, mut dispatcher) = dispatcher();
        init(&mut dispatcher).await;

        let response = dispatcher
            .handle_request(request("tools/list", json!({})))
            .await
            .unwrap();
        let result = response.result.unwrap();
        let names: Vec<&str> = result["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        for expected in [
            "remember",
            "recall",
            "hybrid_search",
            "get",
            "update",
            "forget",
            "pin",
            "unpin",
            "link",
            "feedback",
            "export",
            "inject_context",
            "stats_memory",
            "stats_search",
            "stats_errors",
        ] {
            assert!(names.contains(&expected), "missing tool {expected}");
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_remember_recall_forget_flow() {
        let (_dir, mut dispatcher) = dispatcher();
        init(&mut dispatcher).await;

        let created = call_tool(
            &mut dispatcher,
            "remember",
            json!({
                "content": "검색 가능한 테스트 기억",
                "type": "semantic",
                "importance": 0.8,
            }),
        )
        .await;
        let memory_id = created["memory_id"].as_str().unwrap().to_string();
        assert!(memory_id.starts_with("mem_"));
        assert!(created["created_at"].is_string());

        let recalled = call_tool(&mut dispatcher, "recall", json!({ "query": "테스트 기억" })).await;
        let ids: Vec<&str> = recalled["items"]
            .as_array()
            .unwrap()
            .iter()
            .map(|i| i["id"].as_str().unwrap())
            .collect();
        assert!(ids.contains(&memory_id.as_str()));
        // Flat envelope: items is a plain array at the top level
        assert!(recalled["items"].is_array());
        assert!(recalled["total_count"].is_number());

        let forgotten = call_tool(
            &mut dispatcher,
            "forget",
            json!({ "id": memory_id, "hard": true, "confirm": true }),
        )
        .await;
        assert_eq!(forgotten["success"], json!(true));
        assert!(forgotten["message"].as_str().unwrap().contains("완전히 삭제"));

        let recalled = call_tool(&mut dispatcher, "recall", json!({ "query": "테스트 기억" })).await;
        let ids: Vec<&str> = recalled["items"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|i| i["id"].as_str())
            .collect();
        assert!(!ids.contains(&memory_id.as_str()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_validation_error_envelope() {
        let (_dir, mut dispatcher) = dispatcher();
        init(&mut dispatcher).await;

        let result = call_tool(
            &mut dispatcher,
            "remember",
            json!({ "content": "x", "type": "emotional" }),
        )
        .await;
        assert_eq!(result["error"]["code"], json!("validation"));

        // The validation error landed in the ring buffer
        let errors = call_tool(&mut dispatcher, "stats_errors", json!({})).await;
        assert!(!errors["errors"].as_array().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_not_found_is_surfaced_not_recorded() {
        let (_dir, mut dispatcher) = dispatcher();
        init(&mut dispatcher).await;

        let result = call_tool(&mut dispatcher, "get", json!({ "id": "mem_0_missing" })).await;
        assert_eq!(result["error"]["code"], json!("not_found"));

        let errors = call_tool(&mut dispatcher, "stats_errors", json!({})).await;
        assert!(errors["errors"].as_array().unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pin_and_hybrid_search_shapes() {
        let (_dir, mut dispatcher) = dispatcher();
        init(&mut dispatcher).await;

        let created = call_tool(
            &mut dispatcher,
            "remember",
            json!({ "content": "hybrid dispatcher probe", "type": "semantic" }),
        )
        .await;
        let id = created["memory_id"].as_str().unwrap().to_string();

        let pinned = call_tool(&mut dispatcher, "pin", json!({ "id": id })).await;
        assert_eq!(pinned["success"], json!(true));
        assert_eq!(pinned["memory_id"], json!(id));

        let result = call_tool(
            &mut dispatcher,
            "hybrid_search",
            json!({ "query": "dispatcher probe", "vectorWeight": 0.7, "textWeight": 0.3 }),
        )
        .await;
        assert_eq!(result["search_type"], json!("hybrid"));
        assert!(result["items"].as_array().unwrap().len() <= 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_inject_context_shape() {
        let (_dir, mut dispatcher) = dispatcher();
        init(&mut dispatcher).await;

        call_tool(
            &mut dispatcher,
            "remember",
            json!({ "content": "rollback plan lives in the runbook", "type": "procedural" }),
        )
        .await;

        let result = call_tool(
            &mut dispatcher,
            "inject_context",
            json!({ "query": "rollback plan", "token_budget": 400, "contextType": "task" }),
        )
        .await;
        let content = result["content"].as_array().unwrap();
        assert_eq!(content[0]["role"], json!("system"));
        assert!(content[0]["text"].as_str().unwrap().contains("runbook"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unknown_tool_is_validation() {
        let (_dir, mut dispatcher) = dispatcher();
        init(&mut dispatcher).await;
        let result = call_tool(&mut dispatcher, "dream", json!({})).await;
        assert_eq!(result["error"]["code"], json!("validation"));
    }
}
