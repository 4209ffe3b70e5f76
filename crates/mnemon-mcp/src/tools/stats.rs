//! Stats Tools
//!
//! `stats_memory` (store aggregates), `stats_search` (adaptive-weight
//! buckets and hit counters), `stats_errors` (ring buffer snapshot with
//! windowed severity counts).

use chrono::Utc;
use mnemon_core::{Engine, EngineError};
use serde_json::{Value, json};

pub fn memory_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

pub fn search_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

pub fn errors_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

pub fn execute_memory(engine: &Engine, _args: Option<Value>) -> Result<Value, EngineError> {
    let stats = engine.stats()?;
    serde_json::to_value(stats).map_err(|e| EngineError::Fatal(e.to_string()))
}

pub fn execute_search(engine: &Engine, _args: Option<Value>) -> Result<Value, EngineError> {
    let buckets = engine.metrics().search.snapshot();
    let latency = engine.metrics().latency.percentiles();
    Ok(json!({
        "queries": buckets,
        "latency": latency,
    }))
}

pub fn execute_errors(engine: &Engine, _args: Option<Value>) -> Result<Value, EngineError> {
    let now = Utc::now();
    let errors = engine.metrics().errors.snapshot();
    let counts = engine.metrics().errors.counts_in_window(now);
    let counts: std::collections::BTreeMap<String, usize> = counts
        .into_iter()
        .map(|(severity, count)| (format!("{severity:?}").to_lowercase(), count))
        .collect();
    Ok(json!({
        "errors": errors,
        "window_counts": counts,
    }))
}
