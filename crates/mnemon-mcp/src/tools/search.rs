//! Search Tools
//!
//! `recall` (items only) and `hybrid_search` (items with score detail).
//! Responses are flat: `{ items: [...] }`, never nested envelopes.

use mnemon_core::{Engine, EngineError, SearchFilters};
use serde::Deserialize;
use serde_json::{Value, json};

use super::parse_args;

// ============================================================================
// SCHEMAS
// ============================================================================

fn filters_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "ids": { "type": "array", "items": { "type": "string" } },
            "types": {
                "type": "array",
                "items": { "type": "string", "enum": ["working", "episodic", "semantic", "procedural"] }
            },
            "privacy_scopes": {
                "type": "array",
                "items": { "type": "string", "enum": ["private", "team", "public"] }
            },
            "pinned": { "type": "boolean" },
            "time_from": { "type": "string", "format": "date-time" },
            "time_to": { "type": "string", "format": "date-time" },
            "project_id": { "type": "string" }
        }
    })
}

pub fn recall_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": { "type": "string", "description": "Search query" },
            "filters": filters_schema(),
            "limit": { "type": "integer", "minimum": 1 }
        },
        "required": ["query"]
    })
}

pub fn hybrid_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": { "type": "string" },
            "filters": filters_schema(),
            "limit": { "type": "integer", "minimum": 1 },
            "vectorWeight": { "type": "number", "minimum": 0 },
            "textWeight": { "type": "number", "minimum": 0 }
        },
        "required": ["query"]
    })
}

// ============================================================================
// ARGUMENTS
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RecallArgs {
    query: String,
    #[serde(default)]
    filters: Option<SearchFilters>,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HybridArgs {
    query: String,
    #[serde(default)]
    filters: Option<SearchFilters>,
    limit: Option<usize>,
    #[serde(rename = "vectorWeight")]
    vector_weight: Option<f64>,
    #[serde(rename = "textWeight")]
    text_weight: Option<f64>,
}

// ============================================================================
// EXECUTION
// ============================================================================

pub fn execute_recall(engine: &Engine, args: Option<Value>) -> Result<Value, EngineError> {
    let args: RecallArgs = parse_args(args)?;
    let filters = args.filters.unwrap_or_default();
    let result = engine.recall(&args.query, &filters, args.limit)?;

    Ok(json!({
        "items": result.items,
        "total_count": result.total_count,
        "query_time": result.query_time,
    }))
}

pub fn execute_hybrid_search(engine: &Engine, args: Option<Value>) -> Result<Value, EngineError> {
    let args: HybridArgs = parse_args(args)?;
    let filters = args.filters.unwrap_or_default();
    let result = engine.hybrid_search(
        &args.query,
        &filters,
        args.limit,
        args.text_weight,
        args.vector_weight,
    )?;

    Ok(json!({
        "items": result.items,
        "total_count": result.total_count,
        "query_time": result.query_time,
        "search_type": result.search_type,
    }))
}
