//! Memory CRUD Tools
//!
//! `remember`, `get`, `update`, `forget`, `pin`, `unpin`.

use mnemon_core::{Engine, EngineError, MemoryPatch, MemoryType, PrivacyScope, RememberInput};
use serde::Deserialize;
use serde_json::{Value, json};

use super::parse_args;

// ============================================================================
// SCHEMAS
// ============================================================================

pub fn remember_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "content": { "type": "string", "description": "Text to remember" },
            "type": {
                "type": "string",
                "enum": ["working", "episodic", "semantic", "procedural"],
                "description": "Memory type"
            },
            "tags": { "type": "array", "items": { "type": "string" } },
            "importance": { "type": "number", "minimum": 0, "maximum": 1 },
            "source": { "type": "string" },
            "privacy_scope": { "type": "string", "enum": ["private", "team", "public"] },
            "project_id": { "type": "string" },
            "metadata": {
                "type": "object",
                "properties": {
                    "user_id": { "type": "string" },
                    "agent_id": { "type": "string" }
                }
            }
        },
        "required": ["content", "type"]
    })
}

pub fn get_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "string", "description": "Memory id" }
        },
        "required": ["id"]
    })
}

pub fn update_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "string" },
            "patch": {
                "type": "object",
                "description": "Whitelisted fields: content, type, tags, importance, pinned, privacy_scope, source, project_id"
            }
        },
        "required": ["id", "patch"]
    })
}

pub fn forget_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "string" },
            "hard": { "type": "boolean", "description": "Remove the row entirely" },
            "confirm": { "type": "boolean", "description": "Required for hard deletion" }
        },
        "required": ["id"]
    })
}

pub fn pin_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "string" }
        },
        "required": ["id"]
    })
}

// ============================================================================
// ARGUMENTS
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RememberMetadata {
    user_id: Option<String>,
    agent_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RememberArgs {
    content: String,
    #[serde(rename = "type")]
    memory_type: String,
    #[serde(default)]
    tags: Vec<String>,
    importance: Option<f64>,
    source: Option<String>,
    privacy_scope: Option<String>,
    project_id: Option<String>,
    metadata: Option<RememberMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct IdArgs {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdateArgs {
    id: String,
    patch: MemoryPatch,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ForgetArgs {
    id: String,
    #[serde(default)]
    hard: bool,
    #[serde(default)]
    confirm: bool,
}

// ============================================================================
// EXECUTION
// ============================================================================

pub fn execute_remember(engine: &Engine, args: Option<Value>) -> Result<Value, EngineError> {
    let args: RememberArgs = parse_args(args)?;

    let mut input = RememberInput::new(args.content, MemoryType::parse(&args.memory_type)?);
    input.tags = args.tags;
    if let Some(importance) = args.importance {
        input.importance = importance;
    }
    input.source = args.source;
    if let Some(scope) = args.privacy_scope {
        input.privacy_scope = PrivacyScope::parse(&scope)?;
    }
    input.project_id = args.project_id;
    if let Some(metadata) = args.metadata {
        input.user_id = metadata.user_id;
        input.agent_id = metadata.agent_id;
    }

    let item = engine.remember(&input)?;
    Ok(json!({
        "memory_id": item.id,
        "created_at": item.created_at.to_rfc3339(),
    }))
}

pub fn execute_get(engine: &Engine, args: Option<Value>) -> Result<Value, EngineError> {
    let args: IdArgs = parse_args(args)?;
    let item = engine.get(&args.id)?;
    serde_json::to_value(item).map_err(|e| EngineError::Fatal(e.to_string()))
}

pub fn execute_update(engine: &Engine, args: Option<Value>) -> Result<Value, EngineError> {
    let args: UpdateArgs = parse_args(args)?;
    let item = engine.update(&args.id, &args.patch)?;
    serde_json::to_value(item).map_err(|e| EngineError::Fatal(e.to_string()))
}

pub fn execute_forget(engine: &Engine, args: Option<Value>) -> Result<Value, EngineError> {
    let args: ForgetArgs = parse_args(args)?;
    let outcome = engine.forget(&args.id, args.hard, args.confirm)?;
    Ok(json!({
        "success": outcome.success,
        "message": outcome.message,
    }))
}

pub fn execute_pin(engine: &Engine, args: Option<Value>) -> Result<Value, EngineError> {
    let args: IdArgs = parse_args(args)?;
    let item = engine.pin(&args.id)?;
    Ok(json!({ "success": true, "memory_id": item.id }))
}

pub fn execute_unpin(engine: &Engine, args: Option<Value>) -> Result<Value, EngineError> {
    let args: IdArgs = parse_args(args)?;
    let item = engine.unpin(&args.id)?;
    Ok(json!({ "success": true, "memory_id": item.id }))
}
