//! Context Injection Tool
//!
//! Returns `{ content: [{role: "system", text}] }` sized to the token
//! budget.

use mnemon_core::{Engine, EngineError, InjectOptions};
use serde::Deserialize;
use serde_json::{Value, json};

use super::parse_args;

pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "query": { "type": "string" },
            "token_budget": { "type": "integer", "minimum": 1, "default": 1200 },
            "max_memories": { "type": "integer", "minimum": 1, "default": 5 },
            "contextType": { "type": "string", "enum": ["conversation", "task", "general"] },
            "memoryTypes": {
                "type": "array",
                "items": { "type": "string", "enum": ["working", "episodic", "semantic", "procedural"] }
            },
            "recentDays": { "type": "integer", "minimum": 0 },
            "importanceThreshold": { "type": "number", "minimum": 0, "maximum": 1 },
            "pinnedOnly": { "type": "boolean" }
        },
        "required": ["query"]
    })
}

#[derive(Debug, Deserialize)]
struct InjectArgs {
    query: String,
    #[serde(flatten)]
    options: InjectOptions,
}

pub fn execute(engine: &Engine, args: Option<Value>) -> Result<Value, EngineError> {
    let args: InjectArgs = parse_args(args)?;
    let result = engine.inject_context(&args.query, &args.options)?;
    Ok(json!({ "content": result.content }))
}
