//! Link Tool
//!
//! Directed typed relations between memories; the triple is unique.

use mnemon_core::{Engine, EngineError, LinkRelation};
use serde::Deserialize;
use serde_json::{Value, json};

use super::parse_args;

pub fn link_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "source_id": { "type": "string" },
            "target_id": { "type": "string" },
            "relation_type": {
                "type": "string",
                "enum": ["cause_of", "derived_from", "duplicates", "contradicts"]
            }
        },
        "required": ["source_id", "target_id", "relation_type"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LinkArgs {
    source_id: String,
    target_id: String,
    relation_type: String,
}

pub fn execute_link(engine: &Engine, args: Option<Value>) -> Result<Value, EngineError> {
    let args: LinkArgs = parse_args(args)?;
    let relation = LinkRelation::parse(&args.relation_type)?;
    engine.link(&args.source_id, &args.target_id, relation)?;
    Ok(json!({ "success": true }))
}
