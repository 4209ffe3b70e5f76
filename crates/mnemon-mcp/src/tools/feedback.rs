//! Feedback Tool
//!
//! Thumbs up/down on a memory. Appends to the feedback log, bumps the
//! usage counters, and advances the spaced-repetition schedule.

use mnemon_core::{Engine, EngineError, FeedbackKind};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

use super::parse_args;

pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "memory_id": { "type": "string" },
            "helpful": { "type": "boolean", "description": "true = helpful, false = not helpful" },
            "comment": { "type": "string", "description": "Optional free-form note (logged only)" },
            "score": { "type": "number", "minimum": 0, "maximum": 1 }
        },
        "required": ["memory_id", "helpful"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FeedbackArgs {
    memory_id: String,
    helpful: bool,
    comment: Option<String>,
    score: Option<f64>,
}

pub fn execute(engine: &Engine, args: Option<Value>) -> Result<Value, EngineError> {
    let args: FeedbackArgs = parse_args(args)?;

    if let Some(comment) = &args.comment {
        debug!(memory_id = %args.memory_id, helpful = args.helpful, "feedback: {}", comment);
    }

    let kind = if args.helpful {
        FeedbackKind::Helpful
    } else {
        FeedbackKind::NotHelpful
    };
    engine.feedback(&args.memory_id, kind, args.score)?;
    Ok(json!({ "success": true }))
}
