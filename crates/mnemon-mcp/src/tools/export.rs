//! Export Tool
//!
//! Dump live memories as JSON, CSV, or Markdown under the search filters.

use mnemon_core::{Engine, EngineError, ExportFormat, SearchFilters};
use serde::Deserialize;
use serde_json::{Value, json};

use super::parse_args;

pub fn schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "format": { "type": "string", "enum": ["json", "csv", "markdown"] },
            "filters": {
                "type": "object",
                "description": "Same filter object accepted by recall"
            }
        },
        "required": ["format"]
    })
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ExportArgs {
    format: String,
    #[serde(default)]
    filters: Option<SearchFilters>,
}

pub fn execute(engine: &Engine, args: Option<Value>) -> Result<Value, EngineError> {
    let args: ExportArgs = parse_args(args)?;
    let format = ExportFormat::parse(&args.format)?;
    let result = engine.export(format, &args.filters.unwrap_or_default())?;
    Ok(json!({ "data": result.data, "count": result.count }))
}
