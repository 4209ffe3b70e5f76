//! Tool Implementations
//!
//! One module per tool family. Each tool exposes a JSON schema for
//! `tools/list` and a blocking `execute` the dispatcher offloads to a
//! worker thread.

pub mod export;
pub mod feedback;
pub mod inject;
pub mod links;
pub mod memory;
pub mod search;
pub mod stats;

use mnemon_core::EngineError;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Parse tool arguments into a typed struct; schema violations are
/// validation errors with the serde detail attached.
pub fn parse_args<T: DeserializeOwned>(args: Option<Value>) -> Result<T, EngineError> {
    let value = args.unwrap_or(Value::Null);
    serde_json::from_value(value).map_err(|e| EngineError::Validation(e.to_string()))
}

// ============================================================================
// TESTS
// ============================================================================
