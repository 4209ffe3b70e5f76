//! stdio Transport
//!
//! Line-delimited JSON-RPC over stdin/stdout. One request per line, one
//! response per line; notifications get no response.

use std::io::{self, BufRead, BufReader, Write};
use tracing::{debug, error, warn};

use super::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use crate::server::Dispatcher;

/// stdio transport loop
pub struct StdioTransport;

impl StdioTransport {
    pub fn new() -> Self {
        Self
    }

    /// Run until stdin closes.
    pub async fn run(self, mut dispatcher: Dispatcher) -> Result<(), io::Error> {
        let stdin = io::stdin();
        let stdout = io::stdout();

        let reader = BufReader::new(stdin.lock());
        let mut stdout = stdout.lock();

        for line in reader.lines() {
            let line = match line {
                Ok(l) => l,
                Err(e) => {
                    error!("failed to read line: {}", e);
                    break;
                }
            };
            if line.is_empty() {
                continue;
            }
            debug!("received {} bytes", line.len());

            let request: JsonRpcRequest = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(e) => {
                    warn!("failed to parse request: {}", e);
                    let response = JsonRpcResponse::error(None, JsonRpcError::parse_error());
                    Self::write_response(&mut stdout, &response)?;
                    continue;
                }
            };

            if let Some(response) = dispatcher.handle_request(request).await {
                Self::write_response(&mut stdout, &response)?;
            }

            // Fatal errors close the session
            if dispatcher.is_fatal() {
                error!("fatal error observed, closing session");
                break;
            }
        }

        Ok(())
    }

    fn write_response(
        stdout: &mut impl Write,
        response: &JsonRpcResponse,
    ) -> Result<(), io::Error> {
        match serde_json::to_string(response) {
            Ok(json) => {
                writeln!(stdout, "{json}")?;
                stdout.flush()
            }
            Err(e) => {
                error!("failed to serialize response: {}", e);
                let fallback = r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"Internal error"}}"#;
                writeln!(stdout, "{fallback}")?;
                stdout.flush()
            }
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}
