//! Transport protocol: JSON-RPC types and the stdio loop

pub mod stdio;
pub mod types;
