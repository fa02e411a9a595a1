//! Transport-independent MCP protocol engine: JSON-RPC envelopes, version
//! negotiation and method routing onto the tool dispatcher.

pub mod rpc;
pub mod server;
