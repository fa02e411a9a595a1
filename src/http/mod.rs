//! HTTP transport layer for the Model Context Protocol
//!
//! Provides the external API routing: the `/mcp/sse` push stream, the
//! `/mcp/messages` request leg, and metadata endpoints.

pub mod handlers;
