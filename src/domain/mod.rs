//! Tool-serving core
//!
//! Schemas and validation, the tool registry, the invocation dispatcher and
//! the built-in tools. Nothing here knows about transports.

pub mod dispatch;
pub mod registry;
pub mod schema;
pub mod tools;
