//! Session transports
//!
//! `stream` holds the single server-sent-events binding used by the HTTP
//! routes; `pipe` serves one client over stdin/stdout for the process lifetime.

pub mod pipe;
pub mod stream;
