use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {message}")]
    BadRequest {
        code: &'static str,
        message: String,
    },
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub details: serde_json::Value,
}

impl AppError {
    pub fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::BadRequest {
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            Self::BadRequest { code, message } => (StatusCode::BAD_REQUEST, code, message),
        };

        (
            status,
            Json(ErrorResponse {
                code: code.to_string(),
                message,
                details: json!({}),
            }),
        )
            .into_response()
    }
}

/// A single failing field reported by the schema validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Every field that failed validation, in schema order followed by unknown fields.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid arguments: {}", join_field_errors(.errors))]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().map(|error| error.field.as_str())
    }
}

fn join_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("tool already registered: {0}")]
    DuplicateName(String),
}

/// Failures produced while dispatching a tool call. These never leave the
/// dispatcher as errors; they are folded into a failure result.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error(transparent)]
    Validation(#[from] ValidationErrors),
    #[error("{0}")]
    HandlerExecution(String),
    #[error("timeout: tool '{tool}' exceeded {seconds}s")]
    Timeout { tool: String, seconds: u64 },
}

impl ToolError {
    pub fn execution(message: impl Into<String>) -> Self {
        Self::HandlerExecution(message.into())
    }
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no stream endpoint is bound")]
    NoBoundEndpoint,
    #[error("stream endpoint closed")]
    Closed,
    #[error("pipe i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_list_every_field() {
        let error = ValidationErrors {
            errors: vec![
                FieldError {
                    field: "target".to_string(),
                    message: "is required".to_string(),
                },
                FieldError {
                    field: "timing".to_string(),
                    message: "must be <= 5".to_string(),
                },
            ],
        };

        assert_eq!(
            error.to_string(),
            "invalid arguments: target: is required; timing: must be <= 5"
        );
        assert_eq!(error.fields().collect::<Vec<_>>(), vec!["target", "timing"]);
    }

    #[test]
    fn timeout_message_names_tool() {
        let error = ToolError::Timeout {
            tool: "scan_nmap".to_string(),
            seconds: 30,
        };
        assert_eq!(error.to_string(), "timeout: tool 'scan_nmap' exceeded 30s");
    }
}
