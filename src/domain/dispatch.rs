//! Invocation dispatcher
//!
//! Single choke point for every tool call: lookup, strict validation, bounded
//! execution and normalization of any failure into a [`ToolResult::Failure`].

use std::{sync::Arc, time::Duration};

use serde_json::Value;
use tokio::{sync::Semaphore, task::JoinHandle};
use tracing::{debug, warn};

use crate::domain::registry::{ToolContent, ToolRegistry};
use crate::errors::ToolError;

#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRequest {
    pub tool_name: String,
    pub raw_arguments: Value,
}

impl InvocationRequest {
    pub fn new(tool_name: impl Into<String>, raw_arguments: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            raw_arguments,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolResult {
    Success { content: Vec<ToolContent> },
    Failure { message: String },
}

impl ToolResult {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure { .. })
    }
}

impl From<ToolError> for ToolResult {
    fn from(error: ToolError) -> Self {
        Self::Failure {
            message: error.to_string(),
        }
    }
}

pub const DEFAULT_MAX_CONCURRENT_CALLS: usize = 4;

#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    permits: Arc<Semaphore>,
    timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            permits: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT_CALLS)),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_concurrent_calls(mut self, limit: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(limit.max(1)));
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Runs one tool call. Never returns an error and never panics on behalf
    /// of a handler.
    pub async fn dispatch(&self, request: InvocationRequest) -> ToolResult {
        let result = match self.execute(&request).await {
            Ok(content) => ToolResult::Success { content },
            Err(error) => {
                warn!(tool = %request.tool_name, error = %error, "tool call failed");
                error.into()
            }
        };

        debug!(
            tool = %request.tool_name,
            outcome = if result.is_failure() { "failure" } else { "success" },
            "tool call dispatched"
        );
        result
    }

    async fn execute(&self, request: &InvocationRequest) -> Result<Vec<ToolContent>, ToolError> {
        let definition = self
            .registry
            .lookup(&request.tool_name)
            .ok_or_else(|| ToolError::UnknownTool(request.tool_name.clone()))?;

        let arguments = definition.schema.validate(&request.raw_arguments)?;

        // Closed only if the semaphore is closed, which never happens.
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| ToolError::execution("tool call limiter is closed"))?;

        // The permit lives inside the task, so it is held until the handler
        // future is actually dropped. A panicking handler surfaces as a JoinError.
        let handler = (definition.handler)(arguments);
        let mut task = AbortOnDrop(tokio::spawn(async move {
            let _permit = permit;
            handler.await
        }));

        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task.0).await {
                Ok(joined) => joined,
                Err(_) => {
                    return Err(ToolError::Timeout {
                        tool: request.tool_name.clone(),
                        seconds: limit.as_secs(),
                    });
                }
            },
            None => (&mut task.0).await,
        };

        joined.map_err(|join_error| {
            if join_error.is_panic() {
                ToolError::execution(format!("tool '{}' panicked", request.tool_name))
            } else {
                ToolError::execution(format!("tool '{}' was cancelled", request.tool_name))
            }
        })?
    }
}

/// Aborts the handler task when the dispatch that started it goes away,
/// whether it finished, timed out or was cancelled by its caller.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::FutureExt;
    use serde_json::json;

    use super::*;
    use crate::domain::registry::ToolDefinition;
    use crate::domain::schema::{FieldSpec, ParameterSchema, ValidatedArguments};

    fn dispatcher() -> Dispatcher {
        let mut registry = ToolRegistry::new();
        registry
            .register(ToolDefinition::new(
                "greet",
                "greets",
                ParameterSchema::new()
                    .field(FieldSpec::string("name").with_default(json!("John Doe"))),
                |args: ValidatedArguments| {
                    let name = args.str("name").unwrap_or_default().to_string();
                    async move { Ok(vec![ToolContent::text(format!("Hello, {name}!"))]) }.boxed()
                },
            ))
            .expect("register greet");
        registry
            .register(ToolDefinition::new(
                "explode",
                "always fails",
                ParameterSchema::new(),
                |_args: ValidatedArguments| {
                    async { Err(ToolError::execution("exit status 1")) }.boxed()
                },
            ))
            .expect("register explode");
        registry
            .register(ToolDefinition::new(
                "panic",
                "panics",
                ParameterSchema::new(),
                |_args: ValidatedArguments| async { panic!("handler bug") }.boxed(),
            ))
            .expect("register panic");
        registry
            .register(ToolDefinition::new(
                "sleep",
                "never finishes in time",
                ParameterSchema::new(),
                |_args: ValidatedArguments| {
                    async {
                        tokio::time::sleep(Duration::from_secs(3600)).await;
                        Ok(vec![])
                    }
                    .boxed()
                },
            ))
            .expect("register sleep");

        Dispatcher::new(Arc::new(registry))
    }

    #[tokio::test]
    async fn unknown_tool_is_a_failure_naming_the_tool() {
        let result = dispatcher()
            .dispatch(InvocationRequest::new("missing_tool", json!({})))
            .await;

        assert_eq!(
            result,
            ToolResult::Failure {
                message: "unknown tool: missing_tool".to_string()
            }
        );
    }

    #[tokio::test]
    async fn success_is_deterministic() {
        let dispatcher = dispatcher();
        let first = dispatcher
            .dispatch(InvocationRequest::new("greet", json!({ "name": "Ada" })))
            .await;
        let second = dispatcher
            .dispatch(InvocationRequest::new("greet", json!({ "name": "Ada" })))
            .await;

        assert_eq!(
            first,
            ToolResult::Success {
                content: vec![ToolContent::text("Hello, Ada!")]
            }
        );
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn validation_failure_describes_fields() {
        let result = dispatcher()
            .dispatch(InvocationRequest::new("greet", json!({ "name": 7, "age": 3 })))
            .await;

        let ToolResult::Failure { message } = result else {
            panic!("expected failure");
        };
        assert!(message.contains("name: expected string"));
        assert!(message.contains("age: is not a recognized parameter"));
    }

    #[tokio::test]
    async fn handler_error_and_panic_become_failures() {
        let dispatcher = dispatcher();

        let failed = dispatcher
            .dispatch(InvocationRequest::new("explode", Value::Null))
            .await;
        assert_eq!(
            failed,
            ToolResult::Failure {
                message: "exit status 1".to_string()
            }
        );

        let panicked = dispatcher
            .dispatch(InvocationRequest::new("panic", Value::Null))
            .await;
        assert_eq!(
            panicked,
            ToolResult::Failure {
                message: "tool 'panic' panicked".to_string()
            }
        );

        let next = dispatcher
            .dispatch(InvocationRequest::new("greet", Value::Null))
            .await;
        assert_eq!(
            next,
            ToolResult::Success {
                content: vec![ToolContent::text("Hello, John Doe!")]
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_handler_times_out() {
        let dispatcher = dispatcher().with_timeout(Some(Duration::from_secs(2)));

        let result = dispatcher
            .dispatch(InvocationRequest::new("sleep", Value::Null))
            .await;
        assert_eq!(
            result,
            ToolResult::Failure {
                message: "timeout: tool 'sleep' exceeded 2s".to_string()
            }
        );
    }

    #[tokio::test]
    async fn limiter_serializes_calls_when_limit_is_one() {
        static ACTIVE: AtomicUsize = AtomicUsize::new(0);
        static PEAK: AtomicUsize = AtomicUsize::new(0);

        let mut registry = ToolRegistry::new();
        registry
            .register(ToolDefinition::new(
                "track",
                "tracks concurrency",
                ParameterSchema::new(),
                |_args: ValidatedArguments| {
                    async {
                        let now = ACTIVE.fetch_add(1, Ordering::SeqCst) + 1;
                        PEAK.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        ACTIVE.fetch_sub(1, Ordering::SeqCst);
                        Ok(vec![])
                    }
                    .boxed()
                },
            ))
            .expect("register track");
        let dispatcher = Dispatcher::new(Arc::new(registry)).with_max_concurrent_calls(1);

        let calls = (0..4).map(|_| dispatcher.dispatch(InvocationRequest::new("track", Value::Null)));
        let results = futures_util::future::join_all(calls).await;

        assert!(results.iter().all(|result| !result.is_failure()));
        assert_eq!(PEAK.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_dispatch_stops_its_handler_and_frees_the_slot() {
        static ACTIVE: AtomicUsize = AtomicUsize::new(0);
        static PEAK: AtomicUsize = AtomicUsize::new(0);
        static FINISHED: AtomicUsize = AtomicUsize::new(0);

        struct Active;

        impl Drop for Active {
            fn drop(&mut self) {
                ACTIVE.fetch_sub(1, Ordering::SeqCst);
            }
        }

        let mut registry = ToolRegistry::new();
        registry
            .register(ToolDefinition::new(
                "slow",
                "outlives its caller",
                ParameterSchema::new(),
                |_args: ValidatedArguments| {
                    async {
                        let now = ACTIVE.fetch_add(1, Ordering::SeqCst) + 1;
                        let _active = Active;
                        PEAK.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(300)).await;
                        FINISHED.fetch_add(1, Ordering::SeqCst);
                        Ok(vec![])
                    }
                    .boxed()
                },
            ))
            .expect("register slow");
        let dispatcher = Dispatcher::new(Arc::new(registry))
            .with_max_concurrent_calls(1)
            .with_timeout(Some(Duration::from_millis(100)));

        for _ in 0..2 {
            let dropped = tokio::time::timeout(
                Duration::from_millis(20),
                dispatcher.dispatch(InvocationRequest::new("slow", Value::Null)),
            )
            .await;
            assert!(dropped.is_err(), "caller gives up before the handler finishes");
        }

        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(PEAK.load(Ordering::SeqCst), 1);
        assert_eq!(ACTIVE.load(Ordering::SeqCst), 0);
        assert_eq!(FINISHED.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.permits.available_permits(), 1);
    }
}
