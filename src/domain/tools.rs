//! Built-in tools exposed via Model Context Protocol
//!
//! Provides `do_something` and `scan_nmap`. The scan delegates process
//! execution to a [`CommandRunner`].

use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::{json, Number};
use tracing::{info, warn};

use crate::command_runner::{CommandLine, CommandRunner};
use crate::domain::registry::{ToolContent, ToolDefinition, ToolRegistry};
use crate::domain::schema::{FieldSpec, ParameterSchema, ValidatedArguments};
use crate::errors::{RegistryError, ToolError};

pub const DO_SOMETHING_TOOL: &str = "do_something";
pub const SCAN_NMAP_TOOL: &str = "scan_nmap";
pub const DEFAULT_NMAP_BINARY: &str = "nmap";

const EMPTY_SCAN_OUTPUT: &str = "Nmap scan completed with no output";

pub fn register_builtin_tools(
    registry: &mut ToolRegistry,
    runner: Arc<dyn CommandRunner>,
    nmap_binary: &str,
) -> Result<(), RegistryError> {
    registry.register(do_something_tool())?;
    registry.register(scan_nmap_tool(runner, nmap_binary.to_string()))?;
    info!(tools = registry.len(), "tools registered");
    Ok(())
}

pub fn do_something_tool() -> ToolDefinition {
    ToolDefinition::new(
        DO_SOMETHING_TOOL,
        "do something...",
        ParameterSchema::new().field(FieldSpec::string("name").with_default(json!("John Doe"))),
        |args: ValidatedArguments| {
            let name = args.str("name").unwrap_or_default().to_string();
            async move { Ok(vec![ToolContent::text(format!("Hello, {name}!"))]) }.boxed()
        },
    )
}

pub fn scan_nmap_schema() -> ParameterSchema {
    ParameterSchema::new()
        .field(FieldSpec::string("target").describe("Host, IP address or network to scan"))
        .field(
            FieldSpec::string("ports")
                .optional()
                .describe("Port specification, e.g. \"22-80\" or \"80,443\""),
        )
        .field(
            FieldSpec::enumeration("scanType", &["quick", "full", "version"])
                .with_default(json!("quick")),
        )
        .field(
            FieldSpec::number("timing")
                .range(0.0, 5.0)
                .with_default(json!(3))
                .describe("Timing template T0-T5"),
        )
        .field(FieldSpec::string("additionalFlags").optional())
}

pub fn scan_nmap_tool(runner: Arc<dyn CommandRunner>, nmap_binary: String) -> ToolDefinition {
    ToolDefinition::new(
        SCAN_NMAP_TOOL,
        "Run an NMAP scan on a target. Supports various scan types and configurations.",
        scan_nmap_schema(),
        move |args: ValidatedArguments| {
            let runner = Arc::clone(&runner);
            let command = build_nmap_command(&nmap_binary, &args);
            async move { run_nmap_scan(runner.as_ref(), command).await }.boxed()
        },
    )
}

/// `<binary> -T<timing> <scan type flag> [-p<ports>] [additionalFlags] <target>`
pub fn build_nmap_command(binary: &str, args: &ValidatedArguments) -> CommandLine {
    let timing = args
        .number("timing")
        .and_then(Number::as_f64)
        .map_or_else(|| "3".to_string(), format_timing);
    let mut command = CommandLine::new(binary).arg(format!("-T{timing}"));

    command = match args.str("scanType") {
        Some("full") => command.arg("-p-"),
        Some("version") => command.arg("-sV"),
        _ => command.arg("-F"),
    };

    if let Some(ports) = args.str("ports").filter(|ports| !ports.is_empty()) {
        command = command.arg(format!("-p{ports}"));
    }

    if let Some(flags) = args.str("additionalFlags").filter(|flags| !flags.is_empty()) {
        command = command.split_args(flags);
    }

    command.arg(args.str("target").unwrap_or_default())
}

/// Whole values render without a fractional part, so `4.0` becomes `-T4`.
fn format_timing(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

async fn run_nmap_scan(
    runner: &dyn CommandRunner,
    command: CommandLine,
) -> Result<Vec<ToolContent>, ToolError> {
    info!(command = %command, "running nmap scan");

    let output = runner
        .run(&command)
        .await
        .map_err(|err| ToolError::execution(format!("Nmap scan failed: {err}")))?;

    if !output.stderr.trim().is_empty() {
        warn!(stderr = %output.stderr.trim(), "nmap wrote to stderr");
    }

    let text = if output.stdout.is_empty() {
        EMPTY_SCAN_OUTPUT.to_string()
    } else {
        output.stdout
    };
    Ok(vec![ToolContent::text(text)])
}
