use std::{env, net::SocketAddr, str::FromStr, time::Duration};

use thiserror::Error;

use crate::domain::{dispatch::DEFAULT_MAX_CONCURRENT_CALLS, tools::DEFAULT_NMAP_BINARY};

pub const DEFAULT_BIND_PORT: u16 = 3001;
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Sse,
    Stdio,
}

impl FromStr for TransportKind {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sse" | "http" => Ok(Self::Sse),
            "stdio" | "pipe" => Ok(Self::Stdio),
            _ => Err(ConfigError::InvalidTransport),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub transport: TransportKind,
    pub bind_addr: String,
    pub bind_port: u16,
    pub nmap_binary: String,
    pub tool_timeout: Option<Duration>,
    pub max_concurrent_calls: usize,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("MCP_TRANSPORT must be one of: sse, stdio")]
    InvalidTransport,
    #[error("BIND_PORT must be a valid u16")]
    InvalidPort,
    #[error("TOOL_TIMEOUT_SECS must be a non-negative integer")]
    InvalidTimeout,
    #[error("MCP_MAX_CONCURRENT_CALLS must be a positive integer")]
    InvalidConcurrency,
    #[error("invalid bind address or port")]
    InvalidSocket,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from any key lookup; empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let transport = get("MCP_TRANSPORT")
            .map(|value| value.parse::<TransportKind>())
            .transpose()?
            .unwrap_or(TransportKind::Sse);
        let bind_addr = get("BIND_ADDR").unwrap_or_else(|| "127.0.0.1".to_string());
        let bind_port = get("BIND_PORT")
            .map(|value| value.parse::<u16>().map_err(|_| ConfigError::InvalidPort))
            .transpose()?
            .unwrap_or(DEFAULT_BIND_PORT);
        let nmap_binary = get("NMAP_BIN").unwrap_or_else(|| DEFAULT_NMAP_BINARY.to_string());
        let timeout_secs = get("TOOL_TIMEOUT_SECS")
            .map(|value| value.parse::<u64>().map_err(|_| ConfigError::InvalidTimeout))
            .transpose()?
            .unwrap_or(DEFAULT_TOOL_TIMEOUT_SECS);
        let max_concurrent_calls = get("MCP_MAX_CONCURRENT_CALLS")
            .map(|value| {
                value
                    .parse::<usize>()
                    .ok()
                    .filter(|limit| *limit > 0)
                    .ok_or(ConfigError::InvalidConcurrency)
            })
            .transpose()?
            .unwrap_or(DEFAULT_MAX_CONCURRENT_CALLS);

        let config = Self {
            transport,
            bind_addr,
            bind_port,
            nmap_binary,
            tool_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            max_concurrent_calls,
        };

        if config.transport == TransportKind::Sse {
            let _ = config.bind_socket()?;
        }
        Ok(config)
    }

    pub fn bind_socket(&self) -> Result<SocketAddr, ConfigError> {
        format!("{}:{}", self.bind_addr, self.bind_port)
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::InvalidSocket)
    }
}
