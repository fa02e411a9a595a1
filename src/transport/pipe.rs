//! stdio transport for the MCP server.
//!
//! - Messages are UTF-8 encoded JSON-RPC, one per line
//! - stdin carries requests, stdout carries responses
//! - stderr is left for logging
//!
//! Requests are handled one at a time, so responses leave in the order the
//! requests arrived. The session lasts until the input side reaches EOF.

use serde_json::Value;
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tracing::{debug, info, warn};

use crate::errors::TransportError;
use crate::mcp::rpc::{json_rpc_error, INVALID_REQUEST, PARSE_ERROR};
use crate::mcp::server::McpServer;

/// Longest accepted line, excluding its terminator.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// One line read from the input side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Line(Vec<u8>),
    /// The line was longer than the frame limit and has been skipped.
    Oversized,
}

pub struct PipeSession<R, W> {
    reader: R,
    writer: W,
    max_frame_bytes: usize,
}

impl PipeSession<BufReader<tokio::io::Stdin>, tokio::io::Stdout> {
    /// Binds to the process's own stdin and stdout.
    pub fn stdio() -> Self {
        Self::new(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
    }
}

impl<R, W> PipeSession<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    pub fn with_max_frame_bytes(mut self, limit: usize) -> Self {
        self.max_frame_bytes = limit;
        self
    }

    /// Reads the next line as raw bytes, without its terminator. `None` on EOF.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        let mut line = Vec::new();
        // One byte past the limit for the terminator.
        let budget = self.max_frame_bytes as u64 + 1;
        let bytes_read = (&mut self.reader)
            .take(budget)
            .read_until(b'\n', &mut line)
            .await?;

        if bytes_read == 0 {
            return Ok(None);
        }

        if line.last() == Some(&b'\n') {
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
        } else if line.len() > self.max_frame_bytes {
            self.skip_rest_of_line().await?;
            return Ok(Some(Frame::Oversized));
        }

        Ok(Some(Frame::Line(line)))
    }

    async fn skip_rest_of_line(&mut self) -> Result<(), TransportError> {
        loop {
            let (found, used) = {
                let available = self.reader.fill_buf().await?;
                if available.is_empty() {
                    return Ok(());
                }
                match available.iter().position(|byte| *byte == b'\n') {
                    Some(index) => (true, index + 1),
                    None => (false, available.len()),
                }
            };
            self.reader.consume(used);
            if found {
                return Ok(());
            }
        }
    }

    pub async fn write_message(&mut self, message: &Value) -> Result<(), TransportError> {
        // Compact serialization never contains raw newlines.
        let json = serde_json::to_string(message)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;

        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Serves requests until EOF. I/O failures end the session.
    pub async fn run(&mut self, server: &McpServer) -> Result<(), TransportError> {
        info!("pipe session connected");

        while let Some(frame) = self.read_frame().await? {
            let response = match frame {
                Frame::Oversized => {
                    warn!(limit = self.max_frame_bytes, "pipe message exceeds frame limit");
                    Some(json_rpc_error(None, INVALID_REQUEST, "Request too large"))
                }
                Frame::Line(line) if line.iter().all(u8::is_ascii_whitespace) => continue,
                // Invalid UTF-8 is rejected by the JSON parser like any other bad input.
                Frame::Line(line) => match serde_json::from_slice::<Value>(&line) {
                    Ok(payload) => server.handle_payload(payload).await,
                    Err(err) => {
                        warn!(error = %err, "failed to parse pipe message");
                        Some(json_rpc_error(None, PARSE_ERROR, "Parse error"))
                    }
                },
            };

            match response {
                Some(response) => self.write_message(&response).await?,
                None => debug!("no response for notification"),
            }
        }

        info!("pipe session closed");
        Ok(())
    }

    pub fn into_writer(self) -> W {
        self.writer
    }
}
