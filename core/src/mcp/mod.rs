// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! MCP tool server: JSON-RPC 2.0 over stdio.
//!
//! Exposes the runner as a single tool, `mpt_generate`, taking one string
//! argument `prompt`. Framing is one JSON object per newline-terminated
//! line and is owned here rather than delegated, so partial reads and
//! malformed frames are handled on our terms: a bad frame produces a
//! JSON-RPC error reply and the loop keeps serving until EOF.
//!
//! Requests are processed strictly in arrival order; the reply always
//! echoes the incoming `id` verbatim, whatever its JSON type.

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::orchestration::Runner;

/// The single tool this server registers.
pub const TOOL_NAME: &str = "mpt_generate";

/// MCP protocol revision reported when the client does not send one.
const PROTOCOL_VERSION: &str = "2024-11-05";

const PARSE_ERROR: i64 = -32700;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;
const INTERNAL_ERROR: i64 = -32603;

#[derive(Deserialize)]
struct Request {
    #[serde(default)]
    id: Option<Value>,
    method: String,
    #[serde(default)]
    params: Value,
}

/// Stdio JSON-RPC server delegating `tools/call` to the runner.
pub struct McpServer {
    runner: Runner,
    server_name: String,
}

impl McpServer {
    /// Create a server over an already-assembled runner.
    pub fn new(runner: Runner, server_name: impl Into<String>) -> Self {
        Self {
            runner,
            server_name: server_name.into(),
        }
    }

    /// Serve on the process stdio streams until stdin reaches EOF.
    pub async fn serve_stdio(&self, cancel: &CancellationToken) -> std::io::Result<()> {
        let reader = BufReader::new(tokio::io::stdin());
        let writer = tokio::io::stdout();
        self.serve(reader, writer, cancel).await
    }

    /// Serve frames from `reader`, writing replies to `writer`.
    ///
    /// Returns when the input reaches EOF or the token is cancelled. Bad
    /// requests never terminate the loop.
    pub async fn serve<R, W>(
        &self,
        mut reader: R,
        mut writer: W,
        cancel: &CancellationToken,
    ) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut line = String::new();
        loop {
            line.clear();
            let read = tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                read = reader.read_line(&mut line) => read?,
            };
            if read == 0 {
                return Ok(()); // EOF
            }
            if line.trim().is_empty() {
                continue;
            }

            if let Some(reply) = self.handle_line(line.trim(), cancel).await {
                let mut frame = serde_json::to_vec(&reply)?;
                frame.push(b'\n');
                writer.write_all(&frame).await?;
                writer.flush().await?;
            }
        }
    }

    /// Process one frame. Returns `None` for notifications, which get no
    /// reply.
    async fn handle_line(&self, line: &str, cancel: &CancellationToken) -> Option<Value> {
        let request: Request = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "malformed json-rpc frame");
                return Some(error_frame(
                    Value::Null,
                    PARSE_ERROR,
                    &format!("parse error: {err}"),
                ));
            }
        };

        debug!(method = %request.method, "mcp request");

        if request.method.starts_with("notifications/") {
            return None;
        }
        // a request without an id is a notification by definition
        let id = request.id.clone()?;

        let reply = match request.method.as_str() {
            "initialize" => result_frame(id, self.initialize_result(&request.params)),
            "ping" => result_frame(id, json!({})),
            "tools/list" => result_frame(id, tools_list_result()),
            "tools/call" => self.tools_call(id, &request.params, cancel).await,
            other => error_frame(id, METHOD_NOT_FOUND, &format!("method not found: {other}")),
        };
        Some(reply)
    }

    fn initialize_result(&self, params: &Value) -> Value {
        let protocol_version = params
            .get("protocolVersion")
            .and_then(Value::as_str)
            .unwrap_or(PROTOCOL_VERSION);
        json!({
            "protocolVersion": protocol_version,
            "capabilities": {
                "tools": {}
            },
            "serverInfo": {
                "name": self.server_name,
                "version": crate::VERSION
            }
        })
    }

    async fn tools_call(&self, id: Value, params: &Value, cancel: &CancellationToken) -> Value {
        let tool = params.get("name").and_then(Value::as_str).unwrap_or("");
        if tool != TOOL_NAME {
            return error_frame(id, INVALID_PARAMS, &format!("unknown tool {tool:?}"));
        }

        let prompt = match params.get("arguments").and_then(|args| args.get("prompt")) {
            None => {
                return error_frame(
                    id,
                    INVALID_PARAMS,
                    "required argument \"prompt\" not found",
                );
            }
            Some(value) => match value.as_str() {
                Some(prompt) => prompt,
                None => {
                    return error_frame(
                        id,
                        INVALID_PARAMS,
                        "argument \"prompt\" is not a string",
                    );
                }
            },
        };

        match self.runner.run(cancel, prompt).await {
            Ok(output) => result_frame(
                id,
                json!({
                    "content": [
                        {
                            "type": "text",
                            "text": output.combined()
                        }
                    ]
                }),
            ),
            Err(err) => error_frame(
                id,
                INTERNAL_ERROR,
                &format!("failed to run prompt through MPT: {err}"),
            ),
        }
    }
}

fn tools_list_result() -> Value {
    json!({
        "tools": [
            {
                "name": TOOL_NAME,
                "description": "Send a prompt to several LLM providers at once and return their combined responses",
                "inputSchema": {
                    "type": "object",
                    "properties": {
                        "prompt": {
                            "type": "string",
                            "description": "The prompt to send to all configured providers"
                        }
                    },
                    "required": ["prompt"]
                }
            }
        ]
    })
}

fn result_frame(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

fn error_frame(id: Value, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message
        }
    })
}
