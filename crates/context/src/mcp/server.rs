//! MCP stdio server
//!
//! Newline-delimited JSON-RPC 2.0 on stdin/stdout. Stdout carries protocol
//! messages only; logs go to stderr.

use super::protocol::{
    error_codes, methods, tool_definition, JsonRpcId, JsonRpcRequest, JsonRpcResponse, TOOL_NAME,
};
use crate::engine::{AnswerEngine, QueryResponse};
use manualqa_common::config::McpConfig;
use manualqa_common::{MCP_PROTOCOL_VERSION, VERSION};
use serde_json::{json, Value};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

/// Read one `\n`-terminated line of at most `max_bytes`, not counting the
/// terminator.
///
/// Returns the number of bytes consumed (0 at EOF). An oversized line is
/// drained up to its newline and reported as `InvalidData`, so the next
/// call starts on a fresh message.
pub async fn read_line_bounded<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut String,
    max_bytes: usize,
) -> io::Result<usize> {
    let mut raw = Vec::new();
    let mut consumed = 0usize;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            break;
        }

        let newline = available.iter().position(|&b| b == b'\n');
        let take = newline.map_or(available.len(), |pos| pos + 1);
        let payload = newline.unwrap_or(available.len());

        if raw.len() + payload > max_bytes {
            reader.consume(take);
            consumed += take;
            if newline.is_none() {
                consumed += drain_line(reader).await?;
            }
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("line exceeds {} bytes ({} consumed)", max_bytes, consumed),
            ));
        }

        raw.extend_from_slice(&available[..take]);
        reader.consume(take);
        consumed += take;

        if newline.is_some() {
            break;
        }
    }

    buf.push_str(&String::from_utf8_lossy(&raw));
    Ok(consumed)
}

async fn drain_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<usize> {
    let mut drained = 0;
    loop {
        let rest = reader.fill_buf().await?;
        if rest.is_empty() {
            return Ok(drained);
        }
        match rest.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                reader.consume(pos + 1);
                return Ok(drained + pos + 1);
            }
            None => {
                let len = rest.len();
                reader.consume(len);
                drained += len;
            }
        }
    }
}

pub struct McpServer {
    engine: Arc<AnswerEngine>,
    config: McpConfig,
}

impl McpServer {
    pub fn new(engine: Arc<AnswerEngine>, config: McpConfig) -> Self {
        Self { engine, config }
    }

    /// Serve stdin/stdout until EOF
    pub async fn serve_stdio(&self) -> io::Result<()> {
        let reader = BufReader::new(tokio::io::stdin());
        let writer = tokio::io::stdout();
        self.serve(reader, writer).await
    }

    /// Serve one newline-delimited JSON-RPC stream until EOF
    pub async fn serve<R, W>(&self, mut reader: R, mut writer: W) -> io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        info!(
            server = %self.config.server_name,
            protocol = MCP_PROTOCOL_VERSION,
            "MCP server listening on stdio"
        );

        loop {
            let mut line = String::new();
            let read =
                read_line_bounded(&mut reader, &mut line, self.config.max_line_bytes).await;
            let response = match read {
                Ok(0) => break,
                Ok(_) => self.handle_line(&line).await,
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    warn!(error = %e, "Rejected oversized message");
                    Some(JsonRpcResponse::error(
                        None,
                        error_codes::PARSE_ERROR,
                        format!("Parse error: {}", e),
                    ))
                }
                Err(e) => return Err(e),
            };

            if let Some(response) = response {
                let mut encoded = serde_json::to_vec(&response).map_err(io::Error::other)?;
                encoded.push(b'\n');
                writer.write_all(&encoded).await?;
                writer.flush().await?;
            }
        }

        info!("MCP client closed the stream");
        Ok(())
    }

    /// Handle one raw line; `None` when nothing must be written back
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }

        let value: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Received invalid JSON");
                return Some(JsonRpcResponse::error(
                    None,
                    error_codes::PARSE_ERROR,
                    format!("Parse error: {}", e),
                ));
            }
        };

        let id = value
            .get("id")
            .and_then(|v| serde_json::from_value::<JsonRpcId>(v.clone()).ok());
        let request: JsonRpcRequest = match serde_json::from_value(value) {
            Ok(r) => r,
            Err(e) => {
                return id.map(|id| {
                    JsonRpcResponse::error(
                        Some(id),
                        error_codes::INVALID_REQUEST,
                        format!("Invalid request: {}", e),
                    )
                });
            }
        };

        self.handle_request(request).await
    }

    /// Dispatch a parsed request. Notifications are never answered.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if request.is_notification() {
            debug!(method = %request.method, "Notification received");
            return None;
        }
        let id = request.id.clone();

        if request.jsonrpc != "2.0" {
            return Some(JsonRpcResponse::error(
                id,
                error_codes::INVALID_REQUEST,
                "Invalid request: jsonrpc must be \"2.0\"",
            ));
        }

        let response = match request.method.as_str() {
            methods::INITIALIZE => JsonRpcResponse::success(id, self.initialize_result()),
            methods::TOOLS_LIST => {
                JsonRpcResponse::success(id, json!({ "tools": [tool_definition()] }))
            }
            methods::TOOLS_CALL => self.call_tool(id, request.params).await,
            methods::PING => JsonRpcResponse::success(id, json!({})),
            other => {
                debug!(method = %other, "Unknown method");
                JsonRpcResponse::error(
                    id,
                    error_codes::METHOD_NOT_FOUND,
                    format!("Method not found: {}", other),
                )
            }
        };
        Some(response)
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": self.config.server_name,
                "version": VERSION
            }
        })
    }

    async fn call_tool(&self, id: Option<JsonRpcId>, params: Option<Value>) -> JsonRpcResponse {
        let params = params.unwrap_or(Value::Null);
        let name = params.get("name").and_then(Value::as_str).unwrap_or_default();
        if name != TOOL_NAME {
            return JsonRpcResponse::error(
                id,
                error_codes::INVALID_PARAMS,
                format!("Unknown tool: {}", name),
            );
        }

        let query = params
            .get("arguments")
            .and_then(|args| args.get("query"))
            .and_then(Value::as_str)
            .map(str::trim)
            .unwrap_or_default();
        if query.is_empty() {
            return JsonRpcResponse::error(
                id,
                error_codes::INVALID_PARAMS,
                "Invalid params: 'query' must be a non-empty string",
            );
        }

        info!(tool = TOOL_NAME, id = ?id, "Tool call");
        let report = self.engine.answer(query).await;

        match serde_json::to_value(&report.response) {
            Ok(structured) => JsonRpcResponse::success(
                id,
                json!({
                    "content": [{ "type": "text", "text": render_text(&report.response) }],
                    "structuredContent": structured,
                    "isError": false
                }),
            ),
            Err(e) => JsonRpcResponse::error(
                id,
                error_codes::INTERNAL_ERROR,
                format!("Internal error: {}", e),
            ),
        }
    }
}

/// Human-readable text block: the answer and its sources, or the refusal
fn render_text(response: &QueryResponse) -> String {
    match (&response.answer, &response.message) {
        (Some(answer), _) => {
            let mut text = answer.clone();
            if !response.citations.is_empty() {
                text.push_str("\n\nSources:");
                for citation in &response.citations {
                    text.push_str(&format!("\n[{}] {}", citation.marker, citation.label));
                    if let Some(image) = &citation.locator.image {
                        text.push_str(&format!("\n    Image Ref: {}", image));
                    }
                }
            }
            text
        }
        (None, Some(message)) => message.clone(),
        (None, None) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::guide_engine;
    use manualqa_common::generation::ExtractiveGenerator;

    async fn server() -> McpServer {
        let engine = guide_engine(Arc::new(ExtractiveGenerator::default())).await;
        McpServer::new(Arc::new(engine), McpConfig::default())
    }

    async fn exchange(server: &McpServer, input: &str) -> Vec<Value> {
        let mut output = Vec::new();
        server
            .serve(BufReader::new(input.as_bytes()), &mut output)
            .await
            .unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_handshake_and_tool_listing() {
        let server = server().await;
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":3,"method":"ping"}"#,
            "\n",
        );

        let replies = exchange(&server, input).await;
        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0]["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(replies[1]["result"]["tools"][0]["name"], TOOL_NAME);
        assert_eq!(replies[2]["id"], 3);
        assert_eq!(replies[2]["result"], json!({}));
    }

    #[tokio::test]
    async fn test_protocol_errors() {
        let server = server().await;
        let input = concat!(
            "{not json\n",
            r#"{"jsonrpc":"2.0","id":7,"method":"resources/list"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":8,"method":"tools/call","params":{"name":"delete_manual","arguments":{}}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":9,"method":"tools/call","params":{"name":"search_technical_manual","arguments":{"query":"  "}}}"#,
            "\n",
        );

        let replies = exchange(&server, input).await;
        assert_eq!(replies.len(), 4);
        assert_eq!(replies[0]["error"]["code"], -32700);
        assert!(replies[0]["id"].is_null());
        assert_eq!(replies[1]["error"]["code"], -32601);
        assert_eq!(replies[2]["error"]["code"], -32602);
        assert_eq!(replies[3]["error"]["code"], -32602);
        assert_eq!(replies[3]["id"], 9);
    }

    #[tokio::test]
    async fn test_oversized_line_is_rejected_and_stream_continues() {
        let engine = guide_engine(Arc::new(ExtractiveGenerator::default())).await;
        let server = McpServer::new(
            Arc::new(engine),
            McpConfig {
                max_line_bytes: 64,
                ..McpConfig::default()
            },
        );
        let input = format!(
            "{}\n{}\n",
            "x".repeat(500),
            r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#
        );

        let replies = exchange(&server, &input).await;
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["error"]["code"], -32700);
        assert_eq!(replies[1]["id"], 2);
    }

    #[tokio::test]
    async fn test_tool_call_answers_with_structured_content() {
        let server = server().await;
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":"q1","method":"tools/call","params":{"name":"search_technical_manual","arguments":{"query":"What is the AcmeFlow X200?"}}}"#,
            "\n",
        );

        let replies = exchange(&server, input).await;
        let result = &replies[0]["result"];
        assert_eq!(replies[0]["id"], "q1");
        assert_eq!(result["content"][0]["type"], "text");
        assert!(result["structuredContent"]["answer"].is_string());
        assert!(result["structuredContent"].get("refusal").is_none());
        assert_eq!(
            result["structuredContent"]["citations"][0]["document"],
            "Guide.pdf"
        );
    }

    #[tokio::test]
    async fn test_tool_call_reports_page_images() {
        let server = server().await;
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":5,"method":"tools/call","params":{"name":"search_technical_manual","arguments":{"query":"What does the Reset command do?"}}}"#,
            "\n",
        );

        let replies = exchange(&server, input).await;
        let result = &replies[0]["result"];
        let citations = result["structuredContent"]["citations"].as_array().unwrap();
        let reset = citations
            .iter()
            .find(|c| c["record_id"] == "3.1_0")
            .expect("Reset fact cited");
        assert_eq!(reset["locator"]["image"], "pages/page_012.png");

        let text = result["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("Image Ref: pages/page_012.png"), "{}", text);
    }

    #[tokio::test]
    async fn test_tool_call_refusal_shape() {
        let server = server().await;
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{"name":"search_technical_manual","arguments":{"query":"What is the capital of Mars?"}}}"#,
            "\n",
        );

        let replies = exchange(&server, input).await;
        let structured = &replies[0]["result"]["structuredContent"];
        assert_eq!(structured["refusal"], true);
        assert_eq!(structured["citations"], json!([]));
        assert!(structured["message"].is_string());
    }

    #[tokio::test]
    async fn test_read_line_bounded_handles_missing_trailing_newline() {
        let mut reader = BufReader::new("first\nsecond".as_bytes());
        let mut line = String::new();

        assert_eq!(read_line_bounded(&mut reader, &mut line, 32).await.unwrap(), 6);
        assert_eq!(line, "first\n");

        line.clear();
        assert_eq!(read_line_bounded(&mut reader, &mut line, 32).await.unwrap(), 6);
        assert_eq!(line, "second");

        line.clear();
        assert_eq!(read_line_bounded(&mut reader, &mut line, 32).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_line_bounded_limit_excludes_newline() {
        let input = format!("{}\n{}\n{}", "a".repeat(16), "b".repeat(17), "c".repeat(16));
        let mut reader = BufReader::with_capacity(4, input.as_bytes());
        let mut line = String::new();

        assert_eq!(read_line_bounded(&mut reader, &mut line, 16).await.unwrap(), 17);
        assert_eq!(line, format!("{}\n", "a".repeat(16)));

        line.clear();
        let err = read_line_bounded(&mut reader, &mut line, 16).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        line.clear();
        assert_eq!(read_line_bounded(&mut reader, &mut line, 16).await.unwrap(), 16);
        assert_eq!(line, "c".repeat(16));
    }
}
