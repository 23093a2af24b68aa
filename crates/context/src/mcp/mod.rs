//! Model Context Protocol server
//!
//! Exposes the answer engine to MCP clients as one tool,
//! `search_technical_manual`, over stdio.

mod protocol;
mod server;

pub use protocol::{
    error_codes, methods, tool_definition, JsonRpcError, JsonRpcId, JsonRpcRequest,
    JsonRpcResponse, TOOL_NAME,
};
pub use server::{read_line_bounded, McpServer};
