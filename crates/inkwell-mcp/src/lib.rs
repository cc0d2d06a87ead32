//! MCP (Model Context Protocol) client for Inkwell.
//!
//! Connects to an MCP server over WebSocket, HTTP, or a Content-Length framed
//! TCP socket, performs the protocol handshake, and exposes tools and
//! sampling. [`McpProvider`] adapts a session to the
//! [`ModelProvider`](inkwell_llm::ModelProvider) contract so the model
//! manager can route chat requests through it.
//!
//! ```text
//! McpProvider ──► McpSession ──► Transport ──► server
//!                  │  connect / initialize / heartbeat
//!                  └─ status events (ProviderEvent)
//! ```

pub mod config;
pub mod error;
pub mod protocol;
pub mod provider;
pub mod session;
pub mod transport;

pub use config::{ConnectionType, McpAuth, McpConfiguration, ReconnectPolicy};
pub use error::{McpError, Result};
pub use protocol::{
    CallToolResult, CreateMessageParams, CreateMessageResult, InitializeResult, JsonRpcError,
    JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, SamplingMessage, ServerCapabilities,
    ServerInfo, ToolContent, ToolInfo,
};
pub use provider::{McpProvider, sampling_params};
pub use session::{ConnectionStatus, McpSession, SessionInfo};
pub use transport::{
    HttpTransport, TcpTransport, Transport, WebSocketTransport, connect_transport, read_frame,
    write_frame,
};
