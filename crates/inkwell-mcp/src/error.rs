//! Error types for MCP operations.

use inkwell_llm::LlmError;
use thiserror::Error;

/// Result type for MCP operations.
pub type Result<T> = std::result::Result<T, McpError>;

/// Error type for MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// The configuration failed validation.
    #[error("invalid MCP configuration: {}", .0.join("; "))]
    Config(Vec<String>),

    /// Failed to communicate with the MCP server.
    #[error("transport error: {0}")]
    Transport(String),

    /// JSON-RPC protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Server returned an error response.
    #[error("server error {code}: {message}")]
    ServerError {
        /// Error code from the server.
        code: i64,
        /// Error message from the server.
        message: String,
        /// Optional additional data.
        data: Option<serde_json::Value>,
    },

    /// Tool execution failed.
    #[error("tool error: {0}")]
    ToolError(String),

    /// A message exceeded the configured size cap.
    #[error("message of {size} bytes exceeds the {limit} byte limit")]
    MessageTooLarge { size: usize, limit: usize },

    /// No transport is open.
    #[error("not connected - call connect() first")]
    NotConnected,

    /// Session not initialized.
    #[error("session not initialized - call initialize() first")]
    NotInitialized,

    /// Connection closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Timeout waiting for response.
    #[error("timeout waiting for response")]
    Timeout,
}

impl McpError {
    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a server error from an error response.
    pub fn server_error(
        code: i64,
        message: impl Into<String>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
            data,
        }
    }

    /// Create a tool error.
    pub fn tool_error(msg: impl Into<String>) -> Self {
        Self::ToolError(msg.into())
    }

    /// Whether the transport is unusable after this error.
    pub fn is_connection_lost(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Io(_) | Self::ConnectionClosed | Self::NotConnected
        )
    }
}

impl From<reqwest::Error> for McpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for McpError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match err {
            WsError::ConnectionClosed | WsError::AlreadyClosed => Self::ConnectionClosed,
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<url::ParseError> for McpError {
    fn from(err: url::ParseError) -> Self {
        Self::Config(vec![format!("server_url is not a valid URL: {}", err)])
    }
}

impl From<McpError> for LlmError {
    fn from(err: McpError) -> Self {
        match err {
            McpError::Timeout => LlmError::Timeout(err.to_string()),
            McpError::Config(_) => LlmError::Config(err.to_string()),
            McpError::NotInitialized => LlmError::Unavailable(err.to_string()),
            McpError::Json(_) | McpError::Protocol(_) => LlmError::Serialization(err.to_string()),
            McpError::ServerError { .. } | McpError::ToolError(_) => {
                LlmError::Backend(err.to_string())
            }
            McpError::MessageTooLarge { .. } => LlmError::InvalidRequest(err.to_string()),
            McpError::Transport(_)
            | McpError::Io(_)
            | McpError::NotConnected
            | McpError::ConnectionClosed => LlmError::Network(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = McpError::server_error(-32600, "Invalid Request", None);
        assert!(err.to_string().contains("-32600"));
        assert!(err.to_string().contains("Invalid Request"));

        let err = McpError::Config(vec!["a is required".into(), "b is required".into()]);
        assert_eq!(
            err.to_string(),
            "invalid MCP configuration: a is required; b is required"
        );
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let mcp_err: McpError = json_err.into();
        assert!(matches!(mcp_err, McpError::Json(_)));
    }

    #[test]
    fn test_llm_error_mapping() {
        assert!(matches!(LlmError::from(McpError::Timeout), LlmError::Timeout(_)));
        assert!(LlmError::from(McpError::ConnectionClosed).is_retryable());
        assert!(matches!(
            LlmError::from(McpError::server_error(-32001, "busy", None)),
            LlmError::Backend(_)
        ));
    }
}
