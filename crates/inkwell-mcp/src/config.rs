//! MCP server connection settings.

use std::path::{Path, PathBuf};
use std::time::Duration;

use inkwell_llm::{ProviderConfiguration, ValidationErrors};
use serde::{Deserialize, Serialize};

/// How the session reaches the MCP server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionType {
    /// JSON-RPC text frames over a WebSocket (`ws://`, `wss://`).
    #[default]
    #[serde(rename = "websocket")]
    WebSocket,
    /// One HTTP POST per message (`http://`, `https://`).
    #[serde(rename = "http")]
    Http,
    /// Content-Length framed JSON over a raw socket (`tcp://`).
    #[serde(rename = "tcp")]
    Tcp,
}

impl ConnectionType {
    /// URL schemes accepted for this connection type.
    pub fn schemes(&self) -> &'static [&'static str] {
        match self {
            Self::WebSocket => &["ws", "wss"],
            Self::Http => &["http", "https"],
            Self::Tcp => &["tcp"],
        }
    }
}

impl std::fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::WebSocket => "websocket",
            Self::Http => "http",
            Self::Tcp => "tcp",
        };
        f.write_str(label)
    }
}

/// Credentials presented to the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum McpAuth {
    #[default]
    None,
    /// A key sent in a request header.
    ApiKey {
        key: String,
        #[serde(default = "default_api_key_header")]
        header: String,
    },
    Basic {
        username: String,
        password: String,
    },
    /// A PEM client certificate and PKCS#8 key.
    Certificate {
        cert_path: PathBuf,
        key_path: PathBuf,
    },
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

/// Retry behaviour when a connection attempt fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    /// Attempts after the first failure.
    pub max_attempts: u32,
    pub interval_secs: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            interval_secs: 5,
        }
    }
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Attempts allowed after the initial one.
    pub fn retries(&self) -> u32 {
        if self.enabled { self.max_attempts } else { 0 }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Configuration for an MCP session and the provider built on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfiguration {
    pub server_url: String,
    pub connection_type: ConnectionType,
    pub auth: McpAuth,
    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub reconnect: ReconnectPolicy,
    /// Largest inbound or outbound message in bytes.
    pub max_message_size: usize,
    pub buffer_size: usize,
    /// Model reported when the server does not list any.
    pub default_model: String,
    /// Token cap sent with sampling requests that do not set one.
    pub max_tokens: u32,
}

impl Default for McpConfiguration {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            connection_type: ConnectionType::WebSocket,
            auth: McpAuth::None,
            connect_timeout_secs: 10,
            request_timeout_secs: 60,
            heartbeat_interval_secs: 30,
            reconnect: ReconnectPolicy::default(),
            max_message_size: 4 * 1024 * 1024,
            buffer_size: 64 * 1024,
            default_model: "mcp-default".to_string(),
            max_tokens: 2048,
        }
    }
}

impl McpConfiguration {
    pub fn new(server_url: impl Into<String>, connection_type: ConnectionType) -> Self {
        Self {
            server_url: server_url.into(),
            connection_type,
            ..Default::default()
        }
    }

    pub fn with_auth(mut self, auth: McpAuth) -> Self {
        self.auth = auth;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_request_timeout(mut self, secs: u64) -> Self {
        self.request_timeout_secs = secs;
        self
    }

    pub fn with_heartbeat_interval(mut self, secs: u64) -> Self {
        self.heartbeat_interval_secs = secs;
        self
    }

    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    fn validate_url(&self, errors: &mut ValidationErrors) {
        errors.require_url(
            "server_url",
            &self.server_url,
            self.connection_type.schemes(),
        );
        if self.connection_type == ConnectionType::Tcp
            && let Ok(parsed) = url::Url::parse(&self.server_url)
            && (parsed.host_str().is_none() || parsed.port().is_none())
        {
            errors.push("server_url must name a host and port for tcp connections");
        }
    }

    fn validate_auth(&self, errors: &mut ValidationErrors) {
        match &self.auth {
            McpAuth::None => {}
            McpAuth::ApiKey { key, header } => {
                errors.require_non_empty("auth.key", key);
                errors.require_non_empty("auth.header", header);
            }
            McpAuth::Basic { username, password } => {
                errors.require_non_empty("auth.username", username);
                errors.require_non_empty("auth.password", password);
            }
            McpAuth::Certificate {
                cert_path,
                key_path,
            } => {
                require_file(errors, "auth.cert_path", cert_path);
                require_file(errors, "auth.key_path", key_path);
                if self.connection_type != ConnectionType::Http {
                    errors.push(format!(
                        "certificate auth requires an http connection (got {})",
                        self.connection_type
                    ));
                }
            }
        }
    }
}

fn require_file(errors: &mut ValidationErrors, field: &str, path: &Path) {
    if path.as_os_str().is_empty() {
        errors.push(format!("{} is required", field));
    } else if !path.is_file() {
        errors.push(format!("{} does not exist: {}", field, path.display()));
    }
}

impl ProviderConfiguration for McpConfiguration {
    fn validate(&self) -> Vec<String> {
        let mut errors = ValidationErrors::new();
        self.validate_url(&mut errors);
        self.validate_auth(&mut errors);
        errors.require_range("connect_timeout_secs", self.connect_timeout_secs, 1, 600);
        errors.require_range("request_timeout_secs", self.request_timeout_secs, 1, 600);
        errors.require_range(
            "heartbeat_interval_secs",
            self.heartbeat_interval_secs,
            1,
            3600,
        );
        if self.max_message_size == 0 {
            errors.push("max_message_size must be greater than 0");
        }
        if self.buffer_size == 0 {
            errors.push("buffer_size must be greater than 0");
        }
        errors.require_range("reconnect.max_attempts", self.reconnect.max_attempts, 0, 100);
        errors.require_non_empty("default_model", &self.default_model);
        errors.require_range("max_tokens", self.max_tokens, 1, 32768);
        errors.into_vec()
    }
}
