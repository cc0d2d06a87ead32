//! A stateful MCP session: connection lifecycle, handshake, and heartbeat.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use inkwell_llm::{EventHub, ProviderConfiguration, ProviderEvent};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::McpConfiguration;
use crate::error::{McpError, Result};
use crate::protocol::{
    CallToolParams, CallToolResult, CreateMessageParams, CreateMessageResult, InitializeParams,
    InitializeResult, JsonRpcNotification, JsonRpcRequest, ListModelsResult, ListToolsResult,
    McpModel, ServerCapabilities, ServerInfo, ToolInfo,
};
use crate::transport::{Transport, connect_transport};

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    /// Transport open, handshake not yet done.
    Connected,
    /// Handshake complete; tools and sampling may be used.
    Initialized,
    Reconnecting,
    Failed,
}

impl ConnectionStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Initialized)
    }
}

/// Snapshot of what is known about the current connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub server_info: Option<ServerInfo>,
    pub protocol_version: Option<String>,
    pub capabilities: ServerCapabilities,
    pub connected_at: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
    pub last_activity: Option<DateTime<Utc>>,
}

impl SessionInfo {
    fn new() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            server_info: None,
            protocol_version: None,
            capabilities: ServerCapabilities::default(),
            connected_at: None,
            reconnect_attempts: 0,
            last_activity: None,
        }
    }
}

struct SessionState {
    status: ConnectionStatus,
    info: SessionInfo,
    transport: Option<Arc<dyn Transport>>,
    handshake: Option<InitializeResult>,
}

/// State shared with the heartbeat task.
struct SessionInner {
    name: String,
    config: McpConfiguration,
    state: Mutex<SessionState>,
    next_id: AtomicU64,
    events: EventHub,
}

impl SessionInner {
    fn status(&self) -> ConnectionStatus {
        self.state.lock().status
    }

    fn set_status(&self, status: ConnectionStatus) {
        let previous = {
            let mut state = self.state.lock();
            std::mem::replace(&mut state.status, status)
        };
        if previous == status {
            return;
        }
        tracing::debug!(session = %self.name, from = ?previous, to = ?status, "Session status changed");
        if previous.is_connected() != status.is_connected() {
            self.events.emit(ProviderEvent::ConnectionStatusChanged {
                provider: self.name.clone(),
                connected: status.is_connected(),
            });
        }
    }

    fn transport(&self) -> Result<Arc<dyn Transport>> {
        self.state
            .lock()
            .transport
            .clone()
            .ok_or(McpError::NotConnected)
    }

    fn require_initialized(&self) -> Result<()> {
        match self.status() {
            ConnectionStatus::Initialized => Ok(()),
            _ => Err(McpError::NotInitialized),
        }
    }

    /// Drop the transport after an unrecoverable error.
    async fn fail(&self) {
        let transport = {
            let mut state = self.state.lock();
            state.handshake = None;
            state.transport.take()
        };
        if let Some(transport) = transport {
            transport.close().await;
        }
        self.set_status(ConnectionStatus::Failed);
    }

    async fn request<R: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> Result<R> {
        let transport = self.transport()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(id, method, params);

        tracing::debug!(session = %self.name, id = id, method = method, "Sending MCP request");
        let response = match transport.send(&request).await {
            Ok(response) => response,
            Err(e) => {
                if e.is_connection_lost() || !transport.is_connected() {
                    tracing::warn!(session = %self.name, error = %e, "MCP connection lost");
                    self.fail().await;
                }
                return Err(e);
            }
        };
        self.state.lock().info.last_activity = Some(Utc::now());

        match response.into_result() {
            Ok(value) => Ok(serde_json::from_value(value)?),
            Err(error) => Err(McpError::server_error(error.code, error.message, error.data)),
        }
    }

    async fn ping(&self) -> Result<()> {
        let _: Value = self.request("ping", None).await?;
        Ok(())
    }
}

/// A connection to one MCP server.
///
/// Cheap to query from many tasks; connect, initialize, and disconnect are
/// serialized internally.
pub struct McpSession {
    inner: Arc<SessionInner>,
    lifecycle: tokio::sync::Mutex<()>,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl McpSession {
    pub fn new(name: impl Into<String>, config: McpConfiguration) -> Self {
        Self::with_events(name, config, EventHub::new())
    }

    /// Create a session publishing status changes to an existing hub.
    pub fn with_events(name: impl Into<String>, config: McpConfiguration, events: EventHub) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                name: name.into(),
                config,
                state: Mutex::new(SessionState {
                    status: ConnectionStatus::Disconnected,
                    info: SessionInfo::new(),
                    transport: None,
                    handshake: None,
                }),
                next_id: AtomicU64::new(1),
                events,
            }),
            lifecycle: tokio::sync::Mutex::new(()),
            heartbeat: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &McpConfiguration {
        &self.inner.config
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.status()
    }

    pub fn info(&self) -> SessionInfo {
        self.inner.state.lock().info.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.inner.events.subscribe()
    }

    /// Open the transport, retrying per the reconnect policy.
    ///
    /// Returns immediately if a transport is already open.
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().await;
        if self.status().is_connected() && self.inner.transport().is_ok() {
            return Ok(());
        }

        let config = &self.inner.config;
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(McpError::Config(errors));
        }

        let policy = &config.reconnect;
        let mut attempt = 0;
        self.inner.set_status(ConnectionStatus::Connecting);

        loop {
            match connect_transport(config).await {
                Ok(transport) => {
                    {
                        let mut state = self.inner.state.lock();
                        state.transport = Some(Arc::from(transport));
                        state.handshake = None;
                        state.info = SessionInfo {
                            connected_at: Some(Utc::now()),
                            ..SessionInfo::new()
                        };
                    }
                    self.inner.set_status(ConnectionStatus::Connected);
                    return Ok(());
                }
                Err(e) if attempt < policy.retries() && !matches!(e, McpError::Config(_)) => {
                    attempt += 1;
                    self.inner.state.lock().info.reconnect_attempts = attempt;
                    self.inner.set_status(ConnectionStatus::Reconnecting);
                    tracing::warn!(
                        session = %self.inner.name,
                        attempt = attempt,
                        max_attempts = policy.max_attempts,
                        error = %e,
                        "MCP connection failed, retrying"
                    );
                    tokio::time::sleep(policy.interval()).await;
                }
                Err(e) => {
                    tracing::warn!(session = %self.inner.name, error = %e, "MCP connection failed");
                    self.inner.set_status(ConnectionStatus::Failed);
                    return Err(e);
                }
            }
        }
    }

    /// Perform the MCP handshake and start the heartbeat.
    ///
    /// A second call on the same connection returns the cached result.
    pub async fn initialize(&self) -> Result<InitializeResult> {
        let _guard = self.lifecycle.lock().await;
        if let Some(done) = self.inner.state.lock().handshake.clone() {
            return Ok(done);
        }
        let transport = self.inner.transport()?;

        let params = serde_json::to_value(InitializeParams::default())?;
        let result: InitializeResult = self.inner.request("initialize", Some(params)).await?;
        transport
            .notify(&JsonRpcNotification::new("notifications/initialized", None))
            .await?;

        {
            let mut state = self.inner.state.lock();
            state.info.server_info = result.server_info.clone();
            state.info.protocol_version = Some(result.protocol_version.clone());
            state.info.capabilities = result.capabilities.clone();
            state.handshake = Some(result.clone());
        }
        self.inner.set_status(ConnectionStatus::Initialized);
        self.start_heartbeat();

        tracing::info!(
            session = %self.inner.name,
            server = ?result.server_info.as_ref().map(|s| &s.name),
            protocol = %result.protocol_version,
            "MCP session initialized"
        );
        Ok(result)
    }

    /// Connect and initialize unless already initialized.
    pub async fn ensure_ready(&self) -> Result<()> {
        if self.status() == ConnectionStatus::Initialized {
            return Ok(());
        }
        self.connect().await?;
        self.initialize().await?;
        Ok(())
    }

    /// Close the connection and stop the heartbeat. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let _guard = self.lifecycle.lock().await;
        if let Some(handle) = self.heartbeat.lock().take() {
            handle.abort();
        }
        let transport = {
            let mut state = self.inner.state.lock();
            state.handshake = None;
            state.transport.take()
        };
        if let Some(transport) = transport {
            transport.close().await;
            tracing::info!(session = %self.inner.name, "MCP session disconnected");
        }
        self.inner.set_status(ConnectionStatus::Disconnected);
    }

    /// Liveness probe. Allowed before the handshake.
    pub async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolInfo>> {
        self.inner.require_initialized()?;
        let result: ListToolsResult = self.inner.request("tools/list", None).await?;
        Ok(result.tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<CallToolResult> {
        self.inner.require_initialized()?;
        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        self.inner
            .request("tools/call", Some(serde_json::to_value(params)?))
            .await
    }

    /// Ask the server to sample a completion.
    pub async fn create_message(&self, params: CreateMessageParams) -> Result<CreateMessageResult> {
        self.inner.require_initialized()?;
        self.inner
            .request("sampling/createMessage", Some(serde_json::to_value(params)?))
            .await
    }

    /// Models offered through the `models/list` extension.
    pub async fn list_models(&self) -> Result<Vec<McpModel>> {
        self.inner.require_initialized()?;
        let result: ListModelsResult = self.inner.request("models/list", None).await?;
        Ok(result.models)
    }

    fn start_heartbeat(&self) {
        let interval = self.inner.config.heartbeat_interval();
        let inner = Arc::clone(&self.inner);

        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                ticker.tick().await;
                match inner.ping().await {
                    Ok(()) => tracing::trace!(session = %inner.name, "Heartbeat ok"),
                    Err(e) => {
                        tracing::warn!(session = %inner.name, error = %e, "Heartbeat failed");
                        inner.fail().await;
                        break;
                    }
                }
            }
        });

        if let Some(previous) = self.heartbeat.lock().replace(handle) {
            previous.abort();
        }
    }
}

impl Drop for McpSession {
    fn drop(&mut self) {
        if let Some(handle) = self.heartbeat.lock().take() {
            handle.abort();
        }
    }
}
