//! Async transports carrying JSON-RPC messages to an MCP server.
//!
//! Every transport serializes request/response exchanges: a request is
//! written, then incoming messages are read until the response with the
//! matching id arrives. Server notifications and stale responses seen on the
//! way are skipped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::config::{ConnectionType, McpAuth, McpConfiguration};
use crate::error::{McpError, Result};
use crate::protocol::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, RequestId};

/// A bidirectional JSON-RPC channel to one server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send a request and wait for its response.
    async fn send(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse>;

    /// Send a notification. No response is read.
    async fn notify(&self, notification: &JsonRpcNotification) -> Result<()>;

    /// Close the underlying connection. Safe to call repeatedly.
    async fn close(&self);

    fn is_connected(&self) -> bool;
}

/// Open the transport named by `config.connection_type`.
pub async fn connect_transport(config: &McpConfiguration) -> Result<Box<dyn Transport>> {
    let transport: Box<dyn Transport> = match config.connection_type {
        ConnectionType::WebSocket => Box::new(WebSocketTransport::connect(config).await?),
        ConnectionType::Http => Box::new(HttpTransport::connect(config)?),
        ConnectionType::Tcp => Box::new(TcpTransport::connect(config).await?),
    };
    tracing::info!(
        url = %config.server_url,
        transport = %config.connection_type,
        "Connected to MCP server"
    );
    Ok(transport)
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared Helpers
// ─────────────────────────────────────────────────────────────────────────────

async fn bounded<T>(limit: Duration, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| McpError::Timeout)?
}

fn check_size(size: usize, limit: usize) -> Result<()> {
    if size > limit {
        Err(McpError::MessageTooLarge { size, limit })
    } else {
        Ok(())
    }
}

/// Interpret one inbound message while waiting for response `id`.
///
/// Returns `None` for anything that is not that response.
fn match_response(payload: &[u8], id: RequestId) -> Result<Option<JsonRpcResponse>> {
    let value: serde_json::Value = serde_json::from_slice(payload)?;
    if let Some(method) = value.get("method").and_then(|m| m.as_str()) {
        tracing::debug!(method = method, "Skipping server-initiated message");
        return Ok(None);
    }
    let response: JsonRpcResponse = serde_json::from_value(value)?;
    if response.id != id {
        tracing::debug!(expected = id, got = response.id, "Skipping stale response");
        return Ok(None);
    }
    Ok(Some(response))
}

/// Header carried by key and basic auth, if any.
fn auth_header(auth: &McpAuth) -> Option<(String, String)> {
    match auth {
        McpAuth::ApiKey { key, header } => Some((header.clone(), key.clone())),
        McpAuth::Basic { username, password } => {
            let token = BASE64.encode(format!("{}:{}", username, password));
            Some(("Authorization".to_string(), format!("Basic {}", token)))
        }
        McpAuth::None | McpAuth::Certificate { .. } => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Content-Length Framing
// ─────────────────────────────────────────────────────────────────────────────

/// Write `body` preceded by a `Content-Length` header.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let header = format!("Content-Length: {}\r\n\r\n", body.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(body).await?;
    writer.flush().await
}

/// Read one framed message. Returns `None` on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R, max_size: usize) -> Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut saw_header = false;

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            if saw_header {
                return Err(McpError::ConnectionClosed);
            }
            return Ok(None);
        }

        let line = line.trim();
        if line.is_empty() {
            if saw_header {
                break;
            }
            continue;
        }
        saw_header = true;

        if let Some((name, value)) = line.split_once(':')
            && name.trim().eq_ignore_ascii_case("content-length")
        {
            let len = value
                .trim()
                .parse()
                .map_err(|e| McpError::protocol(format!("invalid Content-Length: {}", e)))?;
            content_length = Some(len);
        }
    }

    let len = content_length.ok_or_else(|| McpError::protocol("missing Content-Length header"))?;
    check_size(len, max_size)?;

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

// ─────────────────────────────────────────────────────────────────────────────
// TCP
// ─────────────────────────────────────────────────────────────────────────────

struct TcpIo {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// Content-Length framed JSON over a plain socket.
pub struct TcpTransport {
    io: Mutex<Option<TcpIo>>,
    connected: AtomicBool,
    request_timeout: Duration,
    max_message_size: usize,
}

impl TcpTransport {
    pub async fn connect(config: &McpConfiguration) -> Result<Self> {
        let url = url::Url::parse(&config.server_url)?;
        let host = url
            .host_str()
            .ok_or_else(|| McpError::Config(vec!["server_url has no host".into()]))?;
        let port = url
            .port()
            .ok_or_else(|| McpError::Config(vec!["server_url has no port".into()]))?;

        let stream = bounded(config.connect_timeout(), async {
            Ok(TcpStream::connect((host, port)).await?)
        })
        .await?;
        stream.set_nodelay(true)?;
        let (read, write) = stream.into_split();

        Ok(Self {
            io: Mutex::new(Some(TcpIo {
                reader: BufReader::with_capacity(config.buffer_size, read),
                writer: write,
            })),
            connected: AtomicBool::new(true),
            request_timeout: config.request_timeout(),
            max_message_size: config.max_message_size,
        })
    }

    async fn exchange(&self, io: &mut TcpIo, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        let body = serde_json::to_vec(request)?;
        check_size(body.len(), self.max_message_size)?;
        write_frame(&mut io.writer, &body).await?;

        loop {
            let frame = read_frame(&mut io.reader, self.max_message_size)
                .await?
                .ok_or(McpError::ConnectionClosed)?;
            if let Some(response) = match_response(&frame, request.id)? {
                return Ok(response);
            }
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        let mut guard = self.io.lock().await;
        let io = guard.as_mut().ok_or(McpError::NotConnected)?;
        let result = bounded(self.request_timeout, self.exchange(io, request)).await;

        // A timed-out or oversized read leaves the byte stream mid-frame.
        if let Err(e) = &result
            && (e.is_connection_lost()
                || matches!(e, McpError::Timeout | McpError::MessageTooLarge { .. }))
        {
            *guard = None;
            self.connected.store(false, Ordering::SeqCst);
        }
        result
    }

    async fn notify(&self, notification: &JsonRpcNotification) -> Result<()> {
        let body = serde_json::to_vec(notification)?;
        check_size(body.len(), self.max_message_size)?;
        let mut guard = self.io.lock().await;
        let io = guard.as_mut().ok_or(McpError::NotConnected)?;
        bounded(self.request_timeout, async {
            Ok(write_frame(&mut io.writer, &body).await?)
        })
        .await
    }

    async fn close(&self) {
        if let Some(mut io) = self.io.lock().await.take() {
            let _ = io.writer.shutdown().await;
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket
// ─────────────────────────────────────────────────────────────────────────────

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// JSON-RPC text frames over a WebSocket.
pub struct WebSocketTransport {
    stream: Mutex<Option<WsStream>>,
    connected: AtomicBool,
    request_timeout: Duration,
    max_message_size: usize,
}

impl WebSocketTransport {
    pub async fn connect(config: &McpConfiguration) -> Result<Self> {
        let mut request = config.server_url.as_str().into_client_request()?;
        if let McpAuth::Certificate { .. } = config.auth {
            return Err(McpError::Config(vec![
                "certificate auth requires an http connection".into(),
            ]));
        }
        if let Some((name, value)) = auth_header(&config.auth) {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| McpError::Config(vec![format!("invalid auth header name: {}", e)]))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| McpError::Config(vec![format!("invalid auth header value: {}", e)]))?;
            request.headers_mut().insert(name, value);
        }

        let (ws_stream, _) = bounded(config.connect_timeout(), async {
            Ok(connect_async(request).await?)
        })
        .await?;

        Ok(Self {
            stream: Mutex::new(Some(ws_stream)),
            connected: AtomicBool::new(true),
            request_timeout: config.request_timeout(),
            max_message_size: config.max_message_size,
        })
    }

    async fn exchange(
        &self,
        stream: &mut WsStream,
        request: &JsonRpcRequest,
    ) -> Result<JsonRpcResponse> {
        let json = serde_json::to_string(request)?;
        check_size(json.len(), self.max_message_size)?;
        stream.send(Message::Text(json.into())).await?;

        loop {
            let message = stream.next().await.ok_or(McpError::ConnectionClosed)??;
            let payload = match &message {
                Message::Text(text) => text.as_bytes(),
                Message::Binary(data) => data.as_ref(),
                Message::Close(_) => return Err(McpError::ConnectionClosed),
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            };
            check_size(payload.len(), self.max_message_size)?;
            if let Some(response) = match_response(payload, request.id)? {
                return Ok(response);
            }
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(McpError::NotConnected)?;
        let result = bounded(self.request_timeout, self.exchange(stream, request)).await;

        if let Err(e) = &result
            && e.is_connection_lost()
        {
            *guard = None;
            self.connected.store(false, Ordering::SeqCst);
        }
        result
    }

    async fn notify(&self, notification: &JsonRpcNotification) -> Result<()> {
        let json = serde_json::to_string(notification)?;
        check_size(json.len(), self.max_message_size)?;
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(McpError::NotConnected)?;
        bounded(self.request_timeout, async {
            Ok(stream.send(Message::Text(json.into())).await?)
        })
        .await
    }

    async fn close(&self) {
        if let Some(mut stream) = self.stream.lock().await.take() {
            let _ = stream.close(None).await;
        }
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP
// ─────────────────────────────────────────────────────────────────────────────

/// One POST per JSON-RPC message.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    auth: McpAuth,
    connected: AtomicBool,
    request_timeout: Duration,
    max_message_size: usize,
}

impl HttpTransport {
    pub fn connect(config: &McpConfiguration) -> Result<Self> {
        let _parsed = url::Url::parse(&config.server_url)?;

        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .pool_max_idle_per_host(5)
            .tcp_keepalive(Duration::from_secs(30));

        if let McpAuth::Certificate {
            cert_path,
            key_path,
        } = &config.auth
        {
            let cert = std::fs::read(cert_path)?;
            let key = std::fs::read(key_path)?;
            let identity = reqwest::Identity::from_pkcs8_pem(&cert, &key)
                .map_err(|e| McpError::Config(vec![format!("invalid client certificate: {}", e)]))?;
            builder = builder.identity(identity);
        }

        let client = builder
            .build()
            .map_err(|e| McpError::transport(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: config.server_url.clone(),
            auth: config.auth.clone(),
            connected: AtomicBool::new(true),
            request_timeout: config.request_timeout(),
            max_message_size: config.max_message_size,
        })
    }

    async fn post(&self, body: String) -> Result<reqwest::Response> {
        if !self.is_connected() {
            return Err(McpError::NotConnected);
        }
        check_size(body.len(), self.max_message_size)?;

        let mut req = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .body(body);
        match &self.auth {
            McpAuth::Basic { username, password } => {
                req = req.basic_auth(username, Some(password));
            }
            auth => {
                if let Some((name, value)) = auth_header(auth) {
                    req = req.header(name, value);
                }
            }
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(McpError::transport(format!(
                "HTTP error {}: {}",
                status, body
            )));
        }
        Ok(resp)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        let json = serde_json::to_string(request)?;
        tracing::trace!(url = %self.url, json = %json, "Sending MCP HTTP request");

        bounded(self.request_timeout, async {
            let resp = self.post(json).await?;
            let bytes = resp.bytes().await?;
            check_size(bytes.len(), self.max_message_size)?;
            match_response(&bytes, request.id)?.ok_or_else(|| {
                McpError::protocol(format!("no response for request {}", request.id))
            })
        })
        .await
    }

    async fn notify(&self, notification: &JsonRpcNotification) -> Result<()> {
        let json = serde_json::to_string(notification)?;
        bounded(self.request_timeout, async {
            self.post(json).await?;
            Ok(())
        })
        .await
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::JsonRpcError;
    use wiremock::matchers::{body_partial_json, header, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_frame_round_trip() {
        let mut buf = Vec::new();
        write_frame(&mut buf, br#"{"jsonrpc":"2.0"}"#).await.unwrap();
        assert!(buf.starts_with(b"Content-Length: 17\r\n\r\n"));

        let mut reader = &buf[..];
        let frame = read_frame(&mut reader, 1024).await.unwrap().unwrap();
        assert_eq!(frame, br#"{"jsonrpc":"2.0"}"#);
        assert!(read_frame(&mut reader, 1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_read_frame_accepts_extra_headers() {
        let raw = b"content-length: 2\r\nContent-Type: application/json\r\n\r\n{}";
        let mut reader = &raw[..];
        let frame = read_frame(&mut reader, 1024).await.unwrap().unwrap();
        assert_eq!(frame, b"{}");
    }

    #[tokio::test]
    async fn test_read_frame_enforces_size() {
        let raw = b"Content-Length: 100\r\n\r\n";
        let mut reader = &raw[..];
        let err = read_frame(&mut reader, 10).await.unwrap_err();
        assert!(matches!(
            err,
            McpError::MessageTooLarge {
                size: 100,
                limit: 10
            }
        ));
    }

    #[tokio::test]
    async fn test_read_frame_missing_length() {
        let raw = b"Content-Type: application/json\r\n\r\n{}";
        let mut reader = &raw[..];
        assert!(matches!(
            read_frame(&mut reader, 1024).await,
            Err(McpError::Protocol(_))
        ));
    }

    #[test]
    fn test_match_response_skips_notifications_and_stale_ids() {
        let note = br#"{"jsonrpc":"2.0","method":"notifications/progress","params":{}}"#;
        assert!(match_response(note, 1).unwrap().is_none());

        let stale = br#"{"jsonrpc":"2.0","id":1,"result":{}}"#;
        assert!(match_response(stale, 2).unwrap().is_none());

        let hit = br#"{"jsonrpc":"2.0","id":2,"result":{"ok":true}}"#;
        let response = match_response(hit, 2).unwrap().unwrap();
        assert_eq!(response.result, Some(serde_json::json!({"ok": true})));
    }

    #[test]
    fn test_basic_auth_header() {
        let auth = McpAuth::Basic {
            username: "user".into(),
            password: "pass".into(),
        };
        assert_eq!(
            auth_header(&auth),
            Some(("Authorization".into(), "Basic dXNlcjpwYXNz".into()))
        );
        assert_eq!(auth_header(&McpAuth::None), None);
    }

    fn http_config(server: &MockServer, auth: McpAuth) -> McpConfiguration {
        McpConfiguration::new(format!("{}/mcp", server.uri()), ConnectionType::Http).with_auth(auth)
    }

    #[tokio::test]
    async fn test_http_send_with_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("x-api-key", "secret"))
            .and(body_partial_json(serde_json::json!({"id": 7, "method": "ping"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(JsonRpcResponse::success(7, serde_json::json!({}))),
            )
            .mount(&server)
            .await;

        let config = http_config(
            &server,
            McpAuth::ApiKey {
                key: "secret".into(),
                header: "X-API-Key".into(),
            },
        );
        let transport = HttpTransport::connect(&config).unwrap();
        let response = transport
            .send(&JsonRpcRequest::new(7, "ping", None))
            .await
            .unwrap();
        assert!(!response.is_error());
    }

    #[tokio::test]
    async fn test_http_basic_auth_and_error_passthrough() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Basic dXNlcjpwYXNz"))
            .respond_with(ResponseTemplate::new(200).set_body_json(JsonRpcResponse::failure(
                1,
                JsonRpcError::new(JsonRpcError::METHOD_NOT_FOUND, "no such method"),
            )))
            .mount(&server)
            .await;

        let config = http_config(
            &server,
            McpAuth::Basic {
                username: "user".into(),
                password: "pass".into(),
            },
        );
        let transport = HttpTransport::connect(&config).unwrap();
        let response = transport
            .send(&JsonRpcRequest::new(1, "bogus", None))
            .await
            .unwrap();
        assert_eq!(
            response.into_result().unwrap_err().code,
            JsonRpcError::METHOD_NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_http_requires_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let transport = HttpTransport::connect(&http_config(&server, McpAuth::None)).unwrap();
        let err = transport
            .send(&JsonRpcRequest::new(1, "ping", None))
            .await
            .unwrap_err();
        match err {
            McpError::Transport(msg) => {
                assert!(msg.contains("503"));
                assert!(msg.contains("overloaded"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_http_closed_transport() {
        let server = MockServer::start().await;
        let transport = HttpTransport::connect(&http_config(&server, McpAuth::None)).unwrap();
        transport.close().await;
        transport.close().await;
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.notify(&JsonRpcNotification::new("x", None)).await,
            Err(McpError::NotConnected)
        ));
    }
}
