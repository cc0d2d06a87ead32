//! Registry of named providers with default selection, dispatch, and statistics.
//!
//! The [`ModelManager`] is an owned object; wrap it in an `Arc` to share it.
//! Registry operations report misuse through their `bool`/`Option` return
//! values, and chat calls always come back as a [`ChatResponse`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::provider::{
    ChatStream, ProviderEvent, SharedProvider, StreamEvent, collect_stream,
    single_response_stream,
};
use crate::statistics::ProviderStatistics;
use crate::types::{ChatChunk, ChatRequest, ChatResponse, ConnectionTest, ModelInfo};

/// Capacity of the manager's event channel.
const MANAGER_CHANNEL_CAPACITY: usize = 256;

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// Notifications published by the manager.
#[derive(Debug, Clone, PartialEq)]
pub enum ManagerEvent {
    ProviderRegistered {
        provider: String,
    },
    ProviderUnregistered {
        provider: String,
    },
    DefaultProviderChanged {
        old: Option<String>,
        new: String,
    },
    ResponseReceived {
        provider: String,
        response_time: Duration,
    },
    RequestFailed {
        provider: String,
        error: String,
    },
    /// An event re-published from a registered provider.
    Provider(ProviderEvent),
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

struct ProviderEntry {
    provider: SharedProvider,
    stats: Arc<Mutex<ProviderStatistics>>,
    forwarder: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct Registry {
    providers: HashMap<String, ProviderEntry>,
    default: Option<String>,
}

/// A provider resolved for one call.
struct Resolved {
    name: String,
    provider: SharedProvider,
    stats: Arc<Mutex<ProviderStatistics>>,
}

/// Registry and dispatcher for model providers.
pub struct ModelManager {
    registry: RwLock<Registry>,
    events: broadcast::Sender<ManagerEvent>,
    closed: AtomicBool,
}

impl Default for ModelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelManager {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(MANAGER_CHANNEL_CAPACITY);
        Self {
            registry: RwLock::new(Registry::default()),
            events,
            closed: AtomicBool::new(false),
        }
    }

    /// Receive manager events.
    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: ManagerEvent) {
        let _ = self.events.send(event);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────────────────

    /// Register a provider under its own name.
    ///
    /// Returns false if the name is already taken. The first provider
    /// registered becomes the default until one is chosen explicitly.
    pub fn register(&self, provider: SharedProvider) -> bool {
        let name = provider.name().to_string();
        {
            let mut registry = self.registry.write();
            if registry.providers.contains_key(&name) {
                tracing::warn!(provider = %name, "Provider already registered");
                return false;
            }

            let forwarder = self.spawn_forwarder(&provider);
            registry.providers.insert(
                name.clone(),
                ProviderEntry {
                    provider,
                    stats: Arc::new(Mutex::new(ProviderStatistics::new())),
                    forwarder,
                },
            );
            if registry.default.is_none() {
                registry.default = Some(name.clone());
            }
        }

        tracing::info!(provider = %name, "Registered provider");
        self.emit(ManagerEvent::ProviderRegistered { provider: name });
        true
    }

    fn spawn_forwarder(&self, provider: &SharedProvider) -> Option<JoinHandle<()>> {
        let handle = tokio::runtime::Handle::try_current().ok()?;
        let mut rx = provider.subscribe();
        let tx = self.events.clone();
        let name = provider.name().to_string();

        Some(handle.spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let _ = tx.send(ManagerEvent::Provider(event));
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(provider = %name, skipped, "Dropped provider events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }))
    }

    /// Remove a provider, shutting it down. Returns false if absent.
    ///
    /// Its statistics are discarded with it. If it was the default, the
    /// manager is left without one.
    pub async fn unregister(&self, name: &str) -> bool {
        let entry = {
            let mut registry = self.registry.write();
            let Some(entry) = registry.providers.remove(name) else {
                return false;
            };
            if registry.default.as_deref() == Some(name) {
                registry.default = None;
            }
            entry
        };

        if let Some(forwarder) = entry.forwarder {
            forwarder.abort();
        }
        entry.provider.shutdown().await;

        tracing::info!(provider = %name, "Unregistered provider");
        self.emit(ManagerEvent::ProviderUnregistered {
            provider: name.to_string(),
        });
        true
    }

    /// Make `name` the default provider. Returns false if it is not registered.
    pub fn set_default(&self, name: &str) -> bool {
        let old = {
            let mut registry = self.registry.write();
            if !registry.providers.contains_key(name) {
                return false;
            }
            registry.default.replace(name.to_string())
        };

        tracing::info!(old = ?old, new = %name, "Default provider changed");
        self.emit(ManagerEvent::DefaultProviderChanged {
            old,
            new: name.to_string(),
        });
        true
    }

    pub fn default_provider(&self) -> Option<String> {
        self.registry.read().default.clone()
    }

    pub fn provider(&self, name: &str) -> Option<SharedProvider> {
        self.registry
            .read()
            .providers
            .get(name)
            .map(|e| e.provider.clone())
    }

    /// Registered names, sorted.
    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.registry.read().providers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.registry.read().providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Dispatch
    // ─────────────────────────────────────────────────────────────────────────

    /// Resolve a provider for a call, or the response explaining why not.
    fn resolve(&self, name: Option<&str>) -> std::result::Result<Resolved, ChatResponse> {
        let registry = self.registry.read();
        let name = match name.map(str::to_string).or_else(|| registry.default.clone()) {
            Some(name) => name,
            None => {
                return Err(ChatResponse::failure("no default provider is configured"));
            }
        };
        let Some(entry) = registry.providers.get(&name) else {
            return Err(ChatResponse::failure(format!(
                "provider '{}' is not registered",
                name
            )));
        };
        if !entry.provider.is_available() {
            return Err(ChatResponse::failure(format!(
                "provider '{}' is not available",
                name
            )));
        }
        Ok(Resolved {
            name,
            provider: entry.provider.clone(),
            stats: entry.stats.clone(),
        })
    }

    fn record(&self, resolved: &Resolved, response: &ChatResponse) {
        resolved.stats.lock().record(response);
        publish_outcome(&self.events, &resolved.name, response);
    }

    fn reject(&self, name: Option<&str>, response: ChatResponse) -> ChatResponse {
        let provider = name
            .map(str::to_string)
            .or_else(|| self.default_provider())
            .unwrap_or_default();
        tracing::warn!(provider = %provider, error = response.error_message(), "Chat rejected");
        self.emit(ManagerEvent::RequestFailed {
            provider,
            error: response.error_message().to_string(),
        });
        response
    }

    /// Send a chat request to `name`, or the default provider.
    pub async fn chat(
        &self,
        name: Option<&str>,
        request: ChatRequest,
        cancel: &CancellationToken,
    ) -> ChatResponse {
        let resolved = match self.resolve(name) {
            Ok(resolved) => resolved,
            Err(response) => return self.reject(name, response),
        };

        let response = resolved.provider.chat(request, cancel).await;
        self.record(&resolved, &response);
        response
    }

    /// Stream a chat request. Statistics are recorded when the terminal
    /// event passes through the returned stream.
    pub async fn chat_stream(
        &self,
        name: Option<&str>,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> ChatStream {
        let resolved = match self.resolve(name) {
            Ok(resolved) => resolved,
            Err(response) => return single_response_stream(self.reject(name, response)),
        };

        let stream = resolved.provider.chat_stream(request, cancel).await;
        let events = self.events.clone();
        Box::pin(stream.inspect(move |event| {
            if let StreamEvent::Done(response) = event {
                resolved.stats.lock().record(response);
                publish_outcome(&events, &resolved.name, response);
            }
        }))
    }

    /// Stream a chat request, handing each chunk to `on_chunk` as it arrives.
    pub async fn chat_stream_with<F>(
        &self,
        name: Option<&str>,
        request: ChatRequest,
        cancel: CancellationToken,
        on_chunk: F,
    ) -> ChatResponse
    where
        F: FnMut(&ChatChunk),
    {
        let stream = self.chat_stream(name, request, cancel).await;
        collect_stream(stream, on_chunk).await
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Fan-out & Inspection
    // ─────────────────────────────────────────────────────────────────────────

    /// List models from every provider concurrently.
    ///
    /// A provider whose listing fails contributes an empty list.
    pub async fn list_all_models(&self) -> BTreeMap<String, Vec<ModelInfo>> {
        let providers: Vec<SharedProvider> = self
            .registry
            .read()
            .providers
            .values()
            .map(|e| e.provider.clone())
            .collect();

        let listings = futures::future::join_all(providers.iter().map(|provider| async move {
            let models = match provider.list_models().await {
                Ok(models) => models,
                Err(e) => {
                    tracing::warn!(
                        provider = provider.name(),
                        error = %e,
                        "Failed to list models"
                    );
                    Vec::new()
                }
            };
            (provider.name().to_string(), models)
        }))
        .await;

        listings.into_iter().collect()
    }

    /// Test one provider's connection. `None` if it is not registered.
    pub async fn test_connection(&self, name: &str) -> Option<ConnectionTest> {
        let provider = self.provider(name)?;
        Some(provider.test_connection().await)
    }

    /// Snapshot of one provider's statistics.
    pub fn statistics(&self, name: &str) -> Option<ProviderStatistics> {
        self.registry
            .read()
            .providers
            .get(name)
            .map(|e| e.stats.lock().clone())
    }

    pub fn all_statistics(&self) -> BTreeMap<String, ProviderStatistics> {
        self.registry
            .read()
            .providers
            .iter()
            .map(|(name, e)| (name.clone(), e.stats.lock().clone()))
            .collect()
    }

    /// Shut down and remove every provider. Later calls do nothing.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let entries: Vec<(String, ProviderEntry)> = {
            let mut registry = self.registry.write();
            registry.default = None;
            registry.providers.drain().collect()
        };

        for (name, entry) in entries {
            if let Some(forwarder) = entry.forwarder {
                forwarder.abort();
            }
            entry.provider.shutdown().await;
            tracing::debug!(provider = %name, "Provider disposed");
        }
        tracing::info!("Model manager shut down");
    }
}

fn publish_outcome(events: &broadcast::Sender<ManagerEvent>, provider: &str, response: &ChatResponse) {
    let event = if response.is_success() {
        ManagerEvent::ResponseReceived {
            provider: provider.to_string(),
            response_time: response.response_time,
        }
    } else {
        ManagerEvent::RequestFailed {
            provider: provider.to_string(),
            error: response.error_message().to_string(),
        }
    };
    let _ = events.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;

    fn shared(provider: MockProvider) -> SharedProvider {
        Arc::new(provider)
    }

    #[tokio::test]
    async fn test_first_registered_becomes_default() {
        let manager = ModelManager::new();
        assert!(manager.register(shared(MockProvider::succeeding("a", Duration::ZERO, "hi"))));
        assert!(manager.register(shared(MockProvider::succeeding("b", Duration::ZERO, "hi"))));
        assert_eq!(manager.default_provider().as_deref(), Some("a"));
        assert_eq!(manager.provider_names(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_set_default_unknown() {
        let manager = ModelManager::new();
        manager.register(shared(MockProvider::succeeding("a", Duration::ZERO, "hi")));
        assert!(!manager.set_default("missing"));
        assert_eq!(manager.default_provider().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_set_default_emits_event() {
        let manager = ModelManager::new();
        manager.register(shared(MockProvider::succeeding("a", Duration::ZERO, "hi")));
        manager.register(shared(MockProvider::succeeding("b", Duration::ZERO, "hi")));
        let mut rx = manager.subscribe();

        assert!(manager.set_default("b"));
        assert_eq!(
            rx.recv().await.unwrap(),
            ManagerEvent::DefaultProviderChanged {
                old: Some("a".into()),
                new: "b".into()
            }
        );
    }

    #[tokio::test]
    async fn test_chat_without_any_provider() {
        let manager = ModelManager::new();
        let response = manager
            .chat(None, ChatRequest::from_prompt("x"), &CancellationToken::new())
            .await;
        assert!(!response.is_success());
        assert!(response.error_message().contains("no default provider"));
    }

    #[tokio::test]
    async fn test_unregister_disposes_and_drops_stats() {
        let manager = ModelManager::new();
        let mock = Arc::new(MockProvider::succeeding("a", Duration::ZERO, "hi"));
        manager.register(mock.clone());
        manager
            .chat(Some("a"), ChatRequest::from_prompt("x"), &CancellationToken::new())
            .await;

        assert!(manager.unregister("a").await);
        assert!(!manager.unregister("a").await);
        assert_eq!(mock.shutdown_count(), 1);
        assert!(manager.statistics("a").is_none());
        assert!(manager.default_provider().is_none());
    }

    #[tokio::test]
    async fn test_provider_events_are_forwarded() {
        let manager = ModelManager::new();
        let mock = Arc::new(MockProvider::succeeding("a", Duration::ZERO, "hi"));
        manager.register(mock.clone());
        let mut rx = manager.subscribe();

        let event = ProviderEvent::ConnectionStatusChanged {
            provider: "a".into(),
            connected: true,
        };
        mock.emit(event.clone());

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, ManagerEvent::Provider(event));
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let manager = ModelManager::new();
        let mock = Arc::new(MockProvider::succeeding("a", Duration::ZERO, "hi"));
        manager.register(mock.clone());

        manager.shutdown().await;
        manager.shutdown().await;
        assert_eq!(mock.shutdown_count(), 1);
        assert!(manager.is_empty());
    }
}
