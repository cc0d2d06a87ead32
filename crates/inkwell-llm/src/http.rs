//! State shared by the HTTP-based adapters.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::Client;

use crate::config::{ProviderConfiguration, ValidationErrors};
use crate::error::{LlmError, Result};
use crate::provider::{EventHub, ProviderEvent};

/// Timeouts every HTTP provider configuration carries.
pub(crate) trait HttpSettings {
    fn connect_timeout(&self) -> Duration;
    fn request_timeout(&self) -> Duration;
}

/// Validate the settings common to HTTP providers.
pub(crate) fn validate_http(
    errors: &mut ValidationErrors,
    base_url: &str,
    connect_timeout_secs: u64,
    timeout_secs: u64,
    max_retries: u32,
) {
    errors.require_url("base_url", base_url, &["http", "https"]);
    errors.require_range("connect_timeout_secs", connect_timeout_secs, 1, 120);
    errors.require_range("timeout_secs", timeout_secs, 1, 600);
    errors.require_range("max_retries", max_retries, 0, 10);
}

/// Build a client honouring the configured connect and request timeouts.
pub(crate) fn build_client(connect_timeout: Duration, timeout: Duration) -> Result<Client> {
    Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(timeout)
        .build()
        .map_err(|e| LlmError::Internal(format!("Failed to create HTTP client: {}", e)))
}

/// Live configuration, client, events, and shutdown flag of one adapter.
pub(crate) struct HttpCore<C> {
    name: String,
    state: RwLock<(C, Client)>,
    events: EventHub,
    closed: AtomicBool,
}

impl<C> HttpCore<C>
where
    C: ProviderConfiguration + HttpSettings,
{
    pub fn new(name: impl Into<String>, config: C) -> Result<Self> {
        let client = build_client(config.connect_timeout(), config.request_timeout())?;
        Ok(Self {
            name: name.into(),
            state: RwLock::new((config, client)),
            events: EventHub::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn config(&self) -> C {
        self.state.read().0.clone()
    }

    pub fn is_available(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.state.read().0.is_valid()
    }

    /// Snapshot config and client for one call, failing if the provider
    /// cannot serve requests.
    pub fn ready(&self) -> Result<(C, Client)> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LlmError::unavailable(format!(
                "provider '{}' has been shut down",
                self.name
            )));
        }
        let (config, client) = self.state.read().clone();
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(LlmError::Config(errors.join("; ")));
        }
        Ok((config, client))
    }

    /// Apply a new configuration if it validates.
    pub fn replace(&self, config: C) -> bool {
        let errors = config.validate();
        if !errors.is_empty() {
            tracing::warn!(
                provider = %self.name,
                errors = ?errors,
                "Rejected invalid provider configuration"
            );
            return false;
        }
        let client = match build_client(config.connect_timeout(), config.request_timeout()) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!(provider = %self.name, error = %e, "Failed to rebuild client");
                return false;
            }
        };

        *self.state.write() = (config, client);
        tracing::info!(provider = %self.name, "Provider configuration updated");
        self.events.emit(ProviderEvent::ConfigurationChanged {
            provider: self.name.clone(),
        });
        true
    }

    /// Mark the provider closed. Returns true only on the first call.
    pub fn close(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::SeqCst);
        if first {
            tracing::info!(provider = %self.name, "Provider shut down");
        }
        first
    }
}
