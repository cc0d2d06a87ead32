//! Model provider abstraction for Inkwell.
//!
//! This crate puts heterogeneous chat backends behind one contract and keeps
//! a registry of them for the rest of the application.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │  ModelManager                              │
//! │  - register / unregister / set_default     │
//! │  - chat / chat_stream  (+ statistics)      │
//! │  - list_all_models (fan-out)               │
//! └────────────────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌────────────────────────────────────────────┐
//! │  ModelProvider trait                       │
//! └────────────────────────────────────────────┘
//!        │              │              │
//!        ▼              ▼              ▼
//!   ┌─────────┐   ┌──────────┐   ┌──────────┐
//!   │DeepSeek │   │  Zhipu   │   │  Ollama  │
//!   └─────────┘   └──────────┘   └──────────┘
//! ```
//!
//! Chat calls never fail with an error: every transport, protocol, or
//! validation problem comes back as a [`ChatResponse`] whose status says so.

pub mod config;
pub mod error;
pub mod frames;
pub mod manager;
pub mod provider;
pub mod statistics;
pub mod thinking;
pub mod types;

// Provider implementations
mod compat;
mod http;
pub mod deepseek;
pub mod ollama;
pub mod zhipu;

#[cfg(any(test, feature = "testing"))]
pub mod mock;

pub use config::{ProviderConfiguration, ValidationErrors};
pub use error::{LlmError, Result};
pub use frames::{FrameDelta, FrameFormat, StreamAccumulator, decode_stream};
pub use manager::{ManagerEvent, ModelManager};
pub use provider::{
    ChatStream, ConfigurableProvider, EventHub, ModelProvider, ProviderEvent, ProviderKind,
    SharedProvider, StreamEvent, collect_stream, finish_response, run_cancellable,
    single_response_stream, with_retry,
};
pub use statistics::ProviderStatistics;
pub use thinking::{
    ChainStatus, StepStatus, ThinkingChain, ThinkingChainProcessor, ThinkingError, ThinkingEvent,
    ThinkingStep,
};
pub use types::{
    ChatChunk, ChatMessage, ChatRequest, ChatResponse, ChatRole, ConnectionTest, ModelInfo,
    ResponseStatus, TokenUsage,
};

// Re-export provider configs
pub use deepseek::{DeepSeekConfig, DeepSeekProvider};
pub use ollama::{OllamaConfig, OllamaProvider};
pub use zhipu::{ZhipuConfig, ZhipuProvider};

#[cfg(any(test, feature = "testing"))]
pub use mock::MockProvider;

// Used by downstream crates so they share this crate's cancellation type.
pub use tokio_util::sync::CancellationToken;
