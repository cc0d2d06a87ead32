//! CLI command handlers.

pub mod chat;
pub mod models;
pub mod workflow;

use inkwell_llm::CancellationToken;

use crate::bootstrap::App;

/// Shared context for all commands.
pub struct Context {
    pub app: App,
    /// Provider named with `--provider`, if any.
    pub provider: Option<String>,
    pub verbose: bool,
    /// Cancelled on Ctrl-C.
    pub cancel: CancellationToken,
}
