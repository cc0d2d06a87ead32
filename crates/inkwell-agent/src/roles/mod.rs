//! Built-in agent roles.
//!
//! - Planning: [`Director`]
//! - Drafting: [`Writer`], [`Editor`]
//! - Review: [`Critic`], [`Reader`]
//! - Knowledge: [`Researcher`], [`Summarizer`], [`SettingManager`]

mod critic;
mod director;
mod editor;
mod reader;
mod researcher;
mod setting_manager;
mod summarizer;
mod writer;

pub use critic::Critic;
pub use director::Director;
pub use editor::Editor;
pub use reader::Reader;
pub use researcher::Researcher;
pub use setting_manager::SettingManager;
pub use summarizer::Summarizer;
pub use writer::Writer;

use inkwell_llm::ChatResponse;

use crate::error::{AgentError, Result};

/// The reply text, rejecting empty replies.
fn reply_text(response: &ChatResponse) -> Result<&str> {
    let text = response.content.trim();
    if text.is_empty() {
        return Err(AgentError::parse("model returned an empty reply"));
    }
    Ok(text)
}
