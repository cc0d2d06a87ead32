//! Summarizer role: condenses a passage and remembers the summary.

use inkwell_llm::ChatResponse;
use inkwell_memory::{MemoryItem, MemoryType, MemoryUpdate};
use serde_json::json;

use super::reply_text;
use crate::agent::{Role, scoped};
use crate::error::Result;
use crate::parse::word_count;
use crate::types::{AgentKind, AgentOutput, TaskInput};

const SYSTEM_PROMPT: &str = "\
You summarize fiction for the author's continuity notes. Keep every event, \
character decision and revealed fact that matters later. Reply with the \
summary only.";

const DEFAULT_MAX_WORDS: u64 = 150;
const SUMMARY_IMPORTANCE: u8 = 5;

/// Condenses passages.
#[derive(Debug, Clone, Copy, Default)]
pub struct Summarizer;

impl Role for Summarizer {
    fn kind(&self) -> AgentKind {
        AgentKind::Summarizer
    }

    fn description(&self) -> &'static str {
        "Condenses a passage into a continuity summary"
    }

    fn capabilities(&self) -> &'static [&'static str] {
        &["summarization", "continuity"]
    }

    fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    fn build_prompt(&self, input: &TaskInput, _context: &[MemoryItem]) -> Result<String> {
        let text = input.required_text("text")?;
        let max_words = input.optional_u64("max_words").unwrap_or(DEFAULT_MAX_WORDS);
        Ok(format!(
            "Summarize in at most {max_words} words.\n\nPassage:\n{text}\n"
        ))
    }

    fn parse_response(&self, response: &ChatResponse) -> Result<AgentOutput> {
        let text = reply_text(response)?;
        Ok(AgentOutput::text(text).with_data(json!({ "words": word_count(text) })))
    }

    fn memory_writes(&self, input: &TaskInput, output: &AgentOutput) -> Vec<MemoryUpdate> {
        let mut update =
            scoped(MemoryUpdate::new(&output.content, MemoryType::Summary, SUMMARY_IMPORTANCE), input);
        if update.project_id.is_some()
            && let Some(volume) = input.text("volume_id")
        {
            update = update.in_volume(volume);
            if let Some(chapter) = input.text("chapter_id") {
                update = update.in_chapter(chapter);
            }
        }
        vec![update]
    }
}
