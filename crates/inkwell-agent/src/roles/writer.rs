//! Writer role: drafts prose from an outline or prompt.

use inkwell_llm::ChatResponse;
use inkwell_memory::MemoryItem;
use serde_json::json;

use super::reply_text;
use crate::agent::{Role, render_context};
use crate::error::{AgentError, Result};
use crate::parse::word_count;
use crate::types::{AgentKind, AgentOutput, TaskInput};

const SYSTEM_PROMPT: &str = "\
You are a novelist. Write vivid, well-paced prose that follows the outline \
you are given and stays consistent with established facts. Reply with the \
prose only, without headings or commentary.";

/// Drafts chapter prose.
#[derive(Debug, Clone, Copy, Default)]
pub struct Writer;

impl Role for Writer {
    fn kind(&self) -> AgentKind {
        AgentKind::Writer
    }

    fn description(&self) -> &'static str {
        "Drafts chapter prose from an outline or prompt"
    }

    fn capabilities(&self) -> &'static [&'static str] {
        &["drafting", "prose", "dialogue"]
    }

    fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    fn build_prompt(&self, input: &TaskInput, context: &[MemoryItem]) -> Result<String> {
        let outline = input.text("outline");
        let brief = input.text("prompt");
        if outline.is_none() && brief.is_none() {
            return Err(AgentError::invalid_input(
                "writer needs an 'outline' or 'prompt' parameter",
            ));
        }

        let mut prompt = render_context(context);
        if let Some(title) = input.text("chapter_title") {
            prompt.push_str(&format!("Chapter: {title}\n"));
        }
        if let Some(outline) = outline {
            prompt.push_str(&format!("Outline:\n{outline}\n"));
        }
        if let Some(brief) = brief {
            prompt.push_str(&format!("Brief: {brief}\n"));
        }
        if let Some(style) = input.text("style") {
            prompt.push_str(&format!("Style: {style}\n"));
        }
        if let Some(words) = input.optional_u64("word_count") {
            prompt.push_str(&format!("Length: about {words} words.\n"));
        }
        Ok(prompt)
    }

    fn parse_response(&self, response: &ChatResponse) -> Result<AgentOutput> {
        let text = reply_text(response)?;
        Ok(AgentOutput::text(text).with_data(json!({
            "words": word_count(text),
            "characters": text.chars().count(),
        })))
    }
}
