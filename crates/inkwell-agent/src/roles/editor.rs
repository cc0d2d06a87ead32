//! Editor role: revises a passage.

use inkwell_llm::ChatResponse;
use inkwell_memory::MemoryItem;
use serde_json::json;

use super::reply_text;
use crate::agent::{Role, render_context};
use crate::error::Result;
use crate::types::{AgentKind, AgentOutput, TaskInput};

const SYSTEM_PROMPT: &str = "\
You are a line editor. Improve clarity, rhythm and consistency while keeping \
the author's voice and every plot fact intact. Reply with the revised passage \
only.";

const DEFAULT_INSTRUCTIONS: &str = "Tighten the prose and fix any inconsistencies.";

/// Revises drafts.
#[derive(Debug, Clone, Copy, Default)]
pub struct Editor;

impl Role for Editor {
    fn kind(&self) -> AgentKind {
        AgentKind::Editor
    }

    fn description(&self) -> &'static str {
        "Revises a passage for clarity, pacing and consistency"
    }

    fn capabilities(&self) -> &'static [&'static str] {
        &["editing", "proofreading", "consistency"]
    }

    fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    fn build_prompt(&self, input: &TaskInput, context: &[MemoryItem]) -> Result<String> {
        let text = input.required_text("text")?;
        let instructions = input
            .text("instructions")
            .unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string());
        Ok(format!(
            "{}Instructions: {instructions}\n\nPassage:\n{text}\n",
            render_context(context)
        ))
    }

    fn parse_response(&self, response: &ChatResponse) -> Result<AgentOutput> {
        let text = reply_text(response)?;
        Ok(AgentOutput::text(text).with_data(json!({ "characters": text.chars().count() })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_defaults_instructions() {
        let input = TaskInput::new("t").with_param("text", "She walk to the dock.");
        let prompt = Editor.build_prompt(&input, &[]).unwrap();
        assert!(prompt.contains(DEFAULT_INSTRUCTIONS));
        assert!(prompt.ends_with("Passage:\nShe walk to the dock.\n"));

        let custom = input.with_param("instructions", "Fix grammar only");
        assert!(Editor.build_prompt(&custom, &[]).unwrap().contains("Fix grammar only"));
    }

    #[test]
    fn test_prompt_requires_text() {
        assert!(Editor.build_prompt(&TaskInput::new("t"), &[]).is_err());
    }
}
