//! Reader role: feedback from a first reader's point of view.

use inkwell_llm::ChatResponse;
use inkwell_memory::MemoryItem;
use serde_json::json;

use super::reply_text;
use crate::agent::Role;
use crate::error::Result;
use crate::parse::{rating, section_items};
use crate::types::{AgentKind, AgentOutput, TaskInput};

const SYSTEM_PROMPT: &str = "\
You are an avid reader of the genre, reading this passage for the first \
time. Say honestly how it felt to read. Start with a line \
\"Engagement: N/10\", then list what confused you under \"Confusing:\" and \
what you want to read next under \"Hooks:\".";

/// Reports the reader experience of a passage.
#[derive(Debug, Clone, Copy, Default)]
pub struct Reader;

impl Role for Reader {
    fn kind(&self) -> AgentKind {
        AgentKind::Reader
    }

    fn description(&self) -> &'static str {
        "Gives first-reader feedback with an engagement rating"
    }

    fn capabilities(&self) -> &'static [&'static str] {
        &["reader_feedback", "engagement"]
    }

    fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    // A first reader knows nothing beyond the passage, so memories are left out.
    fn build_prompt(&self, input: &TaskInput, _context: &[MemoryItem]) -> Result<String> {
        let text = input.required_text("text")?;
        let mut prompt = String::new();
        if let Some(audience) = input.text("audience") {
            prompt.push_str(&format!("You are reading as: {audience}\n\n"));
        }
        prompt.push_str(&format!("Passage:\n{text}\n"));
        Ok(prompt)
    }

    fn parse_response(&self, response: &ChatResponse) -> Result<AgentOutput> {
        let text = reply_text(response)?;
        Ok(AgentOutput::text(text).with_data(json!({
            "engagement": rating(text, "engagement"),
            "confusing": section_items(text, "confusing"),
            "hooks": section_items(text, "hooks"),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_feedback() {
        let reply = "Engagement: 8/10\nConfusing:\n- who is Tam?\nHooks:\n- the sealed letter";
        let output = Reader
            .parse_response(&ChatResponse::success(reply, "m"))
            .unwrap();
        assert_eq!(output.data["engagement"], 8.0);
        assert_eq!(output.data["confusing"], json!(["who is Tam?"]));
        assert_eq!(output.data["hooks"], json!(["the sealed letter"]));
    }

    #[test]
    fn test_rating_is_optional() {
        let output = Reader
            .parse_response(&ChatResponse::success("I loved it.", "m"))
            .unwrap();
        assert!(output.data["engagement"].is_null());
    }
}
