//! Critic role: scores a passage and lists strengths and weaknesses.

use inkwell_llm::ChatResponse;
use inkwell_memory::MemoryItem;
use serde_json::json;

use super::reply_text;
use crate::agent::{Role, render_context};
use crate::error::{AgentError, Result};
use crate::parse::{rating, section_items};
use crate::types::{AgentKind, AgentOutput, TaskInput};

const SYSTEM_PROMPT: &str = "\
You are a demanding literary critic. Assess the passage and answer in this \
format:
Score: N/10
Strengths:
- ...
Weaknesses:
- ...
Suggestions:
- ...";

/// Scores drafts.
#[derive(Debug, Clone, Copy, Default)]
pub struct Critic;

impl Role for Critic {
    fn kind(&self) -> AgentKind {
        AgentKind::Critic
    }

    fn description(&self) -> &'static str {
        "Scores a passage and explains its strengths and weaknesses"
    }

    fn capabilities(&self) -> &'static [&'static str] {
        &["critique", "scoring", "feedback"]
    }

    fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    fn build_prompt(&self, input: &TaskInput, context: &[MemoryItem]) -> Result<String> {
        let text = input.required_text("text")?;
        let mut prompt = render_context(context);
        if let Some(criteria) = input.text("criteria") {
            prompt.push_str(&format!("Judge against: {criteria}\n\n"));
        }
        prompt.push_str(&format!("Passage:\n{text}\n"));
        Ok(prompt)
    }

    fn parse_response(&self, response: &ChatResponse) -> Result<AgentOutput> {
        let text = reply_text(response)?;
        let score = rating(text, "score")
            .ok_or_else(|| AgentError::parse("critique has no 'Score: N/10' line"))?;
        Ok(AgentOutput::text(text).with_data(json!({
            "score": score,
            "strengths": section_items(text, "strengths"),
            "weaknesses": section_items(text, "weaknesses"),
            "suggestions": section_items(text, "suggestions"),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_critique() {
        let reply = "Score: 6.5/10\nStrengths:\n- vivid harbor\nWeaknesses:\n- rushed ending\n- thin villain\nSuggestions:\n- slow the storm scene";
        let output = Critic
            .parse_response(&ChatResponse::success(reply, "m"))
            .unwrap();
        assert_eq!(output.data["score"], 6.5);
        assert_eq!(output.data["strengths"], json!(["vivid harbor"]));
        assert_eq!(output.data["weaknesses"].as_array().unwrap().len(), 2);
        assert_eq!(output.data["suggestions"][0], "slow the storm scene");
    }

    #[test]
    fn test_missing_score_is_parse_error() {
        let err = Critic
            .parse_response(&ChatResponse::success("Nice work overall.", "m"))
            .unwrap_err();
        assert!(matches!(err, AgentError::Parse(_)));
    }
}
