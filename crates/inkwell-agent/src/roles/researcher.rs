//! Researcher role: answers background questions and records the findings.

use inkwell_llm::ChatResponse;
use inkwell_memory::{MemoryItem, MemoryType, MemoryUpdate};
use serde_json::json;

use super::reply_text;
use crate::agent::{Role, render_context, scoped};
use crate::error::Result;
use crate::types::{AgentKind, AgentOutput, TaskInput};

const SYSTEM_PROMPT: &str = "\
You are a research assistant for a novelist. Answer with accurate, concrete \
background the author can use: period details, how things work, plausible \
names. Open with a one-paragraph summary, then add detail.";

/// Importance of stored findings unless the task says otherwise.
const DEFAULT_FINDING_IMPORTANCE: u8 = 6;

/// Longest finding stored as memory, in characters.
const MAX_FINDING_CHARS: usize = 500;

/// Researches world details.
#[derive(Debug, Clone, Copy, Default)]
pub struct Researcher;

impl Role for Researcher {
    fn kind(&self) -> AgentKind {
        AgentKind::Researcher
    }

    fn description(&self) -> &'static str {
        "Researches background details and records them as world facts"
    }

    fn capabilities(&self) -> &'static [&'static str] {
        &["research", "world_building", "fact_finding"]
    }

    fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    fn build_prompt(&self, input: &TaskInput, context: &[MemoryItem]) -> Result<String> {
        let topic = input.required_text("topic")?;
        let mut prompt = render_context(context);
        prompt.push_str(&format!("Topic: {topic}\n"));
        if let Some(questions) = input.text("questions") {
            prompt.push_str(&format!("Answer specifically:\n{questions}\n"));
        }
        Ok(prompt)
    }

    fn parse_response(&self, response: &ChatResponse) -> Result<AgentOutput> {
        let text = reply_text(response)?;
        let summary = text.split("\n\n").next().unwrap_or(text).trim();
        Ok(AgentOutput::text(text).with_data(json!({ "summary": summary })))
    }

    fn memory_writes(&self, input: &TaskInput, output: &AgentOutput) -> Vec<MemoryUpdate> {
        let Some(topic) = input.text("topic") else {
            return Vec::new();
        };
        let summary = output
            .data
            .get("summary")
            .and_then(|s| s.as_str())
            .unwrap_or(output.content.as_str());
        let finding: String = format!("{topic}: {summary}")
            .chars()
            .take(MAX_FINDING_CHARS)
            .collect();
        let importance = input
            .optional_u64("importance")
            .map_or(DEFAULT_FINDING_IMPORTANCE, |i| i.min(10) as u8);
        vec![scoped(
            MemoryUpdate::new(finding, MemoryType::WorldSetting, importance),
            input,
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inkwell_memory::MemoryScope;

    #[test]
    fn test_stores_summary_as_world_setting() {
        let input = TaskInput::new("t")
            .with_project("novel")
            .with_param("topic", "Tar harbors");
        let reply = "Tar was boiled on the quay.\n\nMore detail follows.";
        let output = Researcher
            .parse_response(&ChatResponse::success(reply, "m"))
            .unwrap();
        assert_eq!(output.data["summary"], "Tar was boiled on the quay.");

        let writes = Researcher.memory_writes(&input, &output);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].content, "Tar harbors: Tar was boiled on the quay.");
        assert_eq!(writes[0].memory_type, MemoryType::WorldSetting);
        assert_eq!(writes[0].scope, MemoryScope::Project);
        assert_eq!(writes[0].importance, DEFAULT_FINDING_IMPORTANCE);
    }

    #[test]
    fn test_importance_override_and_global_scope() {
        let input = TaskInput::new("t")
            .with_param("topic", "Lighthouses")
            .with_param("importance", 9);
        let output = AgentOutput::text("Lamps burned whale oil.");
        let writes = Researcher.memory_writes(&input, &output);
        assert_eq!(writes[0].importance, 9);
        assert_eq!(writes[0].scope, MemoryScope::Global);
        assert_eq!(writes[0].content, "Lighthouses: Lamps burned whale oil.");
    }
}
