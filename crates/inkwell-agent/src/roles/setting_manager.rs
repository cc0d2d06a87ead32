//! Setting manager role: extracts world and character facts from text.

use inkwell_llm::ChatResponse;
use inkwell_memory::{MemoryItem, MemoryType, MemoryUpdate};
use serde::Serialize;
use serde_json::json;

use super::reply_text;
use crate::agent::{Role, render_context, scoped};
use crate::error::Result;
use crate::parse::strip_list_marker;
use crate::types::{AgentKind, AgentOutput, TaskInput};

const SYSTEM_PROMPT: &str = "\
You keep the story bible for a novel. Extract every durable fact from the \
passage. Group them under the headings \"Characters:\" and \"World:\", one \
fact per line in the form `name: fact`. Skip anything already known.";

const DEFAULT_FACT_IMPORTANCE: u8 = 7;

/// Maintains the story bible.
#[derive(Debug, Clone, Copy, Default)]
pub struct SettingManager;

#[derive(Debug, Clone, PartialEq, Serialize)]
struct Fact {
    key: String,
    value: String,
    category: &'static str,
}

fn parse_facts(text: &str) -> Vec<Fact> {
    let mut category = "world";
    let mut facts = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        let lower = line.trim_start_matches('#').trim().to_lowercase();
        if lower.starts_with("character") && lower.ends_with(':') {
            category = "character";
            continue;
        }
        if (lower.starts_with("world") || lower.starts_with("setting")) && lower.ends_with(':') {
            category = "world";
            continue;
        }

        let entry = strip_list_marker(line).unwrap_or(line);
        let Some((key, value)) = entry.split_once(':') else {
            continue;
        };
        let key = key.trim().trim_matches('*').trim();
        let value = value.trim();
        if key.is_empty() || value.is_empty() {
            continue;
        }
        facts.push(Fact {
            key: key.to_string(),
            value: value.to_string(),
            category,
        });
    }
    facts
}

impl Role for SettingManager {
    fn kind(&self) -> AgentKind {
        AgentKind::SettingManager
    }

    fn description(&self) -> &'static str {
        "Extracts world-setting and character facts into memory"
    }

    fn capabilities(&self) -> &'static [&'static str] {
        &["world_building", "character_tracking", "continuity"]
    }

    fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    fn build_prompt(&self, input: &TaskInput, context: &[MemoryItem]) -> Result<String> {
        let text = input.required_text("text")?;
        Ok(format!("{}Passage:\n{text}\n", render_context(context)))
    }

    fn parse_response(&self, response: &ChatResponse) -> Result<AgentOutput> {
        let text = reply_text(response)?;
        let facts = parse_facts(text);
        Ok(AgentOutput::text(text).with_data(json!({ "facts": facts })))
    }

    fn memory_writes(&self, input: &TaskInput, output: &AgentOutput) -> Vec<MemoryUpdate> {
        let importance = input
            .optional_u64("importance")
            .map_or(DEFAULT_FACT_IMPORTANCE, |i| i.min(10) as u8);
        parse_facts(&output.content)
            .into_iter()
            .map(|fact| {
                let memory_type = match fact.category {
                    "character" => MemoryType::CharacterFact,
                    _ => MemoryType::WorldSetting,
                };
                scoped(
                    MemoryUpdate::new(
                        format!("{}: {}", fact.key, fact.value),
                        memory_type,
                        importance,
                    ),
                    input,
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPLY: &str = "\
Characters:
- Mira: left-handed, fears deep water
- **Tam**: harbor pilot
World:
- Greywater: a tar-smelling port
Nothing else of note.";

    #[test]
    fn test_parse_facts_by_section() {
        let facts = parse_facts(REPLY);
        assert_eq!(facts.len(), 3);
        assert_eq!(facts[0].key, "Mira");
        assert_eq!(facts[0].category, "character");
        assert_eq!(facts[1].key, "Tam");
        assert_eq!(facts[2].category, "world");
        assert_eq!(facts[2].value, "a tar-smelling port");
    }

    #[test]
    fn test_memory_writes_per_fact() {
        let input = TaskInput::new("t").with_project("novel");
        let output = SettingManager
            .parse_response(&ChatResponse::success(REPLY, "m"))
            .unwrap();
        assert_eq!(output.data["facts"].as_array().unwrap().len(), 3);

        let writes = SettingManager.memory_writes(&input, &output);
        assert_eq!(writes.len(), 3);
        assert_eq!(writes[0].memory_type, MemoryType::CharacterFact);
        assert_eq!(writes[0].content, "Mira: left-handed, fears deep water");
        assert_eq!(writes[2].memory_type, MemoryType::WorldSetting);
        assert!(writes.iter().all(|w| w.project_id.as_deref() == Some("novel")));
    }
}
