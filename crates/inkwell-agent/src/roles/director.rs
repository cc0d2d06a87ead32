//! Director role: turns a goal into an ordered plan.

use inkwell_llm::ChatResponse;
use inkwell_memory::MemoryItem;
use serde_json::{Value, json};

use super::reply_text;
use crate::agent::{Role, render_context};
use crate::error::{AgentError, Result};
use crate::parse::{extract_json_object, list_items};
use crate::types::{AgentKind, AgentOutput, TaskInput};

const SYSTEM_PROMPT: &str = "\
You are the director of a novel-writing team. You break a creative goal into \
a short sequence of concrete steps that writers can execute in order. Reply \
with JSON of the form {\"title\": \"...\", \"steps\": [\"...\", \"...\"]}.";

/// Plans chapters and story arcs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Director;

fn step_text(step: &Value) -> Option<String> {
    let text = match step {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Object(map) => {
            let title = map.get("title").and_then(Value::as_str);
            let detail = map
                .get("description")
                .or_else(|| map.get("detail"))
                .and_then(Value::as_str);
            match (title, detail) {
                (Some(t), Some(d)) => Some(format!("{t}: {d}")),
                (Some(t), None) => Some(t.to_string()),
                (None, Some(d)) => Some(d.to_string()),
                (None, None) => None,
            }
        }
        _ => None,
    };
    text.filter(|s| !s.is_empty())
}

impl Role for Director {
    fn kind(&self) -> AgentKind {
        AgentKind::Director
    }

    fn description(&self) -> &'static str {
        "Breaks a creative goal into an ordered plan of steps"
    }

    fn capabilities(&self) -> &'static [&'static str] {
        &["planning", "outlining", "story_structure"]
    }

    fn system_prompt(&self) -> &'static str {
        SYSTEM_PROMPT
    }

    fn build_prompt(&self, input: &TaskInput, context: &[MemoryItem]) -> Result<String> {
        let goal = input
            .first_text(&["goal", "prompt"])
            .ok_or_else(|| AgentError::missing_param("goal"))?;
        let mut prompt = render_context(context);
        prompt.push_str(&format!("Goal: {goal}\n"));
        if let Some(steps) = input.optional_u64("steps") {
            prompt.push_str(&format!("Plan exactly {steps} steps.\n"));
        }
        if let Some(constraints) = input.text("constraints") {
            prompt.push_str(&format!("Constraints: {constraints}\n"));
        }
        Ok(prompt)
    }

    fn parse_response(&self, response: &ChatResponse) -> Result<AgentOutput> {
        let text = reply_text(response)?;

        let (title, steps) = match extract_json_object(text) {
            Some(plan) => {
                let steps: Vec<String> = plan
                    .get("steps")
                    .and_then(Value::as_array)
                    .map(|steps| steps.iter().filter_map(step_text).collect())
                    .unwrap_or_default();
                let title = plan.get("title").and_then(Value::as_str).map(str::to_string);
                (title, steps)
            }
            None => (None, list_items(text)),
        };

        if steps.is_empty() {
            return Err(AgentError::parse("no plan steps found in reply"));
        }
        let content = steps
            .iter()
            .enumerate()
            .map(|(i, step)| format!("{}. {step}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(AgentOutput::text(content).with_data(json!({ "title": title, "steps": steps })))
    }
}
