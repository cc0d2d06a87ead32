//! Declarative workflow definitions.
//!
//! Workflows are TOML files with one `[workflow]` table and an ordered list
//! of `[[workflow.tasks]]`:
//!
//! ```toml
//! [workflow]
//! name = "chapter"
//! project_id = "lighthouse"
//! failure_policy = "stop_on_error"
//!
//! [[workflow.tasks]]
//! id = "plan"
//! type = "director"
//! required = true
//! params = { goal = "{{input.premise}}" }
//!
//! [[workflow.tasks]]
//! id = "draft"
//! type = "writer"
//! retry_attempts = 1
//! timeout_secs = 300
//! params = { outline = "{{plan.data.steps}}" }
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, WorkflowError};
use crate::template::{INPUT_KEY, references};

// ─────────────────────────────────────────────────────────────────────────────
// Top-level file
// ─────────────────────────────────────────────────────────────────────────────

/// Root of a workflow TOML file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowFile {
    pub workflow: WorkflowDefinition,
}

/// What happens to the remaining tasks after a task fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure and keep going. Failed `required` tasks still stop
    /// the run.
    #[default]
    #[serde(alias = "continue")]
    ContinueOnError,
    /// Skip everything after the first failure.
    #[serde(alias = "stop")]
    StopOnError,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ContinueOnError => f.write_str("continue_on_error"),
            Self::StopOnError => f.write_str("stop_on_error"),
        }
    }
}

/// An ordered list of agent tasks run as one unit.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkflowDefinition {
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Project the tasks read and write memories in. Without one, tasks
    /// only see global memories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    /// Overrides the engine's default policy when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<FailurePolicy>,

    #[serde(default)]
    pub tasks: Vec<WorkflowTask>,
}

/// One step of a workflow, dispatched to an agent by `task_type`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WorkflowTask {
    /// Unique within the workflow; later tasks reference results by it.
    pub id: String,

    /// Agent type name, e.g. `"writer"` or a registered custom type.
    #[serde(rename = "type")]
    pub task_type: String,

    /// Agent parameters. String values may contain `{{...}}` templates.
    #[serde(default, alias = "params")]
    pub parameters: HashMap<String, Value>,

    /// Stop the run when this task fails, whatever the policy.
    #[serde(default)]
    pub required: bool,

    /// Extra attempts after a failed first try.
    #[serde(default)]
    pub retry_attempts: u32,

    /// Per-attempt time limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl WorkflowTask {
    pub fn new(id: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            parameters: HashMap::new(),
            required: false,
            retry_attempts: 0,
            timeout_secs: None,
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_retries(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing and validation
// ─────────────────────────────────────────────────────────────────────────────

impl WorkflowDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            project_id: None,
            failure_policy: None,
            tasks: Vec::new(),
        }
    }

    pub fn with_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = Some(policy);
        self
    }

    pub fn with_task(mut self, task: WorkflowTask) -> Self {
        self.tasks.push(task);
        self
    }

    /// Parse a workflow from a TOML string. The result is not validated.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let file: WorkflowFile = toml::from_str(toml_str)
            .map_err(|e| WorkflowError::invalid(format!("TOML parse error: {e}")))?;
        Ok(file.workflow)
    }

    /// Parse a workflow from a TOML file. The result is not validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| WorkflowError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(&WorkflowFile {
            workflow: self.clone(),
        })
        .map_err(|e| WorkflowError::invalid(format!("TOML serialize error: {e}")))
    }

    /// Check the definition before running it.
    ///
    /// Task ids must be unique and non-empty, every task needs a type, and
    /// templates may only reference the workflow input or tasks that run
    /// earlier.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(WorkflowError::invalid("workflow name is empty"));
        }
        if self.tasks.is_empty() {
            return Err(WorkflowError::invalid(format!(
                "workflow '{}' has no tasks",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for task in &self.tasks {
            if task.id.trim().is_empty() {
                return Err(WorkflowError::invalid("task id is empty"));
            }
            if task.id == INPUT_KEY {
                return Err(WorkflowError::invalid(format!(
                    "task id '{INPUT_KEY}' is reserved for the workflow input"
                )));
            }
            if task.task_type.trim().is_empty() {
                return Err(WorkflowError::invalid(format!(
                    "task '{}' has no type",
                    task.id
                )));
            }

            for value in task.parameters.values() {
                for root in references(value)? {
                    if root != INPUT_KEY && !seen.contains(root.as_str()) {
                        return Err(WorkflowError::invalid(format!(
                            "task '{}' references '{root}', which is not an earlier task",
                            task.id
                        )));
                    }
                }
            }

            if !seen.insert(task.id.as_str()) {
                return Err(WorkflowError::invalid(format!(
                    "duplicate task id '{}'",
                    task.id
                )));
            }
        }
        Ok(())
    }

    /// The policy in effect, given the engine's default.
    pub fn policy_or(&self, default: FailurePolicy) -> FailurePolicy {
        self.failure_policy.unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CHAPTER: &str = r#"
[workflow]
name = "chapter"
description = "Plan, draft and review one chapter"
project_id = "lighthouse"
failure_policy = "stop"

[[workflow.tasks]]
id = "plan"
type = "director"
required = true
params = { goal = "{{input.premise}}" }

[[workflow.tasks]]
id = "draft"
type = "writer"
retry_attempts = 2
timeout_secs = 300

[workflow.tasks.params]
outline = "{{plan.data.steps}}"
word_count = 1500

[[workflow.tasks]]
id = "review"
type = "critic"
params = { text = "{{draft.output}}" }
"#;

    #[test]
    fn test_parse_chapter_workflow() {
        let def = WorkflowDefinition::from_toml(CHAPTER).unwrap();
        assert_eq!(def.name, "chapter");
        assert_eq!(def.project_id.as_deref(), Some("lighthouse"));
        assert_eq!(def.failure_policy, Some(FailurePolicy::StopOnError));
        assert_eq!(def.tasks.len(), 3);

        let draft = &def.tasks[1];
        assert_eq!(draft.task_type, "writer");
        assert!(!draft.required);
        assert_eq!(draft.retry_attempts, 2);
        assert_eq!(draft.timeout_secs, Some(300));
        assert_eq!(draft.parameters["word_count"], json!(1500));
        assert!(def.tasks[0].required);
        assert!(def.validate().is_ok());
    }

    #[test]
    fn test_policy_defaults() {
        let def = WorkflowDefinition::from_toml(
            "[workflow]\nname = \"x\"\n[[workflow.tasks]]\nid = \"a\"\ntype = \"writer\"\n",
        )
        .unwrap();
        assert_eq!(def.failure_policy, None);
        assert_eq!(
            def.policy_or(FailurePolicy::StopOnError),
            FailurePolicy::StopOnError
        );
        assert_eq!(def.tasks[0].retry_attempts, 0);
        assert!(def.tasks[0].parameters.is_empty());
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = WorkflowDefinition::from_toml("[workflow\nname = 1").unwrap_err();
        assert!(err.to_string().contains("TOML parse error"));
    }

    #[test]
    fn test_validate_rejects_bad_definitions() {
        let ok_task = || WorkflowTask::new("a", "writer");

        let err = WorkflowDefinition::new(" ").with_task(ok_task()).validate();
        assert!(err.unwrap_err().to_string().contains("name is empty"));

        let err = WorkflowDefinition::new("w").validate();
        assert!(err.unwrap_err().to_string().contains("no tasks"));

        let err = WorkflowDefinition::new("w")
            .with_task(ok_task())
            .with_task(ok_task())
            .validate();
        assert!(err.unwrap_err().to_string().contains("duplicate task id 'a'"));

        let err = WorkflowDefinition::new("w")
            .with_task(WorkflowTask::new("b", ""))
            .validate();
        assert!(err.unwrap_err().to_string().contains("has no type"));

        let err = WorkflowDefinition::new("w")
            .with_task(WorkflowTask::new("input", "writer"))
            .validate();
        assert!(err.unwrap_err().to_string().contains("reserved"));
    }

    #[test]
    fn test_validate_template_order() {
        let forward = WorkflowDefinition::new("w")
            .with_task(WorkflowTask::new("review", "critic").with_param("text", "{{draft.output}}"))
            .with_task(WorkflowTask::new("draft", "writer").with_param("prompt", "{{input.premise}}"));
        let err = forward.validate().unwrap_err();
        assert!(err.to_string().contains("references 'draft'"));

        let own = WorkflowDefinition::new("w")
            .with_task(WorkflowTask::new("draft", "writer").with_param("prompt", "{{draft.output}}"));
        assert!(own.validate().is_err());

        let broken = WorkflowDefinition::new("w")
            .with_task(WorkflowTask::new("draft", "writer").with_param("prompt", "{{input.premise"));
        assert!(matches!(broken.validate(), Err(WorkflowError::Template(_))));
    }

    #[test]
    fn test_toml_roundtrip_keeps_tasks() {
        let def = WorkflowDefinition::from_toml(CHAPTER).unwrap();
        let again = WorkflowDefinition::from_toml(&def.to_toml().unwrap()).unwrap();
        assert_eq!(again.tasks, def.tasks);
        assert_eq!(again.failure_policy, def.failure_policy);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chapter.toml");
        std::fs::write(&path, CHAPTER).unwrap();
        let def = WorkflowDefinition::from_file(&path).unwrap();
        assert_eq!(def.tasks[2].id, "review");

        let err = WorkflowDefinition::from_file(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, WorkflowError::Io { .. }));
    }
}
