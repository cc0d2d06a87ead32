//! Workflow command - run and validate workflow files.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context as _, Result, anyhow, bail};
use clap::{Args, Subcommand};
use console::Style;
use inkwell_agent::AgentFactory;
use inkwell_llm::ModelManager;
use inkwell_memory::MemoryManager;
use inkwell_workflow::{
    TaskResult, TaskStatus, WorkflowDefinition, WorkflowEngine, WorkflowEvent, WorkflowResult,
};
use serde_json::Value;
use tokio::sync::mpsc;

use super::Context;

/// Arguments for the workflow command.
#[derive(Args, Debug)]
pub struct WorkflowArgs {
    #[command(subcommand)]
    pub command: WorkflowCommand,
}

#[derive(Subcommand, Debug)]
pub enum WorkflowCommand {
    /// Run a workflow file
    Run {
        /// Path to the workflow TOML file
        file: PathBuf,

        /// Workflow input as key=value (repeatable). Values that parse as
        /// JSON keep their type.
        #[arg(short, long = "input", value_name = "KEY=VALUE")]
        inputs: Vec<String>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a workflow file without running it
    Validate {
        /// Path to the workflow TOML file
        file: PathBuf,
    },
}

/// Commands that need no providers. Returns `None` for the rest.
pub fn run_offline(args: &WorkflowArgs) -> Option<Result<()>> {
    match &args.command {
        WorkflowCommand::Validate { file } => Some(validate(file)),
        WorkflowCommand::Run { .. } => None,
    }
}

/// Run the workflow command.
pub async fn run(args: WorkflowArgs, ctx: &Context) -> Result<()> {
    match args.command {
        WorkflowCommand::Run { file, inputs, json } => {
            run_file(&file, &inputs, json, ctx).await
        }
        WorkflowCommand::Validate { file } => validate(&file),
    }
}

fn load(file: &Path) -> Result<WorkflowDefinition> {
    WorkflowDefinition::from_file(file)
        .with_context(|| format!("failed to load workflow {}", file.display()))
}

fn validate(file: &Path) -> Result<()> {
    let definition = load(file)?;
    definition.validate()?;

    // Resolving needs no providers; it only checks the type names.
    let factory = AgentFactory::new(
        Arc::new(ModelManager::new()),
        Arc::new(MemoryManager::default()),
    );
    let unknown: Vec<&str> = definition
        .tasks
        .iter()
        .filter(|t| factory.resolve(&t.task_type).is_err())
        .map(|t| t.task_type.as_str())
        .collect();
    if !unknown.is_empty() {
        bail!("unknown task type(s): {}", unknown.join(", "));
    }

    let green = Style::new().green();
    println!(
        "{} workflow '{}' is valid ({} tasks)",
        green.apply_to("✓"),
        definition.name,
        definition.tasks.len()
    );
    Ok(())
}

async fn run_file(file: &Path, inputs: &[String], json: bool, ctx: &Context) -> Result<()> {
    let definition = load(file)?;
    let input = parse_inputs(inputs)?;

    let (tx, rx) = mpsc::unbounded_channel();
    let engine = WorkflowEngine::new(Arc::clone(&ctx.app.factory))
        .with_failure_policy(ctx.app.config.failure_policy())
        .with_events(tx);
    let progress = (!json).then(|| tokio::spawn(print_progress(rx)));

    let result = engine.execute(&definition, input, &ctx.cancel).await;
    drop(engine);
    if let Some(progress) = progress {
        let _ = progress.await;
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&result);
    }

    if result.success {
        Ok(())
    } else {
        Err(anyhow!(
            "workflow '{}' failed: {}",
            result.workflow,
            result.first_error.as_deref().unwrap_or("unknown error")
        ))
    }
}

/// `key=value` pairs into the workflow input map.
fn parse_inputs(inputs: &[String]) -> Result<HashMap<String, Value>> {
    inputs
        .iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("input '{pair}' is not KEY=VALUE"))?;
            let key = key.trim();
            if key.is_empty() {
                bail!("input '{pair}' has an empty key");
            }
            let value: Value = serde_json::from_str(value)
                .unwrap_or_else(|_| Value::String(value.to_string()));
            Ok((key.to_string(), value))
        })
        .collect()
}

async fn print_progress(mut rx: mpsc::UnboundedReceiver<WorkflowEvent>) {
    let dim = Style::new().dim();
    while let Some(event) = rx.recv().await {
        match event {
            WorkflowEvent::TaskStarted {
                task_id,
                task_type,
                index,
                total,
                ..
            } => {
                eprintln!(
                    "{}",
                    dim.apply_to(format!("[{}/{total}] {task_id} ({task_type})...", index + 1))
                );
            }
            WorkflowEvent::TaskFinished { result, .. } => eprintln!("{}", task_line(&result)),
            WorkflowEvent::WorkflowFinished { .. } => break,
        }
    }
}

fn task_line(result: &TaskResult) -> String {
    let (mark, style) = match result.status {
        TaskStatus::Completed => ("✓", Style::new().green()),
        TaskStatus::Failed => ("✗", Style::new().red()),
        TaskStatus::Cancelled => ("■", Style::new().yellow()),
        TaskStatus::Skipped => ("-", Style::new().dim()),
    };
    let mut line = format!(
        "{} {} {} in {:.1}s",
        style.apply_to(mark),
        result.task_id,
        result.status,
        result.duration.as_secs_f64()
    );
    if result.attempts > 1 {
        line.push_str(&format!(" after {} attempts", result.attempts));
    }
    if let Some(error) = &result.error {
        line.push_str(&format!(": {error}"));
    }
    line
}

fn print_summary(result: &WorkflowResult) {
    let bold = Style::new().bold();
    for task in &result.task_results {
        if let Some(output) = &task.output {
            println!("{}", bold.apply_to(format!("── {} ──", task.task_id)));
            println!("{}", output.content.trim_end());
            println!();
        }
    }
    let skipped = result
        .task_results
        .iter()
        .filter(|t| t.status == TaskStatus::Skipped)
        .map(|t| t.task_id.as_str())
        .collect::<Vec<_>>();
    println!(
        "{}: {} completed, {} failed, {} skipped in {:.1}s",
        bold.apply_to(&result.workflow),
        result.completed_tasks,
        result.failed_tasks,
        result.skipped_tasks,
        result.duration.as_secs_f64()
    );
    if !skipped.is_empty() {
        println!("skipped: {}", skipped.join(", "));
    }
}
