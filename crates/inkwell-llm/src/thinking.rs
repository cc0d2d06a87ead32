//! Reasoning traces kept apart from the final answer.
//!
//! A [`ThinkingChain`] is an ordered tree of [`ThinkingStep`]s with its own
//! status machine. The [`ThinkingChainProcessor`] builds a chain from the
//! reasoning side-channel of a [`ChatStream`] while passing content through.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::provider::{ChatStream, StreamEvent};
use crate::types::{ChatResponse, ResponseStatus};

/// Illegal status transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cannot move {subject} from {from} to {to}")]
pub struct ThinkingError {
    pub subject: &'static str,
    pub from: String,
    pub to: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Steps
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One step of a reasoning trace. Sub-steps are owned by their parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkingStep {
    pub number: u32,
    pub title: String,
    pub content: String,
    pub status: StepStatus,
    confidence: f64,
    pub sub_steps: Vec<ThinkingStep>,
}

impl ThinkingStep {
    /// A pending step. Its number is assigned when it is added to a parent.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            number: 0,
            title: title.into(),
            content: String::new(),
            status: StepStatus::Pending,
            confidence: 0.0,
            sub_steps: Vec::new(),
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Set the confidence, clamped to `[0, 1]`. NaN becomes 0.
    pub fn set_confidence(&mut self, confidence: f64) {
        self.confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
    }

    /// Append a sub-step, numbering it after its siblings. Returns the number.
    pub fn add_sub_step(&mut self, mut step: ThinkingStep) -> u32 {
        step.number = self.sub_steps.len() as u32 + 1;
        let number = step.number;
        self.sub_steps.push(step);
        number
    }

    fn transition(&mut self, allowed: &[StepStatus], to: StepStatus) -> Result<(), ThinkingError> {
        if !allowed.contains(&self.status) {
            return Err(ThinkingError {
                subject: "step",
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), ThinkingError> {
        self.transition(&[StepStatus::Pending], StepStatus::Processing)
    }

    pub fn complete(&mut self) -> Result<(), ThinkingError> {
        self.transition(&[StepStatus::Processing], StepStatus::Completed)
    }

    pub fn fail(&mut self) -> Result<(), ThinkingError> {
        self.transition(&[StepStatus::Processing], StepStatus::Failed)
    }

    pub fn skip(&mut self) -> Result<(), ThinkingError> {
        self.transition(&[StepStatus::Pending, StepStatus::Processing], StepStatus::Skipped)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Chains
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ChainStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// An ordered reasoning trace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkingChain {
    pub id: Uuid,
    pub title: String,
    pub status: ChainStatus,
    pub steps: Vec<ThinkingStep>,
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ThinkingChain {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            status: ChainStatus::Pending,
            steps: Vec::new(),
            progress: 0.0,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Append a step, numbering it from 1. Returns the number.
    pub fn add_step(&mut self, mut step: ThinkingStep) -> u32 {
        step.number = self.steps.len() as u32 + 1;
        let number = step.number;
        self.steps.push(step);
        number
    }

    pub fn step(&self, number: u32) -> Option<&ThinkingStep> {
        self.steps.iter().find(|s| s.number == number)
    }

    pub fn step_mut(&mut self, number: u32) -> Option<&mut ThinkingStep> {
        self.steps.iter_mut().find(|s| s.number == number)
    }

    pub fn completed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .count()
    }

    /// Recompute progress as completed / total top-level steps.
    /// Leaves progress alone when there are no steps.
    pub fn update_progress(&mut self) {
        let total = self.steps.len();
        if total == 0 {
            return;
        }
        self.progress = self.completed_steps() as f64 / total as f64;
    }

    fn transition(&mut self, allowed: &[ChainStatus], to: ChainStatus) -> Result<(), ThinkingError> {
        if !allowed.contains(&self.status) {
            return Err(ThinkingError {
                subject: "chain",
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        if to.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), ThinkingError> {
        self.transition(&[ChainStatus::Pending], ChainStatus::Processing)
    }

    pub fn complete(&mut self) -> Result<(), ThinkingError> {
        self.transition(&[ChainStatus::Processing], ChainStatus::Completed)?;
        self.update_progress();
        Ok(())
    }

    pub fn fail(&mut self) -> Result<(), ThinkingError> {
        self.transition(&[ChainStatus::Pending, ChainStatus::Processing], ChainStatus::Failed)
    }

    pub fn cancel(&mut self) -> Result<(), ThinkingError> {
        self.transition(
            &[ChainStatus::Pending, ChainStatus::Processing],
            ChainStatus::Cancelled,
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Processor
// ─────────────────────────────────────────────────────────────────────────────

/// Progress of a chain being built from a stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ThinkingEvent {
    StepStarted { number: u32 },
    StepUpdated { number: u32, delta: String },
    StepCompleted { number: u32 },
    /// Answer content, passed through unchanged.
    ContentDelta(String),
    Finished { status: ChainStatus, progress: f64 },
}

/// Splits a stream's reasoning into steps at blank-line boundaries.
pub struct ThinkingChainProcessor {
    chain: ThinkingChain,
    events: Option<mpsc::UnboundedSender<ThinkingEvent>>,
    current: Option<u32>,
    pending: String,
}

impl ThinkingChainProcessor {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            chain: ThinkingChain::new(title),
            events: None,
            current: None,
            pending: String::new(),
        }
    }

    /// Report progress on `events` as the stream is consumed.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<ThinkingEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn chain(&self) -> &ThinkingChain {
        &self.chain
    }

    fn send(&self, event: ThinkingEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    /// Feed one reasoning delta.
    pub fn push_reasoning(&mut self, delta: &str) {
        if self.chain.status == ChainStatus::Pending {
            let _ = self.chain.start();
        }
        self.pending.push_str(delta);

        while let Some(split) = self.pending.find("\n\n") {
            let paragraph: String = self.pending.drain(..split + 2).collect();
            self.append(paragraph.trim_end());
            self.close_current();
        }

        // Trailing newlines may be the first half of a boundary.
        let held = self.pending.len() - self.pending.trim_end_matches('\n').len();
        let flush = self.pending.len() - held;
        if !self.pending[..flush].trim().is_empty() {
            let partial: String = self.pending.drain(..flush).collect();
            self.append(&partial);
        }
    }

    fn append(&mut self, text: &str) {
        let text = match self.current {
            Some(_) => text,
            None => text.trim_start(),
        };
        if text.trim().is_empty() {
            return;
        }
        let number = match self.current {
            Some(number) => number,
            None => {
                let mut step = ThinkingStep::new(step_title(text));
                let _ = step.start();
                let number = self.chain.add_step(step);
                self.current = Some(number);
                self.send(ThinkingEvent::StepStarted { number });
                number
            }
        };
        if let Some(step) = self.chain.step_mut(number) {
            step.content.push_str(text);
        }
        self.send(ThinkingEvent::StepUpdated {
            number,
            delta: text.to_string(),
        });
    }

    fn close_current(&mut self) {
        if let Some(number) = self.current.take() {
            if let Some(step) = self.chain.step_mut(number) {
                let _ = step.complete();
                step.set_confidence(1.0);
            }
            self.chain.update_progress();
            self.send(ThinkingEvent::StepCompleted { number });
        }
    }

    /// Close out the chain according to the terminal response.
    pub fn finish(&mut self, response: &ChatResponse) -> &ThinkingChain {
        if !self.pending.trim().is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.append(&rest);
        }

        match response.status {
            ResponseStatus::Success => {
                self.close_current();
                if self.chain.status == ChainStatus::Pending {
                    let _ = self.chain.start();
                }
                let _ = self.chain.complete();
            }
            ResponseStatus::Cancelled => {
                self.skip_open_steps();
                let _ = self.chain.cancel();
            }
            ResponseStatus::Failed => {
                if let Some(number) = self.current.take() {
                    if let Some(step) = self.chain.step_mut(number) {
                        let _ = step.fail();
                    }
                }
                let _ = self.chain.fail();
            }
        }
        self.chain.update_progress();

        self.send(ThinkingEvent::Finished {
            status: self.chain.status,
            progress: self.chain.progress,
        });
        &self.chain
    }

    fn skip_open_steps(&mut self) {
        self.current = None;
        for step in &mut self.chain.steps {
            if !step.status.is_terminal() {
                let _ = step.skip();
            }
        }
    }

    /// Drive `stream` to completion, returning the terminal response and
    /// the chain built from its reasoning.
    pub async fn process(mut self, mut stream: ChatStream) -> (ChatResponse, ThinkingChain) {
        while let Some(event) = stream.next().await {
            match event {
                StreamEvent::Chunk(chunk) => {
                    if let Some(reasoning) = &chunk.reasoning {
                        self.push_reasoning(reasoning);
                    }
                    if !chunk.content.is_empty() {
                        self.send(ThinkingEvent::ContentDelta(chunk.content));
                    }
                }
                StreamEvent::Done(response) => {
                    self.finish(&response);
                    return (response, self.chain);
                }
            }
        }
        let response = ChatResponse::failure("stream ended without a terminal response");
        self.finish(&response);
        (response, self.chain)
    }
}

fn step_title(text: &str) -> String {
    let first = text.trim().lines().next().unwrap_or_default();
    let mut title: String = first.chars().take(48).collect();
    if first.chars().count() > 48 {
        title.push('…');
    }
    title
}
