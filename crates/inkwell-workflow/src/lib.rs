//! Multi-agent workflows for Inkwell.
//!
//! A workflow is an ordered list of tasks, each dispatched to an agent by
//! type name through the [`AgentFactory`](inkwell_agent::AgentFactory).
//! Tasks run one after another; there is no dependency graph beyond list
//! order.
//!
//! ```text
//! WorkflowDefinition (TOML)
//!        │ validate
//!        ▼
//! WorkflowEngine ── per task ──▶ resolve agent → initialize
//!        │                       → resolve {{templates}}
//!        │                       → execute (retries, timeout)
//!        ▼
//! WorkflowResult + WorkflowEvent stream
//! ```

pub mod definition;
pub mod engine;
pub mod error;
pub mod result;
pub mod template;

pub use definition::{FailurePolicy, WorkflowDefinition, WorkflowFile, WorkflowTask};
pub use engine::{DEFAULT_RETRY_DELAY, WorkflowEngine};
pub use error::{Result, WorkflowError};
pub use result::{TaskResult, TaskStatus, WorkflowEvent, WorkflowResult};
pub use template::{TemplateResolver, resolve_params};
