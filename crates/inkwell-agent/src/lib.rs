//! Role agents for Inkwell.
//!
//! Each agent is a task executor with one job in the writing process. All
//! built-in agents share one engine, [`RoleAgent`], and differ only in their
//! [`Role`]: how they phrase the prompt and how they read the reply.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  AgentFactory                                │
//! │  - resolve("writer") / create(kind)          │
//! │  - per-type AgentConfig, custom types        │
//! └──────────────────────────────────────────────┘
//!                        │
//!                        ▼
//! ┌──────────────────────────────────────────────┐
//! │  RoleAgent<R: Role>                          │
//! │  memory search → prompt → chat (retries)     │
//! │  → parse → memory writes                     │
//! └──────────────────────────────────────────────┘
//!            │                        │
//!            ▼                        ▼
//!     ┌──────────────┐        ┌───────────────┐
//!     │ ModelManager │        │ MemoryManager │
//!     └──────────────┘        └───────────────┘
//! ```

pub mod agent;
pub mod error;
pub mod factory;
pub mod parse;
pub mod roles;
pub mod types;

pub use agent::{AGENT_VERSION, Agent, AgentContext, Role, RoleAgent, render_context};
pub use error::{AgentError, Result};
pub use factory::{AgentConstructor, AgentFactory};
pub use types::{
    AgentConfig, AgentKind, AgentOutput, AgentStatus, AgentStatusSnapshot, TaskInput,
};
