//! Story memory for Inkwell.
//!
//! Memories are short facts about a novel (world rules, character traits,
//! plot beats) tagged with a scope and an importance score. Agents search
//! them before generating and write new ones afterwards; the
//! [`CompressionEngine`] keeps the store bounded by folding unimportant
//! memories into summaries.
//!
//! ```text
//! Global
//!  └─ Project
//!      └─ Volume
//!          └─ Chapter
//! ```
//!
//! A query at one level sees global memories plus everything at or below
//! that level within the same project.

pub mod compression;
pub mod error;
pub mod manager;
pub mod search;
pub mod types;

pub use compression::{CompressionEngine, ExtractiveSummarizer, ModelSummarizer, Summarizer};
pub use error::{MemoryError, Result};
pub use manager::{CompressionStats, MemoryConfig, MemoryKey, MemoryManager};
pub use types::{
    MAX_IMPORTANCE, MemoryItem, MemoryQuery, MemoryScope, MemoryType, MemoryUpdate,
    estimate_tokens, importance_order,
};
