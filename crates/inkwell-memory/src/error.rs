//! Error types for the memory crate.

use thiserror::Error;

use crate::types::MemoryScope;

/// Errors raised when a memory update is rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MemoryError {
    /// Memory content is empty or whitespace.
    #[error("memory content is empty")]
    EmptyContent,

    /// Importance above the maximum.
    #[error("importance {0} is out of range [0, 10]")]
    InvalidImportance(u8),

    /// A scoped memory is missing the identifier its scope requires.
    #[error("{scope} memory requires {field}")]
    MissingScopeId {
        scope: MemoryScope,
        field: &'static str,
    },
}

/// Result type alias for memory operations.
pub type Result<T> = std::result::Result<T, MemoryError>;
