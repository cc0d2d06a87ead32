//! Memory items and the requests that create and query them.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{MemoryError, Result};

/// Highest importance score an item may carry.
pub const MAX_IMPORTANCE: u8 = 10;

/// Rough characters-per-token ratio used for budgeting.
const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token count of `text`.
///
/// Byte length over four: about right for English, and close enough for CJK
/// text where each character is three bytes.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(CHARS_PER_TOKEN)
}

// ─────────────────────────────────────────────────────────────────────────────
// Classification
// ─────────────────────────────────────────────────────────────────────────────

/// Semantic category of a memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    WorldSetting,
    CharacterFact,
    PlotPoint,
    StyleGuide,
    Dialogue,
    /// Produced by compression.
    Summary,
    General,
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::WorldSetting => "world_setting",
            Self::CharacterFact => "character_fact",
            Self::PlotPoint => "plot_point",
            Self::StyleGuide => "style_guide",
            Self::Dialogue => "dialogue",
            Self::Summary => "summary",
            Self::General => "general",
        };
        f.write_str(label)
    }
}

/// How widely a memory applies.
///
/// Ordered from widest to narrowest: a chapter sits inside a volume, which
/// sits inside a project.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum MemoryScope {
    #[default]
    Global,
    Project,
    Volume,
    Chapter,
}

impl std::fmt::Display for MemoryScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Global => "global",
            Self::Project => "project",
            Self::Volume => "volume",
            Self::Chapter => "chapter",
        };
        f.write_str(label)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory Item
// ─────────────────────────────────────────────────────────────────────────────

/// A scoped, importance-weighted context fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: Uuid,
    pub content: String,
    pub memory_type: MemoryType,
    pub scope: MemoryScope,
    /// 0 (disposable) to 10 (essential).
    pub importance: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MemoryItem {
    /// Build an item from a validated update.
    pub fn from_update(update: MemoryUpdate) -> Result<Self> {
        update.validate()?;
        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            content: update.content.trim().to_string(),
            memory_type: update.memory_type,
            scope: update.scope,
            importance: update.importance,
            project_id: update.project_id,
            volume_id: update.volume_id,
            chapter_id: update.chapter_id,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn estimated_tokens(&self) -> usize {
        estimate_tokens(&self.content)
    }

    /// Whether this item is visible to `query`: global items always are,
    /// others only at or inside the query scope of the same project.
    pub fn visible_to(&self, query: &MemoryQuery) -> bool {
        if self.scope == MemoryScope::Global {
            return true;
        }
        if self.project_id != query.project_id || self.scope < query.scope {
            return false;
        }
        let same = |mine: &Option<String>, wanted: &Option<String>| {
            wanted.is_none() || mine == wanted
        };
        match query.scope {
            MemoryScope::Global | MemoryScope::Project => true,
            MemoryScope::Volume => same(&self.volume_id, &query.volume_id),
            MemoryScope::Chapter => {
                same(&self.volume_id, &query.volume_id)
                    && same(&self.chapter_id, &query.chapter_id)
            }
        }
    }
}

/// The "most important first" total order.
///
/// Higher importance first, then most recently updated, then id so that
/// the order is total.
pub fn importance_order(a: &MemoryItem, b: &MemoryItem) -> Ordering {
    b.importance
        .cmp(&a.importance)
        .then_with(|| b.updated_at.cmp(&a.updated_at))
        .then_with(|| a.id.cmp(&b.id))
}

// ─────────────────────────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────────────────────────

/// Create-or-update request for one memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryUpdate {
    pub content: String,
    pub memory_type: MemoryType,
    pub scope: MemoryScope,
    pub importance: u8,
    pub project_id: Option<String>,
    pub volume_id: Option<String>,
    pub chapter_id: Option<String>,
}

impl MemoryUpdate {
    /// A global memory.
    pub fn new(content: impl Into<String>, memory_type: MemoryType, importance: u8) -> Self {
        Self {
            content: content.into(),
            memory_type,
            scope: MemoryScope::Global,
            importance,
            project_id: None,
            volume_id: None,
            chapter_id: None,
        }
    }

    /// Scope the memory to a project.
    pub fn in_project(mut self, project_id: impl Into<String>) -> Self {
        self.project_id = Some(project_id.into());
        self.scope = self.scope.max(MemoryScope::Project);
        self
    }

    /// Scope the memory to a volume of its project.
    pub fn in_volume(mut self, volume_id: impl Into<String>) -> Self {
        self.volume_id = Some(volume_id.into());
        self.scope = self.scope.max(MemoryScope::Volume);
        self
    }

    /// Scope the memory to a chapter of its volume.
    pub fn in_chapter(mut self, chapter_id: impl Into<String>) -> Self {
        self.chapter_id = Some(chapter_id.into());
        self.scope = MemoryScope::Chapter;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.content.trim().is_empty() {
            return Err(MemoryError::EmptyContent);
        }
        if self.importance > MAX_IMPORTANCE {
            return Err(MemoryError::InvalidImportance(self.importance));
        }
        let require = |present: bool, field: &'static str| {
            if present {
                Ok(())
            } else {
                Err(MemoryError::MissingScopeId {
                    scope: self.scope,
                    field,
                })
            }
        };
        if self.scope >= MemoryScope::Project {
            require(self.project_id.is_some(), "project_id")?;
        }
        if self.scope >= MemoryScope::Volume {
            require(self.volume_id.is_some(), "volume_id")?;
        }
        if self.scope == MemoryScope::Chapter {
            require(self.chapter_id.is_some(), "chapter_id")?;
        }
        Ok(())
    }
}

/// A relevance search over memories.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryQuery {
    pub query: String,
    pub scope: MemoryScope,
    pub project_id: Option<String>,
    pub volume_id: Option<String>,
    pub chapter_id: Option<String>,
    pub limit: usize,
}

impl MemoryQuery {
    /// Search every memory of `project_id` plus global ones.
    pub fn project(query: impl Into<String>, project_id: impl Into<String>, limit: usize) -> Self {
        Self {
            query: query.into(),
            scope: MemoryScope::Project,
            project_id: Some(project_id.into()),
            limit,
            ..Default::default()
        }
    }

    /// Search global memories only.
    pub fn global(query: impl Into<String>, limit: usize) -> Self {
        Self {
            query: query.into(),
            limit,
            ..Default::default()
        }
    }

    pub fn in_volume(mut self, volume_id: impl Into<String>) -> Self {
        self.volume_id = Some(volume_id.into());
        self.scope = self.scope.max(MemoryScope::Volume);
        self
    }

    pub fn in_chapter(mut self, chapter_id: impl Into<String>) -> Self {
        self.chapter_id = Some(chapter_id.into());
        self.scope = MemoryScope::Chapter;
        self
    }
}
