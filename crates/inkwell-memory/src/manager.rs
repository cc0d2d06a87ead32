//! In-process memory store.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use inkwell_llm::CancellationToken;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::compression::{CompressionEngine, DEFAULT_BATCH_SIZE, ExtractiveSummarizer, Summarizer};
use crate::error::Result;
use crate::search::{Matcher, normalize};
use crate::types::{
    MAX_IMPORTANCE, MemoryItem, MemoryQuery, MemoryScope, MemoryUpdate, importance_order,
};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Limits for a [`MemoryManager`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Compress once the store holds more than this many items.
    pub max_items: usize,
    /// Items below this importance are eligible for compression.
    pub compression_threshold: u8,
    /// How many memories may share one summary.
    pub summary_batch_size: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_items: 2000,
            compression_threshold: 5,
            summary_batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Identity of a memory for upserts: where it lives plus what it says.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryKey {
    scope: MemoryScope,
    project_id: Option<String>,
    volume_id: Option<String>,
    chapter_id: Option<String>,
    content: String,
}

impl MemoryKey {
    pub fn of(item: &MemoryItem) -> Self {
        Self {
            scope: item.scope,
            project_id: item.project_id.clone(),
            volume_id: item.volume_id.clone(),
            chapter_id: item.chapter_id.clone(),
            content: normalize(&item.content),
        }
    }
}

/// Outcome of a compression pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionStats {
    pub items_before: usize,
    pub items_after: usize,
}

impl CompressionStats {
    pub fn items_removed(&self) -> usize {
        self.items_before.saturating_sub(self.items_after)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryManager
// ─────────────────────────────────────────────────────────────────────────────

/// Owns every memory item; all mutation goes through its methods.
pub struct MemoryManager {
    items: RwLock<HashMap<MemoryKey, MemoryItem>>,
    config: MemoryConfig,
    engine: CompressionEngine<Arc<dyn Summarizer>>,
    compaction: tokio::sync::Mutex<()>,
}

impl Default for MemoryManager {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

impl MemoryManager {
    /// A manager that compresses with [`ExtractiveSummarizer`].
    pub fn new(config: MemoryConfig) -> Self {
        Self::with_summarizer(config, Arc::new(ExtractiveSummarizer::default()))
    }

    pub fn with_summarizer(config: MemoryConfig, summarizer: Arc<dyn Summarizer>) -> Self {
        let engine = CompressionEngine::new(summarizer).with_batch_size(config.summary_batch_size);
        Self {
            items: RwLock::new(HashMap::new()),
            config,
            engine,
            compaction: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Create a memory, or refresh it when the same content already exists
    /// at the same place.
    ///
    /// Re-saving raises importance by at least one (up to the maximum) and
    /// bumps `updated_at`. When the store grows past `max_items`, the owning
    /// project is compressed; `cancel` bounds any summarization that
    /// triggers.
    pub async fn update_memory(
        &self,
        update: MemoryUpdate,
        cancel: &CancellationToken,
    ) -> Result<MemoryItem> {
        let fresh = MemoryItem::from_update(update)?;
        let key = MemoryKey::of(&fresh);

        let (item, len) = {
            let mut items = self.items.write();
            let item = match items.get_mut(&key) {
                Some(existing) => {
                    existing.importance = fresh
                        .importance
                        .max(existing.importance.saturating_add(1))
                        .min(MAX_IMPORTANCE);
                    existing.memory_type = fresh.memory_type;
                    existing.content = fresh.content;
                    existing.updated_at = Utc::now();
                    tracing::debug!(id = %existing.id, importance = existing.importance, "Memory refreshed");
                    existing.clone()
                }
                None => {
                    tracing::debug!(id = %fresh.id, scope = %fresh.scope, "Memory stored");
                    items.insert(key, fresh.clone());
                    fresh
                }
            };
            (item, items.len())
        };

        if len > self.config.max_items {
            let stats = self
                .compress_where(
                    item.project_id.as_deref(),
                    self.config.compression_threshold,
                    cancel,
                )
                .await;
            let remaining = self.len();
            tracing::info!(
                project = item.project_id.as_deref().unwrap_or("<global>"),
                removed = stats.items_removed(),
                remaining,
                "Compressed memory after exceeding the item limit"
            );
            if remaining > self.config.max_items {
                tracing::warn!(
                    remaining,
                    max_items = self.config.max_items,
                    "Memory store still over its limit after compression"
                );
            }
        }

        Ok(item)
    }

    /// Items relevant to `query`, most relevant first.
    pub fn search_memory(&self, query: &MemoryQuery) -> Vec<MemoryItem> {
        let matcher = Matcher::new(&query.query);
        let items = self.items.read();

        let mut scored: Vec<(f64, &MemoryItem)> = items
            .values()
            .filter(|item| item.visible_to(query))
            .map(|item| (matcher.score(&item.content), item))
            .filter(|(score, _)| matcher.is_empty() || *score > 0.0)
            .collect();

        scored.sort_by(|(sa, a), (sb, b)| {
            sb.total_cmp(sa).then_with(|| importance_order(a, b))
        });
        scored
            .into_iter()
            .take(query.limit)
            .map(|(_, item)| item.clone())
            .collect()
    }

    pub fn get(&self, id: Uuid) -> Option<MemoryItem> {
        self.items.read().values().find(|item| item.id == id).cloned()
    }

    pub fn remove(&self, id: Uuid) -> Option<MemoryItem> {
        let mut items = self.items.write();
        let key = items
            .iter()
            .find(|(_, item)| item.id == id)
            .map(|(key, _)| key.clone())?;
        items.remove(&key)
    }

    /// Items owned by `project_id` (or every item for `None`), most important
    /// first.
    pub fn list(&self, project_id: Option<&str>) -> Vec<MemoryItem> {
        let mut out: Vec<_> = self
            .items
            .read()
            .values()
            .filter(|item| project_id.is_none() || item.project_id.as_deref() == project_id)
            .cloned()
            .collect();
        out.sort_by(importance_order);
        out
    }

    /// The most important global and project memories whose estimated size
    /// fits in `token_budget`.
    pub fn working_set(&self, project_id: &str, token_budget: usize) -> Vec<MemoryItem> {
        let query = MemoryQuery::project("", project_id, usize::MAX);
        let mut candidates: Vec<_> = self
            .items
            .read()
            .values()
            .filter(|item| item.visible_to(&query))
            .cloned()
            .collect();
        candidates.sort_by(importance_order);

        let mut used = 0;
        candidates
            .into_iter()
            .filter(|item| {
                let cost = item.estimated_tokens();
                if used + cost > token_budget {
                    return false;
                }
                used += cost;
                true
            })
            .collect()
    }

    /// Compress every item owned by `project_id`.
    pub async fn compress_project(
        &self,
        project_id: &str,
        threshold: u8,
        cancel: &CancellationToken,
    ) -> CompressionStats {
        self.compress_where(Some(project_id), threshold, cancel).await
    }

    async fn compress_where(
        &self,
        project_id: Option<&str>,
        threshold: u8,
        cancel: &CancellationToken,
    ) -> CompressionStats {
        let _guard = self.compaction.lock().await;

        let snapshot: Vec<MemoryItem> = self
            .items
            .read()
            .values()
            .filter(|item| item.project_id.as_deref() == project_id)
            .cloned()
            .collect();
        let items_before = snapshot.len();

        let compressed = self.engine.compress(snapshot.clone(), threshold, cancel).await;
        let items_after = compressed.len();
        if items_after == items_before {
            return CompressionStats {
                items_before,
                items_after,
            };
        }

        let mut items = self.items.write();
        for original in &snapshot {
            if compressed.iter().any(|item| item.id == original.id) {
                continue;
            }
            let key = MemoryKey::of(original);
            // Leave alone anything refreshed while the summarizer ran.
            if items.get(&key).is_some_and(|current| current == original) {
                items.remove(&key);
            }
        }
        for summary in compressed
            .into_iter()
            .filter(|item| !snapshot.iter().any(|orig| orig.id == item.id))
        {
            let key = MemoryKey::of(&summary);
            match items.get_mut(&key) {
                Some(existing) => {
                    existing.importance = existing.importance.max(summary.importance);
                    existing.updated_at = summary.updated_at;
                }
                None => {
                    items.insert(key, summary);
                }
            }
        }

        CompressionStats {
            items_before,
            items_after,
        }
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::ModelSummarizer;
    use crate::error::MemoryError;
    use crate::types::MemoryType;
    use inkwell_llm::{MockProvider, ModelManager};
    use std::time::Duration;

    fn fact(content: &str, importance: u8) -> MemoryUpdate {
        MemoryUpdate::new(content, MemoryType::CharacterFact, importance).in_project("novel")
    }

    #[tokio::test]
    async fn test_upsert_bumps_importance() {
        let manager = MemoryManager::default();
        let cancel = CancellationToken::new();
        let first = manager.update_memory(fact("Mira fears water.", 4), &cancel).await.unwrap();
        let second = manager
            .update_memory(fact("  mira fears   WATER. ", 2), &cancel)
            .await
            .unwrap();

        assert_eq!(manager.len(), 1);
        assert_eq!(second.id, first.id);
        assert_eq!(second.importance, 5);
        assert!(second.updated_at >= first.updated_at);

        let louder = manager.update_memory(fact("Mira fears water.", 9), &cancel).await.unwrap();
        assert_eq!(louder.importance, 9);
        let capped = manager.update_memory(fact("Mira fears water.", 10), &cancel).await.unwrap();
        let again = manager.update_memory(fact("Mira fears water.", 1), &cancel).await.unwrap();
        assert_eq!(capped.importance, 10);
        assert_eq!(again.importance, 10);
    }

    #[tokio::test]
    async fn test_same_content_in_other_scope_is_distinct() {
        let manager = MemoryManager::default();
        let cancel = CancellationToken::new();
        manager.update_memory(fact("The tower leans.", 3), &cancel).await.unwrap();
        manager
            .update_memory(
                MemoryUpdate::new("The tower leans.", MemoryType::WorldSetting, 3),
                &cancel,
            )
            .await
            .unwrap();
        assert_eq!(manager.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_update_rejected() {
        let manager = MemoryManager::default();
        let cancel = CancellationToken::new();
        let err = manager.update_memory(fact("", 3), &cancel).await.unwrap_err();
        assert_eq!(err, MemoryError::EmptyContent);
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_search_orders_by_relevance_then_importance() {
        let manager = MemoryManager::default();
        let cancel = CancellationToken::new();
        manager.update_memory(fact("Mira carries a silver knife.", 2), &cancel).await.unwrap();
        manager.update_memory(fact("The knife was her mother's.", 9), &cancel).await.unwrap();
        manager.update_memory(fact("Rain all week.", 10), &cancel).await.unwrap();
        manager
            .update_memory(
                MemoryUpdate::new("Silver burns ghosts.", MemoryType::WorldSetting, 6),
                &cancel,
            )
            .await
            .unwrap();

        let hits = manager.search_memory(&MemoryQuery::project("silver knife", "novel", 10));
        let contents: Vec<_> = hits.iter().map(|i| i.content.as_str()).collect();
        assert_eq!(
            contents,
            vec![
                "Mira carries a silver knife.",
                "The knife was her mother's.",
                "Silver burns ghosts.",
            ]
        );

        let limited = manager.search_memory(&MemoryQuery::project("silver knife", "novel", 1));
        assert_eq!(limited.len(), 1);

        let everything = manager.search_memory(&MemoryQuery::project("", "novel", 10));
        assert_eq!(everything.len(), 4);
        assert_eq!(everything[0].content, "Rain all week.");
    }

    #[tokio::test]
    async fn test_search_respects_scope() {
        let manager = MemoryManager::default();
        let cancel = CancellationToken::new();
        manager
            .update_memory(fact("Chapter storm.", 5).in_volume("v1").in_chapter("c1"), &cancel)
            .await
            .unwrap();
        manager
            .update_memory(
                MemoryUpdate::new("Other storm.", MemoryType::PlotPoint, 5).in_project("sequel"),
                &cancel,
            )
            .await
            .unwrap();

        let in_chapter =
            manager.search_memory(&MemoryQuery::project("storm", "novel", 10).in_volume("v1").in_chapter("c1"));
        assert_eq!(in_chapter.len(), 1);
        let elsewhere =
            manager.search_memory(&MemoryQuery::project("storm", "novel", 10).in_volume("v2"));
        assert!(elsewhere.is_empty());
        assert!(manager.search_memory(&MemoryQuery::global("storm", 10)).is_empty());
    }

    #[tokio::test]
    async fn test_get_remove_list() {
        let manager = MemoryManager::default();
        let cancel = CancellationToken::new();
        let low = manager.update_memory(fact("Minor detail.", 1), &cancel).await.unwrap();
        let high = manager.update_memory(fact("Major detail.", 9), &cancel).await.unwrap();
        manager
            .update_memory(MemoryUpdate::new("Global rule.", MemoryType::StyleGuide, 5), &cancel)
            .await
            .unwrap();

        let listed: Vec<_> = manager.list(Some("novel")).into_iter().map(|i| i.id).collect();
        assert_eq!(listed, vec![high.id, low.id]);
        assert_eq!(manager.list(None).len(), 3);

        assert_eq!(manager.get(low.id).unwrap().content, "Minor detail.");
        assert!(manager.remove(low.id).is_some());
        assert!(manager.get(low.id).is_none());
        assert!(manager.remove(low.id).is_none());
    }

    #[tokio::test]
    async fn test_working_set_fits_budget() {
        let manager = MemoryManager::default();
        let cancel = CancellationToken::new();
        // 20 bytes -> 5 tokens each
        manager.update_memory(fact("aaaaaaaaaaaaaaaaaaaa", 9), &cancel).await.unwrap();
        manager
            .update_memory(fact("bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb", 8), &cancel)
            .await
            .unwrap();
        manager.update_memory(fact("cccccccccccccccccccc", 7), &cancel).await.unwrap();

        let set = manager.working_set("novel", 12);
        let contents: Vec<_> = set.iter().map(|i| &i.content[..1]).collect();
        assert_eq!(contents, vec!["a", "c"]);
        assert!(manager.working_set("novel", 0).is_empty());
    }

    #[tokio::test]
    async fn test_compress_project() {
        let manager = MemoryManager::default();
        let cancel = CancellationToken::new();
        for i in 0..4 {
            manager.update_memory(fact(&format!("Minor fact {i}."), 1), &cancel).await.unwrap();
        }
        let keep = manager.update_memory(fact("Core fact.", 8), &cancel).await.unwrap();
        manager
            .update_memory(MemoryUpdate::new("Untouched.", MemoryType::General, 1), &cancel)
            .await
            .unwrap();

        let stats = manager.compress_project("novel", 5, &cancel).await;
        assert_eq!(stats.items_before, 5);
        assert_eq!(stats.items_after, 2);
        assert_eq!(stats.items_removed(), 3);

        let project = manager.list(Some("novel"));
        assert_eq!(project.len(), 2);
        assert_eq!(project[0].id, keep.id);
        assert_eq!(project[1].memory_type, MemoryType::Summary);
        assert_eq!(project[1].importance, 5);
        assert_eq!(manager.len(), 3);

        let again = manager.compress_project("novel", 5, &cancel).await;
        assert_eq!(again.items_removed(), 0);
    }

    #[tokio::test]
    async fn test_update_triggers_compression_over_limit() {
        let manager = MemoryManager::new(MemoryConfig {
            max_items: 3,
            compression_threshold: 5,
            summary_batch_size: 8,
        });
        let cancel = CancellationToken::new();
        for i in 0..4 {
            manager.update_memory(fact(&format!("Detail {i}."), 1), &cancel).await.unwrap();
        }
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.list(None)[0].memory_type, MemoryType::Summary);
    }

    #[tokio::test]
    async fn test_cancelled_update_compresses_without_model() {
        let models = Arc::new(ModelManager::new());
        let provider = Arc::new(MockProvider::succeeding("m", Duration::ZERO, "Model summary."));
        models.register(provider.clone());
        let manager = MemoryManager::with_summarizer(
            MemoryConfig {
                max_items: 2,
                compression_threshold: 5,
                summary_batch_size: 8,
            },
            Arc::new(ModelSummarizer::new(models)),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();
        for i in 0..3 {
            manager.update_memory(fact(&format!("Detail {i}."), 1), &cancel).await.unwrap();
        }

        assert_eq!(provider.request_count(), 0);
        let items = manager.list(None);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].memory_type, MemoryType::Summary);
        for i in 0..3 {
            assert!(items[0].content.contains(&format!("Detail {i}.")));
        }
    }

    #[test]
    fn test_config_from_toml() {
        let config: MemoryConfig = toml::from_str("max_items = 50").unwrap();
        assert_eq!(config.max_items, 50);
        assert_eq!(config.compression_threshold, 5);
        assert_eq!(config.summary_batch_size, DEFAULT_BATCH_SIZE);
    }
}
