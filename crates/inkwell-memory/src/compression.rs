//! Lossy compression of low-importance memories.
//!
//! [`CompressionEngine::compress`] keeps every item at or above the threshold
//! and folds the rest into [`MemoryType::Summary`] items, one per batch of
//! related memories. Summaries are stamped with the threshold as their
//! importance, so running the engine again with the same threshold keeps
//! them instead of summarizing them a second time.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use inkwell_llm::{CancellationToken, ChatMessage, ChatRequest, ModelManager};
use uuid::Uuid;

use crate::search::normalize;
use crate::types::{MAX_IMPORTANCE, MemoryItem, MemoryScope, MemoryType};

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Default number of memories folded into one summary.
pub const DEFAULT_BATCH_SIZE: usize = 8;

/// Default length cap for extractive summaries, in characters.
const DEFAULT_MAX_SUMMARY_CHARS: usize = 600;

/// System prompt for model-written summaries.
const MEMORY_SUMMARY_PROMPT: &str = "\
You maintain the continuity notes for a novel. Condense the notes below into \
one dense paragraph. Keep:
- Names, places, and established facts
- Cause and effect between events
- Anything a later chapter must stay consistent with

Drop repetition and commentary. Reply with the paragraph only.";

// ─────────────────────────────────────────────────────────────────────────────
// Summarizers
// ─────────────────────────────────────────────────────────────────────────────

/// Turns a batch of memories into summary text.
///
/// A summarizer never fails: once `cancel` fires it returns whatever it can
/// produce locally.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, items: &[MemoryItem], cancel: &CancellationToken) -> String;
}

#[async_trait]
impl<S: Summarizer + ?Sized> Summarizer for Arc<S> {
    async fn summarize(&self, items: &[MemoryItem], cancel: &CancellationToken) -> String {
        (**self).summarize(items, cancel).await
    }
}

/// Summarizes by keeping the leading sentence of each memory.
#[derive(Debug, Clone)]
pub struct ExtractiveSummarizer {
    max_chars: usize,
}

impl Default for ExtractiveSummarizer {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_MAX_SUMMARY_CHARS,
        }
    }
}

impl ExtractiveSummarizer {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
        }
    }

    /// Synchronous form, shared with [`ModelSummarizer`] as its fallback.
    pub fn extract(&self, items: &[MemoryItem]) -> String {
        let mut seen = Vec::new();
        let mut sentences = Vec::new();
        for item in items {
            let sentence = leading_sentence(&item.content);
            let key = normalize(sentence);
            if key.is_empty() || seen.contains(&key) {
                continue;
            }
            seen.push(key);
            sentences.push(sentence);
        }
        truncate_chars(&sentences.join(" "), self.max_chars)
    }
}

#[async_trait]
impl Summarizer for ExtractiveSummarizer {
    async fn summarize(&self, items: &[MemoryItem], _cancel: &CancellationToken) -> String {
        self.extract(items)
    }
}

fn leading_sentence(text: &str) -> &str {
    let text = text.trim();
    match text.char_indices().find(|&(_, c)| {
        matches!(c, '.' | '!' | '?' | '。' | '！' | '？' | '\n')
    }) {
        Some((idx, '\n')) => text[..idx].trim_end(),
        Some((idx, c)) => &text[..idx + c.len_utf8()],
        None => text,
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Summarizes through the model manager, falling back to extraction when the
/// model call fails, comes back empty, or is cancelled.
pub struct ModelSummarizer {
    manager: Arc<ModelManager>,
    provider: Option<String>,
    max_tokens: u32,
    fallback: ExtractiveSummarizer,
}

impl ModelSummarizer {
    /// Summarize with the manager's default provider.
    pub fn new(manager: Arc<ModelManager>) -> Self {
        Self {
            manager,
            provider: None,
            max_tokens: 512,
            fallback: ExtractiveSummarizer::default(),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

#[async_trait]
impl Summarizer for ModelSummarizer {
    async fn summarize(&self, items: &[MemoryItem], cancel: &CancellationToken) -> String {
        if cancel.is_cancelled() {
            tracing::debug!(items = items.len(), "Cancelled, using extractive summary");
            return self.fallback.extract(items);
        }
        let notes = items
            .iter()
            .map(|item| format!("- [{}] {}", item.memory_type, item.content))
            .collect::<Vec<_>>()
            .join("\n");
        let request = ChatRequest::new(vec![ChatMessage::user(notes)])
            .with_system(MEMORY_SUMMARY_PROMPT)
            .with_max_tokens(self.max_tokens)
            .with_temperature(0.2);

        let response = self
            .manager
            .chat(self.provider.as_deref(), request, cancel)
            .await;

        let summary = response.content.trim();
        if response.is_success() && !summary.is_empty() {
            return summary.to_string();
        }
        tracing::warn!(
            error = response.error_message(),
            items = items.len(),
            "Model summary failed, using extractive summary"
        );
        self.fallback.extract(items)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CompressionEngine
// ─────────────────────────────────────────────────────────────────────────────

/// Items are only summarized together when all of these match.
#[derive(Debug, Clone, PartialEq, Eq)]
struct GroupKey {
    memory_type: MemoryType,
    scope: MemoryScope,
    project_id: Option<String>,
    volume_id: Option<String>,
    chapter_id: Option<String>,
}

impl GroupKey {
    fn of(item: &MemoryItem) -> Self {
        Self {
            memory_type: item.memory_type,
            scope: item.scope,
            project_id: item.project_id.clone(),
            volume_id: item.volume_id.clone(),
            chapter_id: item.chapter_id.clone(),
        }
    }
}

/// Folds low-importance memories into summaries.
pub struct CompressionEngine<S> {
    summarizer: S,
    batch_size: usize,
}

impl<S: Summarizer> CompressionEngine<S> {
    pub fn new(summarizer: S) -> Self {
        Self {
            summarizer,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Set how many memories may share one summary (at least 2).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(2);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Compress `items` against `threshold`.
    ///
    /// The output holds the kept items in input order, then the new
    /// summaries, then any low-importance items left alone because they had
    /// no batch partner. It is never longer than the input.
    pub async fn compress(
        &self,
        items: Vec<MemoryItem>,
        threshold: u8,
        cancel: &CancellationToken,
    ) -> Vec<MemoryItem> {
        let threshold = threshold.min(MAX_IMPORTANCE);
        let (mut kept, low): (Vec<_>, Vec<_>) =
            items.into_iter().partition(|item| item.importance >= threshold);

        if low.is_empty() {
            return kept;
        }

        let mut groups: Vec<(GroupKey, Vec<MemoryItem>)> = Vec::new();
        for item in low {
            let key = GroupKey::of(&item);
            match groups.iter_mut().find(|(k, _)| *k == key) {
                Some((_, members)) => members.push(item),
                None => groups.push((key, vec![item])),
            }
        }

        let mut summaries = Vec::new();
        let mut singles = Vec::new();
        for (key, members) in groups {
            let mut members = members.into_iter().peekable();
            while members.peek().is_some() {
                let mut chunk: Vec<_> = members.by_ref().take(self.batch_size).collect();
                if chunk.len() == 1 {
                    singles.append(&mut chunk);
                    continue;
                }
                summaries.push(self.summarize_chunk(&key, &chunk, threshold, cancel).await);
            }
        }

        tracing::debug!(
            kept = kept.len(),
            summaries = summaries.len(),
            singles = singles.len(),
            threshold,
            "Compressed memories"
        );

        kept.append(&mut summaries);
        kept.append(&mut singles);
        kept
    }

    async fn summarize_chunk(
        &self,
        key: &GroupKey,
        chunk: &[MemoryItem],
        threshold: u8,
        cancel: &CancellationToken,
    ) -> MemoryItem {
        let mut content = self.summarizer.summarize(chunk, cancel).await.trim().to_string();
        if content.is_empty() {
            content = ExtractiveSummarizer::default().extract(chunk);
        }
        let created_at = chunk
            .iter()
            .map(|item| item.created_at)
            .min()
            .unwrap_or_else(Utc::now);

        MemoryItem {
            id: Uuid::new_v4(),
            content,
            memory_type: MemoryType::Summary,
            scope: key.scope,
            importance: threshold,
            project_id: key.project_id.clone(),
            volume_id: key.volume_id.clone(),
            chapter_id: key.chapter_id.clone(),
            created_at,
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MemoryUpdate;
    use inkwell_llm::MockProvider;
    use proptest::prelude::*;
    use std::time::Duration;

    fn memory(content: &str, importance: u8) -> MemoryItem {
        MemoryItem::from_update(
            MemoryUpdate::new(content, MemoryType::PlotPoint, importance).in_project("p"),
        )
        .unwrap()
    }

    fn engine() -> CompressionEngine<ExtractiveSummarizer> {
        CompressionEngine::new(ExtractiveSummarizer::default()).with_batch_size(3)
    }

    #[test]
    fn test_leading_sentence() {
        assert_eq!(leading_sentence("The gate fell. Then rain."), "The gate fell.");
        assert_eq!(leading_sentence("城门倒了。下雨了。"), "城门倒了。");
        assert_eq!(leading_sentence("first line\nsecond"), "first line");
        assert_eq!(leading_sentence("no terminator"), "no terminator");
    }

    #[test]
    fn test_extract_dedupes_and_truncates() {
        let items = vec![
            memory("The gate fell. More detail.", 1),
            memory("the gate  fell. Other detail.", 1),
            memory("Rain came.", 1),
        ];
        assert_eq!(
            ExtractiveSummarizer::default().extract(&items),
            "The gate fell. Rain came."
        );
        assert_eq!(ExtractiveSummarizer::new(6).extract(&items), "The g…");
    }

    #[tokio::test]
    async fn test_compress_keeps_important_and_summarizes_rest() {
        let keep = memory("The king is dead.", 8);
        let items = vec![
            memory("A crow watched.", 2),
            keep.clone(),
            memory("The bell rang twice.", 3),
            memory("Smoke rose in the east.", 1),
        ];

        let output = engine().compress(items, 5, &CancellationToken::new()).await;
        assert_eq!(output.len(), 2);
        assert_eq!(output[0], keep);
        let summary = &output[1];
        assert_eq!(summary.memory_type, MemoryType::Summary);
        assert_eq!(summary.importance, 5);
        assert_eq!(summary.project_id.as_deref(), Some("p"));
        assert_eq!(
            summary.content,
            "A crow watched. The bell rang twice. Smoke rose in the east."
        );
    }

    #[tokio::test]
    async fn test_compress_chunks_by_batch_and_groups() {
        let mut items: Vec<_> = (0..4).map(|i| memory(&format!("Event {i}."), 1)).collect();
        let mut other = memory("A different chapter.", 1);
        other.chapter_id = Some("c9".into());
        other.volume_id = Some("v1".into());
        other.scope = MemoryScope::Chapter;
        items.push(other.clone());

        let output = engine().compress(items, 5, &CancellationToken::new()).await;
        // 4 plot points -> one summary of 3 plus a leftover; the chapter item stays alone
        assert_eq!(output.len(), 3);
        assert_eq!(output[0].memory_type, MemoryType::Summary);
        assert_eq!(output[1].content, "Event 3.");
        assert_eq!(output[2], other);
    }

    #[tokio::test]
    async fn test_zero_threshold_keeps_everything() {
        let items = vec![memory("a.", 0), memory("b.", 0)];
        let output = engine().compress(items.clone(), 0, &CancellationToken::new()).await;
        assert_eq!(output, items);
    }

    #[tokio::test]
    async fn test_model_summarizer_falls_back() {
        let manager = Arc::new(ModelManager::new());
        manager.register(Arc::new(MockProvider::failing("m", "down")));
        let summarizer = ModelSummarizer::new(Arc::clone(&manager));
        let text = summarizer
            .summarize(&[memory("Snow fell. It was cold.", 1)], &CancellationToken::new())
            .await;
        assert_eq!(text, "Snow fell.");
    }

    #[tokio::test]
    async fn test_model_summarizer_uses_model() {
        let manager = Arc::new(ModelManager::new());
        let provider = Arc::new(MockProvider::succeeding(
            "m",
            Duration::ZERO,
            "Winter arrived early.",
        ));
        manager.register(provider.clone());
        let summarizer = ModelSummarizer::new(Arc::clone(&manager)).with_provider("m");
        let text = summarizer
            .summarize(
                &[memory("Snow fell.", 1), memory("The lake froze.", 1)],
                &CancellationToken::new(),
            )
            .await;
        assert_eq!(text, "Winter arrived early.");

        let request = &provider.requests()[0];
        assert!(request.messages[1].content.contains("- [plot_point] The lake froze."));
    }

    #[tokio::test]
    async fn test_model_summarizer_skips_model_once_cancelled() {
        let manager = Arc::new(ModelManager::new());
        let provider = Arc::new(MockProvider::succeeding("m", Duration::ZERO, "Unused."));
        manager.register(provider.clone());
        let summarizer = ModelSummarizer::new(Arc::clone(&manager));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let text = summarizer
            .summarize(&[memory("Snow fell. It was cold.", 1)], &cancel)
            .await;
        assert_eq!(text, "Snow fell.");
        assert_eq!(provider.request_count(), 0);
    }

    fn arb_items() -> impl Strategy<Value = Vec<MemoryItem>> {
        prop::collection::vec((0u8..=10, 0usize..3, "[a-z]{1,8}"), 0..24).prop_map(|specs| {
            specs
                .into_iter()
                .map(|(importance, kind, word)| {
                    let memory_type = [
                        MemoryType::PlotPoint,
                        MemoryType::CharacterFact,
                        MemoryType::Dialogue,
                    ][kind];
                    MemoryItem::from_update(
                        MemoryUpdate::new(format!("{word}."), memory_type, importance)
                            .in_project("p"),
                    )
                    .unwrap()
                })
                .collect()
        })
    }

    fn run<F: Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(fut)
    }

    proptest! {
        #[test]
        fn compression_never_grows_and_keeps_important(items in arb_items(), threshold in 0u8..=12) {
            let cancel = CancellationToken::new();
            let output = run(engine().compress(items.clone(), threshold, &cancel));
            prop_assert!(output.len() <= items.len());
            let effective = threshold.min(MAX_IMPORTANCE);
            for item in items.iter().filter(|i| i.importance >= effective) {
                prop_assert!(output.contains(item));
            }
        }

        #[test]
        fn compression_is_idempotent(items in arb_items(), threshold in 0u8..=10) {
            let engine = engine();
            let cancel = CancellationToken::new();
            let once = run(engine.compress(items, threshold, &cancel));
            let twice = run(engine.compress(once.clone(), threshold, &cancel));
            prop_assert_eq!(once, twice);
        }
    }
}
