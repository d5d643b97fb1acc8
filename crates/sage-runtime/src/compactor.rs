//! History compaction: word-budget truncation and turn-count summarization.
//!
//! Both mechanisms shape the provider payload only; persisted history is
//! never modified here. Compaction never raises: summarizer failure
//! degrades to hard truncation.

use metrics::counter;
use tracing::{debug, warn};

use sage_core::constants::{DEFAULT_MAX_MESSAGES_TO_KEEP, MAX_WORDS};
use sage_core::messages::ChatMessage;
use sage_core::text::{truncate_words, word_count};
use sage_llm::Provider;

use crate::prompts;

/// Compaction limits.
#[derive(Clone, Copy, Debug)]
pub struct CompactorConfig {
    /// Hard word budget for the provider payload.
    pub max_words: usize,
    /// Turn-count threshold that triggers summarization.
    pub max_messages_to_keep: usize,
}

impl Default for CompactorConfig {
    fn default() -> Self {
        Self {
            max_words: MAX_WORDS,
            max_messages_to_keep: DEFAULT_MAX_MESSAGES_TO_KEEP,
        }
    }
}

/// Shapes message history to fit the provider's context budget.
#[derive(Clone, Debug, Default)]
pub struct HistoryCompactor {
    config: CompactorConfig,
}

impl HistoryCompactor {
    /// New compactor with the given limits.
    #[must_use]
    pub fn new(config: CompactorConfig) -> Self {
        Self { config }
    }

    /// Apply both mechanisms in sequence: word budget, then turn count.
    pub async fn prepare(
        &self,
        messages: Vec<ChatMessage>,
        provider: &dyn Provider,
    ) -> Vec<ChatMessage> {
        let truncated = self.truncate_to_word_budget(&messages);
        self.compact(truncated, provider).await
    }

    /// Keep messages while a running word count stays within budget.
    ///
    /// The message that would cross the budget is cut down to the
    /// remaining allowance (dropped outright when the allowance is
    /// zero), and everything after it is dropped from the payload.
    #[must_use]
    pub fn truncate_to_word_budget(&self, messages: &[ChatMessage]) -> Vec<ChatMessage> {
        let mut kept = Vec::with_capacity(messages.len());
        let mut used = 0usize;
        for (idx, msg) in messages.iter().enumerate() {
            let words = word_count(&msg.content);
            if used + words <= self.config.max_words {
                used += words;
                kept.push(msg.clone());
                continue;
            }

            let remaining = self.config.max_words - used;
            if remaining > 0 {
                let mut cut = msg.clone();
                cut.content = truncate_words(&cut.content, remaining);
                kept.push(cut);
            }
            debug!(
                kept = kept.len(),
                dropped = messages.len() - idx - 1,
                budget = self.config.max_words,
                "word budget reached; dropping remainder of payload"
            );
            counter!("sage_compaction_word_truncations_total").increment(1);
            break;
        }
        kept
    }

    /// Collapse an over-long history into a summary plus recent tail.
    ///
    /// When the list exceeds `max_messages_to_keep`, the oldest
    /// `len - (max_messages_to_keep - 1)` messages are summarized into
    /// one synthetic user message prepended to the most recent
    /// `max_messages_to_keep - 1`. Summarizer failure degrades to hard
    /// truncation to the most recent `max_messages_to_keep`.
    pub async fn compact(
        &self,
        messages: Vec<ChatMessage>,
        provider: &dyn Provider,
    ) -> Vec<ChatMessage> {
        let max = self.config.max_messages_to_keep;
        if max == 0 || messages.len() <= max {
            return messages;
        }

        let split = messages.len() - (max - 1);
        let (oldest, recent) = messages.split_at(split);

        match provider.complete_text(&prompts::summary_request(oldest)).await {
            Ok(summary) => {
                debug!(
                    summarized = oldest.len(),
                    kept = recent.len(),
                    "history compacted via summarization"
                );
                counter!("sage_compaction_summaries_total").increment(1);
                let mut out = Vec::with_capacity(recent.len() + 1);
                out.push(ChatMessage::user(format!(
                    "Summary of the previous conversation: {summary}"
                )));
                out.extend_from_slice(recent);
                out
            }
            Err(err) => {
                warn!(%err, "summarization failed; hard-truncating history");
                counter!("sage_compaction_summary_failures_total").increment(1);
                messages[messages.len() - max..].to_vec()
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
