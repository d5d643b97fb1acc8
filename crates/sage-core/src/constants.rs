//! Shared tuning constants.

/// Maximum number of words sent to the generation provider per call.
pub const MAX_WORDS: usize = 120_000;

/// Default number of messages kept verbatim after turn-count compaction.
pub const DEFAULT_MAX_MESSAGES_TO_KEEP: usize = 30;

/// Credits consumed by one chat turn.
pub const TURN_COST: i64 = 1;

/// Days between subscription credit refreshes.
pub const REFRESH_WINDOW_DAYS: i64 = 30;

/// Placeholder title for conversations that have not been named yet.
pub const DEFAULT_CONVERSATION_TITLE: &str = "New Conversation";
