//! Prompt assembly.
//!
//! Rendering is deliberately minimal: the real prompt text is an
//! external collaborator's concern. These helpers only assemble the
//! pieces the runtime owns (profile context, mode, history slices).

use sage_core::messages::ChatMessage;
use sage_core::user::UserRecord;
use sage_llm::TextRequest;

/// Mode used when a request does not specify one.
pub const DEFAULT_MODE: &str = "chat";

/// Render the system prompt from profile context and the request mode.
#[must_use]
pub fn render_system(user: &UserRecord, mode: &str) -> String {
    let mut out = format!(
        "You are Sage, a personal AI coach.\nToday's date: {}.\nThe user's name is {}.",
        chrono::Utc::now().format("%Y-%m-%d"),
        user.name,
    );
    if !user.preferences.trim().is_empty() {
        out.push_str("\nKnown preferences about the user:\n");
        out.push_str(&user.preferences);
    }
    out.push_str("\nCurrent mode: ");
    out.push_str(mode);
    out
}

/// Request that summarizes a slice of conversation history.
#[must_use]
pub fn summary_request(messages: &[ChatMessage]) -> TextRequest {
    TextRequest {
        system: "Summarize the following conversation concisely, in prose, \
                 preserving facts, decisions, and open threads."
            .into(),
        messages: messages.to_vec(),
    }
}

/// Request that titles a brand-new conversation from its first message.
#[must_use]
pub fn title_request(first_user_message: &str) -> TextRequest {
    TextRequest {
        system: "Generate a short title (at most five words) for a conversation \
                 that starts with the following message. Reply with the title only."
            .into(),
        messages: vec![ChatMessage::user(first_user_message)],
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn user(preferences: &str) -> UserRecord {
        UserRecord {
            uid: "u1".into(),
            name: "Ada".into(),
            email: None,
            preferences: preferences.into(),
            credits: 0,
            subscription_plan: None,
            subscription_status: None,
            subscription_expires: None,
            last_credit_refresh: None,
            last_used: None,
        }
    }

    #[test]
    fn system_prompt_includes_profile_and_mode() {
        let prompt = render_system(&user("likes brevity"), "journal");
        assert!(prompt.contains("Ada"));
        assert!(prompt.contains("likes brevity"));
        assert!(prompt.contains("Current mode: journal"));
    }

    #[test]
    fn blank_preferences_are_omitted() {
        let prompt = render_system(&user("   "), DEFAULT_MODE);
        assert!(!prompt.contains("Known preferences"));
    }

    #[test]
    fn summary_request_carries_messages() {
        let msgs = vec![ChatMessage::user("a"), ChatMessage::assistant("b")];
        let req = summary_request(&msgs);
        assert_eq!(req.messages.len(), 2);
        assert!(req.system.contains("Summarize"));
    }
}
