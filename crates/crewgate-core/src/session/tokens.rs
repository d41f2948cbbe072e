//! Token estimation.
//!
//! The gateway never depends on a model-specific tokenizer; the `chars / 4`
//! heuristic is close enough for compaction thresholds, which carry a 20%
//! safety margin anyway.

use crate::types::ChatMessage;

/// Estimate tokens for a piece of text.
pub fn count_text(text: &str) -> usize {
    text.chars().count() / 4
}

/// Estimate tokens for a message, including tool-call payloads.
pub fn count_message(msg: &ChatMessage) -> usize {
    // Small fixed overhead per message for role/framing.
    let mut total = 4 + count_text(msg.text());
    if let ChatMessage::Assistant {
        tool_calls: Some(calls),
        ..
    } = msg
    {
        for call in calls {
            total += count_text(&call.function.name) + count_text(&call.function.arguments);
        }
    }
    total
}

/// Estimate tokens for a whole message list.
pub fn count_messages(messages: &[ChatMessage]) -> usize {
    messages.iter().map(count_message).sum()
}
