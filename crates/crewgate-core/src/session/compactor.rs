//! Session compaction for long conversations.
//!
//! Modes:
//! - `Off` — never compact.
//! - `Summary` (default) — keep the most recent messages verbatim, fold
//!   older ones into fixed-size chunks, each chunk becoming one synthetic
//!   system message. Uses a caller-supplied LLM summarizer when present,
//!   otherwise an extractive recap.
//! - `TokenLimit` — emergency truncation at a safe boundary.
//!
//! Invariant, both directions: a compacted session never contains an
//! assistant tool call without its tool result, nor a tool result without
//! the assistant message that issued it. The last message is always kept
//! byte-identical. On any internal error the original session is left
//! untouched.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::session::tokens::count_messages;
use crate::types::ChatMessage;

/// Label prefix for synthetic summary messages.
const SUMMARY_LABEL: &str = "[Conversation summary]";

/// Async closure that turns a chunk of messages into a short summary.
pub type Summarizer = Arc<
    dyn Fn(Vec<ChatMessage>) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send>>
        + Send
        + Sync,
>;

/// Hook that persists volatile learnings/preferences before messages are
/// dropped. Runs under the memory facade's background lock.
pub type FlushHook =
    Arc<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompactionMode {
    Off,
    Summary,
    TokenLimit,
}

impl CompactionMode {
    pub fn parse(s: &str) -> Self {
        match s {
            "off" => CompactionMode::Off,
            "token-limit" => CompactionMode::TokenLimit,
            _ => CompactionMode::Summary,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CompactionConfig {
    pub mode: CompactionMode,
    /// Trigger when tokens exceed this fraction of `max_context_tokens`.
    pub threshold_percent: f64,
    pub max_context_tokens: usize,
    /// Messages kept verbatim at the tail in summary mode.
    pub preserve_recent: usize,
    /// Older messages folded per summary chunk.
    pub summary_chunk_size: usize,
    /// Never compact sessions shorter than this.
    pub short_threshold: usize,
    /// Below this, extractive summaries are good enough.
    pub medium_threshold: usize,
    /// Above this without an LLM summarizer, fall back to token-limit.
    pub long_threshold: usize,
    /// Floor kept by token-limit truncation.
    pub min_keep: usize,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        Self {
            mode: CompactionMode::Summary,
            threshold_percent: 0.8,
            max_context_tokens: 8192,
            preserve_recent: 20,
            summary_chunk_size: 10,
            short_threshold: 20,
            medium_threshold: 50,
            long_threshold: 80,
            min_keep: 4,
        }
    }
}

/// What a compaction run did.
#[derive(Clone, Debug)]
pub struct CompactionResult {
    pub original_count: usize,
    pub compacted_count: usize,
    pub tokens_before: usize,
    pub tokens_after: usize,
    pub mode: &'static str,
}

impl CompactionResult {
    fn unchanged(messages: &[ChatMessage]) -> Self {
        let tokens = count_messages(messages);
        Self {
            original_count: messages.len(),
            compacted_count: messages.len(),
            tokens_before: tokens,
            tokens_after: tokens,
            mode: "none",
        }
    }

    pub fn changed(&self) -> bool {
        self.compacted_count != self.original_count
    }
}

pub struct SessionCompactor {
    config: CompactionConfig,
    summarizer: Option<Summarizer>,
    flush_hook: Option<FlushHook>,
}

impl SessionCompactor {
    pub fn new(config: CompactionConfig) -> Self {
        Self {
            config,
            summarizer: None,
            flush_hook: None,
        }
    }

    pub fn with_summarizer(mut self, summarizer: Summarizer) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_flush_hook(mut self, hook: FlushHook) -> Self {
        self.flush_hook = Some(hook);
        self
    }

    pub fn config(&self) -> &CompactionConfig {
        &self.config
    }

    /// Proactive trigger: over the threshold fraction of the context budget.
    pub fn should_compact(&self, messages: &[ChatMessage]) -> bool {
        if self.config.mode == CompactionMode::Off {
            return false;
        }
        if messages.len() < self.config.short_threshold {
            return false;
        }
        let threshold =
            (self.config.max_context_tokens as f64 * self.config.threshold_percent) as usize;
        let current = count_messages(messages);
        if current > threshold {
            info!(
                current_tokens = current,
                threshold = threshold,
                "compaction triggered"
            );
            true
        } else {
            false
        }
    }

    /// Compact a message list. Returns the new list and a report; the caller
    /// persists. Never destroys the input — on failure, the caller keeps
    /// the original.
    pub async fn compact(
        &self,
        messages: &[ChatMessage],
    ) -> anyhow::Result<(Vec<ChatMessage>, CompactionResult)> {
        if messages.is_empty() || self.config.mode == CompactionMode::Off {
            return Ok((messages.to_vec(), CompactionResult::unchanged(messages)));
        }

        if let Some(hook) = &self.flush_hook {
            hook().await;
        }

        let (compacted, mode) = match self.config.mode {
            CompactionMode::Off => {
                return Ok((messages.to_vec(), CompactionResult::unchanged(messages)))
            }
            CompactionMode::TokenLimit => (self.truncate_at_safe_boundary(messages), "token-limit"),
            CompactionMode::Summary => {
                if messages.len() <= self.config.short_threshold {
                    return Ok((messages.to_vec(), CompactionResult::unchanged(messages)));
                }
                if self.summarizer.is_none() && messages.len() > self.config.long_threshold {
                    // Very long session with nothing to summarize with.
                    (self.truncate_at_safe_boundary(messages), "token-limit")
                } else {
                    (self.summarize(messages).await, "summary")
                }
            }
        };

        validate(messages, &compacted)?;

        let result = CompactionResult {
            original_count: messages.len(),
            compacted_count: compacted.len(),
            tokens_before: count_messages(messages),
            tokens_after: count_messages(&compacted),
            mode,
        };
        info!(
            from = result.original_count,
            to = result.compacted_count,
            tokens_before = result.tokens_before,
            tokens_after = result.tokens_after,
            mode = mode,
            "session compacted"
        );
        Ok((compacted, result))
    }

    // ────────────── Summary mode ──────────────

    async fn summarize(&self, messages: &[ChatMessage]) -> Vec<ChatMessage> {
        let split = self.split_index(messages);
        if split == 0 {
            return messages.to_vec();
        }
        let (older, recent) = messages.split_at(split);

        let mut out = Vec::with_capacity(recent.len() + older.len() / self.config.summary_chunk_size + 1);
        for chunk in older.chunks(self.config.summary_chunk_size) {
            let summary = self.summarize_chunk(chunk).await;
            out.push(ChatMessage::system(format!("{SUMMARY_LABEL} {summary}")));
        }
        out.extend_from_slice(recent);
        out
    }

    /// Where the verbatim tail starts. Walks backward from
    /// `len - preserve_recent` until the tail contains no tool result whose
    /// issuing assistant message would be summarized away.
    fn split_index(&self, messages: &[ChatMessage]) -> usize {
        let mut split = messages.len().saturating_sub(self.config.preserve_recent);
        while split > 0 && !tail_is_self_contained(&messages[split..]) {
            split -= 1;
        }
        split
    }

    async fn summarize_chunk(&self, chunk: &[ChatMessage]) -> String {
        if let Some(summarizer) = &self.summarizer {
            match summarizer(chunk.to_vec()).await {
                Ok(summary) if !summary.trim().is_empty() => return summary.trim().to_string(),
                Ok(_) => debug!("summarizer returned empty text, using extractive fallback"),
                Err(e) => warn!(error = %e, "summarizer failed, using extractive fallback"),
            }
        }
        extractive_summary(chunk)
    }

    // ────────────── Token-limit mode ──────────────

    /// Keep the suffix starting at the most recent safe boundary: an
    /// assistant message whose tool calls (if any) are all answered later
    /// in the kept window.
    fn truncate_at_safe_boundary(&self, messages: &[ChatMessage]) -> Vec<ChatMessage> {
        let len = messages.len();
        let latest_start = len.saturating_sub(self.config.min_keep);

        let mut boundary = None;
        for idx in (0..=latest_start).rev() {
            if is_safe_boundary(messages, idx) {
                boundary = Some(idx);
                break;
            }
        }

        let start = boundary.unwrap_or(0);
        messages[start..].to_vec()
    }
}

/// An index is a safe truncation point when the suffix starting there is
/// self-contained: no tool result without its issuing assistant message.
fn is_safe_boundary(messages: &[ChatMessage], idx: usize) -> bool {
    tail_is_self_contained(&messages[idx..])
}

/// True when every tool result in `tail` answers a tool call issued inside
/// `tail` itself.
fn tail_is_self_contained(tail: &[ChatMessage]) -> bool {
    let mut issued: HashSet<&str> = HashSet::new();
    for msg in tail {
        for id in msg.tool_call_ids() {
            issued.insert(id);
        }
        if let Some(answered) = msg.answered_call_id() {
            if !issued.contains(answered) {
                return false;
            }
        }
    }
    true
}

/// 2–3 sentence recap built from user content and error-bearing tool
/// results. Used when no LLM summarizer is wired in.
fn extractive_summary(chunk: &[ChatMessage]) -> String {
    let mut topics: Vec<&str> = Vec::new();
    let mut errors: Vec<String> = Vec::new();

    for msg in chunk {
        match msg {
            ChatMessage::User { content } => {
                let line = content.lines().next().unwrap_or("").trim();
                if !line.is_empty() && topics.len() < 3 {
                    topics.push(line);
                }
            }
            ChatMessage::Tool { content, .. } => {
                let lower = content.to_lowercase();
                if (lower.contains("error") || lower.contains("failed")) && errors.len() < 2 {
                    errors.push(truncate_chars(content, 80));
                }
            }
            _ => {}
        }
    }

    let mut summary = if topics.is_empty() {
        format!("Earlier exchange of {} messages.", chunk.len())
    } else {
        format!("The user asked about: {}.", topics.join("; "))
    };
    if !errors.is_empty() {
        summary.push_str(&format!(" Errors hit: {}.", errors.join("; ")));
    }
    summary
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Post-compaction checks: unbroken tool chains in both directions and an
/// untouched final message.
fn validate(original: &[ChatMessage], compacted: &[ChatMessage]) -> anyhow::Result<()> {
    match (original.last(), compacted.last()) {
        (Some(a), Some(b)) if a == b => {}
        (None, None) => {}
        _ => anyhow::bail!("compaction altered the final message"),
    }

    let mut issued: HashSet<&str> = HashSet::new();
    let mut answered: HashSet<&str> = HashSet::new();
    for msg in compacted {
        for id in msg.tool_call_ids() {
            issued.insert(id);
        }
        if let Some(id) = msg.answered_call_id() {
            if !issued.contains(id) {
                anyhow::bail!("compaction orphaned tool result '{id}'");
            }
            answered.insert(id);
        }
    }
    for id in issued {
        if !answered.contains(id) {
            anyhow::bail!("compaction dropped the result for tool call '{id}'");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolCall;

    fn chat_pairs(n: usize) -> Vec<ChatMessage> {
        let mut msgs = Vec::new();
        for i in 0..n {
            msgs.push(ChatMessage::user(format!("question {i} with some padding text")));
            msgs.push(ChatMessage::assistant(format!("answer {i} with some padding text")));
        }
        msgs
    }

    fn tool_exchange(id: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::assistant_tool_calls(None, vec![ToolCall::new(id, "exec", "{}")]),
            ChatMessage::tool_result(id, "ok"),
            ChatMessage::assistant("done"),
        ]
    }

    fn compactor(mode: CompactionMode) -> SessionCompactor {
        SessionCompactor::new(CompactionConfig {
            mode,
            max_context_tokens: 100,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_off_mode_never_compacts() {
        let c = compactor(CompactionMode::Off);
        let msgs = chat_pairs(50);
        assert!(!c.should_compact(&msgs));
        let (out, result) = c.compact(&msgs).await.unwrap();
        assert_eq!(out.len(), msgs.len());
        assert!(!result.changed());
    }

    #[test]
    fn test_should_compact_threshold() {
        let c = SessionCompactor::new(CompactionConfig {
            max_context_tokens: 4000,
            threshold_percent: 0.8,
            ..Default::default()
        });
        // 70 messages, ~3500 tokens: over the 3200 threshold.
        let msg = ChatMessage::user("x".repeat(196));
        let msgs = vec![msg; 70];
        assert!(c.should_compact(&msgs));

        // A short session never triggers, whatever its size in tokens.
        let big = vec![ChatMessage::user("y".repeat(4000)); 5];
        assert!(!c.should_compact(&big));
    }

    #[tokio::test]
    async fn test_summary_keeps_recent_verbatim() {
        let c = compactor(CompactionMode::Summary);
        let msgs = chat_pairs(30); // 60 messages
        let (out, result) = c.compact(&msgs).await.unwrap();

        assert!(result.changed());
        assert!(result.tokens_after < result.tokens_before);
        // Last 20 kept verbatim.
        assert_eq!(&out[out.len() - 20..], &msgs[msgs.len() - 20..]);
        // Head is summary messages.
        assert!(out[0].text().starts_with(SUMMARY_LABEL));
        assert_eq!(out.last(), msgs.last());
    }

    #[tokio::test]
    async fn test_summary_short_session_untouched() {
        let c = compactor(CompactionMode::Summary);
        let msgs = chat_pairs(8); // 16 messages < short_threshold
        let (out, result) = c.compact(&msgs).await.unwrap();
        assert_eq!(out.len(), 16);
        assert!(!result.changed());
    }

    #[tokio::test]
    async fn test_summary_never_orphans_tool_results() {
        // Build a session where the preserve_recent split would land in the
        // middle of a tool exchange.
        let mut msgs = chat_pairs(15); // 30 messages
        msgs.extend(tool_exchange("call_edge")); // 33
        msgs.extend(chat_pairs(9)); // 51: split at 31 = tool result

        let c = compactor(CompactionMode::Summary);
        let (out, _) = c.compact(&msgs).await.unwrap();

        // Validation would have failed otherwise, but check explicitly.
        let issued: Vec<&str> = out.iter().flat_map(|m| m.tool_call_ids()).collect();
        let answered: Vec<&str> = out.iter().filter_map(|m| m.answered_call_id()).collect();
        assert_eq!(issued.contains(&"call_edge"), answered.contains(&"call_edge"));
    }

    #[tokio::test]
    async fn test_llm_summarizer_used() {
        let summarizer: Summarizer = Arc::new(|_msgs| {
            Box::pin(async { Ok("A concise LLM summary.".to_string()) })
        });
        let c = compactor(CompactionMode::Summary).with_summarizer(summarizer);
        let msgs = chat_pairs(30);
        let (out, _) = c.compact(&msgs).await.unwrap();
        assert!(out[0].text().contains("A concise LLM summary."));
    }

    #[tokio::test]
    async fn test_failing_summarizer_falls_back_to_extractive() {
        let summarizer: Summarizer =
            Arc::new(|_msgs| Box::pin(async { anyhow::bail!("model unavailable") }));
        let c = compactor(CompactionMode::Summary).with_summarizer(summarizer);
        let msgs = chat_pairs(30);
        let (out, _) = c.compact(&msgs).await.unwrap();
        assert!(out[0].text().starts_with(SUMMARY_LABEL));
        assert!(out[0].text().contains("question 0"));
    }

    #[tokio::test]
    async fn test_token_limit_truncates_at_safe_boundary() {
        let mut msgs = chat_pairs(10); // 20
        msgs.extend(tool_exchange("call_x")); // 23
        let c = compactor(CompactionMode::TokenLimit);
        let (out, result) = c.compact(&msgs).await.unwrap();

        assert_eq!(result.mode, "token-limit");
        assert!(out.len() < msgs.len());
        assert_eq!(out.last(), msgs.last());
        // Either both halves of the exchange survive or neither does.
        let has_call = out.iter().any(|m| m.tool_call_ids().contains(&"call_x"));
        let has_result = out.iter().any(|m| m.answered_call_id() == Some("call_x"));
        assert_eq!(has_call, has_result);
    }

    #[tokio::test]
    async fn test_flush_hook_runs_before_compaction() {
        use std::sync::atomic::{AtomicBool, Ordering};
        let flushed = Arc::new(AtomicBool::new(false));
        let flag = flushed.clone();
        let hook: FlushHook = Arc::new(move || {
            let flag = flag.clone();
            Box::pin(async move {
                flag.store(true, Ordering::SeqCst);
            })
        });
        let c = compactor(CompactionMode::Summary).with_flush_hook(hook);
        let _ = c.compact(&chat_pairs(30)).await.unwrap();
        assert!(flushed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_validate_rejects_changed_tail() {
        let msgs = chat_pairs(2);
        let mut bad = msgs.clone();
        bad.pop();
        assert!(validate(&msgs, &bad).is_err());
    }

    #[test]
    fn test_validate_rejects_orphaned_result() {
        let msgs = tool_exchange("c1");
        let orphan = vec![msgs[1].clone(), msgs[2].clone()];
        assert!(validate(&msgs, &orphan).is_err());
    }

    #[test]
    fn test_validate_rejects_unanswered_call() {
        let msgs = tool_exchange("c1");
        // Keep the assistant-with-call and the final message, drop the result.
        let dangling = vec![msgs[0].clone(), msgs[2].clone()];
        assert!(validate(&msgs, &dangling).is_err());
    }

    #[test]
    fn test_extractive_summary_mentions_errors() {
        let chunk = vec![
            ChatMessage::user("deploy the service"),
            ChatMessage::tool_result("c1", "Error: connection refused"),
        ];
        let summary = extractive_summary(&chunk);
        assert!(summary.contains("deploy the service"));
        assert!(summary.contains("connection refused"));
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!(CompactionMode::parse("off"), CompactionMode::Off);
        assert_eq!(CompactionMode::parse("token-limit"), CompactionMode::TokenLimit);
        assert_eq!(CompactionMode::parse("summary"), CompactionMode::Summary);
        assert_eq!(CompactionMode::parse("anything"), CompactionMode::Summary);
    }
}
