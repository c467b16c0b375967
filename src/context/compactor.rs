//! Context compaction implementation.

use crate::llm::{ChatOutcome, ChatRequest, LlmProvider, Message, Role, ToolDefinition};
use crate::session::{Session, SessionMessage};
use crate::timestamp;
use crate::types::{ContextMode, Provider};
use log::{info, warn};
use std::fmt::{self, Write};
use std::ops::Range;
use std::sync::Arc;

use super::assembler::ContextAssembler;
use super::cache::CacheManager;
use super::estimator::TokenEstimator;
use super::flush::flush_for_compaction;
use super::prompt::COMPACTION_SYSTEM_PROMPT;

/// Result of a compaction attempt.
///
/// On any skip, `messages` is the caller's list returned untouched (same
/// allocation) and `new_start` is unchanged.
#[derive(Debug, Clone)]
pub struct CompactionResult {
    pub messages: Vec<Message>,
    /// Index in `messages` where the in-flight turn starts.
    pub new_start: usize,
    pub outcome: CompactionOutcome,
}

impl CompactionResult {
    #[must_use]
    pub const fn is_compacted(&self) -> bool {
        matches!(self.outcome, CompactionOutcome::Compacted(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompactionOutcome {
    Compacted(CompactionStats),
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    /// Session messages folded into the summary, including a previous marker.
    pub compacted_messages: usize,
    pub tail_count: usize,
    pub summary_chars: usize,
    /// Estimated tokens of the outbound list before compaction.
    pub original_tokens: usize,
    /// Estimated tokens of the rebuilt outbound list.
    pub new_tokens: usize,
}

/// Why a compaction did not happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    TooFewMessages,
    NothingToCompact,
    ProviderError(String),
    EmptySummary,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooFewMessages => write!(f, "fewer session messages than the minimum tail"),
            Self::NothingToCompact => write!(f, "nothing to compact between boundaries"),
            Self::ProviderError(msg) => write!(f, "LLM error: {msg}"),
            Self::EmptySummary => write!(f, "empty summary from LLM"),
        }
    }
}

/// LLM-based session compactor.
///
/// Summarizes the part of the session history between the last compaction
/// marker and a verbatim tail, then splices a single marker carrying the
/// summary in front of the tail. Nothing is removed from the session.
pub struct Compactor<P: LlmProvider> {
    provider: Arc<P>,
    cache: CacheManager,
    model: String,
}

impl<P: LlmProvider> Compactor<P> {
    #[must_use]
    pub fn new(provider: Arc<P>, cache: CacheManager, model: impl Into<String>) -> Self {
        Self {
            provider,
            cache,
            model: model.into(),
        }
    }

    #[must_use]
    pub const fn cache(&self) -> &CacheManager {
        &self.cache
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// True when the effective context size reaches the mode's threshold.
    #[must_use]
    pub fn should_compact(
        &self,
        messages: &[Message],
        mode: ContextMode,
        tools: Option<&[ToolDefinition]>,
        session: Option<&Session>,
    ) -> bool {
        let tokens = self
            .cache
            .estimate_context_tokens(messages, &self.model, tools, session);
        tokens as f64 >= self.cache.config().compaction_threshold(mode)
    }

    /// [`Self::should_compact`] for a mode given by name; unknown names never
    /// compact.
    #[must_use]
    pub fn should_compact_named(
        &self,
        messages: &[Message],
        mode: &str,
        tools: Option<&[ToolDefinition]>,
        session: Option<&Session>,
    ) -> bool {
        mode.parse::<ContextMode>()
            .is_ok_and(|mode| self.should_compact(messages, mode, tools, session))
    }

    /// Number of trailing session messages to keep verbatim.
    ///
    /// Starts at `tail_min` and grows toward `tail_max` while the tail stays
    /// within the tail token budget. The tail never starts on a tool result:
    /// it is extended backward to the assistant message that issued the call.
    #[must_use]
    pub fn determine_tail(&self, messages: &[SessionMessage]) -> usize {
        let config = self.cache.config();
        let budget = config.tail_token_budget();
        let cost = |m: &SessionMessage| {
            TokenEstimator::estimate_text(&m.content) + TokenEstimator::MESSAGE_OVERHEAD
        };

        let len = messages.len();
        let mut count = config.tail_min.min(len);
        let mut tokens: usize = messages[len - count..].iter().map(cost).sum();

        while count < config.tail_max && count < len {
            let next = cost(&messages[len - count - 1]);
            if tokens + next > budget {
                break;
            }
            count += 1;
            tokens += next;
        }

        if count < len && messages[len - count].role == Role::Tool {
            while count < len {
                count += 1;
                if messages[len - count].role == Role::Assistant {
                    break;
                }
            }
        }

        count
    }

    /// Session indices a compaction would summarize, with the tail size.
    ///
    /// The range runs from the last marker (inclusive) or the start of the
    /// session up to the tail; `None` when it is empty.
    #[must_use]
    pub fn compactable_range(&self, session: &Session) -> Option<(Range<usize>, usize)> {
        let tail_count = self.determine_tail(&session.messages);
        let start = session.last_compaction_index().unwrap_or(0);
        let end = session.messages.len() - tail_count;
        (end > start).then_some((start..end, tail_count))
    }

    /// Render messages as the summarizer's transcript.
    #[must_use]
    pub fn format_compaction_input(messages: &[Message], previous: Option<&Message>) -> String {
        let mut output = String::new();

        if let Some(previous) = previous {
            let _ = writeln!(
                output,
                "=== PREVIOUS SUMMARY ===\n{}",
                previous.content().flatten()
            );
        }

        output.push_str("=== CONVERSATION ===\n");
        for message in messages {
            match message {
                Message::User { content, .. } => {
                    let _ = writeln!(output, "[user] {}", content.flatten());
                }
                Message::Assistant {
                    content,
                    tool_calls,
                    ..
                } => {
                    for call in tool_calls {
                        let _ = writeln!(
                            output,
                            "[tool_call] {}({})",
                            call.function.name, call.function.arguments
                        );
                    }
                    if !content.is_empty() {
                        let _ = writeln!(output, "[assistant] {}", content.flatten());
                    }
                }
                Message::Tool { name, content, .. } => {
                    let _ = writeln!(output, "[tool_response:{name}] {}", content.flatten());
                }
                Message::System { .. } => {}
            }
        }

        output
    }

    /// Compact the session and rebuild the outbound list.
    ///
    /// `messages[new_start..]` is the in-flight turn, not yet persisted; it is
    /// carried over verbatim after the rebuilt base list. Failures never
    /// propagate: they are logged and reported as [`CompactionOutcome::Skipped`].
    pub async fn compact<A: ContextAssembler + ?Sized>(
        &self,
        session: &mut Session,
        mode: ContextMode,
        assembler: &A,
        messages: Vec<Message>,
        new_start: usize,
    ) -> CompactionResult {
        if session.messages.len() < self.cache.config().tail_min {
            return Self::skip(session, messages, new_start, SkipReason::TooFewMessages);
        }

        let Some((range, tail_count)) = self.compactable_range(session) else {
            return Self::skip(session, messages, new_start, SkipReason::NothingToCompact);
        };
        let compacted_messages = range.len();
        let has_previous = session.last_compaction_index().is_some();

        let mut flushed: Vec<Message> = session.messages[range]
            .iter()
            .map(SessionMessage::to_llm_message)
            .collect();
        flush_for_compaction(&mut flushed, mode);

        // a previous marker is always the first message of the range
        let (previous, body) = match flushed.split_first() {
            Some((first, rest)) if has_previous => (Some(first), rest),
            _ => (None, flushed.as_slice()),
        };
        let transcript = Self::format_compaction_input(body, previous);

        let summary = match self.summarize(transcript).await {
            Ok(summary) => summary,
            Err(reason) => return Self::skip(session, messages, new_start, reason),
        };

        let provider = Provider::from_model(&self.model);
        let original_tokens = TokenEstimator::estimate_history(&messages, provider);

        info!(
            "Compaction triggered (mode={mode}, compacted={compacted_messages}, tail={tail_count}, summary_chars={}, session={})",
            summary.chars().count(),
            session.key
        );

        Self::insert_marker(session, &summary, tail_count, mode);

        let mut messages = messages;
        let current_turn = messages.split_off(new_start.min(messages.len()));
        let mut rebuilt = assembler.build_messages(session.get_history(), &session.key);
        let new_start = rebuilt.len();
        rebuilt.extend(current_turn);

        let stats = CompactionStats {
            compacted_messages,
            tail_count,
            summary_chars: summary.chars().count(),
            original_tokens,
            new_tokens: TokenEstimator::estimate_history(&rebuilt, provider),
        };

        CompactionResult {
            messages: rebuilt,
            new_start,
            outcome: CompactionOutcome::Compacted(stats),
        }
    }

    async fn summarize(&self, transcript: String) -> Result<String, SkipReason> {
        let request = ChatRequest {
            messages: vec![
                Message::system(COMPACTION_SYSTEM_PROMPT),
                Message::user(transcript),
            ],
            tools: None,
            model: self.model.clone(),
            temperature: Some(self.cache.config().summary_temperature),
        };

        let outcome = self
            .provider
            .chat(request)
            .await
            .map_err(|error| SkipReason::ProviderError(format!("{error:#}")))?;

        match outcome {
            ChatOutcome::Success(response) => response
                .content
                .filter(|summary| !summary.trim().is_empty())
                .ok_or(SkipReason::EmptySummary),
            ChatOutcome::RateLimited => Err(SkipReason::ProviderError("rate limited".to_string())),
            ChatOutcome::InvalidRequest(msg) => {
                Err(SkipReason::ProviderError(format!("invalid request: {msg}")))
            }
            ChatOutcome::ServerError(msg) => {
                Err(SkipReason::ProviderError(format!("server error: {msg}")))
            }
        }
    }

    /// Insert the marker in front of the tail, stamped just before it.
    fn insert_marker(session: &mut Session, summary: &str, tail_count: usize, mode: ContextMode) {
        let index = session.messages.len() - tail_count;
        let stamp = session
            .messages
            .get(index)
            .and_then(SessionMessage::timestamp)
            .and_then(|ts| timestamp::shifted(ts, time::Duration::milliseconds(-100)))
            .unwrap_or_else(timestamp::now);

        session
            .messages
            .insert(index, SessionMessage::compaction(summary, mode, stamp));
    }

    fn skip(
        session: &Session,
        messages: Vec<Message>,
        new_start: usize,
        reason: SkipReason,
    ) -> CompactionResult {
        warn!("Compaction skipped: {reason} (session={})", session.key);
        CompactionResult {
            messages,
            new_start,
            outcome: CompactionOutcome::Skipped(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{BudgetConfig, SystemPromptAssembler, TRIM_TAG};
    use crate::llm::ToolCall;
    use crate::session::SUMMARY_PREFIX;
    use crate::test_utils::{MODEL, MockProvider, chat_session, push_tool_exchange, stamp};
    use serde_json::json;
    use std::cmp::Ordering;

    fn compactor(provider: MockProvider, max_tokens: usize) -> Compactor<MockProvider> {
        let config = BudgetConfig::default().with_max_context_tokens(max_tokens);
        Compactor::new(
            Arc::new(provider),
            CacheManager::new(config).unwrap(),
            MODEL,
        )
    }

    fn outbound(session: &Session, assembler: &SystemPromptAssembler) -> (Vec<Message>, usize) {
        let mut messages = assembler.build_messages(session.get_history(), &session.key);
        let new_start = messages.len();
        messages.push(Message::user("next question"));
        (messages, new_start)
    }

    fn pad_session(session: &mut Session, count: usize) {
        for i in 0..count {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            session.add_message(role, "p".repeat(200));
        }
    }

    #[test]
    fn test_should_compact_thresholds() {
        let c = compactor(MockProvider::summary("s"), 1_000);
        let session = chat_session("cli:1", 40, 200);
        let messages = session.get_history();

        assert!(c.should_compact(&messages, ContextMode::Eco, None, Some(&session)));
        assert!(c.should_compact_named(&messages, "full", None, None));
        assert!(!c.should_compact_named(&messages, "turbo", None, None));

        let short = &messages[..4];
        assert!(!c.should_compact(short, ContextMode::Eco, None, None));
    }

    #[test]
    fn test_tail_min_when_budget_is_tight() {
        let c = compactor(MockProvider::summary("s"), 1_000);
        let session = chat_session("cli:1", 40, 200);
        assert_eq!(c.determine_tail(&session.messages), 10);
    }

    #[test]
    fn test_tail_grows_to_max_under_budget() {
        let c = compactor(MockProvider::summary("s"), 200_000);
        let session = chat_session("cli:1", 40, 40);
        assert_eq!(c.determine_tail(&session.messages), 20);

        let small = chat_session("cli:1", 6, 40);
        assert_eq!(c.determine_tail(&small.messages), 6);
    }

    #[test]
    fn test_tail_never_starts_on_tool_result() {
        let c = compactor(MockProvider::summary("s"), 1_000);
        let mut session = chat_session("cli:1", 16, 200);
        push_tool_exchange(&mut session, "tc1", "y".repeat(200));
        pad_session(&mut session, 9);

        let len = session.messages.len();
        assert_eq!(session.messages[len - 10].role, Role::Tool);

        let tail = c.determine_tail(&session.messages);
        assert_eq!(tail, 11);
        assert_eq!(session.messages[len - tail].role, Role::Assistant);
    }

    #[test]
    fn test_format_compaction_input() {
        let messages = vec![
            Message::user("hi"),
            Message::assistant_with_tool_calls(
                Some("checking".to_string()),
                vec![ToolCall::new("tc1", "read_file", &json!({"path": "a.txt"}))],
            ),
            Message::tool_result("tc1", "read_file", "file content"),
            Message::assistant("done"),
            Message::system("ignored"),
        ];
        let previous = Message::user(format!("{SUMMARY_PREFIX}old"));

        assert_eq!(
            Compactor::<MockProvider>::format_compaction_input(&messages, Some(&previous)),
            "=== PREVIOUS SUMMARY ===\n[Conversation Summary]\nold\n\
             === CONVERSATION ===\n\
             [user] hi\n\
             [tool_call] read_file({\"path\":\"a.txt\"})\n\
             [assistant] checking\n\
             [tool_response:read_file] file content\n\
             [assistant] done\n"
        );

        let plain = Compactor::<MockProvider>::format_compaction_input(&messages[..1], None);
        assert!(!plain.contains("PREVIOUS SUMMARY"));
    }

    #[tokio::test]
    async fn test_compaction_splices_marker_before_tail() {
        let c = compactor(MockProvider::summary("They discussed the build."), 1_000);
        let assembler = SystemPromptAssembler::new("You are helpful.");
        let mut session = chat_session("cli:1", 40, 200);
        let (messages, new_start) = outbound(&session, &assembler);

        let result = c
            .compact(&mut session, ContextMode::Eco, &assembler, messages, new_start)
            .await;

        let CompactionOutcome::Compacted(stats) = result.outcome else {
            panic!("expected compaction, got {:?}", result.outcome);
        };
        assert_eq!(stats.compacted_messages, 30);
        assert_eq!(stats.tail_count, 10);
        assert!(stats.new_tokens < stats.original_tokens);

        assert_eq!(session.messages.len(), 41);
        assert_eq!(session.compaction_count(), 1);
        let marker = &session.messages[30];
        assert!(marker.is_compaction());
        assert_eq!(marker.role, Role::User);
        assert_eq!(marker.content, format!("{SUMMARY_PREFIX}They discussed the build."));
        assert_eq!(marker.metadata.mode, Some(ContextMode::Eco));
        assert!(marker.metadata.compacted_at.is_some());

        let ts = marker.timestamp().unwrap();
        assert_eq!(timestamp::compare(ts, &stamp(30)), Ordering::Less);
        assert_eq!(timestamp::compare(ts, &stamp(29)), Ordering::Greater);

        assert_eq!(session.get_history().len(), stats.tail_count + 1);
        assert_eq!(result.new_start, 1 + stats.tail_count + 1);
        assert_eq!(result.messages.len(), result.new_start + 1);
        assert_eq!(
            result.messages[result.new_start].content().as_text(),
            Some("next question")
        );
    }

    #[tokio::test]
    async fn test_summarization_request_shape() {
        let provider = Arc::new(MockProvider::summary("summary"));
        let c = Compactor::new(
            Arc::clone(&provider),
            CacheManager::new(BudgetConfig::default().with_max_context_tokens(1_000)).unwrap(),
            MODEL,
        );
        let assembler = SystemPromptAssembler::default();
        let mut session = chat_session("cli:1", 40, 200);
        let (messages, new_start) = outbound(&session, &assembler);

        c.compact(&mut session, ContextMode::Normal, &assembler, messages, new_start)
            .await;

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.model, MODEL);
        assert_eq!(request.temperature, Some(0.3));
        assert!(request.tools.is_none());
        assert_eq!(
            request.messages[0].content().as_text(),
            Some(COMPACTION_SYSTEM_PROMPT)
        );
        let transcript = request.messages[1].content().as_text().unwrap();
        assert!(transcript.starts_with("=== CONVERSATION ===\n[user] 0000 "));
        assert!(!transcript.contains("0030 "));
    }

    #[tokio::test]
    async fn test_llm_failure_returns_original_messages() {
        let c = compactor(MockProvider::failing(), 1_000);
        let assembler = SystemPromptAssembler::default();
        let mut session = chat_session("cli:1", 40, 200);
        let (messages, new_start) = outbound(&session, &assembler);
        let ptr = messages.as_ptr();

        let result = c
            .compact(&mut session, ContextMode::Eco, &assembler, messages, new_start)
            .await;

        assert!(matches!(
            result.outcome,
            CompactionOutcome::Skipped(SkipReason::ProviderError(_))
        ));
        assert_eq!(result.messages.as_ptr(), ptr);
        assert_eq!(result.new_start, new_start);
        assert_eq!(session.messages.len(), 40);
        assert_eq!(session.compaction_count(), 0);
    }

    #[tokio::test]
    async fn test_unsuccessful_outcome_is_provider_error() {
        let c = compactor(
            MockProvider::new(vec![ChatOutcome::ServerError("overloaded".to_string())]),
            1_000,
        );
        let assembler = SystemPromptAssembler::default();
        let mut session = chat_session("cli:1", 40, 200);
        let (messages, new_start) = outbound(&session, &assembler);

        let result = c
            .compact(&mut session, ContextMode::Eco, &assembler, messages, new_start)
            .await;

        assert_eq!(
            result.outcome,
            CompactionOutcome::Skipped(SkipReason::ProviderError(
                "server error: overloaded".to_string()
            ))
        );
        assert_eq!(session.messages.len(), 40);
    }

    #[tokio::test]
    async fn test_empty_summary_skips() {
        let c = compactor(MockProvider::summary("  \n\t "), 1_000);
        let assembler = SystemPromptAssembler::default();
        let mut session = chat_session("cli:1", 40, 200);
        let (messages, new_start) = outbound(&session, &assembler);
        let ptr = messages.as_ptr();

        let result = c
            .compact(&mut session, ContextMode::Eco, &assembler, messages, new_start)
            .await;

        assert_eq!(
            result.outcome,
            CompactionOutcome::Skipped(SkipReason::EmptySummary)
        );
        assert_eq!(result.messages.as_ptr(), ptr);
        assert_eq!(session.messages.len(), 40);
    }

    #[tokio::test]
    async fn test_too_few_messages_skips_without_calling_llm() {
        let provider = Arc::new(MockProvider::summary("s"));
        let c = Compactor::new(
            Arc::clone(&provider),
            CacheManager::new(BudgetConfig::default().with_max_context_tokens(1_000)).unwrap(),
            MODEL,
        );
        let assembler = SystemPromptAssembler::default();
        let mut session = chat_session("cli:1", 9, 200);
        let (messages, new_start) = outbound(&session, &assembler);

        let result = c
            .compact(&mut session, ContextMode::Eco, &assembler, messages, new_start)
            .await;

        assert_eq!(
            result.outcome,
            CompactionOutcome::Skipped(SkipReason::TooFewMessages)
        );
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_everything_in_tail_skips() {
        let c = compactor(MockProvider::summary("s"), 1_000);
        let assembler = SystemPromptAssembler::default();
        let mut session = chat_session("cli:1", 10, 200);
        let (messages, new_start) = outbound(&session, &assembler);

        let result = c
            .compact(&mut session, ContextMode::Eco, &assembler, messages, new_start)
            .await;

        assert_eq!(
            result.outcome,
            CompactionOutcome::Skipped(SkipReason::NothingToCompact)
        );
        assert!(c.compactable_range(&session).is_none());
    }

    #[tokio::test]
    async fn test_tool_output_is_flushed_before_summarization() {
        let provider = Arc::new(MockProvider::summary("summary"));
        let c = Compactor::new(
            Arc::clone(&provider),
            CacheManager::new(BudgetConfig::default().with_max_context_tokens(1_000)).unwrap(),
            MODEL,
        );
        let assembler = SystemPromptAssembler::default();
        let mut session = chat_session("cli:1", 20, 200);
        push_tool_exchange(&mut session, "tc1", "y".repeat(10_000));
        pad_session(&mut session, 10);
        let (messages, new_start) = outbound(&session, &assembler);

        let result = c
            .compact(&mut session, ContextMode::Normal, &assembler, messages, new_start)
            .await;
        assert!(result.is_compacted());

        let requests = provider.requests();
        let transcript = requests[0].messages[1].content().as_text().unwrap();
        assert!(transcript.contains("[tool_call] exec("));
        assert!(transcript.contains(TRIM_TAG));
        assert!(!transcript.contains(&"y".repeat(5_000)));
        // stored history keeps the full output
        assert_eq!(session.messages[21].content.len(), 10_000);
    }

    #[tokio::test]
    async fn test_cascading_compaction_merges_previous_summary() {
        let provider = Arc::new(MockProvider::new(vec![
            MockProvider::text_response("first summary"),
            MockProvider::text_response("second summary"),
        ]));
        let c = Compactor::new(
            Arc::clone(&provider),
            CacheManager::new(BudgetConfig::default().with_max_context_tokens(1_000)).unwrap(),
            MODEL,
        );
        let assembler = SystemPromptAssembler::default();
        let mut session = chat_session("cli:1", 40, 200);

        let (messages, new_start) = outbound(&session, &assembler);
        let first = c
            .compact(&mut session, ContextMode::Eco, &assembler, messages, new_start)
            .await;
        assert!(first.is_compacted());

        pad_session(&mut session, 40);
        let (messages, new_start) = outbound(&session, &assembler);
        let second = c
            .compact(&mut session, ContextMode::Eco, &assembler, messages, new_start)
            .await;

        let CompactionOutcome::Compacted(stats) = second.outcome else {
            panic!("expected compaction, got {:?}", second.outcome);
        };
        assert_eq!(stats.compacted_messages, 41);
        assert_eq!(session.compaction_count(), 2);
        assert_eq!(session.messages.len(), 82);

        let transcript = provider.requests()[1].messages[1]
            .content()
            .flatten();
        assert!(transcript.starts_with(
            "=== PREVIOUS SUMMARY ===\n[Conversation Summary]\nfirst summary\n=== CONVERSATION ===\n"
        ));

        let history = session.get_history();
        assert_eq!(history.len(), stats.tail_count + 1);
        assert_eq!(
            history[0].content().as_text(),
            Some("[Conversation Summary]\nsecond summary")
        );
    }
}
