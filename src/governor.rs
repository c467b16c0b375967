//! Per-call orchestration of flushing and compaction.
//!
//! The agent loop owns the turn: it builds a [`TurnState`], calls
//! [`ContextGovernor::prepare_call`] before every LLM call of the tool loop,
//! sends [`PreparedCall::api_messages`], and reports the response back with
//! [`ContextGovernor::record_response`]. Persisting the session after the
//! turn is the caller's job.
//!
//! # Example
//!
//! ```ignore
//! use agent_budget::{ContextGovernor, ContextMode, context::{BudgetConfig, SystemPromptAssembler}};
//!
//! let governor = ContextGovernor::new(provider, SystemPromptAssembler::new(prompt), BudgetConfig::default(), model)?
//!     .with_mode(ContextMode::Normal);
//!
//! let mut turn = governor.start_turn(&session, Message::user(text));
//! loop {
//!     let call = governor.prepare_call(&mut session, &mut turn, Some(&tools)).await;
//!     let response = send(call.api_messages).await?;
//!     governor.record_response(&mut session, &response);
//!     // execute tool calls, push results onto `turn`
//! }
//! ```

use crate::context::{
    BudgetConfig, BudgetConfigError, CacheManager, CompactionOutcome, CompactionStats, Compactor,
    ContextAssembler, FlushReport, SkipReason, flush_tool_results,
};
use crate::llm::{ChatResponse, LlmProvider, Message, ToolDefinition};
use crate::session::Session;
use crate::stores::SessionStore;
use crate::types::{ContextMode, FlushSeverity};
use anyhow::Result;
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;

/// Outbound message list of one agent turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnState {
    pub messages: Vec<Message>,
    /// Index where this turn's new (unpersisted) messages begin.
    pub new_start: usize,
    /// Set once the turn has attempted a compaction.
    pub compacted: bool,
}

impl TurnState {
    #[must_use]
    pub const fn new(messages: Vec<Message>, new_start: usize) -> Self {
        Self {
            messages,
            new_start,
            compacted: false,
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Messages produced during this turn.
    #[must_use]
    pub fn current_turn(&self) -> &[Message] {
        &self.messages[self.new_start.min(self.messages.len())..]
    }
}

/// What [`ContextGovernor::prepare_call`] did to the outbound list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BudgetReport {
    pub compaction: Option<CompactionOutcome>,
    pub flush: Option<FlushReport>,
    /// Tool results trimmed by re-applying the session's last flush.
    pub reapplied: usize,
    pub safety_flush: Option<FlushSeverity>,
    /// Raw estimate of the list as sent.
    pub tokens: usize,
}

/// Messages ready for the provider, without `_ts`.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCall {
    pub api_messages: Vec<Message>,
    pub report: BudgetReport,
}

/// Context usage of a session as a UI would display it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ContextUsage {
    pub tokens: usize,
    /// Compaction threshold of the mode, in tokens.
    pub effective_max: usize,
    /// `tokens` as a percentage of `effective_max`, capped at 100.
    pub percent: usize,
    pub mode: ContextMode,
    pub compactions: usize,
}

/// Outcome of a user-requested compaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManualCompaction {
    NotEnoughMessages { count: usize, required: usize },
    NothingToCompact,
    Compacted(CompactionStats),
    Skipped(SkipReason),
}

pub struct ContextGovernor<P: LlmProvider, A: ContextAssembler> {
    compactor: Compactor<P>,
    assembler: A,
    mode: ContextMode,
}

impl<P: LlmProvider, A: ContextAssembler> ContextGovernor<P, A> {
    /// Create a governor in [`ContextMode::Normal`].
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid.
    pub fn new(
        provider: Arc<P>,
        assembler: A,
        config: BudgetConfig,
        model: impl Into<String>,
    ) -> Result<Self, BudgetConfigError> {
        let cache = CacheManager::new(config)?;
        Ok(Self {
            compactor: Compactor::new(provider, cache, model),
            assembler,
            mode: ContextMode::default(),
        })
    }

    #[must_use]
    pub fn with_mode(mut self, mode: ContextMode) -> Self {
        self.mode = mode;
        self
    }

    pub const fn set_mode(&mut self, mode: ContextMode) {
        self.mode = mode;
    }

    #[must_use]
    pub const fn mode(&self) -> ContextMode {
        self.mode
    }

    #[must_use]
    pub const fn compactor(&self) -> &Compactor<P> {
        &self.compactor
    }

    #[must_use]
    pub const fn cache(&self) -> &CacheManager {
        self.compactor.cache()
    }

    #[must_use]
    pub const fn assembler(&self) -> &A {
        &self.assembler
    }

    /// Build the outbound list for a new turn: replayed history followed by
    /// the inbound user message.
    #[must_use]
    pub fn start_turn(&self, session: &Session, user_message: Message) -> TurnState {
        let mut messages = self
            .assembler
            .build_messages(session.get_history(), &session.key);
        let new_start = messages.len();
        messages.push(user_message);
        TurnState::new(messages, new_start)
    }

    /// Bring the turn's outbound list within budget before an LLM call.
    ///
    /// In order: compact once per turn when the effective size reaches the
    /// mode threshold; flush if the cache TTL expired, otherwise re-apply the
    /// last recorded flush; force an ungated flush if the raw size still
    /// exceeds the context window. Never fails.
    pub async fn prepare_call(
        &self,
        session: &mut Session,
        turn: &mut TurnState,
        tools: Option<&[ToolDefinition]>,
    ) -> PreparedCall {
        let cache = self.cache();
        let model = self.compactor.model();
        let mut report = BudgetReport::default();

        if !turn.compacted
            && self
                .compactor
                .should_compact(&turn.messages, self.mode, tools, Some(&*session))
        {
            let messages = std::mem::take(&mut turn.messages);
            let result = self
                .compactor
                .compact(session, self.mode, &self.assembler, messages, turn.new_start)
                .await;
            turn.messages = result.messages;
            turn.new_start = result.new_start;
            turn.compacted = true;
            report.compaction = Some(result.outcome);
        }

        if cache.should_flush(session, model) {
            report.flush = Some(cache.flush_messages(
                &mut turn.messages,
                session,
                model,
                tools,
                self.mode,
            ));
        } else {
            report.reapplied = cache.apply_previous_flush(&mut turn.messages, session);
            if report.reapplied > 0 {
                debug!(
                    "Re-applied previous flush (trimmed={}, session={})",
                    report.reapplied, session.key
                );
            }
        }

        let tokens = cache.estimate_context_tokens(&turn.messages, model, tools, None);
        if tokens > cache.max_context_tokens() {
            let severity = if self.mode == ContextMode::Eco {
                FlushSeverity::ExtraHard
            } else {
                FlushSeverity::Hard
            };
            warn!(
                "Safety flush (severity={severity}, tokens={tokens}, max={}, session={})",
                cache.max_context_tokens(),
                session.key
            );
            flush_tool_results(&mut turn.messages, severity, None);
            report.safety_flush = Some(severity);
        }

        report.tokens = cache.estimate_context_tokens(&turn.messages, model, tools, None);

        PreparedCall {
            api_messages: turn.messages.iter().map(Message::without_ts).collect(),
            report,
        }
    }

    /// Record prompt-cache activity reported by a response.
    pub fn record_response(&self, session: &mut Session, response: &ChatResponse) {
        CacheManager::mark_cache_created(session, &response.usage);
    }

    /// Effective context usage of the session outside a turn.
    ///
    /// A flush that is due but has not run yet is simulated on a copy.
    #[must_use]
    pub fn context_usage(&self, session: &Session, tools: Option<&[ToolDefinition]>) -> ContextUsage {
        let cache = self.cache();
        let model = self.compactor.model();
        let messages = self
            .assembler
            .build_messages(session.get_history(), &session.key);

        let tokens = if cache.should_flush(session, model) {
            let mut simulated = messages;
            let raw = cache.estimate_context_tokens(&simulated, model, tools, None);
            flush_tool_results(&mut simulated, cache.select_severity(raw, self.mode), None);
            cache.estimate_context_tokens(&simulated, model, tools, None)
        } else {
            cache.estimate_context_tokens(&messages, model, tools, Some(session))
        };

        let effective_max = cache.config().compaction_threshold(self.mode).round() as usize;
        let percent = if effective_max == 0 {
            0
        } else {
            (tokens * 100 / effective_max).min(100)
        };

        ContextUsage {
            tokens,
            effective_max,
            percent,
            mode: self.mode,
            compactions: session.compaction_count(),
        }
    }

    /// Compact on request, regardless of the mode threshold.
    ///
    /// Refuses when fewer than `manual_compaction_min_messages` messages were
    /// recorded since the last marker, or when everything is in the tail.
    pub async fn compact_now(&self, session: &mut Session) -> ManualCompaction {
        let count = session.messages_since_compaction();
        let required = self.cache().config().manual_compaction_min_messages;
        if count < required {
            return ManualCompaction::NotEnoughMessages { count, required };
        }

        let Some((range, tail_count)) = self.compactor.compactable_range(session) else {
            return ManualCompaction::NothingToCompact;
        };
        info!(
            "Manual compaction started (compactable={}, tail={tail_count}, session={})",
            range.len(),
            session.key
        );

        let messages = self
            .assembler
            .build_messages(session.get_history(), &session.key);
        let new_start = messages.len();
        let result = self
            .compactor
            .compact(session, self.mode, &self.assembler, messages, new_start)
            .await;

        match result.outcome {
            CompactionOutcome::Compacted(stats) => ManualCompaction::Compacted(stats),
            CompactionOutcome::Skipped(reason) => ManualCompaction::Skipped(reason),
        }
    }

    /// [`Self::compact_now`] on a stored session, saving it when compacted.
    ///
    /// # Errors
    /// Returns an error if the session cannot be loaded or saved.
    pub async fn compact_session<S: SessionStore + ?Sized>(
        &self,
        store: &S,
        key: &str,
    ) -> Result<ManualCompaction> {
        let mut session = store.load_or_create(key).await?;
        let outcome = self.compact_now(&mut session).await;
        if matches!(outcome, ManualCompaction::Compacted(_)) {
            store.save(&session).await?;
        }
        Ok(outcome)
    }
}
