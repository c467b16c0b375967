//! Prompt-cache bookkeeping and flush decisions.
//!
//! Two paths touch tool results and they stay separate:
//!
//! - *simulate*: [`CacheManager::estimate_context_tokens`] replays the last
//!   recorded flush on a private copy to learn what the provider actually
//!   sees. The caller's messages are never modified.
//! - *decide*: [`CacheManager::flush_messages`] picks a severity now,
//!   trims the outbound list in place and records the decision in the
//!   session's cache metadata.
//!
//! [`CacheManager::apply_previous_flush`] re-applies a recorded decision to
//! a freshly rebuilt outbound list.

use super::config::{BudgetConfig, BudgetConfigError};
use super::estimator::TokenEstimator;
use super::flush::flush_tool_results;
use crate::llm::{Message, ToolDefinition, Usage};
use crate::session::{CacheState, Session};
use crate::timestamp;
use crate::types::{ContextMode, FlushSeverity, Provider};
use log::info;
use std::time::Duration;
use time::OffsetDateTime;

/// Outcome of a TTL flush.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlushReport {
    pub severity: FlushSeverity,
    /// Raw estimate of the list before trimming.
    pub tokens_before: usize,
    pub trimmed: usize,
}

#[derive(Clone, Debug)]
pub struct CacheManager {
    config: BudgetConfig,
}

impl CacheManager {
    /// Create a cache manager.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid, e.g. a zero
    /// `max_context_tokens`.
    pub fn new(config: BudgetConfig) -> Result<Self, BudgetConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub const fn config(&self) -> &BudgetConfig {
        &self.config
    }

    #[must_use]
    pub const fn max_context_tokens(&self) -> usize {
        self.config.max_context_tokens
    }

    #[must_use]
    pub fn cache_ttl(&self, model: &str) -> Duration {
        self.config.cache_ttl.get(Provider::from_model(model))
    }

    /// Estimate the context an API call would consume.
    ///
    /// Without a session, or when the session has no recorded flush, this is
    /// the raw estimate. Otherwise the recorded flush is replayed on a copy
    /// of `messages`, restricted to tool messages stamped at or before the
    /// flush time; newer results and current-turn results count at full
    /// size.
    #[must_use]
    pub fn estimate_context_tokens(
        &self,
        messages: &[Message],
        model: &str,
        tools: Option<&[ToolDefinition]>,
        session: Option<&Session>,
    ) -> usize {
        let provider = Provider::from_model(model);
        let message_tokens = match session.map(Session::cache) {
            Some(CacheState {
                last_flush_type: Some(severity),
                last_flush_at,
                ..
            }) => {
                let mut simulated = messages.to_vec();
                flush_tool_results(&mut simulated, *severity, last_flush_at.as_deref());
                TokenEstimator::estimate_history(&simulated, provider)
            }
            _ => TokenEstimator::estimate_history(messages, provider),
        };

        message_tokens + tools.map_or(0, TokenEstimator::estimate_tools)
    }

    /// Re-apply the session's last flush to a rebuilt outbound list.
    ///
    /// Mutates `messages`. Returns the number of trimmed results, or 0 when
    /// no flush was ever recorded.
    pub fn apply_previous_flush(&self, messages: &mut [Message], session: &Session) -> usize {
        let cache = session.cache();
        let Some(severity) = cache.last_flush_type else {
            return 0;
        };
        flush_tool_results(messages, severity, cache.last_flush_at.as_deref())
    }

    /// True when the provider's prompt cache has outlived its TTL.
    ///
    /// A missing or unparsable `created_at` means no cache to expire.
    #[must_use]
    pub fn should_flush(&self, session: &Session, model: &str) -> bool {
        self.should_flush_at(session, model, OffsetDateTime::now_utc())
    }

    pub(crate) fn should_flush_at(
        &self,
        session: &Session,
        model: &str,
        now: OffsetDateTime,
    ) -> bool {
        let Some(created) = session
            .cache()
            .created_at
            .as_deref()
            .and_then(timestamp::parse)
        else {
            return false;
        };
        let elapsed = now - created;
        elapsed >= self.cache_ttl(model)
    }

    /// Severity a flush taken now would use.
    ///
    /// Eco always trims extra hard; otherwise the raw context ratio picks
    /// soft (at or below `hard_flush_ratio`) or hard.
    #[must_use]
    pub fn select_severity(&self, raw_tokens: usize, mode: ContextMode) -> FlushSeverity {
        if mode == ContextMode::Eco {
            return FlushSeverity::ExtraHard;
        }
        let ratio = raw_tokens as f64 / self.config.max_context_tokens as f64;
        if ratio <= self.config.hard_flush_ratio {
            FlushSeverity::Soft
        } else {
            FlushSeverity::Hard
        }
    }

    /// Trim the outbound list in place and record the flush.
    ///
    /// Mutates `messages` (never `session.messages`). Every tool result is
    /// eligible regardless of timestamp. The session's cache metadata is
    /// replaced with the new flush time and severity; `created_at` is
    /// carried over unchanged.
    pub fn flush_messages(
        &self,
        messages: &mut [Message],
        session: &mut Session,
        model: &str,
        tools: Option<&[ToolDefinition]>,
        mode: ContextMode,
    ) -> FlushReport {
        let tokens_before = self.estimate_context_tokens(messages, model, tools, None);
        let severity = self.select_severity(tokens_before, mode);
        let trimmed = flush_tool_results(messages, severity, None);

        let created_at = session.cache().created_at.clone();
        *session.cache_mut() = CacheState {
            created_at,
            last_flush_at: Some(timestamp::now()),
            last_flush_type: Some(severity),
        };

        info!(
            "Cache flush (severity={severity}, tokens={tokens_before}, trimmed={trimmed}, session={})",
            session.key
        );

        FlushReport {
            severity,
            tokens_before,
            trimmed,
        }
    }

    /// Record prompt-cache activity from a call's usage.
    ///
    /// Sets `created_at` to now when the provider created or read cache;
    /// all-zero usage leaves the metadata alone.
    pub fn mark_cache_created(session: &mut Session, usage: &Usage) {
        if usage.touched_cache() {
            session.cache_mut().created_at = Some(timestamp::now());
        }
    }
}
