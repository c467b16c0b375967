//! Context budgeting for long-running tool-calling conversations.
//!
//! Two mechanisms keep the outbound request under the model's context
//! window:
//!
//! - **Flushing** trims large tool results in the outbound message list
//!   when the provider's prompt cache has expired. Stored history is never
//!   modified, and the decision is recorded so later estimates count the
//!   trimmed size instead of the full output.
//! - **Compaction** summarizes older session history with the LLM and
//!   splices a single summary marker in front of a verbatim tail. Replay
//!   starts at the last marker from then on.
//!
//! # Overview
//!
//! 1. Estimate the effective context size (see [`CacheManager`])
//! 2. Compact when it reaches the mode's threshold (see [`Compactor`])
//! 3. Flush when the cache TTL has expired, otherwise re-apply the last flush
//! 4. Send the resulting list
//!
//! [`crate::ContextGovernor`] runs these steps for each call.
//!
//! # Configuration
//!
//! Use [`BudgetConfig`] to customize budgeting:
//! - `max_context_tokens`: Context window of the model
//! - `thresholds`: Fraction of the window at which each mode compacts
//! - `cache_ttl`: Prompt-cache lifetime per provider
//! - `tail_min` / `tail_max` / `tail_token_ratio`: Size of the preserved tail

mod assembler;
mod cache;
mod compactor;
mod config;
mod estimator;
mod flush;
mod prompt;

pub use assembler::{ContextAssembler, SystemPromptAssembler};
pub use cache::{CacheManager, FlushReport};
pub use compactor::{CompactionOutcome, CompactionResult, CompactionStats, Compactor, SkipReason};
pub use config::{BudgetConfig, BudgetConfigError, ModeThresholds, ProviderTtls};
pub use estimator::TokenEstimator;
pub use flush::{TRIM_TAG, flush_for_compaction, flush_tool_results};
pub use prompt::COMPACTION_SYSTEM_PROMPT;
