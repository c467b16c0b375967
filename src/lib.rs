//! Agent Budget - context-window budgeting for tool-calling LLM agents.
//!
//! This crate decides, call by call, how much of an accumulating
//! conversation can be sent to the model:
//! - Token estimation for messages, images and tool definitions
//! - Non-destructive flushing of large tool results in the outbound request
//! - LLM-backed compaction of session history behind a verbatim tail
//! - Per-call orchestration that keeps estimates consistent across turns
//!
//! # Example
//!
//! ```ignore
//! use agent_budget::{
//!     ContextGovernor, ContextMode, InMemorySessionStore, Message, SessionStore,
//!     context::{BudgetConfig, SystemPromptAssembler},
//! };
//!
//! let governor = ContextGovernor::new(
//!     provider,
//!     SystemPromptAssembler::new("You are a helpful assistant."),
//!     BudgetConfig::default(),
//!     "anthropic/claude-sonnet-4-5",
//! )?
//! .with_mode(ContextMode::Eco);
//!
//! let store = InMemorySessionStore::new();
//! let mut session = store.load_or_create("telegram:42").await?;
//! let mut turn = governor.start_turn(&session, Message::user("Hello!"));
//!
//! let call = governor.prepare_call(&mut session, &mut turn, None).await;
//! // send call.api_messages to the provider, then:
//! governor.record_response(&mut session, &response);
//! store.save(&session).await?;
//! ```

#![forbid(unsafe_code)]

pub mod context;
mod governor;
pub mod llm;
pub mod session;
mod stores;
pub mod timestamp;
mod types;

#[cfg(test)]
pub(crate) mod test_utils;

pub use context::{BudgetConfig, CacheManager, Compactor, ContextAssembler, TokenEstimator};
pub use governor::{
    BudgetReport, ContextGovernor, ContextUsage, ManualCompaction, PreparedCall, TurnState,
};
pub use llm::{LlmProvider, Message};
pub use session::{CacheState, Session, SessionMessage};
pub use stores::{InMemorySessionStore, SessionStore};
pub use types::{ContextMode, FlushSeverity, ParseEnumError, Provider};
