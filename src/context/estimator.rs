//! Token estimation for context size calculation.

use crate::llm::{Content, ContentBlock, Message, ToolDefinition};
use crate::types::Provider;

/// Estimates token count for messages.
///
/// Uses a fixed ratio of ~4 characters per token, a reasonable cross-model
/// approximation for English text, code and JSON. Exact tokenizer parity is
/// not a goal; the estimate only has to be cheap and predictable.
pub struct TokenEstimator;

impl TokenEstimator {
    /// Characters per token estimate.
    pub const CHARS_PER_TOKEN: usize = 4;

    /// Overhead tokens per message (role, separators).
    pub const MESSAGE_OVERHEAD: usize = 4;

    /// Estimate tokens for a text string.
    #[must_use]
    pub fn estimate_text(text: &str) -> usize {
        text.chars().count() / Self::CHARS_PER_TOKEN
    }

    /// Estimate tokens for a single image.
    ///
    /// Based on a typical ~800x600 chat image: Anthropic (w*h)/750 rounded
    /// up to 800, `OpenAI` high-detail tile average ~400, Gemini a fixed 258.
    #[must_use]
    pub const fn estimate_image(provider: Provider) -> usize {
        match provider {
            Provider::Anthropic => 800,
            Provider::OpenAi => 400,
            Provider::Gemini => 258,
        }
    }

    #[must_use]
    pub fn estimate_content(content: &Content, provider: Provider) -> usize {
        match content {
            Content::Text(text) => Self::estimate_text(text),
            Content::Blocks(blocks) => blocks
                .iter()
                .map(|block| match block {
                    ContentBlock::Text { text } => Self::estimate_text(text),
                    ContentBlock::Image { .. } => Self::estimate_image(provider),
                })
                .sum(),
        }
    }

    /// Estimate tokens for a single message, including the tool calls an
    /// assistant message issues.
    #[must_use]
    pub fn estimate_message(message: &Message, provider: Provider) -> usize {
        let call_tokens: usize = message
            .tool_calls()
            .iter()
            .map(|call| {
                Self::estimate_text(&call.function.name)
                    + Self::estimate_text(&call.function.arguments)
            })
            .sum();

        Self::MESSAGE_OVERHEAD + Self::estimate_content(message.content(), provider) + call_tokens
    }

    /// Estimate total tokens for a message history.
    #[must_use]
    pub fn estimate_history(messages: &[Message], provider: Provider) -> usize {
        messages
            .iter()
            .map(|m| Self::estimate_message(m, provider))
            .sum()
    }

    /// Estimate tokens for the tool definitions sent with a request.
    #[must_use]
    pub fn estimate_tools(tools: &[ToolDefinition]) -> usize {
        Self::estimate_text(&serde_json::to_string(tools).unwrap_or_default())
    }
}
