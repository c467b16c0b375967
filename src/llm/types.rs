use serde::{Deserialize, Serialize};

/// Request sent to an [`LlmProvider`](super::LlmProvider).
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Option<Vec<ToolDefinition>>,
    pub model: String,
    pub temperature: Option<f32>,
}

/// Chat message in the generic role/content/tool_calls shape.
///
/// Provider adapters translate this into their own wire format. The `_ts`
/// field carries the timestamp of the session message a history entry was
/// replayed from; messages produced during the current turn have none.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        content: Content,
        #[serde(rename = "_ts", default, skip_serializing_if = "Option::is_none")]
        ts: Option<String>,
    },
    User {
        content: Content,
        #[serde(rename = "_ts", default, skip_serializing_if = "Option::is_none")]
        ts: Option<String>,
    },
    Assistant {
        #[serde(default, deserialize_with = "nullable_content")]
        content: Content,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
        #[serde(rename = "_ts", default, skip_serializing_if = "Option::is_none")]
        ts: Option<String>,
    },
    Tool {
        tool_call_id: String,
        #[serde(default)]
        name: String,
        content: Content,
        #[serde(rename = "_ts", default, skip_serializing_if = "Option::is_none")]
        ts: Option<String>,
    },
}

impl Message {
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::System {
            content: Content::Text(text.into()),
            ts: None,
        }
    }

    #[must_use]
    pub fn user(text: impl Into<String>) -> Self {
        Self::User {
            content: Content::Text(text.into()),
            ts: None,
        }
    }

    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Assistant {
            content: Content::Text(text.into()),
            tool_calls: Vec::new(),
            ts: None,
        }
    }

    #[must_use]
    pub fn assistant_with_tool_calls(text: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self::Assistant {
            content: Content::Text(text.unwrap_or_default()),
            tool_calls,
            ts: None,
        }
    }

    #[must_use]
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::Tool {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            content: Content::Text(content.into()),
            ts: None,
        }
    }

    /// Attach the originating session timestamp.
    #[must_use]
    pub fn with_ts(mut self, stamp: impl Into<String>) -> Self {
        *self.ts_slot() = Some(stamp.into());
        self
    }

    #[must_use]
    pub const fn role(&self) -> Role {
        match self {
            Self::System { .. } => Role::System,
            Self::User { .. } => Role::User,
            Self::Assistant { .. } => Role::Assistant,
            Self::Tool { .. } => Role::Tool,
        }
    }

    #[must_use]
    pub const fn content(&self) -> &Content {
        match self {
            Self::System { content, .. }
            | Self::User { content, .. }
            | Self::Assistant { content, .. }
            | Self::Tool { content, .. } => content,
        }
    }

    pub const fn content_mut(&mut self) -> &mut Content {
        match self {
            Self::System { content, .. }
            | Self::User { content, .. }
            | Self::Assistant { content, .. }
            | Self::Tool { content, .. } => content,
        }
    }

    #[must_use]
    pub fn ts(&self) -> Option<&str> {
        match self {
            Self::System { ts, .. }
            | Self::User { ts, .. }
            | Self::Assistant { ts, .. }
            | Self::Tool { ts, .. } => ts.as_deref(),
        }
    }

    const fn ts_slot(&mut self) -> &mut Option<String> {
        match self {
            Self::System { ts, .. }
            | Self::User { ts, .. }
            | Self::Assistant { ts, .. }
            | Self::Tool { ts, .. } => ts,
        }
    }

    /// Tool calls issued by an assistant message (empty for other roles).
    #[must_use]
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Self::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    /// Copy for the provider wire: identical except `_ts` is dropped.
    #[must_use]
    pub fn without_ts(&self) -> Self {
        let mut copy = self.clone();
        *copy.ts_slot() = None;
        copy
    }
}

fn nullable_content<'de, D>(deserializer: D) -> Result<Content, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Content>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl Default for Content {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

impl Content {
    /// Plain string content, if this is not a block list.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Blocks(_) => None,
        }
    }

    /// All text joined with newlines; images are rendered as `[image]`.
    #[must_use]
    pub fn flatten(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .map(|b| match b {
                    ContentBlock::Text { text } => text.as_str(),
                    ContentBlock::Image { .. } => "[image]",
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.is_empty(),
            Self::Blocks(blocks) => blocks.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "image_url", alias = "image")]
    Image {
        #[serde(default)]
        image_url: serde_json::Value,
    },
}

/// A tool invocation requested by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_kind")]
    pub kind: String,
    pub function: FunctionCall,
}

impl ToolCall {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: &serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            kind: function_kind(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.to_string(),
            },
        }
    }
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-serialized argument object.
    #[serde(default)]
    pub arguments: String,
}

/// Tool definition advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct ChatResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub model: String,
    pub usage: Usage,
}

impl ChatResponse {
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Token accounting reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cache_creation_input_tokens: u32,
    pub cache_read_input_tokens: u32,
}

impl Usage {
    /// True when the provider wrote to or read from its prompt cache.
    #[must_use]
    pub const fn touched_cache(&self) -> bool {
        self.cache_creation_input_tokens > 0 || self.cache_read_input_tokens > 0
    }
}

#[derive(Debug)]
pub enum ChatOutcome {
    Success(ChatResponse),
    RateLimited,
    InvalidRequest(String),
    ServerError(String),
}
